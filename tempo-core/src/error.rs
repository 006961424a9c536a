//! Protocol-level errors shared by both peers.

use tempo_ipc::{ChannelError, Message};
use thiserror::Error;

/// Fatal failure of the request/response protocol.
///
/// Usage errors on the hot path panic instead: they are programming bugs
/// in the instrumented loop, and the hot path cannot afford a `Result`.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("unexpected message: expected {expected}, got {got:?}")]
    Unexpected {
        expected: &'static str,
        got: Message,
    },

    #[error("support worker panicked")]
    WorkerPanicked,
}
