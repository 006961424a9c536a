//! Tempo IPC Protocol
//!
//! The monitor channel: a URI-addressed duplex transport plus a fixed-size
//! versioned frame codec. One logical operation always maps to exactly one
//! frame, so both stream transports (`ipc://`, `tcp://`) preserve message
//! boundaries by construction.

mod channel;
mod frame;
mod messages;
mod sample;

pub use channel::{Channel, ChannelError, Listener};
pub use frame::{decode_frame, encode_frame, FrameError, FRAME_SIZE};
pub use messages::Message;
pub use sample::{ParseSampleError, Sample};

/// Protocol version carried in every frame header.
pub const PROTOCOL_VERSION: u16 = 1;

/// Number of user-defined counter slots in a [`Sample`].
///
/// Both peers of a channel must agree on this value; it is baked into the
/// frame layout.
pub const MAX_CUSTOM_FIELDS: usize = 4;
