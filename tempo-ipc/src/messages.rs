//! Message catalogue for the monitor channel.

use crate::Sample;
use serde::{Deserialize, Serialize};

/// One protocol message. Every variant encodes to exactly one frame.
///
/// The monitor drives the exchange: the application only speaks first for
/// the one-shot `Start` notification and the final `Stop` summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Emitted by the application on the first `begin` call anywhere.
    Start {
        /// Process identifier of the instrumented application.
        pid: u32,
    },
    /// Monitor asks for one aggregated sample.
    SampleReq {
        /// When true, wait until every worker thread has published its
        /// window. When false, aggregate only what is already consolidated.
        from_all_threads: bool,
    },
    /// Application's reply to [`Message::SampleReq`].
    SampleRes {
        sample: Sample,
        /// Identifier of the current computation phase, 0 if unset.
        phase_id: u32,
        /// Threads participating in the phase; may exceed the number of
        /// instrumented worker indices. 0 if unknown.
        total_threads: u32,
    },
    /// Final summary, sent once after the support worker has been joined.
    Stop {
        execution_time_ms: u64,
        total_tasks: u64,
    },
    /// Monitor's acknowledgement of [`Message::Stop`]; the application
    /// tears the channel down only after receiving it.
    StopAck,
}
