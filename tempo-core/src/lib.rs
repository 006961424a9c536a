//! Tempo — nanosecond-resolution instrumentation for tight parallel loops.
//!
//! An instrumented program brackets each iteration of its compute loop with
//! [`Application::begin`] / [`Application::end`], one pair per worker
//! thread. A sibling monitor process observes it over an IPC channel,
//! requesting aggregated throughput / latency / load samples on demand.
//!
//! The hot path is lock-free and cheap enough for loop bodies in the tens
//! of nanoseconds: an adaptive stride skips most iterations and lets one
//! recorded measurement stand for the whole stride, sized so that one
//! published sample covers a configurable wall-clock window.
//!
//! # Example
//!
//! ```no_run
//! use tempo_core::{Application, Monitor};
//!
//! // Monitor process:
//! let mut monitor = Monitor::bind("ipc:///tmp/demo.ipc")?;
//! let pid = monitor.wait_start()?;
//! while let Some(sample) = monitor.sample()? {
//!     println!("{sample}");
//! }
//!
//! // Application process:
//! let mut app = Application::connect("ipc:///tmp/demo.ipc", 1, None)?;
//! for _ in 0..1_000_000 {
//!     app.begin(0);
//!     // ... compute ...
//!     app.end(0);
//! }
//! app.terminate()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod application;
mod collector;
mod config;
mod error;
mod monitor;
mod slot;
mod time;

pub use application::{Aggregate, Application};
pub use config::Config;
pub use error::ProtocolError;
pub use monitor::Monitor;

// The channel and sample types are part of the public surface on both
// sides of the protocol.
pub use tempo_ipc::{Channel, ChannelError, Listener, Message, Sample, MAX_CUSTOM_FIELDS};
