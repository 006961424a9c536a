//! Monitor-side endpoint.
//!
//! The monitor is the passive peer's counterpart: it binds the channel,
//! waits for the application to announce itself, then polls for aggregated
//! samples until the application terminates.

use crate::error::ProtocolError;
use tempo_ipc::{Channel, ChannelError, Listener, Message, Sample};
use tracing::debug;

enum MonitorChannel {
    /// Bound, application peer not yet connected.
    Pending(Listener),
    Ready(Channel),
}

/// Out-of-process observer of one instrumented application.
pub struct Monitor {
    channel: MonitorChannel,
    execution_time_ms: u64,
    total_tasks: u64,
    last_phase_id: u32,
    last_total_threads: u32,
}

impl Monitor {
    /// Binds the monitor endpoint at `uri`. The application peer is
    /// accepted lazily, on the first receive.
    pub fn bind(uri: &str) -> Result<Self, ChannelError> {
        Ok(Self::from_channel(MonitorChannel::Pending(Listener::bind(
            uri,
        )?)))
    }

    /// Builds a monitor over an already-established channel endpoint.
    pub fn with_channel(channel: Channel) -> Self {
        Self::from_channel(MonitorChannel::Ready(channel))
    }

    fn from_channel(channel: MonitorChannel) -> Self {
        Monitor {
            channel,
            execution_time_ms: 0,
            total_tasks: 0,
            last_phase_id: 0,
            last_total_threads: 0,
        }
    }

    fn channel(&mut self) -> Result<&Channel, ChannelError> {
        if let MonitorChannel::Pending(listener) = &self.channel {
            let channel = listener.accept()?;
            self.channel = MonitorChannel::Ready(channel);
        }
        match &self.channel {
            MonitorChannel::Ready(channel) => Ok(channel),
            MonitorChannel::Pending(_) => unreachable!("accepted above"),
        }
    }

    /// Blocks until the application starts, returning its process
    /// identifier.
    pub fn wait_start(&mut self) -> Result<u32, ProtocolError> {
        match self.channel()?.recv()? {
            Message::Start { pid } => {
                debug!(pid, "application started");
                Ok(pid)
            }
            other => Err(ProtocolError::Unexpected {
                expected: "Start",
                got: other,
            }),
        }
    }

    /// Requests one aggregated sample.
    ///
    /// Returns `Some(sample)` while the application runs. Returns `None`
    /// once the application has terminated; at that point the final
    /// summary is available through [`execution_time_ms`](Self::execution_time_ms)
    /// and [`total_tasks`](Self::total_tasks), and the stop
    /// acknowledgement has already been sent.
    pub fn sample(&mut self) -> Result<Option<Sample>, ProtocolError> {
        let channel = self.channel()?;
        channel.send(&Message::SampleReq {
            from_all_threads: true,
        })?;
        match channel.recv()? {
            Message::SampleRes {
                sample,
                phase_id,
                total_threads,
            } => {
                self.last_phase_id = phase_id;
                self.last_total_threads = total_threads;
                Ok(Some(sample))
            }
            Message::Stop {
                execution_time_ms,
                total_tasks,
            } => {
                channel.send(&Message::StopAck)?;
                debug!(execution_time_ms, total_tasks, "application terminated");
                self.execution_time_ms = execution_time_ms;
                self.total_tasks = total_tasks;
                Ok(None)
            }
            other => Err(ProtocolError::Unexpected {
                expected: "SampleRes or Stop",
                got: other,
            }),
        }
    }

    /// Application execution time in milliseconds, first `begin` to last
    /// `end`. Valid once [`sample`](Self::sample) has returned `None`.
    pub fn execution_time_ms(&self) -> u64 {
        self.execution_time_ms
    }

    /// Total tasks computed by the application. Valid once
    /// [`sample`](Self::sample) has returned `None`.
    pub fn total_tasks(&self) -> u64 {
        self.total_tasks
    }

    /// Phase identifier carried by the most recent sample, 0 if unset.
    pub fn phase_id(&self) -> u32 {
        self.last_phase_id
    }

    /// Threads participating in the current phase as reported by the
    /// application, 0 if unknown.
    pub fn total_threads(&self) -> u32 {
        self.last_total_threads
    }
}
