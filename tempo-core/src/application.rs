//! Application-side instrumentation.
//!
//! An [`Application`] is linked into the workload. Worker threads demarcate
//! each iteration of the instrumented loop with [`begin`](Application::begin)
//! and [`end`](Application::end); a background worker answers the monitor's
//! sample requests (see `collector`); `terminate` runs the closing
//! handshake.

use crate::collector;
use crate::config::Config;
use crate::error::ProtocolError;
use crate::slot::{new_slots, SlotState, ThreadSlot, DEFAULT_SAMPLING_LENGTH};
use crate::time::now_ns;
use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tempo_ipc::{Channel, ChannelError, Message, Sample, MAX_CUSTOM_FIELDS};
use tracing::debug;

/// How long the background worker blocks in a channel receive before
/// re-checking the stop flag. Keeps `terminate` from hanging on a monitor
/// that has gone quiet.
const COLLECTOR_POLL_INTERVAL_MS: u64 = 100;

/// User-supplied reducer for custom counter values stored by multiple
/// threads. Called by at most one thread at a time.
pub trait Aggregate: Send + Sync {
    /// Reduces the per-thread `values` of custom field `index` to the
    /// single value published to the monitor.
    fn aggregate(&self, index: usize, values: &[f64]) -> f64;
}

/// State shared between the worker threads, the driver thread and the
/// background collector.
pub(crate) struct Shared {
    pub config: RwLock<Config>,
    pub slots: Box<[CachePadded<ThreadSlot>]>,
    pub channel: Channel,
    pub support_stop: AtomicBool,
    pub phase_id: AtomicU32,
    pub total_threads: AtomicU32,
    pub mark_inconsistent: AtomicBool,
    pub aggregator: Option<Box<dyn Aggregate>>,
    started: AtomicBool,
    start_lock: Mutex<()>,
}

/// Application-side endpoint of the instrumentation channel.
///
/// One `Application` instruments exactly one phase of one program. Worker
/// thread `i` must be the only caller passing `thread_id == i`; that is
/// what makes the hot path lock-free.
pub struct Application {
    shared: Arc<Shared>,
    collector: Option<JoinHandle<Result<(), ProtocolError>>>,
    execution_time_ms: u64,
    total_tasks: u64,
}

impl Application {
    /// Connects to a monitor bound at `uri` and spawns the background
    /// sample collector.
    pub fn connect(
        uri: &str,
        num_threads: usize,
        aggregator: Option<Box<dyn Aggregate>>,
    ) -> Result<Self, ChannelError> {
        let channel = Channel::connect(uri)?;
        Self::with_channel(channel, num_threads, aggregator)
    }

    /// Builds an application over an already-connected channel endpoint.
    pub fn with_channel(
        channel: Channel,
        num_threads: usize,
        aggregator: Option<Box<dyn Aggregate>>,
    ) -> Result<Self, ChannelError> {
        assert!(num_threads >= 1, "at least one instrumented thread");
        channel.set_read_timeout(Some(std::time::Duration::from_millis(
            COLLECTOR_POLL_INTERVAL_MS,
        )))?;

        let shared = Arc::new(Shared {
            config: RwLock::new(Config::default()),
            slots: new_slots(num_threads),
            channel,
            support_stop: AtomicBool::new(false),
            phase_id: AtomicU32::new(0),
            total_threads: AtomicU32::new(0),
            mark_inconsistent: AtomicBool::new(false),
            aggregator,
            started: AtomicBool::new(false),
            start_lock: Mutex::new(()),
        });

        // Spawning the collector must be the last step of construction.
        let worker_shared = Arc::clone(&shared);
        let collector = std::thread::Builder::new()
            .name("tempo-collector".to_string())
            .spawn(move || collector::run(worker_shared))
            .map_err(ChannelError::Io)?;

        Ok(Application {
            shared,
            collector: Some(collector),
            execution_time_ms: 0,
            total_tasks: 0,
        })
    }

    /// Installs `config`. Must be called before the first `begin`.
    pub fn set_configuration(&mut self, config: Config) {
        *self.shared.config.write() = config;
    }

    /// Marks the start of the compute section of one loop iteration.
    ///
    /// Calls must alternate `begin … end … begin … end` per thread; two
    /// `begin` calls without an intervening `end` are a usage error.
    ///
    /// # Panics
    ///
    /// Panics if `thread_id` is not below the thread count given at
    /// construction, or if the start notification cannot be delivered.
    #[inline]
    pub fn begin(&self, thread_id: usize) {
        let slot = &*self.shared.slots[thread_id];
        // SAFETY: `thread_id` identifies the calling worker uniquely
        // (constructor contract), so no other reference to this state
        // exists.
        let state = unsafe { slot.state_mut() };

        state.current_sample = if state.current_sample + 1 >= state.sampling_length {
            0
        } else {
            state.current_sample + 1
        };

        // Fast skip: positions past 1 record nothing.
        if state.current_sample > 1 {
            return;
        }

        if !self.shared.started.load(Ordering::Acquire) {
            self.notify_start_once();
        }

        let now = now_ns();
        if state.first_begin == 0 {
            state.first_begin = now;
        }
        if state.sample_start_time == 0 {
            state.sample_start_time = now;
        }

        // Closing a window needs two consecutive recorded begins: position 0
        // starts the latency timer, position 1 observes the idle gap timed
        // from the preceding end. With a stride of 1 both halves run here.
        if state.compute_start != 0 && (state.current_sample == 1 || state.sampling_length == 1) {
            self.close_window(slot, state, now);
        }
        state.compute_start = now;
    }

    /// Marks the end of the compute section of one loop iteration.
    ///
    /// # Panics
    ///
    /// Panics if `thread_id` is not below the thread count given at
    /// construction.
    #[inline]
    pub fn end(&self, thread_id: usize) {
        let slot = &*self.shared.slots[thread_id];
        // SAFETY: as in `begin`.
        let state = unsafe { slot.state_mut() };

        // Only position 0 (the recorded begin) closes a measurement.
        if state.current_sample != 0 {
            return;
        }
        debug_assert!(state.compute_start != 0, "end() before any begin()");

        let now = now_ns();
        state.rcv_start = now;

        // One measured pair stands for the whole stride: the skipped
        // iterations are assumed to have had the same latency.
        let latency = (now - state.compute_start) as f64;
        state.live.latency += latency * state.sampling_length as f64;
        state.live.num_tasks += state.sampling_length as f64;
        state.total_tasks += state.sampling_length;
        state.last_end = now;
    }

    /// Stores a custom counter in the calling thread's working sample.
    /// Call it between `begin` and `end`, or right after `end`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= MAX_CUSTOM_FIELDS` or `thread_id` is out of
    /// range.
    pub fn store_custom_value(&self, index: usize, value: f64, thread_id: usize) {
        assert!(
            index < MAX_CUSTOM_FIELDS,
            "custom field index {index} out of range (max {MAX_CUSTOM_FIELDS})"
        );
        let slot = &*self.shared.slots[thread_id];
        // SAFETY: as in `begin`.
        let state = unsafe { slot.state_mut() };
        state.live.custom_fields[index] = value;
    }

    /// Tags subsequent samples with a phase identifier. `total_threads` is
    /// the number of threads contributing to the phase, which may exceed
    /// the number of instrumented worker indices (e.g. one instrumented
    /// driver fanning out to an uninstrumented pool); pass 0 if unknown.
    pub fn set_phase_id(&self, phase_id: u32, total_threads: u32) {
        self.shared.phase_id.store(phase_id, Ordering::Relaxed);
        self.set_total_threads(total_threads);
    }

    /// Sets the number of threads contributing to the current phase.
    pub fn set_total_threads(&self, total_threads: u32) {
        self.shared
            .total_threads
            .store(total_threads, Ordering::Relaxed);
    }

    /// Forces every subsequent published sample to carry the inconsistent
    /// flag. For workloads where latency and load are structurally
    /// unmeasurable (e.g. only the receiving half of a pipeline is
    /// instrumented) while throughput remains valid.
    pub fn mark_inconsistent_samples(&self) {
        self.shared.mark_inconsistent.store(true, Ordering::Relaxed);
    }

    /// Runs the termination handshake: joins the collector, sends the
    /// final summary and waits for the monitor's acknowledgement.
    ///
    /// Call once, from the driver thread, after every worker has left the
    /// instrumented region.
    pub fn terminate(&mut self) -> Result<(), ProtocolError> {
        let mut first_begin = u64::MAX;
        let mut last_end = 0u64;
        let mut total_tasks = 0u64;
        for slot in self.shared.slots.iter() {
            // SAFETY: all workers have quiesced (caller contract).
            let state = unsafe { slot.state_mut() };
            // Under a stride > 1 the tail of skipped iterations was never
            // rolled into the counters; recover it here. This can overcount
            // by up to `sampling_length - 1` per thread.
            state.total_tasks += state.current_sample;
            total_tasks += state.total_tasks;
            if state.first_begin != 0 {
                first_begin = first_begin.min(state.first_begin);
            }
            last_end = last_end.max(state.last_end);
        }
        self.total_tasks = total_tasks;
        self.execution_time_ms = if first_begin == u64::MAX {
            0
        } else {
            last_end.saturating_sub(first_begin) / 1_000_000
        };

        self.shared.support_stop.store(true, Ordering::Release);
        if let Some(handle) = self.collector.take() {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => return Err(ProtocolError::WorkerPanicked),
            }
        }

        debug!(
            execution_time_ms = self.execution_time_ms,
            total_tasks = self.total_tasks,
            "sending final summary"
        );
        self.shared.channel.set_read_timeout(None)?;
        self.shared.channel.send(&Message::Stop {
            execution_time_ms: self.execution_time_ms,
            total_tasks: self.total_tasks,
        })?;
        loop {
            match self.shared.channel.recv()? {
                Message::StopAck => return Ok(()),
                // A request that raced with shutdown is still queued on
                // the channel; it will never be answered, the monitor is
                // already reading our Stop.
                Message::SampleReq { .. } => continue,
                other => {
                    return Err(ProtocolError::Unexpected {
                        expected: "StopAck",
                        got: other,
                    })
                }
            }
        }
    }

    /// Wall-clock execution time in milliseconds, from the first `begin`
    /// to the last `end` across all threads. Valid after `terminate`.
    pub fn execution_time_ms(&self) -> u64 {
        self.execution_time_ms
    }

    /// Total tasks computed across all threads. Valid after `terminate`.
    pub fn total_tasks(&self) -> u64 {
        self.total_tasks
    }

    /// One-shot start notification, double-checked so the steady hot path
    /// pays a single atomic load.
    #[cold]
    fn notify_start_once(&self) {
        let _guard = self.shared.start_lock.lock();
        if self.shared.started.load(Ordering::Relaxed) {
            return;
        }
        let pid = std::process::id();
        debug!(pid, "notifying monitor of application start");
        if let Err(e) = self.shared.channel.send(&Message::Start { pid }) {
            panic!("failed to notify monitor of application start: {e}");
        }
        self.shared.started.store(true, Ordering::Release);
    }

    /// Closes the current sampling window on the qualifying `begin`.
    fn close_window(&self, slot: &ThreadSlot, state: &mut SlotState, now: u64) {
        // Only one idle gap is timed per window; the skipped iterations are
        // assumed to have idled equally.
        state.idle_time += (now - state.rcv_start) * state.sampling_length;

        let sample_time = now - state.sample_start_time;
        let sample_time_estimated = state.live.latency + state.idle_time as f64;
        let sample_time_f = sample_time as f64;

        state.live.throughput = state.live.num_tasks / (sample_time_f / 1e9);
        state.live.load_percentage = (state.live.latency / sample_time_f) * 100.0;

        let config = *self.shared.config.read();
        let old_sampling_length = state.sampling_length;
        let new_sampling_length = if config.sampling_length_ms != 0.0 {
            update_sampling_length(state.live.num_tasks, sample_time, config.sampling_length_ms)
        } else {
            old_sampling_length
        };

        if slot.consolidate.load(Ordering::Acquire) {
            // SAFETY: the flag is set, so the collector will not touch the
            // published sample until the release store below.
            let consolidated = unsafe { slot.consolidated_mut() };
            *consolidated = state.live;

            // If the measured window disagrees with the latency+idle
            // estimate beyond the threshold, a skewed stride picked an
            // unrepresentative iteration: latency and load are unreliable.
            let gap_pct =
                ((sample_time_f - sample_time_estimated).abs() / sample_time_f) * 100.0;
            if gap_pct > config.consistency_threshold {
                // With adaptation disabled every iteration is recorded and
                // the window time telescopes exactly into latency + idle;
                // a gap can then only come from unbalanced begin/end calls.
                assert!(
                    config.sampling_length_ms != 0.0,
                    "window time disagrees with its components while every \
                     iteration is recorded; begin/end calls are unbalanced"
                );
                consolidated.inconsistent = true;
            }

            state.live = Sample::default();
            state.idle_time = 0;
            state.sample_start_time = now;
            slot.consolidate.store(false, Ordering::Release);
        }

        state.sampling_length = new_sampling_length;

        // Raising the stride from 1 leaves current_sample at 0, which would
        // make the very next end() close against the new stride; force the
        // counter to 1 so the pending pair still records.
        if old_sampling_length == 1 && state.sampling_length > 1 {
            state.current_sample = 1;
        }
        // Lowering to 1 admits only position 0.
        if old_sampling_length > 1 && state.sampling_length == 1 {
            state.current_sample = 0;
        }
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        // terminate() normally joins the collector; make drop safe without
        // it so construction errors and tests tear down cleanly.
        self.shared.support_stop.store(true, Ordering::Release);
        if let Some(handle) = self.collector.take() {
            let _ = handle.join();
        }
    }
}

/// Picks the stride so that one window spans roughly `target_ms` of wall
/// time at the most recently observed per-task latency.
fn update_sampling_length(num_tasks: f64, sample_time_ns: u64, target_ms: f64) -> u64 {
    assert!(
        num_tasks > 0.0,
        "no tasks recorded in a closing window; begin() was called twice \
         in a row without an intervening end()"
    );
    let latency_ms = (sample_time_ns as f64 / num_tasks) / 1e6;
    if latency_ms == 0.0 {
        DEFAULT_SAMPLING_LENGTH
    } else {
        (target_ms / latency_ms).ceil() as u64
    }
}
