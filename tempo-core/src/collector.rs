//! The background sample collector.
//!
//! A single task owned by the application. It blocks in the channel
//! receive, and for each `SampleReq` runs one consolidation round: raise
//! every slot's `consolidate` flag, wait for the workers to publish, then
//! cross-thread aggregate and reply.

use crate::application::Shared;
use crate::error::ProtocolError;
use crate::time::now_ns;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempo_ipc::{ChannelError, Message, Sample, MAX_CUSTOM_FIELDS};
use tracing::{debug, trace};

pub(crate) fn run(shared: Arc<Shared>) -> Result<(), ProtocolError> {
    while !shared.support_stop.load(Ordering::Acquire) {
        let msg = match shared.channel.recv() {
            Ok(msg) => msg,
            // The read timeout is the collector's chance to observe the
            // stop flag when the monitor has gone quiet.
            Err(ChannelError::TimedOut) => continue,
            Err(e) => return Err(e.into()),
        };

        let from_all_threads = match msg {
            Message::SampleReq { from_all_threads } => from_all_threads,
            other => {
                return Err(ProtocolError::Unexpected {
                    expected: "SampleReq",
                    got: other,
                })
            }
        };

        let reply = consolidate(&shared, from_all_threads);

        // A stop raised mid-round wins over the reply: the closing
        // STOP/STOPACK handshake will settle the stream.
        if shared.support_stop.load(Ordering::Acquire) {
            debug!("dropping sample reply, termination in progress");
            continue;
        }
        trace!(%reply, "sending sample");
        shared.channel.send(&Message::SampleRes {
            sample: reply,
            phase_id: shared.phase_id.load(Ordering::Relaxed),
            total_threads: shared.total_threads.load(Ordering::Relaxed),
        })?;
    }
    Ok(())
}

/// Runs one consolidation round and aggregates the published samples.
fn consolidate(shared: &Shared, from_all_threads: bool) -> Sample {
    let config = *shared.config.read();

    for slot in shared.slots.iter() {
        slot.consolidate.store(true, Ordering::Release);
    }
    let consolidation_timestamp = now_ns();

    let mut reply = Sample::default();
    let mut contributed = 0usize;
    let mut inconsistent = 0usize;
    let mut custom_values: [Vec<f64>; MAX_CUSTOM_FIELDS] =
        std::array::from_fn(|_| Vec::with_capacity(shared.slots.len()));

    for slot in shared.slots.iter() {
        // After a consolidation request, a worker publishes within one
        // sampling window. Sleep out the remainder of that window, then
        // fall back to a 1 ms poll. A raised stop flag preempts the wait;
        // so does a quick-reply request, which takes only what is already
        // published.
        while slot.consolidate.load(Ordering::Acquire) {
            if !from_all_threads || shared.support_stop.load(Ordering::Acquire) {
                break;
            }
            let elapsed_ms = (now_ns() - consolidation_timestamp) as f64 / 1e6;
            if elapsed_ms > config.sampling_length_ms {
                std::thread::sleep(Duration::from_millis(1));
            } else {
                std::thread::sleep(Duration::from_secs_f64(
                    (config.sampling_length_ms - elapsed_ms) / 1e3,
                ));
            }
        }
        if slot.consolidate.load(Ordering::Acquire) {
            // Still pending: the worker never got there (stalled, or quick
            // reply). It simply does not contribute to this round.
            continue;
        }

        // SAFETY: the flag was observed clear with acquire ordering; the
        // worker will not touch the published sample until the flag is
        // raised again by a later round.
        let consolidated = unsafe { slot.consolidated_mut() };
        let mut sample = *consolidated;
        // Reset so a later round cannot replay a stale window.
        *consolidated = Sample::default();

        if sample.inconsistent {
            inconsistent += 1;
        } else {
            if sample.num_tasks > 0.0 {
                sample.latency /= sample.num_tasks;
            }
            reply.load_percentage += sample.load_percentage;
            reply.latency += sample.latency;
        }
        // Throughput and task counts are trustworthy even when latency is
        // not.
        reply.throughput += sample.throughput;
        reply.num_tasks += sample.num_tasks;
        contributed += 1;

        for (index, values) in custom_values.iter_mut().enumerate() {
            values.push(sample.custom_fields[index]);
        }
    }

    if contributed > 0 {
        let num_threads = shared.slots.len();
        if config.adjust_throughput && contributed != num_threads {
            reply.throughput +=
                (reply.throughput / contributed as f64) * (num_threads - contributed) as f64;
        }

        let consistent = contributed - inconsistent;
        if consistent == 0 {
            reply.inconsistent = true;
        } else {
            reply.load_percentage /= consistent as f64;
            reply.latency /= consistent as f64;
        }
    }
    if shared.mark_inconsistent.load(Ordering::Relaxed) {
        reply.inconsistent = true;
    }

    if let Some(aggregator) = &shared.aggregator {
        for (index, values) in custom_values.iter().enumerate() {
            reply.custom_fields[index] = aggregator.aggregate(index, values);
        }
    }

    reply
}
