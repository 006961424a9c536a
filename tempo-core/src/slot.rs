//! Per-thread accounting slots.
//!
//! Each worker thread owns one [`ThreadSlot`]. The hot path mutates only the
//! caller's slot; the consolidator worker touches a slot's published sample
//! only through the `consolidate` flag handshake. Slots are cache-padded so
//! no two slots, nor a slot and the consolidator's polling, share a line.
//!
//! # Safety
//!
//! Slot interiors are `UnsafeCell`s with a two-party ownership protocol:
//!
//! - `state` belongs to the worker registered for this slot index, always.
//!   The one exception is `terminate`, which runs after every worker has
//!   left its instrumented region (caller contract).
//! - `consolidated` belongs to the worker while `consolidate` is `true`
//!   and to the consolidator while it is `false`. Hand-over is a release
//!   store of the flag, observed with an acquire load, so writes on one
//!   side happen-before reads on the other.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::AtomicBool;
use tempo_ipc::Sample;

/// Stride used until the first adaptive update, and whenever adaptation
/// cannot produce an estimate. Records every iteration.
pub(crate) const DEFAULT_SAMPLING_LENGTH: u64 = 1;

/// Accounting state touched only by the owning worker.
#[derive(Debug)]
pub(crate) struct SlotState {
    /// Working sample being accumulated for the current window.
    pub live: Sample,
    /// Timestamp of the most recent `end`.
    pub rcv_start: u64,
    /// Timestamp of the most recent recorded `begin`.
    pub compute_start: u64,
    /// Idle nanoseconds accumulated in the current window.
    pub idle_time: u64,
    /// First `begin` ever seen on this thread (0 = none yet).
    pub first_begin: u64,
    /// Last `end` ever seen on this thread.
    pub last_end: u64,
    /// Start of the current sampling window (0 = not yet started).
    pub sample_start_time: u64,
    /// Cumulative task count across all windows.
    pub total_tasks: u64,
    /// Current stride: iterations represented by one recorded measurement.
    pub sampling_length: u64,
    /// Position within the stride; 0 and 1 select the recorded halves.
    pub current_sample: u64,
}

impl Default for SlotState {
    fn default() -> Self {
        SlotState {
            live: Sample::default(),
            rcv_start: 0,
            compute_start: 0,
            idle_time: 0,
            first_begin: 0,
            last_end: 0,
            sample_start_time: 0,
            total_tasks: 0,
            sampling_length: DEFAULT_SAMPLING_LENGTH,
            current_sample: 0,
        }
    }
}

/// One worker's slot plus the single cross-thread synchronization variable.
pub(crate) struct ThreadSlot {
    state: UnsafeCell<SlotState>,
    consolidated: UnsafeCell<Sample>,
    /// Set by the consolidator to request publication of `live`; cleared by
    /// the worker once `consolidated` holds the finished window.
    pub consolidate: AtomicBool,
}

// SAFETY: interior access follows the ownership protocol in the module
// docs; the only concurrently-touched word is `consolidate`, an atomic.
unsafe impl Sync for ThreadSlot {}

impl ThreadSlot {
    pub fn new() -> Self {
        ThreadSlot {
            state: UnsafeCell::new(SlotState::default()),
            consolidated: UnsafeCell::new(Sample::default()),
            consolidate: AtomicBool::new(false),
        }
    }

    /// Worker-owned accounting state.
    ///
    /// # Safety
    ///
    /// Caller must be the worker owning this slot index, or `terminate`
    /// running after all workers have quiesced.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn state_mut(&self) -> &mut SlotState {
        unsafe { &mut *self.state.get() }
    }

    /// The published sample.
    ///
    /// # Safety
    ///
    /// Caller must hold the `consolidated` side of the flag protocol: the
    /// worker while `consolidate` is observed `true`, the consolidator
    /// after observing `false` with acquire ordering and before raising
    /// the flag again.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn consolidated_mut(&self) -> &mut Sample {
        unsafe { &mut *self.consolidated.get() }
    }
}

/// Builds the slot array, one cache-padded entry per worker index.
pub(crate) fn new_slots(num_threads: usize) -> Box<[CachePadded<ThreadSlot>]> {
    (0..num_threads)
        .map(|_| CachePadded::new(ThreadSlot::new()))
        .collect()
}
