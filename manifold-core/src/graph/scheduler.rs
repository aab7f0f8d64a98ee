//! Effect Scheduler
//!
//! The scheduler owns the pending set of invalidated effects and the state
//! of the flush loop. It does not run effects itself: the runtime drives the
//! loop and asks the scheduler for one pass at a time.
//!
//! # Algorithm
//!
//! 1. Writes insert invalidated effects into the pending set. The set is
//!    insertion-ordered, so an effect keeps the position of its first
//!    enqueue.
//! 2. A flush starts only when no flush is running, no batch is holding the
//!    queue, and something is pending.
//! 3. Each pass snapshots and clears the pending set. Effects invalidated
//!    while a pass runs land in the fresh pending set and run in the next
//!    pass of the same flush.
//! 4. After `max_passes` passes, whatever is still pending is dropped. This
//!    bounds self-triggering cycles that the call-stack guard cannot see
//!    because each run completes before the next is queued.

use indexmap::IndexSet;

use super::ids::EffectId;

/// Outcome of asking for the next pass.
#[derive(Debug, PartialEq, Eq)]
pub enum Pass {
    /// Run these effects, in order.
    Run(Vec<EffectId>),
    /// Nothing left to do.
    Idle,
    /// The pass cap was reached; these pending effects were dropped.
    Exhausted(Vec<EffectId>),
}

/// Pending set plus flush bookkeeping.
#[derive(Debug, Default)]
pub struct Scheduler {
    pending: IndexSet<EffectId>,
    flushing: bool,
    passes: usize,
    holds: usize,
}

impl Scheduler {
    /// Create a new idle scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an effect. Returns false if it was already pending.
    pub fn schedule(&mut self, effect: EffectId) -> bool {
        self.pending.insert(effect)
    }

    /// Forget a pending effect.
    pub fn unschedule(&mut self, effect: EffectId) {
        self.pending.shift_remove(&effect);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    /// Whether a batch is currently holding the queue.
    pub fn is_held(&self) -> bool {
        self.holds > 0
    }

    /// Enter a batch. While held, no new flush may start.
    pub fn hold(&mut self) {
        self.holds += 1;
    }

    /// Leave a batch. Returns true when the last hold was released.
    pub fn release(&mut self) -> bool {
        self.holds = self.holds.saturating_sub(1);
        self.holds == 0
    }

    /// Try to start a flush. Returns false when one is already running,
    /// the queue is held, or nothing is pending.
    pub fn begin_flush(&mut self) -> bool {
        if self.flushing || self.is_held() || self.pending.is_empty() {
            return false;
        }
        self.flushing = true;
        self.passes = 0;
        true
    }

    /// Take the next pass of the current flush.
    pub fn next_pass(&mut self, max_passes: usize) -> Pass {
        if self.pending.is_empty() {
            return Pass::Idle;
        }
        if self.passes >= max_passes {
            return Pass::Exhausted(self.pending.drain(..).collect());
        }
        self.passes += 1;
        Pass::Run(self.pending.drain(..).collect())
    }

    /// Passes taken so far in the current flush.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Finish the current flush. Safe to call when none is running.
    pub fn end_flush(&mut self) {
        self.flushing = false;
        self.passes = 0;
    }
}
