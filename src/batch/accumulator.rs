//! Size-or-time batch accumulator.
//!
//! Events are buffered in arrival order. A flush is due once the buffer holds
//! `max_rows` events, or once `max_age` has passed since the previous flush
//! (or since construction) with at least one event buffered. An empty buffer
//! is never flushed.
//!
//! Time is always passed in by the caller so the policy stays a pure function
//! and tests can drive it with synthetic instants.

use std::time::Duration;
use tokio::time::Instant;

use super::{Batch, FlushTrigger};
use crate::source::Event;

const MAX_DEADLINE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Dual flush trigger: buffer size or elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    max_rows: usize,
    max_age: Duration,
}

impl FlushPolicy {
    pub fn new(max_rows: usize, max_age: Duration) -> Self {
        Self { max_rows, max_age }
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Which trigger, if any, fires for a buffer of `len` events that was last
    /// flushed `elapsed` ago. Size takes precedence over age.
    pub fn evaluate(&self, len: usize, elapsed: Duration) -> Option<FlushTrigger> {
        if len == 0 {
            None
        } else if len >= self.max_rows {
            Some(FlushTrigger::Size)
        } else if elapsed >= self.max_age {
            Some(FlushTrigger::Age)
        } else {
            None
        }
    }

    pub fn should_flush(&self, len: usize, elapsed: Duration) -> bool {
        self.evaluate(len, elapsed).is_some()
    }
}

/// Buffers events until the [`FlushPolicy`] fires.
///
/// Callers must [`take`](Self::take) as soon as [`offer`](Self::offer)
/// reports a due flush; the buffer then never exceeds `max_rows`.
#[derive(Debug)]
pub struct BatchAccumulator {
    policy: FlushPolicy,
    buffer: Vec<Event>,
    last_flush: Instant,
    next_flush_id: u64,
}

impl BatchAccumulator {
    pub fn new(policy: FlushPolicy, now: Instant) -> Self {
        Self {
            policy,
            buffer: Vec::new(),
            last_flush: now,
            next_flush_id: 1,
        }
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Append an event and report whether a flush is now due.
    pub fn offer(&mut self, event: Event, now: Instant) -> bool {
        self.buffer.push(event);
        self.poll(now)
    }

    /// Report whether a flush is due without adding an event.
    pub fn poll(&self, now: Instant) -> bool {
        self.pending_trigger(now).is_some()
    }

    pub fn pending_trigger(&self, now: Instant) -> Option<FlushTrigger> {
        self.policy
            .evaluate(self.buffer.len(), now.saturating_duration_since(self.last_flush))
    }

    /// When the age trigger fires for the current buffer.
    ///
    /// Ages too large to represent are capped at a year.
    pub fn deadline(&self) -> Instant {
        self.last_flush
            .checked_add(self.policy.max_age)
            .unwrap_or_else(|| self.last_flush + MAX_DEADLINE)
    }

    /// Hand off the buffered events and restart the age clock.
    ///
    /// Returns `None` (and leaves the clock alone) when nothing is buffered.
    pub fn take(&mut self, now: Instant, trigger: FlushTrigger) -> Option<Batch> {
        if self.buffer.is_empty() {
            return None;
        }

        let hint = self.len_hint();
        let events = std::mem::replace(&mut self.buffer, Vec::with_capacity(hint));
        let flush_id = self.next_flush_id;
        self.next_flush_id += 1;
        self.last_flush = now;

        Some(Batch {
            flush_id,
            trigger,
            events,
        })
    }

    /// Take the buffer if the policy says a flush is due.
    pub fn flush_if_due(&mut self, now: Instant) -> Option<Batch> {
        let trigger = self.pending_trigger(now)?;
        self.take(now, trigger)
    }

    /// Take whatever is buffered for a final flush on shutdown.
    pub fn drain(&mut self, now: Instant) -> Option<Batch> {
        self.take(now, FlushTrigger::Shutdown)
    }

    fn len_hint(&self) -> usize {
        self.policy.max_rows.min(64 * 1024)
    }
}
