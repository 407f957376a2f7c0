// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-semaphore timeline counters.
//!
//! A [`TimelineCursor`] hands out the values each side of an interop
//! handshake waits on and signals, so callers never compute `N` and `N + 1`
//! themselves. It also remembers the highest value actually submitted, which
//! is what shutdown waits for before destroying the semaphore.

use std::sync::atomic::{AtomicU64, Ordering};

/// The pair of values one side of a handshake waits on, then signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handoff {
    /// Value the consumer waits for before starting its work.
    pub wait_value: u64,
    /// Value the consumer signals when its work is done.
    pub signal_value: u64,
}

/// Hands out monotonically increasing timeline values for one semaphore.
#[derive(Debug, Default)]
pub struct TimelineCursor {
    last_issued: AtomicU64,
    highest_submitted: AtomicU64,
}

impl TimelineCursor {
    /// Creates a cursor for a semaphore whose counter starts at `initial`.
    pub fn new(initial: u64) -> Self {
        TimelineCursor {
            last_issued: AtomicU64::new(initial),
            highest_submitted: AtomicU64::new(initial),
        }
    }

    /// Reserves the next value for a producer that only signals.
    pub fn next_signal(&self) -> u64 {
        self.last_issued.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Reserves a wait-then-signal pair: wait on the last issued value, signal the next.
    pub fn handoff(&self) -> Handoff {
        let wait_value = self.last_issued.fetch_add(1, Ordering::AcqRel);
        Handoff {
            wait_value,
            signal_value: wait_value + 1,
        }
    }

    /// The last value handed out, i.e. the value a new consumer should wait on.
    pub fn last_issued(&self) -> u64 {
        self.last_issued.load(Ordering::Acquire)
    }

    /// Records that a signal of `value` was accepted by a driver.
    pub fn mark_submitted(&self, value: u64) {
        self.highest_submitted.fetch_max(value, Ordering::AcqRel);
    }

    /// The highest value any accepted submission will signal.
    pub fn highest_submitted(&self) -> u64 {
        self.highest_submitted.load(Ordering::Acquire)
    }
}

/// Clamps CPU-observed counter values so they never appear to go backwards.
#[derive(Debug, Default)]
pub struct ObservedValue(AtomicU64);

impl ObservedValue {
    /// Folds a freshly queried driver value in and returns the observed value.
    pub fn observe(&self, raw: u64) -> u64 {
        let previous = self.0.fetch_max(raw, Ordering::AcqRel);
        previous.max(raw)
    }

    /// The highest value observed so far.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn render_then_compute_handshake_values() {
        let cursor = TimelineCursor::new(0);
        // Render signals N.
        let n = cursor.next_signal();
        assert_eq!(n, 1);
        // Compute waits on N and signals N + 1.
        let handoff = cursor.handoff();
        assert_eq!(
            handoff,
            Handoff {
                wait_value: 1,
                signal_value: 2
            }
        );
        // Render waits on N + 1.
        assert_eq!(cursor.last_issued(), 2);
    }

    #[test]
    fn highest_submitted_only_grows() {
        let cursor = TimelineCursor::new(5);
        cursor.mark_submitted(9);
        cursor.mark_submitted(7);
        assert_eq!(cursor.highest_submitted(), 9);
    }

    #[test]
    fn concurrent_handoffs_are_unique() {
        let cursor = Arc::new(TimelineCursor::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cursor = cursor.clone();
                thread::spawn(move || (0..100).map(|_| cursor.handoff().signal_value).collect::<Vec<_>>())
            })
            .collect();
        let mut values: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), 400);
        assert_eq!(cursor.last_issued(), 400);
    }

    #[test]
    fn observed_value_is_monotonic() {
        let observed = ObservedValue::default();
        assert_eq!(observed.observe(3), 3);
        assert_eq!(observed.observe(2), 3);
        assert_eq!(observed.observe(8), 8);
        assert_eq!(observed.get(), 8);
    }
}
