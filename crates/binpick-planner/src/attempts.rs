//! [`AttemptCounter`] – bounded retry bookkeeping for failed pick attempts.
//!
//! Every time the planner notices that a pick went wrong (the fingers closed
//! on nothing during the carry, or no motion could be planned) it records a
//! failure. While the count stays within `max` the planner re-settles and
//! tries again; the failure that would push the count past `max` is
//! reported as [`AttemptOutcome::Exhausted`] exactly once, and the counter
//! starts over from zero.
//!
//! # Example
//!
//! ```rust
//! use binpick_planner::attempts::{AttemptCounter, AttemptOutcome};
//!
//! let mut counter = AttemptCounter::new(2);
//!
//! assert_eq!(counter.record_failure(), AttemptOutcome::Retry { attempt: 1 });
//! assert_eq!(counter.record_failure(), AttemptOutcome::Retry { attempt: 2 });
//! assert_eq!(counter.record_failure(), AttemptOutcome::Exhausted { attempts: 3 });
//!
//! // Exhaustion starts the count over.
//! assert_eq!(counter.count(), 0);
//! ```

/// Result of recording one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Still within budget; `attempt` failures recorded so far.
    Retry { attempt: u32 },
    /// Budget exceeded on failure number `attempts`.
    Exhausted { attempts: u32 },
}

// ─────────────────────────────────────────────────────────────────────────────
// AttemptCounter
// ─────────────────────────────────────────────────────────────────────────────

/// Counts failed attempts in `[0, max]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptCounter {
    /// Failures tolerated before exhaustion.
    max: u32,
    count: u32,
}

impl AttemptCounter {
    pub fn new(max: u32) -> Self {
        Self { max, count: 0 }
    }

    /// Record one failure.
    pub fn record_failure(&mut self) -> AttemptOutcome {
        if self.count >= self.max {
            let attempts = self.count + 1;
            self.count = 0;
            return AttemptOutcome::Exhausted { attempts };
        }
        self.count += 1;
        AttemptOutcome::Retry {
            attempt: self.count,
        }
    }

    /// Forget all recorded failures.
    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
