//! [`LoopGuard`] – repeated-transition detector.
//!
//! Recovery may resolve an anomaly by observing the client exactly where it
//! started, after which the planner proposes the same transition again.  The
//! guard bounds how many times in a row one transition may be attempted so a
//! tap that never lands cannot keep the navigator busy forever.
//!
//! # Algorithm
//!
//! The guard keeps the last *N* attempted items.  [`LoopGuard::record`]
//! returns `true` once the window is full and every entry is identical,
//! i.e. the same item has been attempted `N` times in a row.
//!
//! # Example
//!
//! ```rust
//! use gamepilot_runtime::loop_guard::LoopGuard;
//!
//! let mut guard = LoopGuard::new(3);
//!
//! assert!(!guard.record("home -> shop"));
//! assert!(!guard.record("home -> shop"));
//! assert!(guard.record("home -> shop")); // third in a row
//!
//! guard.reset();
//! assert!(!guard.record("home -> shop"));
//! ```

use std::collections::VecDeque;

// ─────────────────────────────────────────────────────────────────────────────
// LoopGuard
// ─────────────────────────────────────────────────────────────────────────────

/// Detects `threshold` consecutive identical attempts.
#[derive(Debug, Clone)]
pub struct LoopGuard<T> {
    threshold: usize,
    history: VecDeque<T>,
}

impl<T: PartialEq> LoopGuard<T> {
    /// `threshold` is the run length flagged as a loop; it is raised to 1 if
    /// given as 0.
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            threshold,
            history: VecDeque::with_capacity(threshold),
        }
    }

    /// Record an attempt of `item`.  Returns `true` when this makes
    /// `threshold` identical attempts in a row.
    pub fn record(&mut self, item: T) -> bool {
        self.history.push_back(item);
        while self.history.len() > self.threshold {
            self.history.pop_front();
        }
        self.is_stuck()
    }

    pub fn is_stuck(&self) -> bool {
        if self.history.len() < self.threshold {
            return false;
        }
        let first = &self.history[0];
        self.history.iter().all(|a| a == first)
    }

    /// Length of the current run of identical trailing attempts.
    pub fn streak(&self) -> usize {
        let Some(last) = self.history.back() else {
            return 0;
        };
        self.history.iter().rev().take_while(|a| *a == last).count()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_loop_with_varied_transitions() {
        let mut guard = LoopGuard::new(3);
        assert!(!guard.record(1));
        assert!(!guard.record(2));
        assert!(!guard.record(1));
    }

    #[test]
    fn detects_loop_at_threshold() {
        let mut guard = LoopGuard::new(3);
        assert!(!guard.record(7));
        assert!(!guard.record(7));
        assert!(guard.record(7));
        assert!(guard.record(7));
    }

    #[test]
    fn different_item_breaks_streak() {
        let mut guard = LoopGuard::new(3);
        guard.record("a");
        guard.record("a");
        guard.record("b");
        assert!(!guard.is_stuck());
        assert_eq!(guard.streak(), 1);
    }

    #[test]
    fn streak_counts_trailing_repeats() {
        let mut guard = LoopGuard::new(4);
        assert_eq!(guard.streak(), 0);
        guard.record("x");
        guard.record("y");
        guard.record("y");
        assert_eq!(guard.streak(), 2);
    }

    #[test]
    fn window_slides() {
        let mut guard = LoopGuard::new(3);
        guard.record('a');
        guard.record('b');
        guard.record('a');
        guard.record('c');
        guard.record('c');
        assert!(guard.record('c'));
    }

    #[test]
    fn reset_clears_history() {
        let mut guard = LoopGuard::new(2);
        guard.record(1);
        assert!(guard.record(1));
        guard.reset();
        assert!(!guard.record(1));
    }

    #[test]
    fn zero_threshold_behaves_like_one() {
        let mut guard = LoopGuard::new(0);
        assert!(guard.record(()));
    }
}
