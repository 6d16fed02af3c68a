//! Ordered fallback across stream candidates.
//!
//! Candidates are tried strictly front to back, once each per session.  The
//! pause between two attempts is a fixed delay whatever the failure was.

use std::time::Duration;

use crate::error::SinkError;

/// Delay between two candidates when none is configured.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try the candidate at this index after the backoff.
    NextCandidate(usize),
    /// No candidates left; the session fails.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPlanner {
    backoff: Duration,
}

impl RetryPlanner {
    pub fn new(backoff: Duration) -> Self {
        Self { backoff }
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Decide what follows a failed attempt on `candidates[current]`.
    ///
    /// The failure kind is accepted for logging symmetry only: every kind
    /// advances by exactly one.
    pub fn next<T>(&self, candidates: &[T], current: usize, _failure: &SinkError) -> RetryDecision {
        let next = current + 1;
        if next >= candidates.len() {
            RetryDecision::Exhausted
        } else {
            RetryDecision::NextCandidate(next)
        }
    }
}

impl Default for RetryPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err() -> SinkError {
        SinkError::Open {
            code: 1,
            message: "refused".into(),
        }
    }

    #[test]
    fn test_walks_forward_then_exhausts() {
        let planner = RetryPlanner::default();
        let candidates = ["A", "B", "C"];
        assert_eq!(planner.next(&candidates, 0, &err()), RetryDecision::NextCandidate(1));
        assert_eq!(planner.next(&candidates, 1, &err()), RetryDecision::NextCandidate(2));
        assert_eq!(planner.next(&candidates, 2, &err()), RetryDecision::Exhausted);
    }

    #[test]
    fn test_single_candidate_exhausts_immediately() {
        let planner = RetryPlanner::default();
        assert_eq!(planner.next(&["only"], 0, &err()), RetryDecision::Exhausted);
    }

    #[test]
    fn test_duplicates_are_not_skipped() {
        let planner = RetryPlanner::default();
        let candidates = ["A", "A", "B"];
        assert_eq!(planner.next(&candidates, 0, &err()), RetryDecision::NextCandidate(1));
    }

    #[test]
    fn test_failure_kind_does_not_change_decision() {
        let planner = RetryPlanner::new(Duration::from_millis(250));
        let candidates = ["A", "B"];
        let kinds = [
            err(),
            SinkError::Timeout(Duration::from_secs(15)),
            SinkError::Ended,
            SinkError::Closed,
        ];
        for kind in &kinds {
            assert_eq!(planner.next(&candidates, 0, kind), RetryDecision::NextCandidate(1));
        }
        assert_eq!(planner.backoff(), Duration::from_millis(250));
    }
}
