//! Cooperative cutoffs for long DAG walks.
//!
//! Every traversal drives a [`Meter`] once per visited unit. The meter
//! enforces a visit cap, and every `check_every` visits it checks the
//! deadline and the cancel token and yields the thread.

use crate::error::TraversalError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared flag for cancelling traversals from another thread.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Limits applied to a single traversal.
#[derive(Clone, Debug)]
pub struct TraversalBudget {
    /// Maximum units visited before giving up.
    pub max_visits: usize,

    /// Visits between deadline/cancel checks and cooperative yields.
    pub check_every: usize,

    /// Wall-clock cutoff.
    pub deadline: Option<Instant>,

    cancel: Option<CancelToken>,
}

impl Default for TraversalBudget {
    fn default() -> Self {
        TraversalBudget {
            max_visits: 1_000_000,
            check_every: 100,
            deadline: None,
            cancel: None,
        }
    }
}

impl TraversalBudget {
    pub fn new(max_visits: usize, check_every: usize) -> Self {
        TraversalBudget {
            max_visits,
            check_every: check_every.max(1),
            ..TraversalBudget::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Start metering a new traversal.
    pub fn meter(&self) -> Meter<'_> {
        Meter {
            budget: self,
            visited: 0,
        }
    }
}

/// Visit counter for one traversal.
#[derive(Debug)]
pub struct Meter<'a> {
    budget: &'a TraversalBudget,
    visited: usize,
}

impl Meter<'_> {
    /// Account for one visited unit.
    pub fn tick(&mut self) -> Result<(), TraversalError> {
        self.visited += 1;
        if self.visited > self.budget.max_visits {
            return Err(TraversalError::Timeout {
                visited: self.visited,
            });
        }

        if self.visited % self.budget.check_every.max(1) == 0 {
            if let Some(token) = &self.budget.cancel {
                if token.is_cancelled() {
                    return Err(TraversalError::Cancelled {
                        visited: self.visited,
                    });
                }
            }
            if let Some(deadline) = self.budget.deadline {
                if Instant::now() >= deadline {
                    return Err(TraversalError::Timeout {
                        visited: self.visited,
                    });
                }
            }
            std::thread::yield_now();
        }
        Ok(())
    }

    pub fn visited(&self) -> usize {
        self.visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visit_cap() {
        let budget = TraversalBudget::new(10, 3);
        let mut meter = budget.meter();
        for _ in 0..10 {
            meter.tick().unwrap();
        }
        assert_eq!(meter.tick(), Err(TraversalError::Timeout { visited: 11 }));
    }

    #[test]
    fn test_cancel_seen_at_checkpoint() {
        let token = CancelToken::new();
        let budget = TraversalBudget::new(1000, 4).with_cancel(token.clone());
        let mut meter = budget.meter();
        meter.tick().unwrap();
        token.cancel();
        meter.tick().unwrap();
        meter.tick().unwrap();
        assert_eq!(meter.tick(), Err(TraversalError::Cancelled { visited: 4 }));
    }

    #[test]
    fn test_expired_deadline() {
        let budget = TraversalBudget::new(1000, 1).with_deadline(Instant::now());
        let mut meter = budget.meter();
        assert!(matches!(meter.tick(), Err(TraversalError::Timeout { .. })));
    }
}
