//! Shared timeout budget and the phases that draw on it

use crate::BuildError;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Stages of one build, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Launching,
    Navigating,
    Typesetting,
    Extracting,
    Capturing,
    PostProcessing,
    Done,
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            BuildPhase::Launching => "Launching build environment",
            BuildPhase::Navigating => "Loading the viewer",
            BuildPhase::Typesetting => "Building pages",
            BuildPhase::Extracting => "Reading document data",
            BuildPhase::Capturing => "Building PDF",
            BuildPhase::PostProcessing => "Processing PDF",
            BuildPhase::Done => "Done",
        };
        f.write_str(label)
    }
}

/// Wall-clock budget shared by every phase of a build
///
/// Started once at the beginning of the build. The clock is tokio's, so
/// paused-time tests see the same arithmetic as real builds.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutBudget {
    total: Duration,
    started: Instant,
}

impl TimeoutBudget {
    pub fn start(total: Duration) -> Self {
        Self {
            total,
            started: Instant::now(),
        }
    }

    /// The configured budget, regardless of time spent.
    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left, or `None` once the budget is used up.
    pub fn remaining(&self) -> Option<Duration> {
        self.total
            .checked_sub(self.elapsed())
            .filter(|left| !left.is_zero())
    }

    /// Remaining budget for the capture phase; an exhausted budget fails the build.
    pub fn checkpoint(&self) -> Result<Duration, BuildError> {
        match self.remaining() {
            Some(left) => {
                debug!("Remaining timeout: {}ms", left.as_millis());
                Ok(left)
            }
            None => Err(BuildError::TimeoutBudgetExhausted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_remaining_decreases_with_elapsed_time() {
        let budget = TimeoutBudget::start(Duration::from_millis(5000));
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(budget.remaining(), Some(Duration::from_millis(3500)));
        assert_eq!(budget.total(), Duration::from_millis(5000));
        assert_eq!(budget.checkpoint().unwrap(), Duration::from_millis(3500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_fails_checkpoint() {
        let budget = TimeoutBudget::start(Duration::from_millis(5000));
        tokio::time::advance(Duration::from_millis(6000)).await;
        assert!(budget.remaining().is_none());
        assert!(matches!(
            budget.checkpoint(),
            Err(BuildError::TimeoutBudgetExhausted)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exactly_spent_budget_is_exhausted() {
        let budget = TimeoutBudget::start(Duration::from_millis(5000));
        tokio::time::advance(Duration::from_millis(5000)).await;
        assert!(budget.checkpoint().is_err());
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(BuildPhase::Capturing.to_string(), "Building PDF");
        assert_eq!(BuildPhase::PostProcessing.to_string(), "Processing PDF");
    }
}
