//! Timeout and cancellation controller.
//!
//! A deadline is fixed when a request is submitted. A timer task on the event loop races the
//! exchange for the invocation's single terminal transition: if it wins, the invocation fails
//! with [`FailureKind::Timeout`](crate::FailureKind::Timeout) and the exchange task is
//! aborted, which drops its connection instead of returning it to the pool. If the exchange
//! wins, the timer is aborted. The same deadline bounds the response body pump.

use crate::engine::invocation::{Origin, Settler};
use crate::error::ProcessingError;
use crate::types::TimeoutSetting;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// An absolute deadline and the budget it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Deadline {
    pub(crate) at: Instant,
    pub(crate) budget: Duration,
}

impl Deadline {
    /// `None` when `budget` reaches past the clock's range; such a deadline never fires.
    pub(crate) fn after(budget: Duration) -> Option<Self> {
        let at = Instant::now().checked_add(budget)?;
        Some(Deadline { at, budget })
    }

    /// Resolve a request's setting against the engine default.
    pub(crate) fn resolve(setting: TimeoutSetting, default: Option<Duration>) -> Option<Self> {
        match setting {
            TimeoutSetting::EngineDefault => default.and_then(Self::after),
            TimeoutSetting::After(budget) => Self::after(budget),
            TimeoutSetting::Disabled => None,
        }
    }
}

/// Arm the deadline timer for an invocation.
pub(crate) fn arm<T: Send + 'static>(
    handle: &tokio::runtime::Handle,
    deadline: Deadline,
    settler: Settler<T>,
) -> AbortHandle {
    handle
        .spawn(async move {
            tokio::time::sleep_until(deadline.at).await;
            let err = ProcessingError::timeout(deadline.budget);
            if settler.settle(Origin::Timer, Err(err)) {
                tracing::debug!(budget = ?deadline.budget, "deadline elapsed, exchange aborted");
            }
        })
        .abort_handle()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::invocation::pending;
    use crate::FailureKind;

    #[test]
    fn test_resolve_settings() {
        let default = Some(Duration::from_secs(3));
        let resolved = Deadline::resolve(TimeoutSetting::EngineDefault, default).unwrap();
        assert_eq!(resolved.budget, Duration::from_secs(3));

        let resolved =
            Deadline::resolve(TimeoutSetting::After(Duration::from_millis(10)), default).unwrap();
        assert_eq!(resolved.budget, Duration::from_millis(10));

        assert!(Deadline::resolve(TimeoutSetting::Disabled, default).is_none());
        assert!(Deadline::resolve(TimeoutSetting::EngineDefault, None).is_none());
    }

    #[test]
    fn test_unrepresentable_budget_means_no_deadline() {
        assert!(Deadline::resolve(TimeoutSetting::After(Duration::MAX), None).is_none());
        assert!(Deadline::resolve(TimeoutSetting::EngineDefault, Some(Duration::MAX)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_settles_with_timeout() {
        let (invocation, settler) = pending::<u32>(uuid::Uuid::new_v4());
        let deadline = Deadline::after(Duration::from_millis(500)).unwrap();
        let timer = arm(&tokio::runtime::Handle::current(), deadline, settler.clone());
        settler.attach(Origin::Timer, timer);

        let err = invocation.await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_beats_timer() {
        let (invocation, settler) = pending::<u32>(uuid::Uuid::new_v4());
        let timer = arm(
            &tokio::runtime::Handle::current(),
            Deadline::after(Duration::from_millis(500)).unwrap(),
            settler.clone(),
        );
        settler.attach(Origin::Timer, timer);

        assert!(settler.settle(Origin::Exchange, Ok(7)));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(invocation.await.unwrap(), 7);
    }
}
