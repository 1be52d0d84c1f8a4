//! Scheduled background refresh
//!
//! One task per coordinator, ticking at the coordinator's interval. Failures
//! are logged and the next tick simply tries again; there is no backoff.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::coordinator::PollingCoordinator;

/// Spawn the periodic refresh task for one coordinator.
///
/// The first tick is skipped: the host performs the initial refresh itself
/// before scheduling starts. Refreshes go through the same single-flight
/// path as direct callers.
pub fn spawn_refresh_task(coordinator: Arc<PollingCoordinator>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(coordinator.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            debug!(account = coordinator.account(), "scheduled refresh");
            if let Err(e) = coordinator.request_refresh().await {
                warn!(
                    account = coordinator.account(),
                    error = %e,
                    "scheduled refresh failed, will retry next interval"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use portal_client::CallError;

    use crate::coordinator::tests::{FakePortal, PRIMARY, endpoints};

    fn coordinator(fake: &Arc<FakePortal>, interval: Duration) -> Arc<PollingCoordinator> {
        Arc::new(PollingCoordinator::new(fake.clone(), endpoints(false), interval))
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_skipped() {
        let fake = FakePortal::new(Duration::ZERO);
        let handle = spawn_refresh_task(coordinator(&fake, Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fake.calls_to(PRIMARY), 0);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_once_per_interval() {
        let fake = FakePortal::new(Duration::ZERO);
        let coordinator = coordinator(&fake, Duration::from_secs(60));
        let handle = spawn_refresh_task(coordinator.clone());

        tokio::time::sleep(Duration::from_secs(125)).await;

        assert_eq!(fake.calls_to(PRIMARY), 2);
        assert!(coordinator.get_snapshot().is_some());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_the_schedule() {
        let fake = FakePortal::new(Duration::ZERO);
        fake.set_fallback(
            PRIMARY,
            Err(CallError::Transport {
                endpoint: PRIMARY.into(),
                message: "connection refused".into(),
            }),
        );
        let coordinator = coordinator(&fake, Duration::from_secs(60));
        let handle = spawn_refresh_task(coordinator.clone());

        tokio::time::sleep(Duration::from_secs(185)).await;

        assert_eq!(fake.calls_to(PRIMARY), 3);
        assert!(coordinator.get_snapshot().is_none());
        assert_eq!(coordinator.status().last_error, Some("transport"));
        assert!(!handle.is_finished());
        handle.abort();
    }
}
