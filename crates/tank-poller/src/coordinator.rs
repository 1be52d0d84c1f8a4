//! Cached snapshot with single-flight refreshes
//!
//! `request_refresh()` coalesces concurrent callers: whoever takes the flight
//! lock first performs the fetch, everyone queued behind it receives that same
//! outcome. A settled-generation counter tells a queued caller whether the
//! fetch it was waiting for has completed, or whether it has to start a new
//! one. If the fetching caller is dropped mid-flight nothing is recorded and
//! the next waiter fetches on its own.
//!
//! The snapshot lives in a `watch` channel so readers never wait on a fetch
//! and subscribers are woken on every replacement.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use portal_client::{CallError, CallResult, Method, PortalApi};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, instrument, warn};

use crate::error::{RefreshError, Result};
use crate::snapshot::Snapshot;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);

const DEFAULT_PRIMARY_ENDPOINT: &str = "https://datalayer.flogas.co.uk/portal/bulk/data";
const DEFAULT_SUBMIT_ENDPOINT: &str = "https://datalayer.flogas.co.uk/portal/bulk/gauge-reading";

/// Accepted range for a submitted gauge reading, in percent.
const READING_RANGE: std::ops::RangeInclusive<i64> = 0..=100;

/// Endpoints the coordinator talks to. Relative paths resolve against the
/// session's base URL.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub primary: String,
    pub secondary: Option<String>,
    pub submit: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            primary: DEFAULT_PRIMARY_ENDPOINT.into(),
            secondary: None,
            submit: DEFAULT_SUBMIT_ENDPOINT.into(),
        }
    }
}

/// Point-in-time view of a coordinator for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub account: String,
    pub has_snapshot: bool,
    pub fetched_at: Option<u64>,
    pub last_error: Option<&'static str>,
}

struct Flight {
    generation: u64,
    outcome: Option<Result<Arc<Snapshot>>>,
}

pub struct PollingCoordinator {
    api: Arc<dyn PortalApi>,
    endpoints: Endpoints,
    interval: Duration,
    flight: Mutex<Flight>,
    settled: AtomicU64,
    snapshot: watch::Sender<Option<Arc<Snapshot>>>,
    last_error: watch::Sender<Option<RefreshError>>,
}

impl PollingCoordinator {
    pub fn new(api: Arc<dyn PortalApi>, endpoints: Endpoints, interval: Duration) -> Self {
        info!(
            account = api.account(),
            primary = %endpoints.primary,
            secondary = ?endpoints.secondary,
            interval_secs = interval.as_secs(),
            "coordinator initialized"
        );
        Self {
            api,
            endpoints,
            interval,
            flight: Mutex::new(Flight {
                generation: 0,
                outcome: None,
            }),
            settled: AtomicU64::new(0),
            snapshot: watch::Sender::new(None),
            last_error: watch::Sender::new(None),
        }
    }

    pub fn account(&self) -> &str {
        self.api.account()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Latest snapshot, if any refresh has succeeded. Never fetches.
    pub fn get_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.borrow().clone()
    }

    /// Receiver woken whenever the snapshot is replaced.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.snapshot.subscribe()
    }

    pub fn status(&self) -> CoordinatorStatus {
        let fetched_at = self.snapshot.borrow().as_ref().map(|s| s.fetched_at);
        CoordinatorStatus {
            account: self.account().to_string(),
            has_snapshot: fetched_at.is_some(),
            fetched_at,
            last_error: self.last_error.borrow().as_ref().map(RefreshError::kind),
        }
    }

    /// Fetch a fresh snapshot, or join the fetch already in flight.
    ///
    /// On failure the cached snapshot is left untouched.
    #[instrument(skip(self), fields(account = %self.account()))]
    pub async fn request_refresh(&self) -> Result<Arc<Snapshot>> {
        let seen = self.settled.load(Ordering::Acquire);
        let mut flight = self.flight.lock().await;

        if flight.generation != seen
            && let Some(outcome) = &flight.outcome
        {
            debug!("joined refresh already in flight");
            return outcome.clone();
        }

        let started = Instant::now();
        let outcome = self.fetch().await;
        let elapsed = started.elapsed().as_secs_f64();

        let label = match &outcome {
            Ok(snapshot) => {
                self.snapshot.send_replace(Some(snapshot.clone()));
                self.last_error.send_replace(None);
                info!(elapsed_secs = elapsed, "snapshot refreshed");
                "success"
            }
            Err(e) => {
                self.last_error.send_replace(Some(e.clone()));
                warn!(error = %e, kind = e.kind(), "refresh failed, keeping previous snapshot");
                e.kind()
            }
        };
        metrics::counter!("tank_refresh_total", "outcome" => label).increment(1);
        metrics::histogram!("tank_refresh_duration_seconds").record(elapsed);

        flight.generation += 1;
        flight.outcome = Some(outcome.clone());
        self.settled.store(flight.generation, Ordering::Release);
        outcome
    }

    /// Submit a gauge reading in percent, then refresh in the background.
    #[instrument(skip(self), fields(account = %self.account()))]
    pub async fn submit(self: &Arc<Self>, value: i64) -> CallResult<()> {
        if !READING_RANGE.contains(&value) {
            return Err(CallError::InvalidInput(format!(
                "reading must be between {} and {}, got {value}",
                READING_RANGE.start(),
                READING_RANGE.end()
            )));
        }

        let body = json!({ "value": value });
        self.api
            .call(&self.endpoints.submit, Method::POST, Some(&body))
            .await?;
        info!(value, "gauge reading submitted");

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = coordinator.request_refresh().await {
                warn!(error = %e, "refresh after submitted reading failed");
            }
        });
        Ok(())
    }

    async fn fetch(&self) -> Result<Arc<Snapshot>> {
        let primary = self
            .api
            .call(&self.endpoints.primary, Method::GET, None)
            .await?;
        if !primary.is_object() {
            return Err(CallError::ApiError {
                endpoint: self.endpoints.primary.clone(),
                status: 200,
                errors: json!({"message": "expected a JSON object", "payload": primary}),
            }
            .into());
        }

        let secondary = match &self.endpoints.secondary {
            Some(endpoint) => match self.api.call(endpoint, Method::GET, None).await {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "secondary fetch failed, omitting its fields");
                    None
                }
            },
            None => None,
        };

        Ok(Arc::new(Snapshot::from_payloads(
            &primary,
            secondary.as_ref(),
            now_millis(),
        )))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::future::Future;
    use std::pin::Pin;

    use serde_json::Value;

    pub(crate) const PRIMARY: &str = "/portal/bulk/data";
    const SECONDARY: &str = "/portal/account/balance";
    const SUBMIT: &str = "/portal/bulk/gauge-reading";

    /// In-memory `PortalApi` that records every call and answers from a
    /// per-endpoint script, falling back to a fixed response.
    pub(crate) struct FakePortal {
        delay: Duration,
        fallback: std::sync::Mutex<HashMap<String, CallResult<Value>>>,
        script: std::sync::Mutex<HashMap<String, VecDeque<CallResult<Value>>>>,
        calls: std::sync::Mutex<Vec<(String, Method, Option<Value>)>>,
    }

    impl FakePortal {
        pub(crate) fn new(delay: Duration) -> Arc<Self> {
            let fake = Arc::new(Self {
                delay,
                fallback: std::sync::Mutex::new(HashMap::new()),
                script: std::sync::Mutex::new(HashMap::new()),
                calls: std::sync::Mutex::new(Vec::new()),
            });
            fake.set_fallback(
                PRIMARY,
                Ok(json!({"remainingPercentage": 42, "daysRemaining": 30, "tankCapacity": 1200})),
            );
            fake.set_fallback(SUBMIT, Ok(Value::Null));
            fake
        }

        pub(crate) fn set_fallback(&self, endpoint: &str, result: CallResult<Value>) {
            self.fallback
                .lock()
                .unwrap()
                .insert(endpoint.to_string(), result);
        }

        fn push(&self, endpoint: &str, result: CallResult<Value>) {
            self.script
                .lock()
                .unwrap()
                .entry(endpoint.to_string())
                .or_default()
                .push_back(result);
        }

        pub(crate) fn calls_to(&self, endpoint: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(e, _, _)| e == endpoint)
                .count()
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl PortalApi for FakePortal {
        fn account(&self) -> &str {
            "fake@example.com"
        }

        fn call<'a>(
            &'a self,
            endpoint: &'a str,
            method: Method,
            body: Option<&'a Value>,
        ) -> Pin<Box<dyn Future<Output = CallResult<Value>> + Send + 'a>> {
            Box::pin(async move {
                self.calls
                    .lock()
                    .unwrap()
                    .push((endpoint.to_string(), method, body.cloned()));
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                let scripted = self
                    .script
                    .lock()
                    .unwrap()
                    .get_mut(endpoint)
                    .and_then(VecDeque::pop_front);
                scripted.unwrap_or_else(|| {
                    self.fallback
                        .lock()
                        .unwrap()
                        .get(endpoint)
                        .cloned()
                        .unwrap_or_else(|| {
                            Err(CallError::ApiError {
                                endpoint: endpoint.to_string(),
                                status: 404,
                                errors: json!("not found"),
                            })
                        })
                })
            })
        }
    }

    fn api_error(endpoint: &str) -> CallError {
        CallError::ApiError {
            endpoint: endpoint.to_string(),
            status: 500,
            errors: json!({"message": "Server Error"}),
        }
    }

    pub(crate) fn endpoints(secondary: bool) -> Endpoints {
        Endpoints {
            primary: PRIMARY.into(),
            secondary: secondary.then(|| SECONDARY.into()),
            submit: SUBMIT.into(),
        }
    }

    fn coordinator(fake: &Arc<FakePortal>, secondary: bool) -> Arc<PollingCoordinator> {
        Arc::new(PollingCoordinator::new(
            fake.clone(),
            endpoints(secondary),
            DEFAULT_REFRESH_INTERVAL,
        ))
    }

    #[tokio::test]
    async fn snapshot_absent_until_first_refresh() {
        let fake = FakePortal::new(Duration::ZERO);
        let coordinator = coordinator(&fake, false);

        assert!(coordinator.get_snapshot().is_none());
        assert_eq!(fake.total_calls(), 0, "get_snapshot never fetches");

        let snapshot = coordinator.request_refresh().await.unwrap();
        assert_eq!(snapshot.tank_level_percent, Some(42.0));
        assert_eq!(coordinator.get_snapshot(), Some(snapshot));
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_fetch() {
        let fake = FakePortal::new(Duration::from_millis(50));
        let coordinator = coordinator(&fake, false);

        let (a, b, c) = tokio::join!(
            coordinator.request_refresh(),
            coordinator.request_refresh(),
            coordinator.request_refresh(),
        );

        assert_eq!(fake.calls_to(PRIMARY), 1);
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn concurrent_waiters_share_a_failure() {
        let fake = FakePortal::new(Duration::from_millis(50));
        fake.push(PRIMARY, Err(api_error(PRIMARY)));
        let coordinator = coordinator(&fake, false);

        let (a, b) = tokio::join!(coordinator.request_refresh(), coordinator.request_refresh());

        assert_eq!(fake.calls_to(PRIMARY), 1);
        assert_eq!(a.unwrap_err().kind(), "api_error");
        assert_eq!(b.unwrap_err().kind(), "api_error");
    }

    #[tokio::test]
    async fn sequential_refreshes_fetch_again() {
        let fake = FakePortal::new(Duration::ZERO);
        let coordinator = coordinator(&fake, false);

        coordinator.request_refresh().await.unwrap();
        coordinator.request_refresh().await.unwrap();

        assert_eq!(fake.calls_to(PRIMARY), 2);
    }

    #[tokio::test]
    async fn primary_failure_keeps_previous_snapshot() {
        let fake = FakePortal::new(Duration::ZERO);
        let coordinator = coordinator(&fake, false);
        let first = coordinator.request_refresh().await.unwrap();

        fake.push(
            PRIMARY,
            Err(CallError::Transport {
                endpoint: PRIMARY.into(),
                message: "timed out".into(),
            }),
        );
        let err = coordinator.request_refresh().await.unwrap_err();

        assert!(matches!(err.call_error(), CallError::Transport { .. }));
        assert!(Arc::ptr_eq(&coordinator.get_snapshot().unwrap(), &first));
        assert_eq!(coordinator.status().last_error, Some("transport"));
    }

    #[tokio::test]
    async fn empty_primary_payload_keeps_previous_snapshot() {
        let fake = FakePortal::new(Duration::ZERO);
        let coordinator = coordinator(&fake, false);
        let first = coordinator.request_refresh().await.unwrap();

        fake.push(PRIMARY, Ok(Value::Null));
        let err = coordinator.request_refresh().await.unwrap_err();

        assert_eq!(err.kind(), "api_error");
        let cached = coordinator.get_snapshot().unwrap();
        assert!(Arc::ptr_eq(&cached, &first));
        assert_eq!(cached.tank_level_percent, Some(42.0));
        assert_eq!(coordinator.status().last_error, Some("api_error"));
    }

    #[tokio::test]
    async fn failure_before_any_success_leaves_snapshot_absent() {
        let fake = FakePortal::new(Duration::ZERO);
        fake.push(PRIMARY, Err(api_error(PRIMARY)));
        let coordinator = coordinator(&fake, true);

        coordinator.request_refresh().await.unwrap_err();

        assert!(coordinator.get_snapshot().is_none());
        assert_eq!(fake.calls_to(SECONDARY), 0, "secondary skipped after primary failure");
    }

    #[tokio::test]
    async fn secondary_failure_omits_its_fields_only() {
        let fake = FakePortal::new(Duration::ZERO);
        fake.push(SECONDARY, Err(api_error(SECONDARY)));
        let coordinator = coordinator(&fake, true);

        let snapshot = coordinator.request_refresh().await.unwrap();

        assert_eq!(snapshot.tank_level_percent, Some(42.0));
        assert_eq!(snapshot.days_remaining, Some(30));
        assert_eq!(snapshot.account_balance, None);
        assert_eq!(coordinator.status().last_error, None);
    }

    #[tokio::test]
    async fn secondary_success_is_merged() {
        let fake = FakePortal::new(Duration::ZERO);
        fake.set_fallback(SECONDARY, Ok(json!({"balance": 87.5})));
        let coordinator = coordinator(&fake, true);

        let snapshot = coordinator.request_refresh().await.unwrap();

        assert_eq!(snapshot.account_balance, Some(87.5));
        assert_eq!(fake.calls_to(SECONDARY), 1);
    }

    #[tokio::test]
    async fn unconfigured_secondary_is_never_called() {
        let fake = FakePortal::new(Duration::ZERO);
        let coordinator = coordinator(&fake, false);

        coordinator.request_refresh().await.unwrap();

        assert_eq!(fake.total_calls(), 1);
    }

    #[tokio::test]
    async fn success_clears_last_error() {
        let fake = FakePortal::new(Duration::ZERO);
        fake.push(PRIMARY, Err(api_error(PRIMARY)));
        let coordinator = coordinator(&fake, false);

        coordinator.request_refresh().await.unwrap_err();
        assert_eq!(coordinator.status().last_error, Some("api_error"));

        coordinator.request_refresh().await.unwrap();
        let status = coordinator.status();
        assert_eq!(status.last_error, None);
        assert!(status.has_snapshot);
    }

    #[tokio::test]
    async fn abandoned_refresh_does_not_wedge_the_next_one() {
        let fake = FakePortal::new(Duration::from_millis(200));
        let coordinator = coordinator(&fake, false);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), coordinator.request_refresh()).await;
        assert!(abandoned.is_err());
        assert!(coordinator.get_snapshot().is_none());

        coordinator.request_refresh().await.unwrap();
        assert_eq!(fake.calls_to(PRIMARY), 2);
    }

    #[tokio::test]
    async fn subscribers_see_replacements() {
        let fake = FakePortal::new(Duration::ZERO);
        let coordinator = coordinator(&fake, false);
        let mut rx = coordinator.subscribe();

        coordinator.request_refresh().await.unwrap();

        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_some());
    }

    #[tokio::test]
    async fn out_of_range_readings_are_rejected_offline() {
        let fake = FakePortal::new(Duration::ZERO);
        let coordinator = coordinator(&fake, false);

        for value in [150, -1, 101] {
            let err = coordinator.submit(value).await.unwrap_err();
            assert!(matches!(err, CallError::InvalidInput(_)), "value {value}: {err:?}");
        }
        assert_eq!(fake.total_calls(), 0);
    }

    #[tokio::test]
    async fn boundary_readings_are_posted() {
        let fake = FakePortal::new(Duration::ZERO);
        let coordinator = coordinator(&fake, false);

        coordinator.submit(0).await.unwrap();
        coordinator.submit(100).await.unwrap();

        let posts: Vec<_> = fake
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _, _)| e == SUBMIT)
            .map(|(_, method, body)| (method.clone(), body.clone()))
            .collect();
        assert_eq!(
            posts,
            vec![
                (Method::POST, Some(json!({"value": 0}))),
                (Method::POST, Some(json!({"value": 100}))),
            ]
        );
    }

    #[tokio::test]
    async fn submit_triggers_refresh_without_blocking() {
        let fake = FakePortal::new(Duration::ZERO);
        let coordinator = coordinator(&fake, false);
        let mut rx = coordinator.subscribe();

        coordinator.submit(55).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("refresh after submit")
            .unwrap();
        assert!(coordinator.get_snapshot().is_some());
        assert_eq!(fake.calls_to(PRIMARY), 1);
    }

    #[tokio::test]
    async fn failed_submit_skips_refresh() {
        let fake = FakePortal::new(Duration::ZERO);
        fake.push(SUBMIT, Err(api_error(SUBMIT)));
        let coordinator = coordinator(&fake, false);

        let err = coordinator.submit(50).await.unwrap_err();
        assert_eq!(err.kind(), "api_error");

        tokio::task::yield_now().await;
        assert_eq!(fake.calls_to(PRIMARY), 0);
    }
}
