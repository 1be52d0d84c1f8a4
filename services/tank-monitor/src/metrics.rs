//! Prometheus metrics exposition
//!
//! Library crates emit through the `metrics` facade:
//!
//! - `portal_logins_total` (counter): label `outcome`
//! - `portal_reauth_total` (counter)
//! - `portal_calls_total` (counter): label `outcome`
//! - `tank_refresh_total` (counter): label `outcome`
//! - `tank_refresh_duration_seconds` (histogram)
//!
//! This module installs the recorder and publishes the numeric readings of
//! every snapshot as `tank_reading` gauges labelled by `account` and `reading`.
//! A reading missing from a later snapshot is published as NaN.

use std::collections::BTreeSet;
use std::sync::Arc;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use tank_poller::{PollingCoordinator, READINGS, Snapshot};
use tokio::task::JoinHandle;

/// Refresh duration buckets, 50ms to the default 30s request timeout and beyond.
const REFRESH_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("tank_refresh_duration_seconds".to_string()),
        REFRESH_BUCKETS,
    )
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Set one gauge per numeric reading in the snapshot.
///
/// `published` holds the keys this account has gauges for. A key that was
/// published before but has no value now is set to NaN.
pub fn publish_readings(account: &str, snapshot: &Snapshot, published: &mut BTreeSet<&'static str>) {
    for descriptor in READINGS {
        let value = match descriptor.value(snapshot).and_then(|v| v.as_f64()) {
            Some(value) => {
                published.insert(descriptor.key);
                value
            }
            None if published.contains(descriptor.key) => f64::NAN,
            None => continue,
        };
        metrics::gauge!(
            "tank_reading",
            "account" => account.to_string(),
            "reading" => descriptor.key
        )
        .set(value);
    }
}

/// Publish gauges for every snapshot the coordinator produces.
pub fn spawn_gauge_publisher(coordinator: Arc<PollingCoordinator>) -> JoinHandle<()> {
    let mut rx = coordinator.subscribe();
    tokio::spawn(async move {
        let mut published = BTreeSet::new();
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            if let Some(snapshot) = snapshot {
                publish_readings(coordinator.account(), &snapshot, &mut published);
            }
        }
    })
}
