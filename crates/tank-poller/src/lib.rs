//! Polling coordinator for tank readings
//!
//! Wraps a `PortalApi` with a cached `Snapshot`, single-flight refreshes and a
//! scheduled refresh task. Each account gets its own coordinator; nothing here
//! is shared between accounts.
//!
//! Refresh lifecycle:
//! 1. Caller (scheduler, host endpoint, or a submitted reading) asks for a refresh
//! 2. Concurrent requests join the fetch already in flight
//! 3. Primary endpoint is fetched; the optional secondary endpoint is merged in
//! 4. Snapshot is replaced atomically and subscribers are notified
//! 5. On primary failure the previous snapshot stays in place

pub mod coordinator;
pub mod error;
pub mod readings;
pub mod refresh;
pub mod snapshot;

pub use coordinator::{CoordinatorStatus, DEFAULT_REFRESH_INTERVAL, Endpoints, PollingCoordinator};
pub use error::{RefreshError, Result};
pub use readings::{READINGS, ReadingDescriptor, ReadingValue};
pub use refresh::spawn_refresh_task;
pub use snapshot::Snapshot;
