//! Seam between the polling layer and the portal transport
//!
//! The coordinator only needs the call primitive, so it depends on this trait
//! rather than on `AuthenticatedSession` directly. Uses `Pin<Box<dyn Future>>`
//! return types for dyn-compatibility (`Arc<dyn PortalApi>`).

use std::future::Future;
use std::pin::Pin;

use reqwest::Method;
use serde_json::Value;

use crate::error::CallResult;

/// An authenticated portal call primitive.
pub trait PortalApi: Send + Sync {
    /// Account identifier used for logging and metrics labels.
    fn account(&self) -> &str;

    /// Call `endpoint` and return the envelope's `response` payload.
    ///
    /// `endpoint` is either a path relative to the portal base URL or an
    /// absolute URL.
    fn call<'a>(
        &'a self,
        endpoint: &'a str,
        method: Method,
        body: Option<&'a Value>,
    ) -> Pin<Box<dyn Future<Output = CallResult<Value>> + Send + 'a>>;
}
