//! Error types for refresh operations

use portal_client::CallError;

/// A failed refresh. Wraps the primary-endpoint failure; secondary failures
/// never surface here.
#[derive(Debug, Clone, thiserror::Error)]
#[error("refresh failed: {0}")]
pub struct RefreshError(#[from] pub CallError);

impl RefreshError {
    pub fn kind(&self) -> &'static str {
        self.0.kind()
    }

    pub fn call_error(&self) -> &CallError {
        &self.0
    }
}

/// Result alias for refresh operations.
pub type Result<T> = std::result::Result<T, RefreshError>;
