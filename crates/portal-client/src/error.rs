//! Error types for portal authentication and calls

use serde_json::Value;

/// Failures of the handshake + login sequence.
///
/// Every variant reaches the caller of `authenticate()` so a setup flow can
/// tell which step failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("anti-forgery handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("handshake did not set the XSRF-TOKEN cookie")]
    MissingToken,

    #[error("anti-forgery token mismatch")]
    TokenMismatch,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("login rejected: {errors}")]
    LoginRejected { errors: Value },

    #[error("transport error during login: {0}")]
    Transport(String),
}

impl AuthError {
    /// Whether a user-facing flow should show the generic "invalid
    /// credentials" message for this error.
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials
                | AuthError::LoginRejected { .. }
                | AuthError::TokenMismatch
        )
    }
}

/// Failures of an authenticated `call()`.
#[derive(Debug, Clone, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum CallError {
    #[error("unauthorized calling {endpoint}: {reason}")]
    Unauthorized { endpoint: String, reason: String },

    #[error("portal error from {endpoint} (status {status}): {errors}")]
    ApiError {
        endpoint: String,
        status: u16,
        errors: Value,
    },

    #[error("transport error calling {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CallError {
    /// Short label for metrics and health reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            CallError::Unauthorized { .. } => "unauthorized",
            CallError::ApiError { .. } => "api_error",
            CallError::Transport { .. } => "transport",
            CallError::InvalidInput(_) => "invalid_input",
        }
    }

    /// Message safe to show end users. Upstream payloads are never included.
    pub fn public_message(&self) -> String {
        match self {
            CallError::Unauthorized { .. } => "invalid credentials".into(),
            CallError::ApiError { status, .. } => format!("portal returned an error (status {status})"),
            CallError::Transport { .. } => "portal unreachable".into(),
            CallError::InvalidInput(msg) => msg.clone(),
        }
    }
}

/// Result alias for `authenticate()`.
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Result alias for `call()`.
pub type CallResult<T> = std::result::Result<T, CallError>;
