//! HTTP status classification for portal responses
//!
//! The portal signals an expired session three different ways depending on
//! which layer noticed: 401 (bearer token), 403 (policy), and Laravel's 419
//! (anti-forgery token). All three mean "authenticate again".

/// Statuses that trigger a single re-authentication.
pub const REAUTH_STATUSES: &[u16] = &[401, 403, 419];

/// Laravel's "page expired" status, returned on anti-forgery mismatch.
pub const TOKEN_MISMATCH_STATUS: u16 = 419;

/// How `call()` should treat a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx: inspect the body's success flag
    Success,
    /// Authentication context expired: re-authenticate once and retry
    AuthExpired,
    /// Any other status: surface as an API error
    Failed,
}

/// Classify a response status.
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        s if REAUTH_STATUSES.contains(&s) => StatusClass::AuthExpired,
        _ => StatusClass::Failed,
    }
}
