//! Portal endpoints and transport defaults
//!
//! The portal is a Laravel Sanctum deployment: the handshake endpoint sets the
//! `XSRF-TOKEN` cookie and every state-changing request must echo it back in
//! the `X-XSRF-TOKEN` header.

use std::time::Duration;

/// Base URL of the account portal (login and handshake live here)
pub const DEFAULT_BASE_URL: &str = "https://myaccount.flogas.co.uk";

/// Handshake endpoint that issues the anti-forgery cookie
pub const HANDSHAKE_PATH: &str = "/sanctum/csrf-cookie";

/// Login endpoint accepting `{email, password}`
pub const LOGIN_PATH: &str = "/login";

/// Cookie carrying the URL-encoded anti-forgery token
pub const XSRF_COOKIE: &str = "XSRF-TOKEN";

/// Request header the anti-forgery token is echoed in
pub const XSRF_HEADER: &str = "x-xsrf-token";

/// Login body field for the account identifier
pub const LOGIN_IDENTIFIER_FIELD: &str = "email";

/// Login body field for the account secret
pub const LOGIN_SECRET_FIELD: &str = "password";

/// The portal rejects obviously non-browser clients.
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub const ACCEPT_LANGUAGE: &str = "en-GB,en;q=0.5";

/// Per-request timeout applied to every portal call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
