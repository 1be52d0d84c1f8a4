//! Authenticated client for the account portal
//!
//! The portal gates every call behind two credentials: an anti-forgery token
//! handed out as a cookie by a handshake endpoint, and a bearer token issued
//! by the login endpoint. `AuthenticatedSession` hides that protocol and
//! offers a single `call()` primitive that survives silent expiry of either
//! layer by re-authenticating once and retrying once.
//!
//! Login flow:
//! 1. `GET` the handshake endpoint, expect `204` and an `XSRF-TOKEN` cookie
//! 2. URL-decode the cookie value into the anti-forgery token
//! 3. `POST` the credential to the login endpoint with the token in `X-XSRF-TOKEN`
//! 4. Keep the bearer token from the login response for later calls

pub mod api;
pub mod constants;
pub mod cookie;
pub mod credentials;
pub mod envelope;
pub mod error;
pub mod session;
pub mod status;

pub use api::PortalApi;
pub use constants::*;
pub use credentials::Credential;
pub use envelope::Envelope;
pub use error::{AuthError, AuthResult, CallError, CallResult};
pub use session::{AuthContext, AuthenticatedSession, SessionConfig};
pub use status::{StatusClass, classify_status};

pub use reqwest::Method;
