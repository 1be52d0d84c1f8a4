//! Account credential
//!
//! The identifier/secret pair is handed to the session at construction and
//! never changes afterwards. Re-entering a password means building a new
//! session.

use common::Secret;

/// Immutable login credential for one portal account.
#[derive(Debug, Clone)]
pub struct Credential {
    identifier: String,
    secret: Secret<String>,
}

impl Credential {
    pub fn new(identifier: impl Into<String>, secret: Secret<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret,
        }
    }

    /// Account identifier (the portal login email).
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub(crate) fn secret(&self) -> &str {
        self.secret.expose()
    }
}
