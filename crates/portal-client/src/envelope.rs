//! Portal response envelope
//!
//! Every JSON body the portal returns has the same outer shape:
//!
//! ```json
//! {"success": true,  "response": { ...endpoint fields... }}
//! {"success": false, "errors": { ...free-form... }}
//! ```
//!
//! A missing `success` flag counts as failure. The `errors` value has no fixed
//! schema and is only inspected heuristically for credential hints.

use serde::Deserialize;
use serde_json::Value;

use crate::constants::{LOGIN_IDENTIFIER_FIELD, LOGIN_SECRET_FIELD};

/// Outer wrapper of every portal JSON body.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub response: Value,
    #[serde(default)]
    pub errors: Value,
}

impl Envelope {
    /// Parse a response body. Returns `None` for empty or non-object bodies.
    pub fn parse(body: &str) -> Option<Self> {
        if body.trim().is_empty() {
            return None;
        }
        serde_json::from_str(body).ok()
    }

    /// Bearer token from a login response, if the deployment issues one.
    pub fn token(&self) -> Option<&str> {
        self.response
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }

    /// Whether the error payload points at the submitted credentials.
    pub fn names_credentials(&self) -> bool {
        names_credentials(&self.errors)
    }
}

/// Heuristic: does a free-form error payload blame the credential fields?
///
/// Matches an object keyed by the login fields, a list naming them, or any
/// payload mentioning "credentials".
pub fn names_credentials(errors: &Value) -> bool {
    let fields = [LOGIN_IDENTIFIER_FIELD, LOGIN_SECRET_FIELD];
    let keyed = match errors {
        Value::Object(map) => fields.iter().any(|f| map.contains_key(*f)),
        Value::Array(items) => items
            .iter()
            .any(|item| item.as_str().is_some_and(|s| fields.contains(&s))),
        _ => false,
    };
    keyed || errors.to_string().to_lowercase().contains("credentials")
}

/// Best-effort error payload from a body that may not be an envelope.
pub fn error_payload(body: &str) -> Value {
    match Envelope::parse(body) {
        Some(envelope) if !envelope.errors.is_null() => envelope.errors,
        _ => match serde_json::from_str::<Value>(body) {
            Ok(value) => value,
            Err(_) => Value::String(body.to_string()),
        },
    }
}
