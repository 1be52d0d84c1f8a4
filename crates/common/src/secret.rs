//! Secret wrapper for sensitive values
//!
//! Portal passwords, bearer tokens and anti-forgery tokens all travel in a
//! `Secret` so they never show up in `Debug` output or structured logs.

use std::fmt;
use std::path::Path;

use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Resolve a secret from an environment variable or a file.
    ///
    /// The environment variable wins when both are given. File contents are
    /// trimmed; an empty file counts as missing.
    pub fn resolve(env_var: Option<&str>, file: Option<&Path>) -> Result<Self> {
        if let Some(name) = env_var
            && let Ok(value) = std::env::var(name)
            && !value.trim().is_empty()
        {
            return Ok(Self::new(value.trim().to_owned()));
        }

        if let Some(path) = file {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                Error::Secret(format!("failed to read {}: {e}", path.display()))
            })?;
            let value = contents.trim().to_owned();
            if !value.is_empty() {
                return Ok(Self::new(value));
            }
            return Err(Error::Secret(format!("{} is empty", path.display())));
        }

        match env_var {
            Some(name) => Err(Error::Secret(format!("{name} is not set"))),
            None => Err(Error::Secret("no environment variable or file given".into())),
        }
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
