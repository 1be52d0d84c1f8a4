//! Service-specific error types

use thiserror::Error;

/// Host-level failures: account selection and startup validation.
///
/// Portal and refresh failures keep their own types (`CallError`,
/// `RefreshError`); these cover what the host adds on top.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("no accounts configured")]
    NoAccounts,

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("{0} accounts configured, an account selector is required")]
    AmbiguousAccount(usize),

    /// Shown for every credential-class login failure; the upstream payload
    /// is only logged.
    #[error("invalid credentials for account {0}")]
    InvalidCredentials(String),
}

impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NoAccounts => "no_accounts",
            Error::UnknownAccount(_) => "unknown_account",
            Error::AmbiguousAccount(_) => "ambiguous_account",
            Error::InvalidCredentials(_) => "invalid_credentials",
        }
    }
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
