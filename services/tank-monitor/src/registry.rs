//! Account registry
//!
//! Maps each configured account id to its session/coordinator pair. Accounts
//! share nothing: each has its own transport, cookie jar, auth context and
//! snapshot cache.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use portal_client::AuthenticatedSession;
use tank_poller::{Endpoints, PollingCoordinator};
use tracing::info;

use crate::error::{Error, Result};

/// One account's session and the coordinator driving it.
pub struct Account {
    pub session: Arc<AuthenticatedSession>,
    pub coordinator: Arc<PollingCoordinator>,
}

impl Account {
    pub fn new(session: Arc<AuthenticatedSession>, endpoints: Endpoints, interval: Duration) -> Self {
        let coordinator = Arc::new(PollingCoordinator::new(
            session.clone(),
            endpoints,
            interval,
        ));
        Self {
            session,
            coordinator,
        }
    }
}

#[derive(Default)]
pub struct AccountRegistry {
    accounts: BTreeMap<String, Account>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: String, account: Account) {
        info!(account = %id, "account registered");
        self.accounts.insert(id, account);
    }

    pub fn ids(&self) -> Vec<String> {
        self.accounts.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Account)> {
        self.accounts.iter().map(|(id, account)| (id.as_str(), account))
    }

    /// Pick the account an operation targets.
    ///
    /// The selector may be omitted only when exactly one account exists.
    pub fn resolve(&self, selector: Option<&str>) -> Result<(&str, &Account)> {
        if let Some(id) = selector {
            return self
                .accounts
                .get_key_value(id)
                .map(|(id, account)| (id.as_str(), account))
                .ok_or_else(|| Error::UnknownAccount(id.to_string()));
        }

        let mut accounts = self.iter();
        match (accounts.next(), accounts.next()) {
            (None, _) => Err(Error::NoAccounts),
            (Some(only), None) => Ok(only),
            (Some(_), Some(_)) => Err(Error::AmbiguousAccount(self.accounts.len())),
        }
    }

    /// Close every session. Safe to call more than once.
    pub async fn close_all(&self) {
        for (id, account) in &self.accounts {
            account.session.close().await;
            info!(account = %id, "session closed");
        }
    }
}
