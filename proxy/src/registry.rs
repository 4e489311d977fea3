use crate::account::{Usage, UserAccount};
use crate::auth::CredentialStore;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Lazily-populated map of username to account, plus the credential table
/// used to authenticate those users.
///
/// Accounts are created on a user's first authenticated request and are kept
/// for the lifetime of the process.
#[derive(Debug)]
pub struct AccountRegistry {
    accounts: DashMap<String, Arc<UserAccount>>,
    credentials: CredentialStore,
}

impl AccountRegistry {
    pub fn new(credentials: CredentialStore) -> Self {
        Self {
            accounts: DashMap::new(),
            credentials,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Returns the user's account, creating it exactly once under concurrency.
    pub fn get_or_create(&self, username: &str) -> Arc<UserAccount> {
        if let Some(account) = self.accounts.get(username) {
            return Arc::clone(account.value());
        }

        let entry = self
            .accounts
            .entry(username.to_string())
            .or_insert_with(|| {
                debug!("Creating account for user: {}", username);
                Arc::new(UserAccount::new())
            });
        Arc::clone(entry.value())
    }

    pub fn get(&self, username: &str) -> Option<Arc<UserAccount>> {
        self.accounts.get(username).map(|a| Arc::clone(a.value()))
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Usage of every known account, sorted by username.
    pub fn snapshot(&self) -> Vec<(String, Usage)> {
        let mut out: Vec<(String, Usage)> = self
            .accounts
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().usage()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}
