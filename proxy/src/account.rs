//! Per-user resource accounting.
//!
//! A [`UserAccount`] tracks how many requests a user currently has in flight
//! and how many bytes that user has moved through the proxy. Both counters sit
//! behind one lock so that admission ("under both limits?") is a single atomic
//! decision.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_DATA_LIMIT: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(60 * 60);

/// Limits applied to every user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_connections: u32,
    /// Cumulative byte budget; a user is over quota once `data_used >= data_limit`.
    pub data_limit: u64,
    /// Bound on dialing, on an upstream request, and on a tunnel's lifetime.
    pub time_limit: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            data_limit: DEFAULT_DATA_LIMIT,
            time_limit: DEFAULT_TIME_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub active_connections: u32,
    pub data_used: u64,
}

impl Usage {
    fn over_quota(&self, limit: u64) -> bool {
        self.data_used >= limit
    }

    fn try_acquire(&mut self, max: u32) -> bool {
        if self.active_connections >= max {
            return false;
        }
        self.active_connections += 1;
        true
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("data limit exceeded")]
    QuotaExceeded,

    #[error("connection limit exceeded")]
    ConnectionLimitExceeded,
}

#[derive(Debug, Default)]
pub struct UserAccount {
    usage: Mutex<Usage>,
}

impl UserAccount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire_connection(&self, max: u32) -> bool {
        self.usage.lock().try_acquire(max)
    }

    pub fn release_connection(&self) {
        let mut usage = self.usage.lock();
        debug_assert!(usage.active_connections > 0, "connection released twice");
        usage.active_connections = usage.active_connections.saturating_sub(1);
    }

    pub fn is_over_quota(&self, limit: u64) -> bool {
        self.usage.lock().over_quota(limit)
    }

    pub fn add_data(&self, bytes: u64) {
        let mut usage = self.usage.lock();
        usage.data_used = usage.data_used.saturating_add(bytes);
    }

    pub fn usage(&self) -> Usage {
        *self.usage.lock()
    }

    /// Checks the quota, then reserves a connection slot, under a single lock.
    ///
    /// The returned [`ConnectionSlot`] gives the slot back when dropped.
    pub fn admit(self: &Arc<Self>, limits: &Limits) -> Result<ConnectionSlot, AdmissionError> {
        let mut usage = self.usage.lock();
        if usage.over_quota(limits.data_limit) {
            return Err(AdmissionError::QuotaExceeded);
        }
        if !usage.try_acquire(limits.max_connections) {
            return Err(AdmissionError::ConnectionLimitExceeded);
        }
        debug!(
            "Admitted connection ({}/{} active)",
            usage.active_connections, limits.max_connections
        );
        Ok(ConnectionSlot {
            account: Arc::clone(self),
        })
    }
}

/// One admitted request's hold on its user's connection budget.
#[must_use = "dropping the slot releases the connection immediately"]
#[derive(Debug)]
pub struct ConnectionSlot {
    account: Arc<UserAccount>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.account.release_connection();
    }
}
