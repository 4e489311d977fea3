use crate::account::{
    DEFAULT_DATA_LIMIT, DEFAULT_MAX_CONNECTIONS, DEFAULT_TIME_LIMIT, Limits,
};
use crate::auth::CredentialStore;
use crate::error::ProxyError;
use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub users: HashMap<String, UserConfig>,

    #[serde(default = "default_max_connections_per_user")]
    pub max_connections_per_user: u32,

    #[serde(default = "default_data_limit_bytes")]
    pub data_limit_bytes: u64,

    #[serde(default = "default_time_limit_secs")]
    pub time_limit_secs: u64,

    /// Seconds between usage log lines; 0 disables the reporter.
    #[serde(default)]
    pub usage_report_interval_secs: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_dir: Option<String>,

    #[serde(default)]
    pub console_port: Option<u16>,
}

#[derive(Clone, Deserialize)]
pub struct UserConfig {
    pub password: String,
}

impl fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserConfig")
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_connections_per_user() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_data_limit_bytes() -> u64 {
    DEFAULT_DATA_LIMIT
}

fn default_time_limit_secs() -> u64 {
    DEFAULT_TIME_LIMIT.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            users: HashMap::new(),
            max_connections_per_user: default_max_connections_per_user(),
            data_limit_bytes: default_data_limit_bytes(),
            time_limit_secs: default_time_limit_secs(),
            usage_report_interval_secs: 0,
            log_level: default_log_level(),
            log_dir: None,
            console_port: None,
        }
    }
}

impl ProxyConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.max_connections_per_user == 0 {
            return Err(ProxyError::Configuration(
                "max_connections_per_user must be at least 1".to_string(),
            ));
        }
        if self.time_limit_secs == 0 {
            return Err(ProxyError::Configuration(
                "time_limit_secs must be at least 1".to_string(),
            ));
        }
        self.listen_addr.parse::<SocketAddr>().map_err(|e| {
            ProxyError::Configuration(format!("invalid listen_addr {}: {}", self.listen_addr, e))
        })?;
        Ok(())
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_connections: self.max_connections_per_user,
            data_limit: self.data_limit_bytes,
            time_limit: Duration::from_secs(self.time_limit_secs),
        }
    }

    pub fn credentials(&self) -> CredentialStore {
        self.users
            .iter()
            .map(|(name, user)| (name.clone(), user.password.clone()))
            .collect()
    }

    pub fn usage_report_interval(&self) -> Option<Duration> {
        (self.usage_report_interval_secs > 0)
            .then(|| Duration::from_secs(self.usage_report_interval_secs))
    }
}
