//! Configuration file support for routesyncd
//!
//! Loads and validates routesyncd configuration from TOML files.
//! Default location: /etc/routesync/routesyncd.toml

use crate::error::{Result, RouteSyncError};
use routesync_common::RetryPolicy;
use routesync_types::IpFamily;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/routesync/routesyncd.toml";

/// Router selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Router whose route list is managed
    #[serde(default)]
    pub router_id: String,

    /// Resolve next hops as IPv6 instead of IPv4
    #[serde(default)]
    pub ipv6: bool,
}

/// Conflict retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total write attempts per operation, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff after the first conflict, in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Growth factor between consecutive backoffs
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Randomize each backoff within [backoff/2, backoff]
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Upper bound for one create/delete/list call, retries included.
    /// Zero disables the bound.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
}

/// Allow-list management
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllowListConfig {
    /// Whether allow-lists are reconciled at all
    #[serde(default)]
    pub manage_security_groups: bool,

    /// Allow-list used when none is given on the command line
    #[serde(default)]
    pub allow_list_id: Option<String>,
}

/// Complete routesyncd configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSyncConfig {
    /// Cluster name, passed to the reconciler as the cluster hint
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub allow_list: AllowListConfig,
}

fn default_cluster_name() -> String {
    "kubernetes".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    2000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

fn default_operation_timeout() -> u64 {
    30
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            operation_timeout_secs: default_operation_timeout(),
        }
    }
}

impl Default for RouteSyncConfig {
    fn default() -> Self {
        Self {
            cluster_name: default_cluster_name(),
            router: RouterConfig::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            allow_list: AllowListConfig::default(),
        }
    }
}

impl RouteSyncConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                RouteSyncError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(RouteSyncError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RouteSyncError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Address family used for next-hop resolution
    pub fn family(&self) -> IpFamily {
        IpFamily::from_ipv6_flag(self.router.ipv6)
    }

    /// Operation timeout, `None` when disabled
    pub fn operation_timeout(&self) -> Option<Duration> {
        match self.timeouts.operation_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Retry policy built from the `[retry]` section
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.max_attempts)
            .with_backoff(
                Duration::from_millis(self.retry.initial_backoff_ms),
                Duration::from_millis(self.retry.max_backoff_ms),
            )
            .with_multiplier(self.retry.multiplier)
            .with_jitter(self.retry.jitter)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.router.router_id.trim().is_empty() {
            return Err(RouteSyncError::Config("router.router_id must be set".to_string()));
        }

        if self.retry.max_attempts == 0 {
            return Err(RouteSyncError::Config("retry.max_attempts must be > 0".to_string()));
        }

        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return Err(RouteSyncError::Config("retry.multiplier must be >= 1.0".to_string()));
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(RouteSyncError::Config(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".to_string(),
            ));
        }

        if self.allow_list.manage_security_groups
            && self
                .allow_list
                .allow_list_id
                .as_deref()
                .map_or(true, |id| id.trim().is_empty())
        {
            return Err(RouteSyncError::Config(
                "allow_list.allow_list_id must be set when manage_security_groups is enabled"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn valid() -> RouteSyncConfig {
        let mut config = RouteSyncConfig::default();
        config.router.router_id = "router-1".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = RouteSyncConfig::default();
        assert_eq!(config.cluster_name, "kubernetes");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.family(), IpFamily::V4);
        assert_eq!(config.operation_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_validate_requires_router() {
        assert!(RouteSyncConfig::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_retry_bounds() {
        let mut config = valid();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.retry.initial_backoff_ms = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_allow_list() {
        let mut config = valid();
        config.allow_list.manage_security_groups = true;
        assert!(config.validate().is_err());

        config.allow_list.allow_list_id = Some("sg-nodes".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let mut config = valid();
        config.retry.jitter = false;
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
    }

    #[test]
    fn test_zero_timeout_disables_bound() {
        let mut config = valid();
        config.timeouts.operation_timeout_secs = 0;
        assert_eq!(config.operation_timeout(), None);
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
cluster_name = "prod"

[router]
router_id = "9a7c1e3e"
ipv6 = true

[retry]
max_attempts = 8
"#;
        let config: RouteSyncConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.cluster_name, "prod");
        assert_eq!(config.router.router_id, "9a7c1e3e");
        assert_eq!(config.family(), IpFamily::V6);
        assert_eq!(config.retry.max_attempts, 8);
        // Unspecified values should use defaults
        assert_eq!(config.retry.initial_backoff_ms, 100);
        assert!(!config.allow_list.manage_security_groups);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routesyncd.toml");
        let mut config = valid();
        config.allow_list.allow_list_id = Some("sg-1".to_string());
        config.save(&path).unwrap();

        let loaded = RouteSyncConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded.router.router_id, "router-1");
        assert_eq!(loaded.allow_list.allow_list_id.as_deref(), Some("sg-1"));
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = RouteSyncConfig::load_or_default("/nonexistent/path.toml").unwrap();
        assert_eq!(config.cluster_name, "kubernetes");
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "router = [").unwrap();
        assert!(matches!(
            RouteSyncConfig::load_or_default(&path),
            Err(RouteSyncError::Config(_))
        ));
    }
}
