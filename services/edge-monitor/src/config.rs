//! Configuration for the edge monitor.

use std::time::Duration;

use anyhow::{Context, Result};
use edge_monitor_id::AppUuid;

use crate::monitor::MonitorSettings;

/// Application UUID the agent configs are stored under by default.
pub const DEFAULT_AGENT_CONFIG_APP: &str = "aac6f843-cfee-4683-b121-6943bfdf9173";

/// Edge monitor configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Config store base URL.
    pub configdb_url: String,

    /// Command escalation service base URL.
    pub cmdesc_url: String,

    /// JSON file listing the node resources to monitor.
    pub nodes_file: String,

    /// Config store application holding agent configs.
    pub agent_config_app: AppUuid,

    /// Reload throttle window in milliseconds.
    pub reload_throttle_ms: u64,

    /// Offline escalation interval in milliseconds.
    pub offline_interval_ms: u64,

    /// Bound on one command dispatch in seconds.
    pub command_timeout_secs: u64,

    /// Config store change poll interval in seconds.
    pub store_poll_secs: u64,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through a variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let configdb_url = lookup("EDGE_MONITOR_CONFIGDB_URL")
            .unwrap_or_else(|| "http://configdb.fplus.svc.cluster.local".to_string());

        let cmdesc_url = lookup("EDGE_MONITOR_CMDESC_URL")
            .unwrap_or_else(|| "http://cmdesc.fplus.svc.cluster.local".to_string());

        let nodes_file = lookup("EDGE_MONITOR_NODES_FILE")
            .unwrap_or_else(|| "/etc/edge-monitor/nodes.json".to_string());

        let agent_config_app = lookup("EDGE_MONITOR_AGENT_CONFIG_APP")
            .unwrap_or_else(|| DEFAULT_AGENT_CONFIG_APP.to_string());
        let agent_config_app = AppUuid::parse(&agent_config_app)
            .with_context(|| format!("invalid EDGE_MONITOR_AGENT_CONFIG_APP '{agent_config_app}'"))?;

        let number = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid {key} '{raw}'")),
                None => Ok(default),
            }
        };

        let reload_throttle_ms = number("EDGE_MONITOR_RELOAD_THROTTLE_MS", 5_000)?;
        let offline_interval_ms = number("EDGE_MONITOR_OFFLINE_INTERVAL_MS", 10_000)?;
        let command_timeout_secs = number("EDGE_MONITOR_COMMAND_TIMEOUT_SECS", 30)?;
        let store_poll_secs = number("EDGE_MONITOR_STORE_POLL_SECS", 30)?;

        let log_level = lookup("EDGE_MONITOR_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            configdb_url,
            cmdesc_url,
            nodes_file,
            agent_config_app,
            reload_throttle_ms,
            offline_interval_ms,
            command_timeout_secs,
            store_poll_secs,
            log_level,
        })
    }

    /// Timing and addressing for the monitors.
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            agent_config_app: self.agent_config_app,
            reload_throttle: Duration::from_millis(self.reload_throttle_ms),
            offline_interval: Duration::from_millis(self.offline_interval_ms),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
        }
    }

    pub fn store_poll_interval(&self) -> Duration {
        Duration::from_secs(self.store_poll_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        let settings = config.monitor_settings();

        assert_eq!(settings.reload_throttle, Duration::from_secs(5));
        assert_eq!(settings.offline_interval, Duration::from_secs(10));
        assert_eq!(settings.command_timeout, Duration::from_secs(30));
        assert_eq!(config.store_poll_interval(), Duration::from_secs(30));
        assert_eq!(config.agent_config_app.to_string(), DEFAULT_AGENT_CONFIG_APP);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("EDGE_MONITOR_RELOAD_THROTTLE_MS", "250"),
            ("EDGE_MONITOR_OFFLINE_INTERVAL_MS", " 1000 "),
            ("EDGE_MONITOR_CMDESC_URL", "http://localhost:9000"),
        ])
        .unwrap();

        assert_eq!(config.reload_throttle_ms, 250);
        assert_eq!(config.offline_interval_ms, 1000);
        assert_eq!(config.cmdesc_url, "http://localhost:9000");
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(load(&[("EDGE_MONITOR_OFFLINE_INTERVAL_MS", "soon")]).is_err());
        assert!(load(&[("EDGE_MONITOR_AGENT_CONFIG_APP", "not-a-uuid")]).is_err());
    }
}
