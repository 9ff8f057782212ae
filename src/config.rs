//! Application configuration management.
//!
//! Configuration is a JSON file (default `~/.config/clubledger/config.json`,
//! overridable with `CLUBLEDGER_CONFIG`) holding the upstream endpoint, the
//! tracked groups, and the sync/cache knobs. Group entries are strict: a
//! group without an explicit daily quota is a config error, not a zero.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache/data directory paths
const APP_NAME: &str = "clubledger";

/// Config file name
const CONFIG_FILE: &str = "config.json";

fn default_cache_ttl_secs() -> u64 {
    1800
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_inter_group_delay_secs() -> u64 {
    2
}

fn default_sync_interval_secs() -> u64 {
    6 * 60 * 60
}

fn default_max_attempts() -> u32 {
    3
}

/// One tracked group. `quota_per_day` has no default on purpose: a missing
/// quota must fail the config load rather than silently score against 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub group_id: u64,
    pub quota_per_day: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub upstream_base_url: String,
    pub groups: Vec<GroupConfig>,

    /// Overrides for the dirs-derived defaults.
    pub data_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,

    /// Egress rotation list, one `ip:port[:user:pass]` per line.
    pub proxy_file: Option<PathBuf>,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cooldown_secs")]
    pub group_cooldown_secs: u64,
    #[serde(default = "default_inter_group_delay_secs")]
    pub inter_group_delay_secs: u64,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub retry_max_attempts: u32,
}

impl AppConfig {
    /// Load from `CLUBLEDGER_CONFIG` if set, else the default location.
    pub fn load() -> Result<Self> {
        let path = match std::env::var_os("CLUBLEDGER_CONFIG") {
            Some(p) => PathBuf::from(p),
            None => Self::config_path()?,
        };
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.upstream_base_url.is_empty() {
            anyhow::bail!("upstream_base_url must not be empty");
        }
        if self.groups.is_empty() {
            anyhow::bail!("at least one group must be configured");
        }
        for group in &self.groups {
            if group.quota_per_day == 0 {
                anyhow::bail!("group '{}' has a zero quota_per_day", group.name);
            }
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn log_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.log_dir {
            return Ok(dir.clone());
        }
        Ok(self.data_dir()?.join("logs"))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn group_cooldown(&self) -> Duration {
        Duration::from_secs(self.group_cooldown_secs)
    }

    pub fn inter_group_delay(&self) -> Duration {
        Duration::from_secs(self.inter_group_delay_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"{
        "upstream_base_url": "https://api.example.com",
        "groups": [
            {"name": "Club A", "group_id": 101, "quota_per_day": 5000}
        ]
    }"#;

    #[test]
    fn test_parse_with_defaults() {
        let config: AppConfig = serde_json::from_str(GOOD).unwrap();
        config.validate().unwrap();
        assert_eq!(config.cache_ttl_secs, 1800);
        assert_eq!(config.group_cooldown_secs, 60);
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.groups[0].quota_per_day, 5000);
    }

    #[test]
    fn test_missing_quota_is_rejected() {
        let raw = r#"{
            "upstream_base_url": "https://api.example.com",
            "groups": [{"name": "Club A", "group_id": 101}]
        }"#;
        assert!(serde_json::from_str::<AppConfig>(raw).is_err());
    }

    #[test]
    fn test_zero_quota_is_rejected() {
        let raw = r#"{
            "upstream_base_url": "https://api.example.com",
            "groups": [{"name": "Club A", "group_id": 101, "quota_per_day": 0}]
        }"#;
        let config: AppConfig = serde_json::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_no_groups_is_rejected() {
        let raw = r#"{"upstream_base_url": "https://api.example.com", "groups": []}"#;
        let config: AppConfig = serde_json::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }
}
