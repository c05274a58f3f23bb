//! Configuration management
//!
//! Settings come from `~/.periscope/periscope.toml` (created with a
//! commented template on first run) layered with `PERISCOPE_*`
//! environment variables, e.g. `PERISCOPE_BGP_DUMP=./rib.txt.bz2`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use config::Config;

use crate::ingest::RefreshSettings;

pub struct PeriscopeConfig {
    /// Location (path or URL) of the BGP table dump feed
    pub bgp_dump: String,

    /// Locations of the RIR delegation files
    pub delegation_files: Vec<String>,

    /// Seconds between refresh cycles (default: 1 hour)
    pub refresh_period_secs: u64,

    /// Deadline for the fetch stage of one cycle (default: 10 minutes)
    pub fetch_deadline_secs: u64,

    /// Base and cap for exponential retry backoff after a failed cycle
    pub retry_backoff_secs: u64,
    pub retry_backoff_cap_secs: u64,

    /// Allowed per-family allocation-coverage shrink between consecutive
    /// snapshots before the new one is rejected (default: 0.9)
    pub shrink_threshold: f64,
}

const EMPTY_CONFIG: &str = r#"### periscope configuration file

### feed locations; paths or URLs, optionally gz/bz2-compressed
# bgp_dump = "https://example.org/rib.latest.txt.bz2"
# delegation_files = "https://ftp.ripe.net/pub/stats/ripencc/delegated-ripencc-extended-latest"

### refresh cadence and limits (seconds)
# refresh_period_secs = 3600
# fetch_deadline_secs = 600
# retry_backoff_secs = 60
# retry_backoff_cap_secs = 1800

### snapshot validation: reject a snapshot whose allocation coverage
### shrank below this fraction of the previous one
# shrink_threshold = 0.9
"#;

impl Default for PeriscopeConfig {
    fn default() -> Self {
        Self {
            bgp_dump: String::new(),
            delegation_files: Vec::new(),
            refresh_period_secs: 3600,
            fetch_deadline_secs: 600,
            retry_backoff_secs: 60,
            retry_backoff_cap_secs: 1800,
            shrink_threshold: 0.9,
        }
    }
}

impl PeriscopeConfig {
    /// Create and initialize the configuration from file and environment
    pub fn new(path: &Option<String>) -> Result<PeriscopeConfig> {
        let mut builder = Config::builder();

        let home_dir = dirs::home_dir()
            .ok_or_else(|| anyhow!("Could not find home directory"))?
            .to_str()
            .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
            .to_owned();
        let periscope_dir = format!("{}/.periscope", home_dir.as_str());

        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                std::fs::create_dir_all(periscope_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create periscope directory: {}", e))?;
                let p = format!("{}/periscope.toml", periscope_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // Environment overrides with a PERISCOPE prefix, e.g.
        // `PERISCOPE_BGP_DUMP=./rib.txt periscope refresh`
        builder = builder.add_source(config::Environment::with_prefix("PERISCOPE"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;
        let values = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        let defaults = PeriscopeConfig::default();
        Ok(PeriscopeConfig {
            bgp_dump: values.get("bgp_dump").cloned().unwrap_or_default(),
            delegation_files: values
                .get("delegation_files")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            refresh_period_secs: parse_or(
                &values,
                "refresh_period_secs",
                defaults.refresh_period_secs,
            ),
            fetch_deadline_secs: parse_or(
                &values,
                "fetch_deadline_secs",
                defaults.fetch_deadline_secs,
            ),
            retry_backoff_secs: parse_or(&values, "retry_backoff_secs", defaults.retry_backoff_secs),
            retry_backoff_cap_secs: parse_or(
                &values,
                "retry_backoff_cap_secs",
                defaults.retry_backoff_cap_secs,
            ),
            shrink_threshold: parse_or(&values, "shrink_threshold", defaults.shrink_threshold),
        })
    }

    /// Settings for one refresh cycle
    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            bgp_dump: self.bgp_dump.clone(),
            delegation_files: self.delegation_files.clone(),
            fetch_deadline: Duration::from_secs(self.fetch_deadline_secs),
            shrink_threshold: self.shrink_threshold,
        }
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_period_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn retry_backoff_cap(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_cap_secs)
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let bgp_dump = if self.bgp_dump.is_empty() {
            "(none)"
        } else {
            self.bgp_dump.as_str()
        };
        let delegations = if self.delegation_files.is_empty() {
            "(none)".to_string()
        } else {
            self.delegation_files.join(", ")
        };
        let lines = [
            format!("BGP Dump:           {}", bgp_dump),
            format!("Delegation Files:   {}", delegations),
            format!("Refresh Period:     {} seconds", self.refresh_period_secs),
            format!("Fetch Deadline:     {} seconds", self.fetch_deadline_secs),
            format!(
                "Retry Backoff:      {}s base, {}s cap",
                self.retry_backoff_secs, self.retry_backoff_cap_secs
            ),
            format!("Shrink Threshold:   {}", self.shrink_threshold),
        ];
        lines.join("\n")
    }

    /// Get the default config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.periscope/periscope.toml", home_dir)
    }
}

fn parse_or<T: std::str::FromStr>(values: &HashMap<String, String>, key: &str, default: T) -> T {
    values
        .get(key)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PeriscopeConfig::default();
        assert_eq!(config.refresh_period_secs, 3600);
        assert_eq!(config.fetch_deadline_secs, 600);
        assert!(config.delegation_files.is_empty());
    }

    #[test]
    fn test_refresh_settings() {
        let config = PeriscopeConfig {
            bgp_dump: "/data/rib.txt".to_string(),
            delegation_files: vec!["/data/ripencc".to_string()],
            fetch_deadline_secs: 30,
            ..PeriscopeConfig::default()
        };
        let settings = config.refresh_settings();
        assert_eq!(settings.bgp_dump, "/data/rib.txt");
        assert_eq!(settings.fetch_deadline, Duration::from_secs(30));
        assert_eq!(settings.shrink_threshold, 0.9);
    }

    #[test]
    fn test_parse_or() {
        let mut values = HashMap::new();
        values.insert("n".to_string(), "17".to_string());
        values.insert("bad".to_string(), "xyz".to_string());
        assert_eq!(parse_or(&values, "n", 5u64), 17);
        assert_eq!(parse_or(&values, "bad", 5u64), 5);
        assert_eq!(parse_or(&values, "missing", 5u64), 5);
    }

    #[test]
    fn test_summary_mentions_feeds() {
        let config = PeriscopeConfig {
            bgp_dump: "/data/rib.txt".to_string(),
            ..PeriscopeConfig::default()
        };
        assert!(config.summary().contains("/data/rib.txt"));
    }
}
