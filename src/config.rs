//! Service configuration.
//!
//! Loaded from a YAML file whose field names match the deployed service's
//! config file (`DomainNames`, `Clear1Duration`, ...). Unknown fields are
//! rejected so a typo never silently falls back to a default.
//!
//! ```yaml
//! DomainNames: ["7i.se", "xn--3-rfa.se"]
//! Clear1Duration: 24h
//! Clear2Duration: 72h
//! Clear3Duration: 168h
//! ClearCustomLinksDuration: 720h
//! MaxCustomLinks: 5000
//! LinkAccessMaxNr: 100
//! StaticLinks:
//!   about: https://example.com/about
//! BackupDir: /var/lib/tempkey
//! Logging:
//!   Level: info
//!   Format: json
//! ```

use crate::keyspace::charset::is_custom_charset;
use crate::keyspace::{ExpiryConfig, PartitionConfig};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration file used when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "./config";

/// Upper bound for every configured duration (100 years).
pub const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Service configuration loaded from a YAML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "PascalCase")]
pub struct Config {
    /// Domains served; each gets its own keyspace partition
    pub domain_names: Vec<String>,

    /// Lifetime of entries with 1-character keys
    #[serde(deserialize_with = "deserialize_duration")]
    pub clear1_duration: Duration,

    /// Lifetime of entries with 2-character keys
    #[serde(deserialize_with = "deserialize_duration")]
    pub clear2_duration: Duration,

    /// Lifetime of entries with 3-character keys
    #[serde(deserialize_with = "deserialize_duration")]
    pub clear3_duration: Duration,

    /// Lifetime of entries with custom keys
    #[serde(deserialize_with = "deserialize_duration")]
    pub clear_custom_links_duration: Duration,

    /// Maximum number of active custom keys per domain
    #[serde(default = "default_max_custom_links")]
    pub max_custom_links: usize,

    /// Upper bound for a requested access count
    #[serde(default = "default_link_access_max_nr")]
    pub link_access_max_nr: i64,

    /// Keys that never expire, mapped to their target URL
    #[serde(default)]
    pub static_links: HashMap<String, String>,

    /// Periodic safety wake of every expiry loop (default: 10s)
    #[serde(
        default = "default_expiry_tick_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub expiry_tick_interval: Duration,

    /// Directory for bucket backups; backups are disabled when unset
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,

    /// Time between backups (default: 30m)
    #[serde(
        default = "default_backup_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub backup_interval: Duration,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, colored output
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "PascalCase")]
pub struct LoggingConfig {
    /// Level filter, e.g. "info" or "tempkey=debug" (RUST_LOG takes precedence)
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Include the event target (module path) in each line
    #[serde(default = "default_true")]
    pub target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            target: true,
        }
    }
}

fn default_max_custom_links() -> usize {
    5000
}

fn default_link_access_max_nr() -> i64 {
    100
}

fn default_expiry_tick_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_backup_interval() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Deserialize a duration written as "24h", "1h30m" or "500ms".
///
/// Bare numbers are taken as seconds.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationValue {
        Seconds(u64),
        String(String),
    }

    match DurationValue::deserialize(deserializer)? {
        DurationValue::Seconds(secs) => Ok(Duration::from_secs(secs)),
        DurationValue::String(s) => parse_duration(&s).map_err(D::Error::custom),
    }
}

/// Parse a duration string like "72h", "1h20m30s", "1.5h" or "250ms".
///
/// Accepted units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. Every number
/// needs a unit, except a lone `0`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration: {}", s))?;
        if num_end == 0 {
            return Err(format!("invalid duration: {}", s));
        }
        let (num_str, tail) = rest.split_at(num_end);
        let num: f64 = num_str
            .parse()
            .map_err(|_| format!("invalid number in duration: {}", num_str))?;

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);

        let unit_secs = match unit {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(format!("unknown unit in duration: {}", unit)),
        };

        total = Duration::try_from_secs_f64(num * unit_secs)
            .ok()
            .and_then(|part| total.checked_add(part))
            .ok_or_else(|| format!("duration out of range: {}", s))?;
        rest = next;
    }

    Ok(total)
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::from_yaml(&contents)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.domain_names.is_empty() {
            bail!("DomainNames must list at least one domain");
        }

        let mut seen = HashSet::new();
        for domain in &self.domain_names {
            if domain.trim().is_empty() {
                bail!("DomainNames contains an empty domain");
            }
            if !seen.insert(domain.as_str()) {
                bail!("duplicate domain in DomainNames: {}", domain);
            }
        }

        for (name, value) in [
            ("Clear1Duration", self.clear1_duration),
            ("Clear2Duration", self.clear2_duration),
            ("Clear3Duration", self.clear3_duration),
            ("ClearCustomLinksDuration", self.clear_custom_links_duration),
            ("ExpiryTickInterval", self.expiry_tick_interval),
            ("BackupInterval", self.backup_interval),
        ] {
            if value.is_zero() {
                bail!("{} must be greater than zero", name);
            }
            if value > MAX_DURATION {
                bail!("{} must be at most 100 years", name);
            }
        }

        for key in self.static_links.keys() {
            if key.is_empty() || !is_custom_charset(key) {
                bail!("invalid StaticLinks key: {:?}", key);
            }
        }

        if self.link_access_max_nr < 1 {
            bail!(
                "LinkAccessMaxNr must be at least 1, got {}",
                self.link_access_max_nr
            );
        }

        Ok(())
    }

    /// Bucket settings shared by every domain's partition.
    pub fn partition_config(&self) -> PartitionConfig {
        PartitionConfig {
            clear1: self.clear1_duration,
            clear2: self.clear2_duration,
            clear3: self.clear3_duration,
            clear_custom: self.clear_custom_links_duration,
            max_custom_links: self.max_custom_links,
        }
    }

    pub fn expiry_config(&self) -> ExpiryConfig {
        ExpiryConfig {
            tick_interval: self.expiry_tick_interval,
        }
    }
}
