//! Configuration loading and validation.
//!
//! `keyforge` loads a single JSON configuration file (`config.json` by
//! default, or `$KEYFORGE_CONFIG_PATH`) holding the key pool, per-model
//! budgets, and reset schedule. Precedence is env vars > file > defaults.
//!
//! If the file does not exist, a placeholder is written and the process
//! continues with it — first-run ergonomics over a hard failure.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::clock;
use crate::errors::ConfigError;

/// Per-model token budget limits.
///
/// `UsageCell`s never copy these — they look the model up by name in the
/// live [`ProxyConfig`] on every access, so a config reload can't leave a
/// cell holding stale limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLimits {
    /// Tokens-per-minute budget.
    pub tpm_limit: u64,
    /// Tokens-per-day budget, or `None` for unlimited.
    #[serde(default)]
    pub tpd_limit: Option<u64>,
}

/// Top-level proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Priority-class API keys, in canonical order.
    pub priority_keys: Vec<String>,
    /// Secondary-class API keys, in canonical order.
    pub secondary_keys: Vec<String>,
    /// Per-model budget configuration, keyed by model name.
    pub models: HashMap<String, ModelLimits>,
    /// Local time-of-day at which the daily reset fires, `"HH:MM"`.
    pub reset_after: String,
    /// The next scheduled reset instant, `"YYYY-MM-DD HH:MM"` (UTC).
    pub next_quota_reset_datetime: String,
    /// IANA timezone name the reset schedule is evaluated in.
    pub timezone: String,
    /// Model name used when a request names an unconfigured model.
    pub default_model: String,
}

/// Environment variable overriding `priority_keys` (comma-separated).
const ENV_PRIORITY_KEYS: &str = "KEYFORGE_PRIORITY_KEYS";
/// Environment variable overriding `secondary_keys` (comma-separated).
const ENV_SECONDARY_KEYS: &str = "KEYFORGE_SECONDARY_KEYS";
/// Environment variable overriding the config file path.
const ENV_CONFIG_PATH: &str = "KEYFORGE_CONFIG_PATH";

impl ProxyConfig {
    /// Load configuration with precedence: env vars > JSON file > placeholder defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but is malformed, if an
    /// I/O error other than "not found" occurs, or if validation fails
    /// (unknown default model, invalid timezone/time/datetime strings).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str::<ProxyConfig>(&contents)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, writing defaults");
                let defaults = ProxyConfig::placeholder();
                defaults.save(path)?;
                defaults
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration file path: `$KEYFORGE_CONFIG_PATH` or `./config.json`.
    pub fn resolve_path() -> PathBuf {
        std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.json"))
    }

    /// Persist this configuration as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let serialized =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, serialized).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment variable overrides via a resolver function, so the
    /// override logic is testable without mutating the real process environment.
    fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env(ENV_PRIORITY_KEYS) {
            self.priority_keys = split_csv(&v);
        }
        if let Some(v) = env(ENV_SECONDARY_KEYS) {
            self.secondary_keys = split_csv(&v);
        }
    }

    /// Validate cross-field invariants the type system can't express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on an unknown default model or a malformed
    /// timezone/time/datetime string.
    pub fn validate(&self) -> Result<(), ConfigError> {
        clock::resolve_timezone(&self.timezone)?;
        clock::parse_hhmm(&self.reset_after)?;
        clock::parse_reset_datetime(&self.next_quota_reset_datetime)?;
        if !self.models.contains_key(&self.default_model) {
            return Err(ConfigError::Invalid(format!(
                "default_model '{}' is not present in models",
                self.default_model
            )));
        }
        Ok(())
    }

    /// Build a placeholder configuration written on first run.
    fn placeholder() -> Self {
        let mut models = HashMap::new();
        models.insert(
            "default".to_owned(),
            ModelLimits {
                tpm_limit: 60_000,
                tpd_limit: None,
            },
        );

        let next_reset = clock::next_reset_after(clock::now_utc(), 0, 0, chrono_tz::UTC);

        Self {
            priority_keys: Vec::new(),
            secondary_keys: Vec::new(),
            models,
            reset_after: "00:00".to_owned(),
            next_quota_reset_datetime: clock::format_reset_datetime(next_reset),
            timezone: "UTC".to_owned(),
            default_model: "default".to_owned(),
        }
    }
}

fn split_csv(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProxyConfig {
        let mut models = HashMap::new();
        models.insert(
            "gpt".to_owned(),
            ModelLimits {
                tpm_limit: 1000,
                tpd_limit: Some(100_000),
            },
        );
        ProxyConfig {
            priority_keys: vec!["k1".to_owned()],
            secondary_keys: vec![],
            models,
            reset_after: "00:00".to_owned(),
            next_quota_reset_datetime: "2026-07-28 00:00".to_owned(),
            timezone: "UTC".to_owned(),
            default_model: "gpt".to_owned(),
        }
    }

    #[test]
    fn validate_accepts_well_formed_config() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn validate_rejects_unknown_default_model() {
        let mut config = sample();
        config.default_model = "missing".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_timezone() {
        let mut config = sample();
        config.timezone = "Not/AZone".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_replace_key_lists() {
        let mut config = sample();
        config.apply_env_overrides(|key| match key {
            "KEYFORGE_PRIORITY_KEYS" => Some("a, b ,c".to_owned()),
            _ => None,
        });
        assert_eq!(config.priority_keys, vec!["a", "b", "c"]);
        assert_eq!(config.secondary_keys, Vec::<String>::new());
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = sample();
        config.save(&path).unwrap();
        let loaded = ProxyConfig::load(&path).unwrap();
        assert_eq!(loaded.priority_keys, config.priority_keys);
        assert_eq!(loaded.default_model, config.default_model);
    }

    #[test]
    fn missing_file_creates_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let loaded = ProxyConfig::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(loaded.default_model, "default");
    }
}
