use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_load_retry_attempts")]
    pub load_retry_attempts: u32,
    #[serde(default = "default_load_retry_backoff_ms")]
    pub load_retry_backoff_ms: u64,
    #[serde(default = "default_skip_correct_groups")]
    pub skip_correct_groups: bool,
    #[serde(default = "default_min_secs_per_item")]
    pub min_secs_per_item: f64,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_load_retry_attempts() -> u32 {
    3
}
fn default_load_retry_backoff_ms() -> u64 {
    150
}
fn default_skip_correct_groups() -> bool {
    false
}
fn default_min_secs_per_item() -> f64 {
    4.0
}
fn default_log_filter() -> String {
    "retakr=info".to_string()
}
fn default_data_dir() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("retakr")
        .to_string_lossy()
        .to_string()
}

const MAX_LOAD_RETRY_ATTEMPTS: u32 = 10;
const MAX_LOAD_RETRY_BACKOFF_MS: u64 = 5_000;

impl Default for Config {
    fn default() -> Self {
        Self {
            load_retry_attempts: default_load_retry_attempts(),
            load_retry_backoff_ms: default_load_retry_backoff_ms(),
            skip_correct_groups: default_skip_correct_groups(),
            min_secs_per_item: default_min_secs_per_item(),
            log_filter: default_log_filter(),
            data_dir: default_data_dir(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let mut config: Config = toml::from_str(&content)?;
            config.validate();
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("retakr")
            .join("config.toml")
    }

    /// Clamp values a hand-edited file may have pushed out of range.
    pub fn validate(&mut self) {
        self.load_retry_attempts = self.load_retry_attempts.clamp(1, MAX_LOAD_RETRY_ATTEMPTS);
        self.load_retry_backoff_ms = self.load_retry_backoff_ms.min(MAX_LOAD_RETRY_BACKOFF_MS);
        if !self.min_secs_per_item.is_finite() || self.min_secs_per_item < 0.0 {
            self.min_secs_per_item = 0.0;
        }
        if self.log_filter.trim().is_empty() {
            self.log_filter = default_log_filter();
        }
        if self.data_dir.trim().is_empty() {
            self.data_dir = default_data_dir();
        }
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serde_defaults_from_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.load_retry_attempts, 3);
        assert_eq!(config.load_retry_backoff_ms, 150);
        assert!(!config.skip_correct_groups);
        assert_eq!(config.log_filter, "retakr=info");
        assert!(config.data_dir.contains("retakr"));
    }

    #[test]
    fn test_config_serde_defaults_from_partial_file() {
        let toml_str = r#"
load_retry_attempts = 5
skip_correct_groups = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.load_retry_attempts, 5);
        assert!(config.skip_correct_groups);
        assert_eq!(config.load_retry_backoff_ms, 150);
        assert!((config.min_secs_per_item - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(config.load_retry_attempts, deserialized.load_retry_attempts);
        assert_eq!(config.load_retry_backoff_ms, deserialized.load_retry_backoff_ms);
        assert_eq!(config.skip_correct_groups, deserialized.skip_correct_groups);
        assert_eq!(config.data_dir, deserialized.data_dir);
    }

    #[test]
    fn test_validate_clamps_values() {
        let mut config = Config::default();
        config.load_retry_attempts = 0;
        config.load_retry_backoff_ms = 60_000;
        config.min_secs_per_item = -3.0;
        config.log_filter = "  ".to_string();
        config.validate();

        assert_eq!(config.load_retry_attempts, 1);
        assert_eq!(config.load_retry_backoff_ms, 5_000);
        assert_eq!(config.min_secs_per_item, 0.0);
        assert_eq!(config.log_filter, "retakr=info");
    }

    #[test]
    fn test_validate_caps_retry_attempts() {
        let mut config = Config::default();
        config.load_retry_attempts = 50;
        config.validate();
        assert_eq!(config.load_retry_attempts, 10);
    }

    #[test]
    fn test_validate_rejects_nan_min_secs() {
        let mut config = Config::default();
        config.min_secs_per_item = f64::NAN;
        config.validate();
        assert_eq!(config.min_secs_per_item, 0.0);
    }

    #[test]
    fn test_validate_keeps_valid_values() {
        let mut config = Config::default();
        config.load_retry_attempts = 4;
        config.load_retry_backoff_ms = 0;
        config.min_secs_per_item = 2.5;
        config.validate();
        assert_eq!(config.load_retry_attempts, 4);
        assert_eq!(config.load_retry_backoff_ms, 0);
        assert!((config.min_secs_per_item - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_save_to_then_load_from() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        assert_eq!(Config::load_from(&path).unwrap().load_retry_attempts, 3);

        let mut config = Config::default();
        config.load_retry_attempts = 7;
        config.skip_correct_groups = true;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.load_retry_attempts, 7);
        assert!(loaded.skip_correct_groups);
    }

    #[test]
    fn test_load_from_clamps_hand_edited_values() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "load_retry_attempts = 99\n").unwrap();
        assert_eq!(Config::load_from(&path).unwrap().load_retry_attempts, 10);
    }
}
