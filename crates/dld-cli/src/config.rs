//! Tool settings from `dld.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Settings of the `dld` tool itself (not the stack described by `dld.yml`)
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub http: HttpSettings,
    pub workers: WorkersConfig,
}

/// Timeouts in seconds
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub head_timeout: u64,
    pub read_timeout: u64,
    pub connect_timeout: u64,
    pub max_downloads: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let defaults = dld_core::HttpConfig::default();
        Self {
            head_timeout: defaults.head_timeout.as_secs(),
            read_timeout: defaults.read_timeout.as_secs(),
            connect_timeout: defaults.connect_timeout.as_secs(),
            max_downloads: defaults.max_downloads,
        }
    }
}

impl HttpSettings {
    pub fn to_http_config(self) -> dld_core::HttpConfig {
        dld_core::HttpConfig {
            head_timeout: Duration::from_secs(self.head_timeout),
            read_timeout: Duration::from_secs(self.read_timeout),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            max_downloads: self.max_downloads.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Datasets staged at once; 1 stages in configuration order
    pub default: usize,
    pub max: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self { default: 1, max: 16 }
    }
}

impl WorkersConfig {
    /// Requested worker count clamped to `1..=max`.
    pub fn effective(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default)
            .clamp(1, self.max.max(1))
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./dld.toml (current directory)
    /// 2. ~/.config/dld/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("dld.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "dld") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.http.head_timeout, 60);
        assert_eq!(config.http.read_timeout, 60);
        assert_eq!(config.workers.default, 1);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[http]
read_timeout = 120
max_downloads = 2

[workers]
default = 4
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.http.read_timeout, 120);
        assert_eq!(config.http.head_timeout, 60);
        assert_eq!(config.http.max_downloads, 2);
        assert_eq!(config.workers.default, 4);
        assert_eq!(config.workers.max, 16);
    }

    #[test]
    fn http_settings_convert() {
        let settings = HttpSettings {
            head_timeout: 5,
            read_timeout: 7,
            connect_timeout: 3,
            max_downloads: 0,
        };
        let http = settings.to_http_config();
        assert_eq!(http.head_timeout, Duration::from_secs(5));
        assert_eq!(http.read_timeout, Duration::from_secs(7));
        assert_eq!(http.max_downloads, 1);
    }

    #[test]
    fn workers_clamped() {
        let workers = WorkersConfig { default: 2, max: 8 };
        assert_eq!(workers.effective(None), 2);
        assert_eq!(workers.effective(Some(0)), 1);
        assert_eq!(workers.effective(Some(64)), 8);
    }

    #[test]
    fn from_file_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("dld.toml");
        std::fs::write(&path, "[http\nbroken").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("dld.toml"));
    }
}
