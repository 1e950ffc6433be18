use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::revision::RevisionBackend;

/// Default slow-query log written by MySQL
pub const SLOW_LOG_PATH: &str = "/var/log/mysql/slow-log.lsql";
/// Default nginx access log
pub const ACCESS_LOG_PATH: &str = "/var/log/nginx/access.log";
/// Default alp configuration file
pub const ALP_CONF_PATH: &str = "/tmp/alp.conf";

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Checkout whose revision tags every capture
    #[serde(default = "default_repository")]
    pub repository: PathBuf,
    /// SQLite database holding the captures
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub revision: RevisionConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

fn default_repository() -> PathBuf {
    PathBuf::from(".")
}

fn default_database() -> PathBuf {
    directories::ProjectDirs::from("", "", "profile-collector")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("profile-collector"))
        .join("profile-collector.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repository: default_repository(),
            database: default_database(),
            capture: CaptureConfig::default(),
            revision: RevisionConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

/// Analyzer invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Slow-query log fed to the digest tool
    #[serde(default = "default_slow_log")]
    pub slow_log: PathBuf,
    /// HTTP access log fed to alp
    #[serde(default = "default_access_log")]
    pub access_log: PathBuf,
    /// alp config file (aggregation patterns etc.)
    #[serde(default = "default_alp_config")]
    pub alp_config: PathBuf,
    /// alp parsing profile: ltsv, json, regexp, ...
    #[serde(default = "default_alp_format")]
    pub alp_format: String,
    #[serde(default = "default_digest_command")]
    pub digest_command: String,
    #[serde(default = "default_alp_command")]
    pub alp_command: String,
    /// Kill an analyzer that runs longer than this (0 = wait forever)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Seconds between scheduled cycles in `serve` (0 = no schedule)
    #[serde(default)]
    pub interval_secs: u64,
    /// Remove the raw logs after a cycle that stored every capture
    #[serde(default)]
    pub cleanup_after_cycle: bool,
}

fn default_slow_log() -> PathBuf {
    PathBuf::from(SLOW_LOG_PATH)
}

fn default_access_log() -> PathBuf {
    PathBuf::from(ACCESS_LOG_PATH)
}

fn default_alp_config() -> PathBuf {
    PathBuf::from(ALP_CONF_PATH)
}

fn default_alp_format() -> String {
    "ltsv".to_string()
}

fn default_digest_command() -> String {
    "pt-query-digest".to_string()
}

fn default_alp_command() -> String {
    "alp".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            slow_log: default_slow_log(),
            access_log: default_access_log(),
            alp_config: default_alp_config(),
            alp_format: default_alp_format(),
            digest_command: default_digest_command(),
            alp_command: default_alp_command(),
            timeout_secs: default_timeout_secs(),
            interval_secs: 0,
            cleanup_after_cycle: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionConfig {
    #[serde(default)]
    pub backend: RevisionBackend,
    /// `git` executable used by the `git` backend
    #[serde(default = "default_git_command")]
    pub git_command: String,
}

fn default_git_command() -> String {
    "git".to_string()
}

impl Default for RevisionConfig {
    fn default() -> Self {
        Self {
            backend: RevisionBackend::default(),
            git_command: default_git_command(),
        }
    }
}

/// Retrieval endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Path prefix the routes are mounted under
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_listen() -> String {
    "127.0.0.1:19100".to_string()
}

fn default_prefix() -> String {
    "/debug".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            prefix: default_prefix(),
        }
    }
}

impl Config {
    /// Load settings
    ///
    /// An explicit path must exist. Without one the default location is
    /// used, and a default file is written there on first run.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let config_path = Self::config_path()?;
                if config_path.exists() {
                    Self::load_from(&config_path)
                } else {
                    let config = Self::default();
                    if let Err(e) = config.save_to(&config_path) {
                        tracing::warn!("Failed to save default config: {}", e);
                    }
                    Ok(config)
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// ~/.config/profile-collector/config.toml
    pub fn config_path() -> Result<PathBuf> {
        let base_dirs = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))?;
        Ok(base_dirs.home_dir().join(".config/profile-collector/config.toml"))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Raw log files removed by cleanup
    pub fn cleanup_paths(&self) -> Vec<PathBuf> {
        vec![self.capture.access_log.clone(), self.capture.slow_log.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.capture.slow_log, PathBuf::from(SLOW_LOG_PATH));
        assert_eq!(config.capture.access_log, PathBuf::from(ACCESS_LOG_PATH));
        assert_eq!(config.capture.alp_config, PathBuf::from(ALP_CONF_PATH));
        assert_eq!(config.capture.alp_format, "ltsv");
        assert_eq!(config.capture.interval_secs, 0);
        assert_eq!(config.revision.backend, RevisionBackend::Git);
        assert_eq!(config.http.prefix, "/debug");
        assert!(config.database.ends_with("profile-collector.db"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::parse(
            r#"
repository = "/srv/isucon/webapp"

[capture]
access_log = "/var/log/nginx/access.ltsv"
interval_secs = 60

[revision]
backend = "libgit2"
"#,
        )
        .unwrap();

        assert_eq!(config.repository, PathBuf::from("/srv/isucon/webapp"));
        assert_eq!(config.capture.access_log, PathBuf::from("/var/log/nginx/access.ltsv"));
        assert_eq!(config.capture.slow_log, PathBuf::from(SLOW_LOG_PATH));
        assert_eq!(config.capture.interval_secs, 60);
        assert_eq!(config.capture.timeout_secs, 300);
        assert_eq!(config.revision.backend, RevisionBackend::Libgit2);
        assert_eq!(config.revision.git_command, "git");
        assert_eq!(config.http.listen, "127.0.0.1:19100");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("config.toml");

        let mut config = Config::default();
        config.http.prefix = "/profile".to_string();
        config.capture.cleanup_after_cycle = true;
        config.save_to(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.http.prefix, "/profile");
        assert!(loaded.capture.cleanup_after_cycle);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(Config::parse("capture = 3").is_err());
    }
}
