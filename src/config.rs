//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides; the
//! binary layers command-line flags on top.
//!
//! # Precedence
//!
//! ```text
//! defaults < config file < ANNOTATIONS_* env vars < CLI flags
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::api::ApiConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_metrics_endpoint")]
    pub metrics_endpoint: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:9119".to_string()
}

fn default_endpoint() -> String {
    "/annotations".to_string()
}

fn default_metrics_endpoint() -> String {
    "/metrics".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            endpoint: default_endpoint(),
            metrics_endpoint: default_metrics_endpoint(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// `<backend>:<options>`, e.g. `local:/var/lib/annotations.db`
    #[serde(default = "default_storage_url")]
    pub url: String,
}

fn default_storage_url() -> String {
    "local:/tmp/annotations.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: default_storage_url(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Resolve the effective configuration
    ///
    /// An explicit path must load. Otherwise the default locations are
    /// tried in order, falling back to defaults plus environment. Nothing is
    /// logged here; the caller reports the outcome once logging is set up.
    pub fn resolve(explicit: Option<&Path>) -> Result<Resolved, ConfigError> {
        match explicit {
            Some(path) => Ok(Resolved {
                config: Self::load_with_env(path)?,
                source: Some(path.to_path_buf()),
                skipped: Vec::new(),
            }),
            None => Ok(Self::search(&Self::default_paths())),
        }
    }

    /// Standard config file locations, most specific first
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("annotations").join("config.toml"));
        }
        paths.push(PathBuf::from("/etc/annotations/config.toml"));
        paths.push(PathBuf::from("./config.toml"));
        paths
    }

    /// Load the first existing file of `paths` that parses
    pub fn search(paths: &[PathBuf]) -> Resolved {
        let mut skipped = Vec::new();

        for path in paths {
            if !path.exists() {
                continue;
            }
            match Self::load_with_env(path) {
                Ok(config) => {
                    return Resolved {
                        config,
                        source: Some(path.clone()),
                        skipped,
                    }
                }
                Err(e) => skipped.push(e),
            }
        }

        Resolved {
            config: Self::from_env(),
            source: None,
            skipped,
        }
    }

    /// Apply `ANNOTATIONS_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("ANNOTATIONS_STORAGE") {
            self.storage.url = url;
        }

        if let Some(addr) = lookup("ANNOTATIONS_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Some(endpoint) = lookup("ANNOTATIONS_ENDPOINT") {
            self.server.endpoint = endpoint;
        }
        if let Some(endpoint) = lookup("ANNOTATIONS_METRICS_ENDPOINT") {
            self.server.metrics_endpoint = endpoint;
        }

        if let Some(level) = lookup("ANNOTATIONS_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("ANNOTATIONS_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Reject settings the router or logger cannot use
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, path) in [
            ("endpoint", &self.server.endpoint),
            ("metrics_endpoint", &self.server.metrics_endpoint),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "{} must start with '/', got \"{}\"",
                    name, path
                )));
            }
            if path == "/health" || path.starts_with("/health/") {
                return Err(ConfigError::Invalid(format!(
                    "{} \"{}\" collides with the health routes",
                    name, path
                )));
            }
        }

        if self.server.endpoint == self.server.metrics_endpoint {
            return Err(ConfigError::Invalid(format!(
                "endpoint and metrics_endpoint are both \"{}\"",
                self.server.endpoint
            )));
        }

        if self.server.listen_addr.is_empty() {
            return Err(ConfigError::Invalid("listen_addr is empty".to_string()));
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "logging.format must be \"pretty\" or \"json\", got \"{}\"",
                    other
                )))
            }
        }

        Ok(())
    }

    /// HTTP layer settings
    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            listen_addr: self.server.listen_addr.clone(),
            endpoint: self.server.endpoint.clone(),
            metrics_endpoint: self.server.metrics_endpoint.clone(),
        }
    }
}

/// Outcome of configuration discovery
#[derive(Debug)]
pub struct Resolved {
    pub config: Config,
    /// File the settings came from; None means defaults plus environment
    pub source: Option<PathBuf>,
    /// Candidate files that exist but failed to load
    pub skipped: Vec<ConfigError>,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Annotation Server Configuration
#
# Environment variables override these settings:
# - ANNOTATIONS_STORAGE
# - ANNOTATIONS_LISTEN_ADDR
# - ANNOTATIONS_ENDPOINT
# - ANNOTATIONS_METRICS_ENDPOINT
# - ANNOTATIONS_LOG_LEVEL
# - ANNOTATIONS_LOG_FORMAT

[server]
# Address to listen on
listen_addr = "0.0.0.0:9119"

# Path for annotation GET/PUT requests
endpoint = "/annotations"

# Path for Prometheus scrapes
metrics_endpoint = "/metrics"

[storage]
# Storage backend as <type>:<options>
#   local:<file-path>               embedded SQLite file
#   rethinkdb:<host:port>/<dbname>  RethinkDB (RETHINKDB_PASSWORD for the admin password)
#   postgres:<host:port>/<dbname>   PostgreSQL (PGUSER / PGPASSWORD for credentials)
url = "local:/tmp/annotations.db"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.storage.url, "local:/tmp/annotations.db");
        assert_eq!(config.server.listen_addr, "0.0.0.0:9119");
        assert_eq!(config.server.endpoint, "/annotations");
        assert_eq!(config.server.metrics_endpoint, "/metrics");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_generated_config_parses() {
        let config = Config::parse(Path::new("generated"), &generate_default_config()).unwrap();
        assert_eq!(config.storage.url, "local:/tmp/annotations.db");
        assert_eq!(config.server.listen_addr, "0.0.0.0:9119");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_partial_file() {
        let config = Config::parse(
            Path::new("partial"),
            "[storage]\nurl = \"postgres:db:5432/notes\"\n",
        )
        .unwrap();
        assert_eq!(config.storage.url, "postgres:db:5432/notes");
        assert_eq!(config.server.endpoint, "/annotations");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nlisten_addr = \"127.0.0.1:8000\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1:8000");

        let err = Config::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));

        std::fs::write(&path, "[server\n").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_search_reports_skipped_files() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.toml");
        let good = dir.path().join("good.toml");
        std::fs::write(&broken, "[server\n").unwrap();
        std::fs::write(&good, "[server]\nmetrics_endpoint = \"/prom\"\n").unwrap();

        let resolved = Config::search(&[dir.path().join("missing.toml"), broken.clone(), good.clone()]);
        assert_eq!(resolved.source, Some(good));
        assert_eq!(resolved.config.server.metrics_endpoint, "/prom");
        assert_eq!(resolved.skipped.len(), 1);
        assert!(matches!(&resolved.skipped[0], ConfigError::Parse { path, .. } if *path == broken));
    }

    #[test]
    fn test_search_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "not = [toml").unwrap();

        let resolved = Config::search(&[broken, dir.path().join("missing.toml")]);
        assert_eq!(resolved.source, None);
        assert_eq!(resolved.skipped.len(), 1);
    }

    #[test]
    fn test_resolve_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nmetrics_endpoint = \"/prom\"\n").unwrap();

        let resolved = Config::resolve(Some(&path)).unwrap();
        assert_eq!(resolved.source.as_deref(), Some(path.as_path()));
        assert!(resolved.skipped.is_empty());

        let err = Config::resolve(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("ANNOTATIONS_STORAGE", "local:/var/lib/a.db"),
            ("ANNOTATIONS_ENDPOINT", "/notes"),
            ("ANNOTATIONS_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.storage.url, "local:/var/lib/a.db");
        assert_eq!(config.server.endpoint, "/notes");
        assert_eq!(config.server.metrics_endpoint, "/metrics");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.server.endpoint = "annotations".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.server.metrics_endpoint = "/annotations".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.endpoint = "/health/x".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_config() {
        let mut config = Config::default();
        config.server.endpoint = "/notes".to_string();

        let api = config.api_config();
        assert_eq!(api.endpoint, "/notes");
        assert_eq!(api.addr(), "0.0.0.0:9119");
    }
}
