//! Server configuration.
//!
//! Loaded from an optional JSON file. Both the flat layout
//!
//! ```json
//! { "session": { "max_concurrent": 3, "idle_timeout_secs": 3600 }, "export_path": "./exports" }
//! ```
//!
//! and the nested `settings.session.{timeout_seconds, max_concurrent}` /
//! `paths.project_defaults.export_path` layout are accepted. Flat keys win
//! when both are present. Command-line flags are applied on top in `main`.

use crate::expand_path;
use crate::portal::handlers::HandlerContext;
use crate::session::SessionSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "tia_portal_mcp.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_concurrent: usize,
    /// Zero disables idle eviction.
    #[serde(alias = "timeout_seconds")]
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub call_timeout_secs: u64,
    pub release_timeout_secs: u64,
    /// Zero means unbounded.
    pub max_queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            idle_timeout_secs: 3600,
            sweep_interval_secs: 300,
            call_timeout_secs: 120,
            release_timeout_secs: 30,
            max_queue_depth: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub session: SessionConfig,
    pub export_path: PathBuf,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            export_path: PathBuf::from("./exports"),
            logging: LoggingConfig::default(),
        }
    }
}

/// On-disk shape, before the two layouts are merged.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    session: Option<SessionConfig>,
    export_path: Option<String>,
    logging: Option<LoggingConfig>,
    settings: Option<NestedSettings>,
    paths: Option<NestedPaths>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NestedSettings {
    session: Option<SessionConfig>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NestedPaths {
    project_defaults: Option<ProjectDefaults>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProjectDefaults {
    export_path: Option<String>,
}

impl From<ConfigFile> for Config {
    fn from(file: ConfigFile) -> Self {
        let (nested_session, nested_logging) = match file.settings {
            Some(s) => (s.session, s.logging),
            None => (None, None),
        };
        let nested_export = file
            .paths
            .and_then(|p| p.project_defaults)
            .and_then(|d| d.export_path);

        let mut logging = file.logging.or(nested_logging).unwrap_or_default();
        logging.level = logging.level.to_ascii_lowercase();

        Self {
            session: file.session.or(nested_session).unwrap_or_default(),
            export_path: file
                .export_path
                .or(nested_export)
                .map(|p| expand_path(&p))
                .unwrap_or_else(|| PathBuf::from("./exports")),
            logging,
        }
    }
}

impl Config {
    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] if it exists, or
    /// fall back to defaults. An explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.is_file() {
                    debug!("No config file, using defaults");
                    return Ok(Self::default());
                }
                fallback
            }
        };
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_json(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.clone(),
                source,
            },
            other => other,
        })?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            serde_json::from_str(text).map_err(|source| ConfigError::Parse {
                path: PathBuf::new(),
                source,
            })?;
        let config = Config::from(file);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "session.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.session.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "session.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.session.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "session.call_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            max_concurrent: self.session.max_concurrent,
            idle_timeout: Duration::from_secs(self.session.idle_timeout_secs),
            sweep_interval: Duration::from_secs(self.session.sweep_interval_secs),
            release_timeout: Duration::from_secs(self.session.release_timeout_secs),
            max_queue_depth: self.session.max_queue_depth,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.session.call_timeout_secs)
    }

    pub fn handler_context(&self) -> HandlerContext {
        HandlerContext {
            export_dir: self.export_path.clone(),
        }
    }

    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> String {
        format!("tia_mcp={}", self.logging.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_document_gives_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.session_settings().max_concurrent, 3);
        assert_eq!(config.call_timeout(), Duration::from_secs(120));
        assert_eq!(config.log_filter(), "tia_mcp=info");
    }

    #[test]
    fn nested_layout_is_understood() {
        let config = Config::from_json(
            r#"{
                "name": "tia-portal-mcp",
                "paths": { "project_defaults": { "export_path": "/srv/exports" } },
                "settings": {
                    "logging": { "level": "DEBUG" },
                    "session": { "timeout_seconds": 900, "max_concurrent": 5 }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.session.idle_timeout_secs, 900);
        assert_eq!(config.session.max_concurrent, 5);
        assert_eq!(config.session.sweep_interval_secs, 300);
        assert_eq!(config.export_path, PathBuf::from("/srv/exports"));
        assert_eq!(config.log_filter(), "tia_mcp=debug");
    }

    #[test]
    fn flat_keys_win_over_nested() {
        let config = Config::from_json(
            r#"{
                "session": { "max_concurrent": 1 },
                "settings": { "session": { "max_concurrent": 8 } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.session.max_concurrent, 1);
    }

    #[test]
    fn zero_limits_are_rejected() {
        for doc in [
            r#"{"session": {"max_concurrent": 0}}"#,
            r#"{"session": {"sweep_interval_secs": 0}}"#,
            r#"{"session": {"call_timeout_secs": 0}}"#,
        ] {
            let err = Config::from_json(doc).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{doc}");
        }

        let config = Config::from_json(r#"{"session": {"idle_timeout_secs": 0}}"#).unwrap();
        assert!(config.session_settings().idle_timeout.is_zero());
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.json");
        std::fs::write(&path, r#"{"export_path": "/tmp/out"}"#).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.handler_context().export_dir, PathBuf::from("/tmp/out"));

        let missing = dir.path().join("absent.json");
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        match Config::load(Some(&path)) {
            Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
