//! Configuration management for the CLI.
//!
//! The configuration file is looked up in order:
//! 1. `--config <path>`
//! 2. `$PROVENANCE_CONFIG`
//! 3. `./provenance.toml`
//! 4. `<config dir>/provenance/config.toml`
//!
//! When none exists, defaults are used.

use crate::error::{CliError, Result};
use provenance_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "PROVENANCE_CONFIG";

/// File name looked up in the working directory.
pub const LOCAL_CONFIG: &str = "provenance.toml";

/// CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Engine settings (database, retries, retention, logging)
    #[serde(flatten)]
    pub engine: EngineConfig,

    /// Output settings
    #[serde(default)]
    pub output: Settings,

    /// File this configuration was read from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,

    /// Default output format
    #[serde(default = "default_format")]
    pub format: OutputFormat,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Table format
    Table,
    /// JSON format
    Json,
    /// Quiet (minimal) format
    Quiet,
}

impl Config {
    /// Pick the configuration file to read, if any.
    ///
    /// `env_value` is the value of [`CONFIG_ENV`]; `config_dir` is the
    /// platform configuration directory.
    pub fn locate(
        explicit: Option<&Path>,
        env_value: Option<PathBuf>,
        working_dir: &Path,
        config_dir: Option<PathBuf>,
    ) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Some(path) = env_value.filter(|p| !p.as_os_str().is_empty()) {
            return Some(path);
        }
        let local = working_dir.join(LOCAL_CONFIG);
        if local.is_file() {
            return Some(local);
        }
        config_dir
            .map(|dir| dir.join("provenance").join("config.toml"))
            .filter(|path| path.is_file())
    }

    /// Load configuration from the search path.
    ///
    /// An explicitly named file (flag or environment) must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let working_dir = std::env::current_dir()?;
        let located = Self::locate(
            explicit,
            std::env::var_os(CONFIG_ENV).map(PathBuf::from),
            &working_dir,
            dirs::config_dir(),
        );
        match located {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Read configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&contents)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.engine.validate()?;
        Ok(config)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            color: true,
            format: OutputFormat::Table,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_format() -> OutputFormat {
    OutputFormat::Table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.database_path, PathBuf::from("provenance.db"));
        assert!(config.output.color);
        assert_eq!(config.output.format, OutputFormat::Table);
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml_str(
            r#"
            database_path = "/data/provenance.db"
            log_filter = "provenance_engine=debug"

            [ingest]
            max_retries = 5

            [retention]
            enabled = true
            max_build_age_days = 14

            [output]
            color = false
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.database_path, PathBuf::from("/data/provenance.db"));
        assert_eq!(config.engine.log_filter, "provenance_engine=debug");
        assert_eq!(config.engine.ingest.max_retries, 5);
        assert_eq!(config.engine.ingest.initial_backoff_ms, 50);
        assert!(config.engine.retention.enabled);
        assert!(!config.output.color);
        assert_eq!(config.output.format, OutputFormat::Json);
    }

    #[test]
    fn test_invalid_engine_values_rejected() {
        assert!(Config::from_toml_str("[ingest]\nbackoff_multiplier = 0").is_err());
    }

    #[test]
    fn test_search_order() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        let conf = dir.path().join("conf");
        fs::create_dir_all(&work).unwrap();
        fs::create_dir_all(conf.join("provenance")).unwrap();

        // Nothing present
        assert_eq!(Config::locate(None, None, &work, Some(conf.clone())), None);

        // Platform config dir
        let global = conf.join("provenance").join("config.toml");
        fs::write(&global, "").unwrap();
        assert_eq!(
            Config::locate(None, None, &work, Some(conf.clone())),
            Some(global.clone())
        );

        // Working directory wins over the config dir
        let local = work.join(LOCAL_CONFIG);
        fs::write(&local, "").unwrap();
        assert_eq!(
            Config::locate(None, None, &work, Some(conf.clone())),
            Some(local.clone())
        );

        // Environment wins over the working directory
        let env = dir.path().join("env.toml");
        assert_eq!(
            Config::locate(None, Some(env.clone()), &work, Some(conf.clone())),
            Some(env.clone())
        );

        // Explicit path wins over everything
        let explicit = dir.path().join("explicit.toml");
        assert_eq!(
            Config::locate(Some(&explicit), Some(env), &work, Some(conf)),
            Some(explicit)
        );
    }

    #[test]
    fn test_from_file_records_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provenance.toml");
        fs::write(&path, "database_path = \"x.db\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.source, Some(path));
        assert_eq!(config.engine.database_path, PathBuf::from("x.db"));
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
