use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::pipeline::{DEFAULT_EXTENSIONS, normalize_extensions};

/// Top-level configuration.
///
/// Every field has a default, so a partial JSON file is accepted. Command-line
/// flags are applied on top of the loaded values.
///
/// ```rust,no_run
/// use photo_timestamps::config::Config;
///
/// let mut config = Config::load(Some("config.json".as_ref())).unwrap();
/// config.recursive = true;
/// config.output.dry_run = true;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Extensions to process (leading dot optional, case-insensitive).
    pub extensions: Vec<String>,
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Attempt to set file creation time as well as modification time.
    pub creation_time: bool,
    /// Output behavior (dry run, backups).
    pub output: OutputConfig,
}

/// Output and behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OutputConfig {
    /// If `true`, report what would change without modifying any files.
    pub dry_run: bool,
    /// If `true`, create a `.bak` copy before rewriting an image's metadata.
    pub backup_originals: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            recursive: false,
            creation_time: true,
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    /// Resolve the config file path — same directory as the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            if path.is_some() {
                log::warn!(
                    "Config file not found at {}. Using defaults.",
                    config_path.display()
                );
            } else {
                log::debug!("No config file at {}", config_path.display());
            }
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(config_path)
    }

    /// The configured extensions, normalized to `.ext` lowercase.
    pub fn normalized_extensions(&self) -> Vec<String> {
        normalize_extensions(&self.extensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.normalized_extensions(), DEFAULT_EXTENSIONS);
        assert!(!config.recursive);
        assert!(config.creation_time);
        assert!(!config.output.dry_run);
        assert!(!config.output.backup_originals);
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.recursive = true;
        config.extensions = vec!["JPG".to_string()];

        let saved = config.save(Some(&path)).unwrap();
        assert_eq!(saved, path);
        assert_eq!(Config::load(Some(&path)).unwrap(), config);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "recursive": true, "output": { "dry_run": true } }"#).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert!(config.recursive);
        assert!(config.output.dry_run);
        assert!(config.creation_time);
        assert_eq!(config.extensions.len(), DEFAULT_EXTENSIONS.len());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
