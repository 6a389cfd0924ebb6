//! Engine configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via BPMNFLOW_CONFIG)
//! 3. Environment variables

use bpmnflow_core::items;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model loading configuration.
    pub models: ModelsConfig,
    /// Processing kernel configuration.
    pub kernel: KernelConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("BPMNFLOW_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.models.apply_env_overrides();
        self.kernel.apply_env_overrides();
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.models.dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "models.dir must not be empty".to_string(),
            ));
        }
        self.kernel.validate()
    }
}

/// Model loading configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Directory of model JSON files.
    pub dir: PathBuf,
    /// Abort loading on the first invalid model file instead of skipping it.
    pub fail_on_invalid: bool,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./models"),
            fail_on_invalid: false,
        }
    }
}

impl ModelsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("BPMNFLOW_MODELS_DIR") {
            self.dir = PathBuf::from(dir);
        }

        if let Ok(fail) = std::env::var("BPMNFLOW_FAIL_ON_INVALID_MODEL") {
            self.fail_on_invalid = fail == "true" || fail == "1";
        }
    }
}

/// Processing kernel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Maximum number of transition log entries kept on a document (0 = unlimited).
    pub max_log_entries: usize,
    /// Plugins to register, in execution order, resolved by name.
    pub plugins: Vec<String>,
    /// Item whose value is appended to the transition log entry as a comment.
    pub log_comment_item: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_log_entries: 30,
            plugins: Vec::new(),
            log_comment_item: items::TRANSITION_LOG_COMMENT.to_string(),
        }
    }
}

impl KernelConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(max) = std::env::var("BPMNFLOW_MAX_LOG_ENTRIES") {
            if let Ok(n) = max.parse() {
                self.max_log_entries = n;
            }
        }

        if let Ok(plugins) = std::env::var("BPMNFLOW_PLUGINS") {
            self.plugins = plugins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for name in &self.plugins {
            if name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "kernel.plugins contains an empty name".to_string(),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "kernel.plugins lists '{}' more than once",
                    name
                )));
            }
        }
        if self.log_comment_item.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "kernel.log_comment_item must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.models.dir, PathBuf::from("./models"));
        assert!(!config.models.fail_on_invalid);
        assert_eq!(config.kernel.max_log_entries, 30);
        assert!(config.kernel.plugins.is_empty());
        assert_eq!(config.kernel.log_comment_item, "$eventlogcomment");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "kernel:\n  max_log_entries: 5\n  plugins: [history, rules]\n"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.kernel.max_log_entries, 5);
        assert_eq!(config.kernel.plugins, vec!["history", "rules"]);
        assert_eq!(config.models.dir, PathBuf::from("./models"));
    }

    #[test]
    fn test_from_file_errors() {
        let err = Config::from_file("/nonexistent/bpmnflow.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "kernel: [not, a, map]").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(..)));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.kernel.plugins = vec!["a".to_string(), "a".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.kernel.log_comment_item = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("BPMNFLOW_PLUGINS", "history, rules,,");
        std::env::set_var("BPMNFLOW_MAX_LOG_ENTRIES", "12");
        let config = Config::load();
        std::env::remove_var("BPMNFLOW_PLUGINS");
        std::env::remove_var("BPMNFLOW_MAX_LOG_ENTRIES");

        let config = config.unwrap();

        assert_eq!(config.kernel.plugins, vec!["history", "rules"]);
        assert_eq!(config.kernel.max_log_entries, 12);
    }
}
