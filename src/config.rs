//! Harness configuration loaded from `apphost.toml`.
//!
//! ```toml
//! [app]
//! root = "site"            # relative to the config file
//! virtual_path = "/shop"
//! bootstrap_path = "default"
//!
//! [logging]
//! filter = "apphost=debug"
//! json = false
//! ```
//!
//! Every field has a default, so an empty file (or no `[logging]` table)
//! is valid apart from the application root.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants;
use crate::error::{Error, Result};

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Root of `apphost.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The hosted application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub root: PathBuf,
    #[serde(default = "default_virtual_path")]
    pub virtual_path: String,
    #[serde(default = "default_bootstrap_path")]
    pub bootstrap_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            virtual_path: default_virtual_path(),
            bootstrap_path: default_bootstrap_path(),
        }
    }
}

/// Log output of the harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_virtual_path() -> String {
    constants::DEFAULT_VIRTUAL_PATH.to_string()
}

fn default_bootstrap_path() -> String {
    constants::DEFAULT_BOOTSTRAP_PATH.to_string()
}

fn default_log_filter() -> String {
    constants::DEFAULT_LOG_FILTER.to_string()
}

impl HarnessConfig {
    /// Configuration for the application at `root` with every other field
    /// at its default.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            app: AppConfig {
                root: root.into(),
                ..AppConfig::default()
            },
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from `apphost.toml` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid TOML.
    pub fn load() -> Result<Self> {
        Self::load_from(constants::CONFIG_FILE_NAME)
    }

    /// Load configuration from the specified path.
    ///
    /// A relative `app.root` is resolved against the directory containing
    /// the file, so the configuration means the same thing whatever the
    /// working directory of the test run.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (IO error)
    /// - The file contains invalid TOML syntax
    /// - Fields have invalid types
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading {}", path.display()), e))?;

        let mut config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;

        if config.app.root.is_relative()
            && !config.app.root.as_os_str().is_empty()
            && let Some(dir) = path.parent()
        {
            config.app.root = dir.join(&config.app.root);
        }

        Ok(config)
    }

    /// Validate configuration with comprehensive checks.
    ///
    /// Returns a `ValidationResult` containing any non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Returns `Config` listing every problem found:
    /// - Missing application root, or a root that is not a directory
    /// - Virtual path not starting with '/'
    /// - Empty bootstrap path
    /// - Unparseable log filter
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. Application root
        let root = &self.app.root;
        if root.as_os_str().is_empty() {
            errors.push("app.root cannot be empty".to_string());
        } else if !root.exists() {
            errors.push(format!("app.root does not exist: {}", root.display()));
        } else if !root.is_dir() {
            errors.push(format!("app.root is not a directory: {}", root.display()));
        }

        // 2. Paths inside the application
        if !self.app.virtual_path.starts_with('/') {
            errors.push(format!(
                "app.virtual_path must start with '/' (got: '{}')",
                self.app.virtual_path
            ));
        }
        if self.app.bootstrap_path.trim().is_empty() {
            errors.push("app.bootstrap_path cannot be empty".to_string());
        }
        if self.app.bootstrap_path.contains('?') {
            warnings.push(format!(
                "app.bootstrap_path '{}' carries a query string; it is sent as-is",
                self.app.bootstrap_path
            ));
        }

        // 3. Logging
        if let Err(e) = tracing_subscriber::EnvFilter::try_new(&self.logging.filter) {
            errors.push(format!("logging.filter '{}' is invalid: {e}", self.logging.filter));
        }

        if !errors.is_empty() {
            return Err(Error::Config(format!(
                "validation failed:\n  - {}",
                errors.join("\n  - ")
            )));
        }

        Ok(ValidationResult { warnings })
    }
}
