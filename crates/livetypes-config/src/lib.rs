//! Livetypes Configuration
//!
//! Configuration for the marshalling layer:
//! - Library search paths used when opening shared libraries
//! - Default calling convention for bindings and callbacks
//! - Diagnostic settings for callback failures
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Global config (~/.livetypes/config.toml)
//! 2. Project config (./livetypes.toml, found by walking up)
//! 3. Environment variables (LIVETYPES_*)
//!
//! # Example
//!
//! ```no_run
//! use livetypes_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("{}", config.default_convention());
//! ```

pub mod config;
pub mod loader;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

pub use config::{CallbackConfig, DiagnosticsConfig, LivetypesConfig, LoaderConfig};
pub use loader::{Config, ConfigLoader};
