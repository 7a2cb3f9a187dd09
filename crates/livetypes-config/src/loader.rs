//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::config::{validate_convention, CallbackConfig, LivetypesConfig, LoaderConfig};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Project configuration file name
pub const PROJECT_FILE: &str = "livetypes.toml";

/// Configuration loader
///
/// Precedence, lowest first:
/// 1. Global config (~/.livetypes/config.toml)
/// 2. Project config (livetypes.toml) - overrides global
/// 3. Environment variables (LIVETYPES_*) - overrides project
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Effective settings after merging
    pub settings: LivetypesConfig,

    /// Directory holding the project livetypes.toml, if one was found
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Create a loader that reads the global config from an explicit path
    pub fn with_global_path(path: PathBuf) -> Self {
        Self {
            global_config_path: Some(path),
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find livetypes.toml, merges it over the
    /// global config, then applies environment overrides.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project) = self.find_project_config(start_dir)?;
        let mut settings = self.load_global_config()?;
        settings.merge(&project);
        self.apply_env_overrides(&mut settings)?;

        Ok(Config {
            settings,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project = LivetypesConfig::load_from_file(config_path)?;
        let mut settings = self.load_global_config()?;
        settings.merge(&project);
        self.apply_env_overrides(&mut settings)?;

        Ok(Config {
            settings,
            project_root: config_path.parent().map(|p| p.to_path_buf()),
        })
    }

    /// Find project configuration by walking up directory tree
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, LivetypesConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_FILE);
            if config_path.exists() {
                let config = LivetypesConfig::load_from_file(&config_path)?;
                return Ok((Some(current), config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, LivetypesConfig::default())),
            }
        }
    }

    /// Load global configuration from ~/.livetypes/config.toml
    fn load_global_config(&mut self) -> ConfigResult<LivetypesConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => match Self::global_config_dir() {
                Ok(dir) => {
                    let path = dir.join("config.toml");
                    self.global_config_path = Some(path.clone());
                    path
                }
                // No home directory, so no global config
                Err(ConfigError::HomeNotFound) => return Ok(LivetypesConfig::default()),
                Err(e) => return Err(e),
            },
        };

        // Global config is optional, but a present one must parse
        if !path.exists() {
            return Ok(LivetypesConfig::default());
        }

        LivetypesConfig::load_from_file(&path)
    }

    /// Apply environment variable overrides
    ///
    /// - LIVETYPES_LIBRARY_PATH: platform path list, prepended to search paths
    /// - LIVETYPES_CONVENTION: "cdecl" or "stdcall"
    fn apply_env_overrides(&self, config: &mut LivetypesConfig) -> ConfigResult<()> {
        if let Some(paths) = env::var_os("LIVETYPES_LIBRARY_PATH") {
            let search_paths: Vec<PathBuf> = env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            config.merge(&LivetypesConfig {
                loader: Some(LoaderConfig { search_paths }),
                ..Default::default()
            });
        }

        if let Ok(convention) = env::var("LIVETYPES_CONVENTION") {
            let convention = convention.to_lowercase();
            validate_convention("LIVETYPES_CONVENTION", &convention)?;
            config.merge(&LivetypesConfig {
                callbacks: Some(CallbackConfig {
                    default_convention: Some(convention),
                    log_arguments: None,
                }),
                ..Default::default()
            });
        }

        Ok(())
    }

    /// Get the global configuration directory (~/.livetypes)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".livetypes"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn search_paths(&self) -> &[PathBuf] {
        self.settings.search_paths()
    }

    pub fn default_convention(&self) -> &str {
        self.settings.default_convention()
    }

    /// Check if a project livetypes.toml was found
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }
}
