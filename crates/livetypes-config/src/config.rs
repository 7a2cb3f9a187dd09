//! Configuration file model (livetypes.toml / ~/.livetypes/config.toml)
//!
//! Global and project files share one schema; the loader merges them.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Calling conventions accepted in configuration files
pub const CONVENTIONS: &[&str] = &["cdecl", "stdcall"];

/// Contents of one configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LivetypesConfig {
    /// Shared library loading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loader: Option<LoaderConfig>,

    /// Callback trampolines and bindings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callbacks: Option<CallbackConfig>,

    /// Diagnostic sink settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<DiagnosticsConfig>,
}

/// Library loader settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    /// Extra directories searched before the platform defaults
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_paths: Vec<PathBuf>,
}

/// Callback and binding settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CallbackConfig {
    /// "cdecl" or "stdcall" (default: "cdecl")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_convention: Option<String>,

    /// Include decoded arguments in failure diagnostics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_arguments: Option<bool>,
}

/// Diagnostic settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct DiagnosticsConfig {
    /// Report callback failures to the sink (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl LivetypesConfig {
    /// Parse configuration from TOML text
    pub fn parse(content: &str, origin: &Path) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::TomlParseError {
            file: origin.to_path_buf(),
            error: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;
        Self::parse(&content, path)
    }

    /// Validate enumerated values
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(convention) = self
            .callbacks
            .as_ref()
            .and_then(|c| c.default_convention.as_deref())
        {
            validate_convention("callbacks.default_convention", convention)?;
        }
        Ok(())
    }

    /// Merge another config into this one
    ///
    /// Scalar settings from `other` win when present; search paths from
    /// `other` are placed ahead of the existing ones.
    pub fn merge(&mut self, other: &LivetypesConfig) {
        if let Some(loader) = &other.loader {
            let mine = self.loader.get_or_insert_with(Default::default);
            let mut paths = loader.search_paths.clone();
            paths.extend(mine.search_paths.drain(..));
            mine.search_paths = paths;
        }
        if let Some(callbacks) = &other.callbacks {
            let mine = self.callbacks.get_or_insert_with(Default::default);
            if callbacks.default_convention.is_some() {
                mine.default_convention = callbacks.default_convention.clone();
            }
            if callbacks.log_arguments.is_some() {
                mine.log_arguments = callbacks.log_arguments;
            }
        }
        if let Some(diagnostics) = &other.diagnostics {
            let mine = self.diagnostics.get_or_insert_with(Default::default);
            if diagnostics.enabled.is_some() {
                mine.enabled = diagnostics.enabled;
            }
        }
    }

    /// Configured search paths, highest priority first
    pub fn search_paths(&self) -> &[PathBuf] {
        self.loader
            .as_ref()
            .map(|l| l.search_paths.as_slice())
            .unwrap_or(&[])
    }

    /// Effective default convention
    pub fn default_convention(&self) -> &str {
        self.callbacks
            .as_ref()
            .and_then(|c| c.default_convention.as_deref())
            .unwrap_or("cdecl")
    }

    pub fn log_arguments(&self) -> bool {
        self.callbacks
            .as_ref()
            .and_then(|c| c.log_arguments)
            .unwrap_or(false)
    }

    pub fn diagnostics_enabled(&self) -> bool {
        self.diagnostics
            .as_ref()
            .and_then(|d| d.enabled)
            .unwrap_or(true)
    }
}

pub(crate) fn validate_convention(field: &str, value: &str) -> ConfigResult<()> {
    if !CONVENTIONS.contains(&value) {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("must be 'cdecl' or 'stdcall', got '{}'", value),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[loader]
search_paths = ["/opt/native/lib"]

[callbacks]
default_convention = "stdcall"
log_arguments = true

[diagnostics]
enabled = false
"#;
        let config = LivetypesConfig::parse(toml, Path::new("livetypes.toml")).unwrap();
        assert_eq!(config.search_paths(), &[PathBuf::from("/opt/native/lib")]);
        assert_eq!(config.default_convention(), "stdcall");
        assert!(config.log_arguments());
        assert!(!config.diagnostics_enabled());
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = LivetypesConfig::parse("", Path::new("livetypes.toml")).unwrap();
        assert!(config.search_paths().is_empty());
        assert_eq!(config.default_convention(), "cdecl");
        assert!(!config.log_arguments());
        assert!(config.diagnostics_enabled());
    }

    #[rstest]
    #[case("cdecl", true)]
    #[case("stdcall", true)]
    #[case("fastcall", false)]
    #[case("CDECL", false)]
    #[case("", false)]
    fn test_convention_validation(#[case] value: &str, #[case] accepted: bool) {
        let toml = format!("[callbacks]\ndefault_convention = \"{}\"\n", value);
        let result = LivetypesConfig::parse(&toml, Path::new("livetypes.toml"));
        assert_eq!(result.is_ok(), accepted);
        if !accepted {
            assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        }
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
[loader]
paths = ["/tmp"]
"#;
        let err = LivetypesConfig::parse(toml, Path::new("livetypes.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::TomlParseError { .. }));
    }

    #[test]
    fn test_merge_prepends_search_paths() {
        let mut base = LivetypesConfig {
            loader: Some(LoaderConfig {
                search_paths: vec![PathBuf::from("/global")],
            }),
            ..Default::default()
        };
        let project = LivetypesConfig {
            loader: Some(LoaderConfig {
                search_paths: vec![PathBuf::from("/project")],
            }),
            callbacks: Some(CallbackConfig {
                default_convention: Some("stdcall".to_string()),
                log_arguments: None,
            }),
            ..Default::default()
        };
        base.merge(&project);
        assert_eq!(
            base.search_paths(),
            &[PathBuf::from("/project"), PathBuf::from("/global")]
        );
        assert_eq!(base.default_convention(), "stdcall");
    }
}
