//! Process settings.
//!
//! Loaded with the following priority:
//!
//! 1. Environment variables (`L4LB_*`, `_` separating nesting levels)
//! 2. Settings file (`/etc/l4lb/config.toml` unless overridden)
//! 3. Default values
//!
//! ```toml
//! [log]
//! level = "debug"
//! file = "/var/log/l4lb-cni.log"
//!
//! [plugins]
//! dirs = ["/opt/cni/bin"]
//! ```
//!
//! The network configuration itself always comes from stdin.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use l4lb_constants::env::SETTINGS_PREFIX;
use serde::{Deserialize, Serialize};

/// Settings file read when none is given.
pub const SYSTEM_SETTINGS_PATH: &str = "/etc/l4lb/config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log: LogSettings,
    pub plugins: PluginSettings,
}

/// Logging settings. Command-line flags win over these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter directive, e.g. `info` or `l4lb_cni=debug`.
    pub level: Option<String>,
    /// Append logs here instead of stderr.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    /// Plugin directories used when `CNI_PATH` is unset.
    pub dirs: Vec<PathBuf>,
}

impl Settings {
    /// Loads settings from `path` and the environment. A missing file is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or an environment value cannot be
    /// parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(SETTINGS_PREFIX).split("_"))
            .extract()
    }

    /// `plugins.dirs` as a `CNI_PATH` value.
    #[must_use]
    pub fn plugin_path(&self) -> Option<String> {
        if self.plugins.dirs.is_empty() {
            return None;
        }
        Some(
            self.plugins
                .dirs
                .iter()
                .map(|dir| dir.display().to_string())
                .collect::<Vec<_>>()
                .join(":"),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.plugins, PluginSettings::default());
        assert_eq!(settings.plugin_path(), None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[log]\nfile = \"/var/log/l4lb.log\"\n\n[plugins]\ndirs = [\"/opt/cni/bin\", \"/usr/libexec/cni\"]\n",
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.log.file, Some(PathBuf::from("/var/log/l4lb.log")));
        assert_eq!(
            settings.plugin_path().as_deref(),
            Some("/opt/cni/bin:/usr/libexec/cni")
        );
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[plugins]\ndirs = 7\n").unwrap();
        assert!(Settings::load_from(&path).is_err());
    }
}
