//! TOML configuration for canopy
//!
//! ```toml
//! [watcher]
//! backend = "native"        # or "poll"
//! poll_interval_ms = 100
//! rename_window_ms = 50
//! case_sensitive = "probe"  # or "sensitive" / "insensitive"
//!
//! [logging]
//! default = "warn"
//! target = "stderr"         # "stdout", "disable", or a file path
//!
//! [logging.modules]
//! canopy_watcher = "debug"
//! ```

use crate::error::{Result, WatchError};
use crate::path::CaseSensitivity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanopyConfig {
    pub watcher: WatcherConfig,
    pub logging: LoggingConfig,
}

/// Which OS mechanism produces raw events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// inotify / FSEvents / ReadDirectoryChangesW
    #[default]
    Native,
    /// Periodic directory scans
    Poll,
}

/// How trie keys treat letter case
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseMode {
    /// Probe the filesystem once at startup
    #[default]
    Probe,
    Sensitive,
    Insensitive,
}

impl CaseMode {
    pub fn resolve(self) -> CaseSensitivity {
        match self {
            CaseMode::Probe => CaseSensitivity::probe(),
            CaseMode::Sensitive => CaseSensitivity::Sensitive,
            CaseMode::Insensitive => CaseSensitivity::Insensitive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub backend: BackendKind,
    /// Scan interval for the poll backend
    pub poll_interval_ms: u64,
    /// How long an unpaired rename half waits for its partner
    pub rename_window_ms: u64,
    pub case_sensitive: CaseMode,
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn rename_window(&self) -> Duration {
        Duration::from_millis(self.rename_window_ms)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Native,
            poll_interval_ms: 100,
            rename_window_ms: 50,
            case_sensitive: CaseMode::Probe,
        }
    }
}

/// Where log output goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Disable,
    Stderr,
    Stdout,
    File(PathBuf),
}

impl Serialize for LogTarget {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            LogTarget::Disable => serializer.serialize_str("disable"),
            LogTarget::Stderr => serializer.serialize_str("stderr"),
            LogTarget::Stdout => serializer.serialize_str("stdout"),
            LogTarget::File(path) => serializer.serialize_str(&path.to_string_lossy()),
        }
    }
}

impl<'de> Deserialize<'de> for LogTarget {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(match value.as_str() {
            "disable" | "off" | "" => LogTarget::Disable,
            "stderr" => LogTarget::Stderr,
            "stdout" => LogTarget::Stdout,
            other => LogTarget::File(PathBuf::from(other)),
        })
    }
}

/// Log levels: a default plus per-module overrides. `RUST_LOG` wins over both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub default: String,
    pub target: LogTarget,
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: "warn".to_string(),
            target: LogTarget::Stderr,
            modules: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Filter directive string, e.g. `warn,canopy_watcher=debug`
    pub fn filter_directives(&self) -> String {
        let mut directives = self.default.clone();
        for (module, level) in &self.modules {
            directives.push_str(&format!(",{}={}", module, level));
        }
        directives
    }
}

const LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

impl CanopyConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| WatchError::Config {
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_toml(&contents)
    }

    /// Parse and validate TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: CanopyConfig = toml::from_str(contents).map_err(|e| WatchError::Config {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default location if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        let watcher = &self.watcher;
        if !(10..=60_000).contains(&watcher.poll_interval_ms) {
            return Err(WatchError::Config {
                reason: format!(
                    "watcher.poll_interval_ms must be within 10-60000, got {}",
                    watcher.poll_interval_ms
                ),
            });
        }
        if !(1..=5_000).contains(&watcher.rename_window_ms) {
            return Err(WatchError::Config {
                reason: format!(
                    "watcher.rename_window_ms must be within 1-5000, got {}",
                    watcher.rename_window_ms
                ),
            });
        }

        let levels = std::iter::once(&self.logging.default).chain(self.logging.modules.values());
        for level in levels {
            if !LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
                return Err(WatchError::Config {
                    reason: format!("unknown log level '{}'", level),
                });
            }
        }

        Ok(())
    }

    /// Commented sample configuration
    pub fn example() -> &'static str {
        example_config()
    }

    /// Serialize back to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| WatchError::Config {
            reason: e.to_string(),
        })
    }
}

/// `<config dir>/canopy/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("canopy").join("config.toml"))
}

/// Commented sample configuration
pub fn example_config() -> &'static str {
    r#"# Canopy configuration

[watcher]
# "native" uses inotify/FSEvents/ReadDirectoryChangesW, "poll" scans periodically
backend = "native"
# Poll backend scan interval (10-60000)
poll_interval_ms = 100
# How long half of a rename waits for its partner before degrading to
# a deleted/created event (1-5000)
rename_window_ms = 50
# "probe", "sensitive" or "insensitive"
case_sensitive = "probe"

[logging]
# off, error, warn, info, debug, trace. RUST_LOG overrides this.
default = "warn"
# "stderr", "stdout", "disable", or a log file path
target = "stderr"

[logging.modules]
# canopy_watcher = "debug"
"#
}
