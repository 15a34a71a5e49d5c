//! Runtime configuration.
//!
//! Loaded from `~/.tabmux/config.toml` (or an explicit path). Every section
//! is optional; missing keys fall back to the defaults below.
//!
//! ```toml
//! [flow]
//! high_watermark = 100000
//! low_watermark = 20000
//!
//! [scrollback]
//! default_lines = 200
//! max_lines = 10000
//!
//! [resize]
//! activation_offsets_ms = [0, 60, 150]
//!
//! [transport]
//! socket_dir = "/run/user/1000/tabmux"
//!
//! [log]
//! filter = "info"
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub flow: FlowConfig,
    pub scrollback: ScrollbackConfig,
    pub resize: ResizeConfig,
    pub transport: TransportConfig,
    pub log: LogConfig,
}

/// Backpressure watermarks, in bytes of unacknowledged output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub high_watermark: usize,
    pub low_watermark: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            high_watermark: 100_000,
            low_watermark: 20_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollbackConfig {
    /// Lines returned when a request asks for zero, a negative count, or omits it.
    pub default_lines: usize,
    /// Retained history of the built-in [`crate::sink::LineSink`].
    pub max_lines: usize,
}

impl Default for ScrollbackConfig {
    fn default() -> Self {
        Self {
            default_lines: 200,
            max_lines: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeConfig {
    /// Offsets at which a tab activation re-checks geometry.
    pub activation_offsets_ms: Vec<u64>,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            activation_offsets_ms: vec![0, 60, 150],
        }
    }
}

impl ResizeConfig {
    pub fn activation_offsets(&self) -> impl Iterator<Item = Duration> + '_ {
        self.activation_offsets_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub socket_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// `$HOME/.tabmux`, falling back to `/` when `HOME` is unset.
    pub fn data_dir() -> PathBuf {
        let home = env::var("HOME").unwrap_or_else(|_| "/".to_string());
        PathBuf::from(home).join(".tabmux")
    }

    pub fn default_path() -> PathBuf {
        Self::data_dir().join("config.toml")
    }

    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Load `path` if given, else the default location if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    Self::load(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flow.high_watermark == 0 {
            return Err(ConfigError::Invalid(
                "flow.high_watermark must be greater than zero".into(),
            ));
        }
        if self.flow.low_watermark >= self.flow.high_watermark {
            return Err(ConfigError::Invalid(format!(
                "flow.low_watermark ({}) must be below flow.high_watermark ({})",
                self.flow.low_watermark, self.flow.high_watermark
            )));
        }
        if self.scrollback.default_lines == 0 {
            return Err(ConfigError::Invalid(
                "scrollback.default_lines must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.transport
            .socket_dir
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("sockets"))
    }
}
