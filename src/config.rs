//! Configuration for termbridge.
//!
//! Settings are read from `~/.termbridge/config.toml`; every key is optional:
//!
//! ```toml
//! log_level = "info"
//! # log_file = "/var/log/termbridge.log"
//!
//! [server]
//! bind = "127.0.0.1:3000"
//! path = "/term"
//!
//! [protocol]
//! framing = "sentinel"      # or "json"
//! mount_on_open = false
//! clear_on_remount = true
//!
//! [terminal]
//! columns = 80              # reported until the browser sends its size
//! rows = 24
//!
//! [app]
//! history_limit = 1000
//! prompt_color = { r = 230, g = 200, b = 40 }
//! ```

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::codec::{Dimensions, Framing};
use crate::core::session::SessionOptions;
use crate::ui::history::HISTORY_LIMIT;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not determine config path")]
    NoHome,
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `tracing` filter directive, overridden by `RUST_LOG`
    pub log_level: String,
    /// Log to this file instead of stderr
    pub log_file: Option<PathBuf>,
    pub server: ServerConfig,
    pub protocol: ProtocolConfig,
    pub terminal: TerminalConfig,
    pub app: AppConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
            server: ServerConfig::default(),
            protocol: ProtocolConfig::default(),
            terminal: TerminalConfig::default(),
            app: AppConfig::default(),
        }
    }
}

/// Listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Request path accepted for the WebSocket upgrade
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            path: "/term".to_string(),
        }
    }
}

/// Wire protocol settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub framing: Framing,
    pub mount_on_open: bool,
    pub clear_on_remount: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            framing: Framing::Sentinel,
            mount_on_open: false,
            clear_on_remount: true,
        }
    }
}

/// Placeholder size used before the browser reports its own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub columns: u16,
    pub rows: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        let dims = Dimensions::default();
        Self {
            columns: dims.columns,
            rows: dims.rows,
        }
    }
}

/// Chat application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub history_limit: usize,
    pub prompt_color: Color,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            history_limit: HISTORY_LIMIT,
            prompt_color: Color::new(230, 200, 40),
        }
    }
}

/// Color definition (RGB)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Convert to crossterm Color
    pub fn to_crossterm(&self) -> crossterm::style::Color {
        crossterm::style::Color::Rgb {
            r: self.r,
            g: self.g,
            b: self.b,
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to
    /// defaults when the file is missing or unreadable
    pub fn load() -> Self {
        match Self::get_config_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                eprintln!("Warning: {}; using defaults", e);
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::get_config_path().ok_or(ConfigError::NoHome)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content).map_err(|source| ConfigError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Get config file path
    pub fn get_config_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".termbridge").join("config.toml"))
    }

    /// Size reported before the first resize; an invalid configured size
    /// falls back to 80x24
    pub fn placeholder_dimensions(&self) -> Dimensions {
        Dimensions::new(self.terminal.columns, self.terminal.rows).unwrap_or_default()
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            framing: self.protocol.framing,
            mount_on_open: self.protocol.mount_on_open,
            clear_on_remount: self.protocol.clear_on_remount,
            placeholder: self.placeholder_dimensions(),
        }
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.session_options(), SessionOptions::default());
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str(
            r#"
            log_level = "debug"

            [server]
            bind = "0.0.0.0:8080"

            [protocol]
            framing = "json"
            mount_on_open = true

            [app]
            prompt_color = { r = 1, g = 2, b = 3 }
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.server.bind.port(), 8080);
        assert_eq!(config.server.path, "/term");
        assert_eq!(config.protocol.framing, Framing::Json);
        assert!(config.protocol.mount_on_open);
        assert!(config.protocol.clear_on_remount);
        assert_eq!(config.app.prompt_color, Color::new(1, 2, 3));
        assert_eq!(config.app.history_limit, HISTORY_LIMIT);
    }

    #[test]
    fn test_zero_placeholder_falls_back() {
        let config: Config = toml::from_str("[terminal]\ncolumns = 0\n").unwrap();
        assert_eq!(config.placeholder_dimensions(), Dimensions::default());

        let config: Config = toml::from_str("[terminal]\ncolumns = 132\nrows = 43\n").unwrap();
        assert_eq!(
            config.placeholder_dimensions(),
            Dimensions { columns: 132, rows: 43 }
        );
    }

    #[test]
    fn test_bad_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("termbridge-bad-{}.toml", std::process::id()));
        fs::write(&path, "[protocol]\nframing = \"carrier-pigeon\"\n").unwrap();
        let result = Config::load_from(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));

        let missing = Path::new("/definitely/not/here/config.toml");
        assert!(matches!(Config::load_from(missing), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_serialized_defaults_parse_back() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, Config::default());
    }
}
