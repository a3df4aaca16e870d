//! Configuration and color management for attachcon.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.attachcon/config.toml`
//! - The 16-color console palette used for background, info and error
//!   output
//!
//! Text starts out in the fixed startup color on every open, so the
//! foreground is not configurable here.
//!
//! # Configuration File
//!
//! ```toml
//! title = "My App Console"
//! exit_command = "quit"
//! write_executed = true
//! hide_buttons = false
//! hide_from_taskbar = false
//! codepage = 65001
//!
//! [colors]
//! back = "black"
//! info = "cyan"
//! error = "red"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// UTF-8 code page
pub const CP_UTF8: u32 = 65001;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Console window title
    pub title: String,
    /// Line that closes the session from the default read loop
    pub exit_command: String,
    /// Echo executed commands as `> command`
    pub write_executed: bool,
    /// Remove the system menu (and with it the close button)
    pub hide_buttons: bool,
    /// Show the console as a tool window, without a taskbar button
    pub hide_from_taskbar: bool,
    /// Output code page, `None` leaves the console default
    pub codepage: Option<u32>,
    /// Color settings
    pub colors: ColorConfig,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            title: "Console".to_string(),
            exit_command: "exit".to_string(),
            write_executed: true,
            hide_buttons: false,
            hide_from_taskbar: false,
            codepage: Some(CP_UTF8),
            colors: ColorConfig::default(),
        }
    }
}

/// Color configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    pub back: ConsoleColor,
    pub info: ConsoleColor,
    pub error: ConsoleColor,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            back: ConsoleColor::Black,
            info: ConsoleColor::Cyan,
            error: ConsoleColor::Red,
        }
    }
}

impl ConsoleConfig {
    /// Load configuration from `~/.attachcon/config.toml`, falling back to defaults
    pub fn load() -> Self {
        if let Some(path) = Self::get_config_path() {
            if path.exists() {
                match Self::load_from(&path) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("Ignoring config: {}", e),
                }
            }
        }
        Self::default()
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Get config file path
    pub fn get_config_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".attachcon").join("config.toml"))
    }
}

/// Console palette color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsoleColor {
    Black,
    DarkBlue,
    DarkGreen,
    DarkCyan,
    DarkRed,
    DarkMagenta,
    DarkYellow,
    Gray,
    DarkGray,
    Blue,
    Green,
    Cyan,
    Red,
    Magenta,
    Yellow,
    White,
}

impl ConsoleColor {
    /// Convert to crossterm Color
    pub fn to_crossterm(self) -> crossterm::style::Color {
        use crossterm::style::Color;

        match self {
            ConsoleColor::Black => Color::Black,
            ConsoleColor::DarkBlue => Color::DarkBlue,
            ConsoleColor::DarkGreen => Color::DarkGreen,
            ConsoleColor::DarkCyan => Color::DarkCyan,
            ConsoleColor::DarkRed => Color::DarkRed,
            ConsoleColor::DarkMagenta => Color::DarkMagenta,
            ConsoleColor::DarkYellow => Color::DarkYellow,
            ConsoleColor::Gray => Color::Grey,
            ConsoleColor::DarkGray => Color::DarkGrey,
            ConsoleColor::Blue => Color::Blue,
            ConsoleColor::Green => Color::Green,
            ConsoleColor::Cyan => Color::Cyan,
            ConsoleColor::Red => Color::Red,
            ConsoleColor::Magenta => Color::Magenta,
            ConsoleColor::Yellow => Color::Yellow,
            ConsoleColor::White => Color::White,
        }
    }

    /// Get color by name (case-insensitive, `-`/`_` interchangeable)
    pub fn by_name(name: &str) -> Option<Self> {
        let color = match name.to_lowercase().replace('_', "-").as_str() {
            "black" => ConsoleColor::Black,
            "dark-blue" => ConsoleColor::DarkBlue,
            "dark-green" => ConsoleColor::DarkGreen,
            "dark-cyan" => ConsoleColor::DarkCyan,
            "dark-red" => ConsoleColor::DarkRed,
            "dark-magenta" => ConsoleColor::DarkMagenta,
            "dark-yellow" => ConsoleColor::DarkYellow,
            "gray" | "grey" => ConsoleColor::Gray,
            "dark-gray" | "dark-grey" => ConsoleColor::DarkGray,
            "blue" => ConsoleColor::Blue,
            "green" => ConsoleColor::Green,
            "cyan" => ConsoleColor::Cyan,
            "red" => ConsoleColor::Red,
            "magenta" => ConsoleColor::Magenta,
            "yellow" => ConsoleColor::Yellow,
            "white" => ConsoleColor::White,
            _ => return None,
        };
        Some(color)
    }

    /// List color names
    pub fn list() -> Vec<&'static str> {
        vec![
            "black",
            "dark-blue",
            "dark-green",
            "dark-cyan",
            "dark-red",
            "dark-magenta",
            "dark-yellow",
            "gray",
            "dark-gray",
            "blue",
            "green",
            "cyan",
            "red",
            "magenta",
            "yellow",
            "white",
        ]
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}
