use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use tokmon_core::driver::DriverConfig;
use tokmon_core::pty::resolver::{expand_home, DEFAULT_KNOWN_LOCATIONS};
use tokmon_core::pty::WindowSize;
use tokmon_core::usage::DEFAULT_TERM;

/// Environment variable overriding the target executable
pub const ENV_EXECUTABLE: &str = "CLAUDE_PATH";

/// Environment variable overriding the target's working directory
pub const ENV_WORKING_DIR: &str = "CLAUDE_CWD";

/// Command line arguments
#[derive(Parser, Debug, Default)]
#[command(
    author,
    version,
    about = "Capture Claude Code usage and quota reset times"
)]
pub struct Config {
    /// Print a JSON payload instead of plain text
    #[arg(long)]
    pub json: bool,

    /// Write the normalized transcript to this file (best effort)
    #[arg(long, value_name = "PATH")]
    pub raw: Option<PathBuf>,

    /// Enable debug logging on stderr
    #[arg(short, long)]
    pub debug: bool,

    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Application settings (from config file)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Where and how to launch the target program
    #[serde(default)]
    pub target: TargetSettings,

    /// Interaction timings and commands
    #[serde(default)]
    pub driver: DriverConfig,
}

/// Target program settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSettings {
    /// Explicit executable path, skipping discovery
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// Working directory for the target (default: home directory)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Install locations probed before searching PATH
    #[serde(default = "default_known_locations")]
    pub known_locations: Vec<String>,

    /// Timeout for the PATH search in milliseconds
    #[serde(default = "default_search_timeout")]
    pub search_timeout_ms: u64,

    /// Terminal rows
    #[serde(default = "default_rows")]
    pub rows: u16,

    /// Terminal columns
    #[serde(default = "default_cols")]
    pub cols: u16,

    /// TERM value passed to the target
    #[serde(default = "default_term")]
    pub term: String,
}

fn default_known_locations() -> Vec<String> {
    DEFAULT_KNOWN_LOCATIONS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_search_timeout() -> u64 {
    5000
}

fn default_rows() -> u16 {
    40
}

fn default_cols() -> u16 {
    120
}

fn default_term() -> String {
    DEFAULT_TERM.to_string()
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            executable: None,
            working_dir: None,
            known_locations: default_known_locations(),
            search_timeout_ms: default_search_timeout(),
            rows: default_rows(),
            cols: default_cols(),
            term: default_term(),
        }
    }
}

impl TargetSettings {
    /// Working directory to launch in: the configured one, else the home directory
    pub fn resolved_working_dir(&self) -> Option<PathBuf> {
        match &self.working_dir {
            Some(dir) => Some(dir.to_str().map_or_else(|| dir.clone(), expand_home)),
            None => dirs::home_dir(),
        }
    }

    pub fn window(&self) -> WindowSize {
        WindowSize {
            rows: self.rows,
            cols: self.cols,
        }
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }
}

impl Settings {
    /// Load settings from config file or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        // Try custom path first
        if let Some(p) = path {
            if p.exists() {
                return Self::from_file(p);
            }
            warn!("Config file {:?} not found, trying default locations", p);
        }

        // Try default config locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("tokmon/config.toml")),
            dirs::home_dir().map(|p| p.join(".config/tokmon/config.toml")),
            dirs::home_dir().map(|p| p.join(".tokmon.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::from_file(path);
            }
        }

        // Return defaults if no config file found
        Ok(Self::default())
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Apply `CLAUDE_PATH` and `CLAUDE_CWD` (environment beats the config file)
    pub fn merge_env(&mut self) {
        if let Some(path) = non_empty_env(ENV_EXECUTABLE) {
            self.target.executable = Some(PathBuf::from(path));
        }
        if let Some(dir) = non_empty_env(ENV_WORKING_DIR) {
            self.target.working_dir = Some(PathBuf::from(dir));
        }
    }

    /// Validate and normalize settings values
    ///
    /// Clamps driver timings and replaces zero window sizes and an empty
    /// TERM with their defaults.
    pub fn validate(&mut self) {
        self.driver.validate();

        if self.target.rows == 0 {
            self.target.rows = default_rows();
        }
        if self.target.cols == 0 {
            self.target.cols = default_cols();
        }
        if self.target.term.trim().is_empty() {
            self.target.term = default_term();
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
