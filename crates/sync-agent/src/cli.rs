//! Command-line arguments and settings resolution.
//!
//! Settings come from a JSON file (missing file = defaults) and are then
//! overridden by flags or `SYNC_AGENT_*` environment variables.

use chrono::{DateTime, FixedOffset};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use sync_core::BridgeConfig;
use sync_core::config::ConfigError;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "sync-agent")]
#[command(about = "Tracks local vault edits until the Syncthing daemon has indexed them")]
pub struct Args {
    /// Path to the vault directory
    #[arg(short, long, env = "SYNC_AGENT_VAULT")]
    pub vault: PathBuf,

    /// Settings file (JSON); defaults to the user config directory
    #[arg(short, long, env = "SYNC_AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Daemon host
    #[arg(long, env = "SYNC_AGENT_HOST")]
    pub host: Option<String>,

    /// Daemon GUI/REST port
    #[arg(long, env = "SYNC_AGENT_PORT")]
    pub port: Option<u16>,

    /// Talk to the daemon over https
    #[arg(long)]
    pub https: bool,

    /// Daemon API key
    #[arg(long, env = "SYNC_AGENT_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Daemon folder id the vault belongs to
    #[arg(long, env = "SYNC_AGENT_FOLDER")]
    pub folder: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Watch the vault and follow the daemon until interrupted (default)
    Run,
    /// Show folder status, connected devices and pending paths
    Status,
    /// Scan and confirm one vault path
    Sync { path: String },
    /// Ask the daemon to rescan the whole folder
    Scan,
    /// Pause or resume the folder
    TogglePause,
    /// Show recent sync activity
    History,
    /// List conflict copies in the vault
    Conflicts,
    /// Resolve one conflict copy
    Resolve {
        /// Vault-relative path of the conflict copy
        path: String,
        #[arg(long, value_enum)]
        keep: Keep,
    },
    /// List archived versions of a vault path
    Versions { path: String },
    /// Restore an archived version (RFC 3339 version time)
    Restore {
        path: String,
        version_time: DateTime<FixedOffset>,
    },
    /// Print the folder's ignore rules
    Ignores,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    /// Keep the original, trash the conflict copy
    Original,
    /// Replace the original with the conflict copy
    Conflict,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    pub fn vault_path(&self) -> PathBuf {
        expand_tilde(&self.vault.to_string_lossy())
    }

    /// Where settings are read from.
    pub fn settings_path(&self) -> Option<PathBuf> {
        match &self.config {
            Some(path) => Some(expand_tilde(&path.to_string_lossy())),
            None => default_settings_path(),
        }
    }

    /// Settings file contents overridden by flags.
    pub fn bridge_config(&self) -> Result<BridgeConfig, SettingsError> {
        let mut config = match self.settings_path() {
            Some(path) => load_settings(&path)?,
            None => BridgeConfig::default(),
        };
        self.apply_overrides(&mut config);
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut BridgeConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.https {
            config.use_https = true;
        }
        if let Some(key) = &self.api_key {
            config.api_key = key.clone();
        }
        if let Some(folder) = &self.folder {
            config.folder_id = folder.clone();
        }
    }
}

/// `<config dir>/sync-agent/settings.json`
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sync-agent").join("settings.json"))
}

/// Read a settings file; a missing file yields the defaults.
pub fn load_settings(path: &Path) -> Result<BridgeConfig, SettingsError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => BridgeConfig::from_json(&contents).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BridgeConfig::default()),
        Err(source) => Err(SettingsError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}
