/// TOML configuration with sensible defaults.
/// No config file is required to run; defaults work out of the box.
/// Command-line flags (see `cli`) override whatever the file sets.

use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const DEFAULT_CARD_IP: &str = "192.168.4.1";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address of the ez Share card (its own access point by default)
    pub card_ip: String,
    /// Local directory mirroring the card layout. `~` is expanded.
    pub output_dir: String,
    /// Days back to sync (0 = everything on the card)
    pub days: u32,
    /// Per-request timeout; the card's radio is slow, keep this generous
    pub timeout_s: u64,
    /// Only fetch root files (STR.edf and friends), skip SETTINGS and DATALOG
    pub str_only: bool,
    pub probe: ProbeConfig,
}

/// Knobs for the blind seconds search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Seconds scanned for the anchor type (BRP), from :00 upward
    pub anchor_seconds: u32,
    /// Half-width of the window searched around the anchor for dependent types
    pub dependent_window_s: u32,
    /// Extra attempts after a network failure (a clean "absent" is never retried)
    pub retries: u32,
    /// Probe DATALOG/<date> once before scanning its sessions
    pub check_folders: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            card_ip: DEFAULT_CARD_IP.into(),
            output_dir: "~/CPAP_Data".into(),
            days: 7,
            timeout_s: 10,
            str_only: false,
            probe: ProbeConfig::default(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            anchor_seconds: 60,
            dependent_window_s: 15,
            retries: 1,
            check_folders: true,
        }
    }
}

impl Config {
    /// Load config from `path`, or the default config file path if `None`.
    /// Falls back to defaults if the file is missing or unparsable.
    pub fn load(path: Option<&Path>) -> Self {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(config_file_path);
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    log::warn!(
                        "Failed to parse config file {}: {e}. Using defaults.",
                        config_path.display()
                    );
                    Self::default()
                }
            },
            Err(_) => {
                log::debug!("No config file found at {}. Using defaults.", config_path.display());
                Self::default()
            }
        }
    }

    /// `output_dir` with a leading `~` replaced by `$HOME`.
    pub fn output_path(&self) -> PathBuf {
        expand_home(&self.output_dir)
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => {
            PathBuf::from(home).join(rest.trim_start_matches(['/', '\\']))
        }
        _ => PathBuf::from(path),
    }
}

fn config_file_path() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("ezshare-cpap").join("config.toml")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".config").join("ezshare-cpap").join("config.toml")
    } else {
        PathBuf::from("ezshare-cpap.toml")
    }
}
