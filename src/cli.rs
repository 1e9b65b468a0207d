use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;

const EXAMPLES: &str = "\
Examples:
  ezshare-cpap                          # Sync last 7 days to ~/CPAP_Data
  ezshare-cpap --days 30                # Sync last 30 days
  ezshare-cpap --days 0                 # Sync ALL available data
  ezshare-cpap --output-dir /mnt/cpap   # Custom output directory
  ezshare-cpap --str-only               # Only download STR.edf (fast summary)";

/// Download CPAP data from an ez Share WiFi SD card.
///
/// Flags override the config file; unset flags keep the file's (or default) value.
#[derive(Debug, Parser)]
#[command(name = "ezshare-cpap", version, about, after_help = EXAMPLES)]
pub struct Args {
    /// Local directory to save files (default: ~/CPAP_Data)
    #[arg(short, long)]
    pub output_dir: Option<String>,

    /// Number of days back to sync (0 = all, default: 7)
    #[arg(short, long)]
    pub days: Option<u32>,

    /// Card IP address or URL (default: 192.168.4.1)
    #[arg(long)]
    pub card_ip: Option<String>,

    /// HTTP request timeout in seconds (default: 10)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Only download root files such as STR.edf (quick summary data)
    #[arg(long)]
    pub str_only: bool,

    /// Config file (default: $XDG_CONFIG_HOME/ezshare-cpap/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Debug logging (every probe)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Layer command-line flags over a loaded config.
    pub fn apply(&self, mut cfg: Config) -> Config {
        if let Some(dir) = &self.output_dir {
            cfg.output_dir = dir.clone();
        }
        if let Some(days) = self.days {
            cfg.days = days;
        }
        if let Some(ip) = &self.card_ip {
            cfg.card_ip = ip.clone();
        }
        if let Some(timeout) = self.timeout {
            cfg.timeout_s = timeout;
        }
        cfg.str_only |= self.str_only;
        cfg
    }
}
