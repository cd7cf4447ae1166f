use std::path::PathBuf;

use clap::Parser;
use snaparc_transfer::Metering;

use crate::config::ArchiveConfig;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "snaparc")]
#[command(about = "Archive read-only btrfs snapshots to object storage", long_about = None)]
pub struct Cli {
    /// Subvolume whose read-only snapshots are archived.
    pub path: PathBuf,

    /// Config file (`.toml` or `.json`).
    #[arg(short, long, env = "SNAPARC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Destination container.
    #[arg(long, env = "SNAPARC_CONTAINER")]
    pub container_name: Option<String>,

    /// Directory where artifacts are produced before upload.
    #[arg(long)]
    pub staging_dir: Option<PathBuf>,

    /// Encrypt artifacts for this age recipient.
    #[arg(long, env = "SNAPARC_AGE_RECIPIENT")]
    pub age_recipient: Option<String>,

    /// Cap the transfer rate, e.g. `20M`.
    #[arg(long)]
    pub rate_limit: Option<String>,

    /// Do not pass the stream through the meter.
    #[arg(long)]
    pub no_meter: bool,

    /// Keep artifacts after a successful upload.
    #[arg(long)]
    pub keep_artifacts: bool,

    /// Print what would be archived and exit.
    #[arg(long)]
    pub dry_run: bool,

    /// Debug logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Loads the config file if one is given, then applies the flags.
    pub fn load_config(&self) -> anyhow::Result<ArchiveConfig> {
        let mut config = match &self.config {
            Some(path) => ArchiveConfig::from_file(path)?,
            None => ArchiveConfig::default(),
        };
        self.apply(&mut config);
        config.swift = config.swift.with_env_fallback();
        Ok(config)
    }

    /// Overrides config values with the flags that were given.
    pub fn apply(&self, config: &mut ArchiveConfig) {
        if let Some(container) = &self.container_name {
            config.container_name = container.clone();
        }
        if let Some(dir) = &self.staging_dir {
            config.staging_dir = dir.clone();
        }
        if let Some(recipient) = &self.age_recipient {
            config.age_recipient = Some(recipient.clone());
        }
        if let Some(rate) = &self.rate_limit {
            config.rate_limit = Some(rate.clone());
        }
        if self.no_meter {
            config.metering = Metering::Off;
        }
        if self.keep_artifacts {
            config.keep_artifacts = true;
        }
    }

    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}
