use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snaparc_remote::{SwiftConfig, DEFAULT_SEGMENT_SIZE};
use snaparc_transfer::{Metering, ToolPaths, TransferOptions};

/// Settings for one archive run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Destination container.
    pub container_name: String,
    /// Directory where artifacts are produced before upload.
    pub staging_dir: PathBuf,
    /// Encrypt artifacts for this recipient.
    pub age_recipient: Option<String>,
    /// Transfer rate cap in the meter's size syntax, e.g. `20M`.
    pub rate_limit: Option<String>,
    /// Metering policy.
    pub metering: Metering,
    /// Segment size for large uploads.
    pub segment_size_bytes: u64,
    /// Keep artifacts after a successful upload.
    pub keep_artifacts: bool,
    /// External tool locations.
    pub tools: ToolPaths,
    /// Object store connection.
    pub swift: SwiftConfig,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            container_name: "snapshots".to_string(),
            staging_dir: PathBuf::from("/var/tmp/snaparc"),
            age_recipient: None,
            rate_limit: None,
            metering: Metering::Auto,
            segment_size_bytes: DEFAULT_SEGMENT_SIZE,
            keep_artifacts: false,
            tools: ToolPaths::default(),
            swift: SwiftConfig::default(),
        }
    }
}

impl ArchiveConfig {
    /// Loads a config file; the format follows the extension (`toml` or `json`).
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => Ok(toml::from_str(&contents)?),
            "json" => Ok(serde_json::from_str(&contents)?),
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Pipeline options derived from this config.
    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            encrypt_recipient: self.age_recipient.clone(),
            metering: self.metering,
            rate_limit: self.rate_limit.clone(),
        }
    }
}
