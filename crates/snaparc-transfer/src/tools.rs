//! Locating the external tools a pipeline runs.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Programs used for each stage. Bare names are looked up in `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    /// Snapshot serializer (`btrfs send`).
    pub serializer: PathBuf,
    /// Stream encryptor (`age -r`).
    pub encryptor: PathBuf,
    /// Progress meter and rate limiter (`pv`).
    pub meter: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            serializer: PathBuf::from("btrfs"),
            encryptor: PathBuf::from("age"),
            meter: PathBuf::from("pv"),
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Resolves `tool` to an executable file.
///
/// A tool given with a directory part must exist as is; a bare name is
/// searched in the `PATH` entries in order.
pub fn locate_tool(tool: &Path) -> Option<PathBuf> {
    if tool.as_os_str().is_empty() {
        return None;
    }
    if tool.components().count() > 1 || tool.is_absolute() {
        return is_executable(tool).then(|| tool.to_path_buf());
    }

    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(tool))
        .find(|candidate| is_executable(candidate))
}
