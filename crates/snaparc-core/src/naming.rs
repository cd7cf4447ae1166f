//! Storage names for snapshots and archival units.
//!
//! A name is `<lineage_id>/<rel_path>` with every `/` replaced by
//! [`ESCAPE_TOKEN`], which makes it a single flat component usable both as a
//! local file name and as a remote object name. Inputs containing a NUL
//! character or the escape token itself are rejected, so the mapping is
//! injective over everything it accepts.

use crate::error::{CoreError, CoreResult};
use crate::snapshot::{ArchivalUnit, Snapshot};

/// Replacement for every path separator in a storage name.
pub const ESCAPE_TOKEN: &str = "\\x2f";

const SEPARATOR: char = '/';

/// Sanitizes a raw `lineage/path` base into a flat storage name.
pub fn sanitize(base: &str) -> CoreResult<String> {
    if base.contains('\0') {
        return Err(CoreError::InvalidName {
            name: base.to_string(),
            reason: "contains a NUL character",
        });
    }
    if base.contains(ESCAPE_TOKEN) {
        return Err(CoreError::InvalidName {
            name: base.to_string(),
            reason: "already contains the separator escape sequence",
        });
    }
    Ok(base.replace(SEPARATOR, ESCAPE_TOKEN))
}

/// Storage name of a single snapshot.
pub fn storage_name(snapshot: &Snapshot) -> CoreResult<String> {
    sanitize(&format!("{}/{}", snapshot.lineage_id, snapshot.rel_path))
}

/// Storage name of an archival unit.
///
/// Only the target snapshot contributes: there is one object per archived
/// snapshot regardless of the delta base it was produced against.
pub fn name(unit: &ArchivalUnit) -> CoreResult<String> {
    match unit {
        ArchivalUnit::Full(snapshot) => storage_name(snapshot),
        ArchivalUnit::Incremental { snapshot, .. } => storage_name(snapshot),
    }
}

/// Longest common prefix of `names`, empty when `names` is empty.
pub fn common_prefix<S: AsRef<str>>(names: &[S]) -> String {
    let mut iter = names.iter();
    let first = match iter.next() {
        Some(first) => first.as_ref(),
        None => return String::new(),
    };

    let mut len = first.len();
    for other in iter {
        len = first[..len]
            .char_indices()
            .zip(other.as_ref().chars())
            .take_while(|((_, a), b)| a == b)
            .last()
            .map(|((i, c), _)| i + c.len_utf8())
            .unwrap_or(0);
        if len == 0 {
            break;
        }
    }
    first[..len].to_string()
}
