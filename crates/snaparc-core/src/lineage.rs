//! Lineage resolution: which snapshots still have to be archived.
//!
//! The local lineage is the creation-ordered list of read-only snapshots of
//! one subvolume. The archived side lists the snapshots already present in
//! remote storage, also in creation order. A consistent archive is a prefix
//! of the local lineage; the rest of the lineage is emitted as a chain of
//! units where every delta is taken against its immediate predecessor.

use std::collections::HashSet;

use crate::error::{CoreError, CoreResult};
use crate::naming::storage_name;
use crate::snapshot::{ArchivalUnit, Snapshot};

fn check_unique(snapshots: &[Snapshot]) -> CoreResult<()> {
    let mut seen = HashSet::with_capacity(snapshots.len());
    for snapshot in snapshots {
        if !seen.insert(snapshot) {
            return Err(CoreError::DuplicateInput {
                snapshot: snapshot.to_string(),
            });
        }
    }
    Ok(())
}

/// Resolves the units still needed to archive `local`, given `archived`.
///
/// Input validation and the prefix-consistency check run immediately; the
/// units themselves are produced lazily by the returned iterator.
pub fn resolve<'a>(local: &'a [Snapshot], archived: &[Snapshot]) -> CoreResult<PendingUnits<'a>> {
    check_unique(local)?;
    check_unique(archived)?;

    let matched = local.len().min(archived.len());
    for (position, (l, a)) in local.iter().zip(archived).enumerate() {
        if l != a {
            return Err(CoreError::InconsistentLayout {
                position,
                local: l.to_string(),
                archived: a.to_string(),
            });
        }
    }

    Ok(PendingUnits {
        local,
        next: matched,
        base: matched.checked_sub(1).map(|i| &local[i]),
    })
}

/// The first pending unit only, discarding the rest of the chain.
pub fn next_unit(local: &[Snapshot], archived: &[Snapshot]) -> CoreResult<Option<ArchivalUnit>> {
    Ok(resolve(local, archived)?.next())
}

/// Filters `local` down to the snapshots whose storage name is in `identifiers`.
pub fn archived_subset(
    local: &[Snapshot],
    identifiers: &HashSet<String>,
) -> CoreResult<Vec<Snapshot>> {
    let mut archived = Vec::new();
    for snapshot in local {
        if identifiers.contains(&storage_name(snapshot)?) {
            archived.push(snapshot.clone());
        }
    }
    Ok(archived)
}

/// Lazy chain of units not yet archived.
#[derive(Debug, Clone)]
pub struct PendingUnits<'a> {
    local: &'a [Snapshot],
    next: usize,
    base: Option<&'a Snapshot>,
}

impl<'a> Iterator for PendingUnits<'a> {
    type Item = ArchivalUnit;

    fn next(&mut self) -> Option<ArchivalUnit> {
        let snapshot = self.local.get(self.next)?;
        self.next += 1;
        let unit = match self.base.replace(snapshot) {
            None => ArchivalUnit::Full(snapshot.clone()),
            Some(parent) => ArchivalUnit::Incremental {
                parent: parent.clone(),
                snapshot: snapshot.clone(),
            },
        };
        Some(unit)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.local.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PendingUnits<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn lineage(n: u64) -> Vec<Snapshot> {
        (0..n)
            .map(|i| {
                Snapshot::new(
                    "7d1c2f4a-1b2c-4d5e-8f90-aabbccddeeff",
                    format!("snapshots/{}", i),
                    format!("/fs/snapshots/{}", i),
                    i,
                )
            })
            .collect()
    }

    #[test]
    fn test_empty_lineage() {
        let units: Vec<_> = resolve(&[], &[]).unwrap().collect();
        assert!(units.is_empty());
    }

    #[test]
    fn test_nothing_archived() {
        let local = lineage(3);
        let units: Vec<_> = resolve(&local, &[]).unwrap().collect();
        assert_eq!(units.len(), 3);
        assert_eq!(units[0], ArchivalUnit::Full(local[0].clone()));
        assert_eq!(
            units[1],
            ArchivalUnit::Incremental {
                parent: local[0].clone(),
                snapshot: local[1].clone(),
            }
        );
        assert_eq!(
            units[2],
            ArchivalUnit::Incremental {
                parent: local[1].clone(),
                snapshot: local[2].clone(),
            }
        );
    }

    #[test]
    fn test_partially_archived() {
        let local = lineage(3);
        let units: Vec<_> = resolve(&local, &local[..2]).unwrap().collect();
        assert_eq!(
            units,
            vec![ArchivalUnit::Incremental {
                parent: local[1].clone(),
                snapshot: local[2].clone(),
            }]
        );
    }

    #[test]
    fn test_fully_archived() {
        let local = lineage(4);
        assert_eq!(resolve(&local, &local).unwrap().count(), 0);
    }

    #[test]
    fn test_more_archived_than_local() {
        let all = lineage(4);
        let units: Vec<_> = resolve(&all[..2], &all).unwrap().collect();
        assert!(units.is_empty());
    }

    #[test]
    fn test_missing_first_archive_is_inconsistent() {
        let local = lineage(2);
        let err = resolve(&local, &local[1..]).unwrap_err();
        assert!(matches!(err, CoreError::InconsistentLayout { position: 0, .. }));
    }

    #[test]
    fn test_gap_in_archive_is_inconsistent() {
        let local = lineage(4);
        let archived = vec![local[0].clone(), local[2].clone()];
        let err = resolve(&local, &archived).unwrap_err();
        assert!(matches!(err, CoreError::InconsistentLayout { position: 1, .. }));
    }

    #[test]
    fn test_duplicate_local_rejected() {
        let local = lineage(1);
        let doubled = vec![local[0].clone(), local[0].clone()];
        let err = resolve(&doubled, &[]).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateInput { .. }));
    }

    #[test]
    fn test_duplicate_archived_rejected() {
        let local = lineage(2);
        let doubled = vec![local[0].clone(), local[0].clone()];
        let err = resolve(&local, &doubled).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateInput { .. }));
    }

    #[test]
    fn test_lazy_consumer_can_stop_early() {
        let local = lineage(100);
        let mut pending = resolve(&local, &local[..10]).unwrap();
        assert_eq!(pending.len(), 90);
        let first = pending.next().unwrap();
        assert_eq!(first.parent(), Some(&local[9]));
        assert_eq!(first.target(), &local[10]);
        assert_eq!(pending.len(), 89);
    }

    #[test]
    fn test_next_unit() {
        let local = lineage(3);
        assert_eq!(
            next_unit(&local, &[]).unwrap(),
            Some(ArchivalUnit::Full(local[0].clone()))
        );
        assert_eq!(next_unit(&local, &local).unwrap(), None);
    }

    #[test]
    fn test_archived_subset_keeps_local_order() {
        let local = lineage(3);
        let identifiers: HashSet<String> = [
            storage_name(&local[1]).unwrap(),
            "someone-else\\x2fsnapshots\\x2f9".to_string(),
            storage_name(&local[0]).unwrap(),
        ]
        .into_iter()
        .collect();

        let archived = archived_subset(&local, &identifiers).unwrap();
        assert_eq!(archived, local[..2].to_vec());
    }

    #[test]
    fn test_archived_subset_rejects_unnameable() {
        let mut local = lineage(1);
        local[0].rel_path = "bad\0path".to_string();
        let err = archived_subset(&local, &HashSet::new()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidName { .. }));
    }
}
