//! Property-based tests for snaparc-core using proptest.
//!
//! These tests check the resolver and the naming scheme against arbitrary
//! lineages and names rather than a handful of fixed cases.

use snaparc_core::{
    archived_subset, common_prefix, resolve, sanitize, storage_name, ArchivalUnit, CoreError,
    Snapshot, ESCAPE_TOKEN,
};
use proptest::prelude::*;
use std::collections::HashSet;

/// Generator for a lineage of `0..max` distinct snapshots in creation order.
fn any_lineage(max: usize) -> impl Strategy<Value = Vec<Snapshot>> {
    ("[0-9a-f]{8}", 0..max).prop_map(|(lineage_id, len)| {
        (0..len)
            .map(|i| {
                Snapshot::new(
                    lineage_id.clone(),
                    format!("snapshots/home.{}", i),
                    format!("/mnt/fs/snapshots/home.{}", i),
                    1_600_000_000 + i as u64,
                )
            })
            .collect()
    })
}

/// Names free of NUL characters and of the escape sequence.
fn any_safe_name() -> impl Strategy<Value = String> {
    "[a-z0-9/._\\\\x-]{0,24}".prop_filter("escape sequence", |s| !s.contains(ESCAPE_TOKEN))
}

proptest! {
    /// Test: a fully archived lineage resolves to nothing.
    #[test]
    fn test_resolve_fully_archived_is_empty(local in any_lineage(20)) {
        prop_assert_eq!(resolve(&local, &local).unwrap().count(), 0);
    }

    /// Test: with nothing archived, the whole lineage is a Full unit followed
    /// by deltas against each immediate predecessor.
    #[test]
    fn test_resolve_nothing_archived_chains_everything(local in any_lineage(20)) {
        let units: Vec<ArchivalUnit> = resolve(&local, &[]).unwrap().collect();
        prop_assert_eq!(units.len(), local.len());
        for (i, unit) in units.iter().enumerate() {
            prop_assert_eq!(unit.target(), &local[i]);
            if i == 0 {
                prop_assert!(unit.is_full());
            } else {
                prop_assert_eq!(unit.parent(), Some(&local[i - 1]));
            }
        }
    }

    /// Test: any archived prefix leaves exactly the suffix, based on the last
    /// archived snapshot.
    #[test]
    fn test_resolve_prefix_leaves_suffix(local in any_lineage(20), cut in 0usize..20) {
        let cut = cut.min(local.len());
        let units: Vec<ArchivalUnit> = resolve(&local, &local[..cut]).unwrap().collect();
        prop_assert_eq!(units.len(), local.len() - cut);
        if let Some(first) = units.first() {
            if cut == 0 {
                prop_assert!(first.is_full());
            } else {
                prop_assert_eq!(first.parent(), Some(&local[cut - 1]));
            }
        }
    }

    /// Test: dropping any archived entry other than the last breaks the prefix.
    #[test]
    fn test_resolve_rejects_holes(local in any_lineage(20), hole in 0usize..20) {
        prop_assume!(local.len() >= 2);
        let hole = hole % (local.len() - 1);
        let mut archived = local.clone();
        archived.remove(hole);
        let err = resolve(&local, &archived).unwrap_err();
        let is_inconsistent = matches!(err, CoreError::InconsistentLayout { .. });
        prop_assert!(is_inconsistent);
    }

    /// Test: duplicates on either side are rejected.
    #[test]
    fn test_resolve_rejects_duplicates(local in any_lineage(10), which in 0usize..10) {
        prop_assume!(!local.is_empty());
        let mut doubled = local.clone();
        doubled.push(local[which % local.len()].clone());
        prop_assert!(resolve(&doubled, &[]).is_err());
        prop_assert!(resolve(&local, &doubled).is_err());
    }

    /// Test: sanitization is injective and deterministic.
    #[test]
    fn test_sanitize_injective(a in any_safe_name(), b in any_safe_name()) {
        let sa = sanitize(&a).unwrap();
        let sb = sanitize(&b).unwrap();
        prop_assert_eq!(&sa, &sanitize(&a).unwrap());
        prop_assert_eq!(a == b, sa == sb);
        prop_assert!(!sa.contains('/'));
    }

    /// Test: every name starts with the common prefix of the batch.
    #[test]
    fn test_common_prefix_is_prefix(names in proptest::collection::vec(any_safe_name(), 1..8)) {
        let prefix = common_prefix(&names);
        for name in &names {
            prop_assert!(name.starts_with(&prefix));
        }
    }

    /// Test: the archived subset of a lineage listed in full is the lineage.
    #[test]
    fn test_archived_subset_of_full_listing(local in any_lineage(20)) {
        let identifiers: HashSet<String> =
            local.iter().map(|s| storage_name(s).unwrap()).collect();
        prop_assert_eq!(archived_subset(&local, &identifiers).unwrap(), local);
    }
}
