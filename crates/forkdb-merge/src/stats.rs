//! Per-table merge statistics.

use forkdb_store::{Change, OrderedIndex};
use forkdb_types::Schema;

/// What the merge did to a table.
///
/// The discriminants are stable at the system boundary.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(u8)]
pub enum MergeOperation {
    Unmodified = 0,
    Added = 1,
    Removed = 2,
    Modified = 3,
}

/// Row-level statistics for one table's merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MergeStats {
    pub operation: MergeOperation,
    pub adds: usize,
    pub deletes: usize,
    pub modifications: usize,
    pub conflicts: usize,
    pub constraint_violations: usize,
}

impl MergeStats {
    pub const fn new(operation: MergeOperation) -> Self {
        Self {
            operation,
            adds: 0,
            deletes: 0,
            modifications: 0,
            conflicts: 0,
            constraint_violations: 0,
        }
    }

    pub const fn unmodified() -> Self {
        Self::new(MergeOperation::Unmodified)
    }
}

/// Summarize `ours → theirs` as add/delete/modification counts.
///
/// Used for the fast-forward-to-theirs path, where the merged table is
/// theirs verbatim and the stats are just the diff summary. Keyless tables
/// count by cardinality delta.
pub fn diff_summary(schema: &Schema, ours: &OrderedIndex, theirs: &OrderedIndex) -> MergeStats {
    let mut stats = MergeStats::new(MergeOperation::Modified);
    for change in theirs.diff(ours) {
        if schema.is_keyless() {
            match &change {
                Change::Added { new, .. } => stats.adds += new.cardinality() as usize,
                Change::Removed { old, .. } => stats.deletes += old.cardinality() as usize,
                Change::Modified { old, new, .. } => {
                    let delta = new.cardinality() as i64 - old.cardinality() as i64;
                    if delta > 0 {
                        stats.adds += delta as usize;
                    } else {
                        stats.deletes += delta.unsigned_abs() as usize;
                    }
                }
            }
        } else {
            match &change {
                Change::Added { .. } => stats.adds += 1,
                Change::Removed { .. } => stats.deletes += 1,
                Change::Modified { .. } => stats.modifications += 1,
            }
        }
    }
    stats
}
