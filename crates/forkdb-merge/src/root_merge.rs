//! The roots-level merge orchestrator.
//!
//! Tables merge serially in name order; no table observes another table's
//! merged state. Roots that store conflict and violation artifacts in-line
//! (the old storage layout) have them stashed before the merge and
//! reconciled with the merge's own artifacts afterwards; the storage layout
//! is a parameter of the invocation, never process-wide state.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use forkdb_error::{ForkError, Result};
use forkdb_store::{Artifact, ArtifactMap, ArtifactType, ConflictSchemas, Root};
use forkdb_types::{Hash, KeyTuple};

use crate::fk_merge::{compute_fk_violations, merge_foreign_keys};
use crate::stats::{MergeOperation, MergeStats};
use crate::table_merge::TableMerger;

/// Where a root keeps its conflict/violation artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArtifactStorage {
    /// Artifacts live in content-addressed artifact maps; pre-existing
    /// conflicts gate per table through compatibility checks.
    #[default]
    Addressed,
    /// Artifacts are stored in-line with the table (old layout); they are
    /// stashed around the merge and re-applied afterwards.
    Inline,
}

/// Parameters of one merge invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    pub is_cherry_pick: bool,
    pub artifact_storage: ArtifactStorage,
}

/// Three-way merge `ours` and `theirs` against `ancestor`.
///
/// `theirs_cm_hash` keys any artifacts generated by this merge;
/// `ancestor_cm_hash` locates the base value of a conflict. Returns the
/// merged root and per-table statistics, or the first error, in which
/// case no output root exists and pre-existing state is untouched.
pub async fn merge_roots(
    ours: &Root,
    theirs: &Root,
    ancestor: &Root,
    theirs_cm_hash: Hash,
    ancestor_cm_hash: Hash,
    opts: &MergeOptions,
) -> Result<(Root, BTreeMap<String, MergeStats>)> {
    let inline = opts.artifact_storage == ArtifactStorage::Inline;

    let (ours_work, conflict_stash) = if inline {
        stash_conflicts(ours)
    } else {
        (ours.clone(), ConflictStash::default())
    };
    let (ancestor_work, violation_stash) = if inline {
        stash_violations(ancestor)
    } else {
        (ancestor.clone(), ViolationStash::default())
    };

    let table_names: BTreeSet<String> = ours_work
        .table_names()
        .chain(theirs.table_names())
        .map(str::to_owned)
        .collect();

    let merger = TableMerger {
        ours: &ours_work,
        theirs,
        ancestor: &ancestor_work,
        theirs_cm_hash,
        ancestor_cm_hash,
        opts,
    };

    let mut merged = ours_work.clone();
    let mut table_stats: BTreeMap<String, MergeStats> = BTreeMap::new();

    for name in &table_names {
        debug!(table = %name, "merging table");
        let (merged_table, stats) = merger.merge_table(name).await?;
        match merged_table {
            Some(table) => {
                table_stats.insert(name.clone(), stats);
                merged.put_table(name.clone(), table);
            }
            None => {
                if merged.has_table(name) {
                    table_stats.insert(name.clone(), MergeStats::new(MergeOperation::Removed));
                    merged.remove_tables(&[name.as_str()]);
                } else {
                    assert!(
                        stats.operation == MergeOperation::Removed,
                        "invalid merge state for table {name}"
                    );
                }
            }
        }
    }

    let merged_fks = merge_foreign_keys(
        merged.foreign_keys(),
        theirs.foreign_keys(),
        ancestor_work.foreign_keys(),
    )?;
    merged.put_foreign_keys(merged_fks);

    compute_fk_violations(&mut merged, theirs_cm_hash)?;

    if inline {
        reapply_violation_stash(&mut merged, violation_stash)?;
    }

    count_artifacts(&merged, &mut table_stats);

    if inline {
        let produced_conflicts = table_stats.values().any(|s| s.conflicts > 0);
        if !conflict_stash.is_empty() && produced_conflicts {
            return Err(ForkError::CannotOverwriteConflicts);
        }
        reapply_conflict_stash(&mut merged, conflict_stash);
    }

    Ok((merged, table_stats))
}

/// Names of tables whose artifact maps hold conflicts.
pub fn tables_in_conflict(root: &Root) -> Vec<String> {
    root.tables()
        .filter(|(_, t)| t.artifacts().has_conflicts())
        .map(|(n, _)| n.to_owned())
        .collect()
}

/// Names of tables whose artifact maps hold constraint or foreign-key
/// violations.
pub fn tables_with_violations(root: &Root) -> Vec<String> {
    root.tables()
        .filter(|(_, t)| t.artifacts().has_violations())
        .map(|(n, _)| n.to_owned())
        .collect()
}

/// Whether the merged root can possibly carry constraint violations the
/// ancestor did not: true iff some table participating in a foreign key
/// changed (or appeared) relative to the ancestor.
pub fn may_have_constraint_violations(ancestor: &Root, merged: &Root) -> Result<bool> {
    let anc_hashes = ancestor.table_hashes();
    let merged_hashes = merged.table_hashes();
    for table in merged.foreign_keys().tables() {
        let Some(anc_hash) = anc_hashes.get(table) else {
            return Ok(true);
        };
        let Some(merged_hash) = merged_hashes.get(table) else {
            return Err(ForkError::internal(format!(
                "foreign key uses table '{table}' but no hash can be found for this table"
            )));
        };
        if anc_hash != merged_hash {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Working-set changes a merge would overwrite: tables changed between
/// `head` and `working` that the merge also changes. Matches git behavior
/// in refusing even identical changes. Also returns the head→working
/// table-hash diff for reporting.
pub fn merge_would_stomp_changes(
    head: &Root,
    working: &Root,
    merge_root: &Root,
) -> (Vec<String>, BTreeMap<String, Hash>) {
    let head_hashes = head.table_hashes();
    let head_working = diff_table_hashes(&head_hashes, &working.table_hashes());
    let merged_head = diff_table_hashes(&head_hashes, &merge_root.table_hashes());

    let stomped = head_working
        .keys()
        .filter(|name| merged_head.contains_key(*name))
        .cloned()
        .collect();
    (stomped, head_working)
}

fn diff_table_hashes(
    head: &BTreeMap<String, Hash>,
    other: &BTreeMap<String, Hash>,
) -> BTreeMap<String, Hash> {
    let mut diffs = BTreeMap::new();
    for (name, head_hash) in head {
        match other.get(name) {
            Some(h) if h != head_hash => {
                diffs.insert(name.clone(), *h);
            }
            Some(_) => {}
            None => {
                diffs.insert(name.clone(), Hash::ZERO);
            }
        }
    }
    for (name, h) in other {
        if !head.contains_key(name) {
            diffs.insert(name.clone(), *h);
        }
    }
    diffs
}

// ---------------------------------------------------------------------------
// Stashes
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ConflictStash {
    tables: BTreeMap<String, StashedConflicts>,
}

#[derive(Debug)]
struct StashedConflicts {
    entries: Vec<(KeyTuple, Artifact)>,
    schemas: Option<ConflictSchemas>,
}

impl ConflictStash {
    fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[derive(Debug, Default)]
struct ViolationStash {
    tables: BTreeMap<String, Vec<(KeyTuple, ArtifactType, Artifact)>>,
}

/// Remove every conflict artifact from the root, remembering them (and
/// their schema triples) per table.
fn stash_conflicts(root: &Root) -> (Root, ConflictStash) {
    let mut out = root.clone();
    let mut stash = ConflictStash::default();
    for (name, table) in root.tables() {
        if !table.artifacts().has_conflicts() {
            continue;
        }
        let mut entries = Vec::new();
        let mut editor = table.artifacts().editor();
        for ((key, ty), art) in table.artifacts().iter() {
            if *ty == ArtifactType::Conflict {
                entries.push((key.clone(), art.clone()));
                editor.delete(key, *ty);
            }
        }
        stash.tables.insert(
            name.to_owned(),
            StashedConflicts {
                entries,
                schemas: table.artifacts().conflict_schemas().cloned(),
            },
        );
        out.put_table(name, table.with_artifacts(editor.flush()));
    }
    (out, stash)
}

/// Remove every violation artifact from the root, remembering them per
/// table.
fn stash_violations(root: &Root) -> (Root, ViolationStash) {
    let mut out = root.clone();
    let mut stash = ViolationStash::default();
    for (name, table) in root.tables() {
        if !table.artifacts().has_violations() {
            continue;
        }
        let mut entries = Vec::new();
        let mut editor = table.artifacts().editor();
        for ((key, ty), art) in table.artifacts().iter() {
            if matches!(
                ty,
                ArtifactType::ConstraintViolation | ArtifactType::ForeignKeyViolation
            ) {
                entries.push((key.clone(), *ty, art.clone()));
                editor.delete(key, *ty);
            }
        }
        stash.tables.insert(name.to_owned(), entries);
        out.put_table(name, table.with_artifacts(editor.flush()));
    }
    (out, stash)
}

/// Union the stashed violations back into the merged root. A key collision
/// with an unequal payload means two different truths about the same row,
/// an internal-consistency failure.
fn reapply_violation_stash(merged: &mut Root, stash: ViolationStash) -> Result<()> {
    for (name, entries) in stash.tables {
        let Some(table) = merged.get_table(&name) else {
            // The table with the violations was deleted.
            continue;
        };
        let mut editor = table.artifacts().editor();
        for (key, ty, art) in entries {
            if let Some(current) = editor.get(&key, ty) {
                if *current != art {
                    return Err(ForkError::internal(format!(
                        "conflicting constraint violations for key {key:?} in table {name}"
                    )));
                }
            } else {
                editor.add(key, ty, art);
            }
        }
        let updated = table.with_artifacts(editor.flush());
        merged.put_table(name, updated);
    }
    Ok(())
}

/// Put the stashed conflicts back. Only called when the merge produced no
/// conflicts of its own.
fn reapply_conflict_stash(merged: &mut Root, stash: ConflictStash) {
    for (name, stashed) in stash.tables {
        let Some(table) = merged.get_table(&name) else {
            continue;
        };
        let mut editor = table.artifacts().editor();
        for (key, art) in stashed.entries {
            editor.add(key, ArtifactType::Conflict, art);
        }
        if let Some(schemas) = stashed.schemas {
            editor.set_conflict_schemas(schemas);
        }
        let updated = table.with_artifacts(editor.flush());
        merged.put_table(name, updated);
    }
}

/// Overwrite each table's conflict/violation counters with the counts the
/// caller can actually enumerate from the merged root.
fn count_artifacts(merged: &Root, stats: &mut BTreeMap<String, MergeStats>) {
    for (name, stat) in stats.iter_mut() {
        if let Some(table) = merged.get_table(name) {
            let arts: &ArtifactMap = table.artifacts();
            stat.conflicts = arts.count_of(ArtifactType::Conflict);
            stat.constraint_violations = arts.count_of(ArtifactType::ConstraintViolation)
                + arts.count_of(ArtifactType::ForeignKeyViolation);
        }
    }
}
