//! The per-table merge driver.
//!
//! Classifies the (ancestor, ours, theirs) presence/change lattice with a
//! literal decision function (first matching rule wins) and short-circuits
//! the trivial cases. The full three-way merge drives the schema merge,
//! pre-merges the artifact maps, then runs the reconciler, index updater
//! and conflict processor as three cooperative tasks joined by
//! `tokio::try_join!`: the first error cancels the peers by drop, and no
//! partial state escapes a failed merge.

use tokio::sync::mpsc;
use tracing::debug;

use forkdb_error::{ForkError, Result};
use forkdb_store::{ArtifactMap, Root, Table};
use forkdb_types::{Hash, Schema};

use crate::conflicts::processor_for_table;
use crate::index_update::{merge_secondary_indexes, update_secondary_indexes};
use crate::reconciler::reconcile_rows;
use crate::root_merge::MergeOptions;
use crate::schema_merge::merge_schemas;
use crate::stats::{diff_summary, MergeOperation, MergeStats};

/// Bounded capacity of the index-edit channel. Part of the contract:
/// producers block when full, enforcing backpressure.
pub const INDEX_EDIT_CHANNEL_CAPACITY: usize = 128;

/// Bounded capacity of the conflict channel.
pub const CONFLICT_CHANNEL_CAPACITY: usize = 128;

/// Drives one table's merge.
pub(crate) struct TableMerger<'a> {
    pub ours: &'a Root,
    pub theirs: &'a Root,
    pub ancestor: &'a Root,
    pub theirs_cm_hash: Hash,
    pub ancestor_cm_hash: Hash,
    pub opts: &'a MergeOptions,
}

struct TableInfo {
    table: Option<Table>,
    hash: Option<Hash>,
}

impl TableInfo {
    fn from_root(root: &Root, name: &str) -> Self {
        let table = root.get_table(name).cloned();
        let hash = table.as_ref().map(Table::hash_of);
        Self { table, hash }
    }

    fn present(&self) -> bool {
        self.table.is_some()
    }
}

impl TableMerger<'_> {
    /// Merge one table. `Ok((None, stats))` means the table is deleted in
    /// the merged root.
    pub async fn merge_table(&self, name: &str) -> Result<(Option<Table>, MergeStats)> {
        let ours = TableInfo::from_root(self.ours, name);
        let theirs = TableInfo::from_root(self.theirs, name);
        let anc = TableInfo::from_root(self.ancestor, name);

        // Nothing changed anywhere.
        if ours.present()
            && theirs.present()
            && anc.present()
            && ours.hash == theirs.hash
            && ours.hash == anc.hash
        {
            debug!(table = name, "merge short-circuit: unchanged");
            return Ok((ours.table, MergeStats::unmodified()));
        }

        // Both sides made identical changes. Keyless tables get no such
        // shortcut: identical keyless co-changes still conflict.
        if ours.present() && theirs.present() && anc.present() && ours.hash == theirs.hash {
            let ours_tbl = ours.table.as_ref().expect("present");
            if !ours_tbl.schema().is_keyless() {
                debug!(table = name, "merge short-circuit: identical changes");
                return Ok((ours.table, MergeStats::unmodified()));
            }
        }

        // One or both sides added the table.
        let mut anc_table = anc.table.clone();
        if !anc.present() {
            if ours.present() && theirs.present() {
                let o = ours.table.as_ref().expect("present");
                let t = theirs.table.as_ref().expect("present");
                if o.schema() != t.schema() {
                    return Err(ForkError::SameTableAddedTwice {
                        table: name.to_owned(),
                    });
                }
                // Both added the same table; pretend it was in the
                // ancestor all along with no data.
                anc_table = Some(Table::new(o.schema().clone()));
            } else if ours.present() {
                debug!(table = name, "merge short-circuit: ours added");
                return Ok((ours.table, MergeStats::unmodified()));
            } else if theirs.present() {
                debug!(table = name, "merge short-circuit: theirs added");
                return Ok((theirs.table, MergeStats::new(MergeOperation::Added)));
            } else {
                return Err(ForkError::internal(format!(
                    "table '{name}' is in neither side of the merge"
                )));
            }
        } else {
            // Deleted in both: fast-forward to removed.
            if !ours.present() && !theirs.present() {
                return Ok((None, MergeStats::new(MergeOperation::Removed)));
            }

            // Deleted in exactly one side.
            if !ours.present() || !theirs.present() {
                if self.opts.is_cherry_pick && ours.present() && !theirs.present() {
                    return Err(ForkError::cherry_pick(format!(
                        "'{name}' table was renamed or dropped in cherry-pick commit"
                    )));
                }
                let other_modified = (theirs.present() && theirs.hash != anc.hash)
                    || (ours.present() && ours.hash != anc.hash);
                if other_modified {
                    return Err(ForkError::TableDeletedAndModified {
                        table: name.to_owned(),
                    });
                }
                return Ok((None, MergeStats::new(MergeOperation::Removed)));
            }
        }

        // From here on both sides have the table and an ancestor exists
        // (possibly synthesized empty).
        let ours_tbl = ours.table.clone().expect("present");
        let theirs_tbl = theirs.table.clone().expect("present");
        let anc_tbl = anc_table.expect("present or synthesized");

        // Changes only in ours.
        if anc.present() && theirs.hash == anc.hash {
            debug!(table = name, "merge short-circuit: theirs unchanged");
            return Ok((Some(ours_tbl), MergeStats::unmodified()));
        }

        // Changes only in theirs: fast-forward.
        if anc.present() && ours.hash == anc.hash && !self.opts.is_cherry_pick {
            debug!(table = name, "merge short-circuit: fast-forward to theirs");
            let stats = diff_summary(
                theirs_tbl.schema(),
                ours_tbl.row_data(),
                theirs_tbl.row_data(),
            );
            return Ok((Some(theirs_tbl), stats));
        }

        self.merge_table_data(name, ours_tbl, theirs_tbl, anc_tbl).await
    }

    /// The full three-way merge of schema, rows, indexes and artifacts.
    async fn merge_table_data(
        &self,
        name: &str,
        ours: Table,
        theirs: Table,
        ancestor: Table,
    ) -> Result<(Option<Table>, MergeStats)> {
        if self.opts.is_cherry_pick && ours.schema() != theirs.schema() {
            return Err(ForkError::cherry_pick(format!(
                "'{name}' table schema does not match in current HEAD and cherry-pick commit"
            )));
        }

        let (post_schema, schema_conflicts) =
            merge_schemas(ours.schema(), theirs.schema(), ancestor.schema());
        if !schema_conflicts.is_empty() {
            let detail = schema_conflicts
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ForkError::SchemaConflict {
                table: name.to_owned(),
                detail,
            });
        }

        debug!(
            table = name,
            theirs_commit = %self.theirs_cm_hash,
            ancestor_commit = %self.ancestor_cm_hash,
            "three-way table data merge"
        );

        // Pre-merge the artifact maps; colliding artifact edits are corrupt
        // input and panic inside the merge.
        let merged_artifacts =
            ArtifactMap::merge(ours.artifacts(), theirs.artifacts(), ancestor.artifacts());

        let processor = processor_for_table(
            &ours,
            ancestor.schema(),
            ours.schema(),
            theirs.schema(),
            self.theirs_cm_hash,
            ancestor.hash_of(),
            theirs.hash_of(),
        );

        let (edit_tx, edit_rx) = mpsc::channel(INDEX_EDIT_CHANNEL_CAPACITY);
        let (conflict_tx, conflict_rx) = mpsc::channel(CONFLICT_CHANNEL_CAPACITY);

        let reconcile = reconcile_rows(
            &post_schema,
            ours.schema(),
            theirs.schema(),
            ancestor.schema(),
            ours.row_data(),
            theirs.row_data(),
            ancestor.row_data(),
            ours.index_set(),
            edit_tx,
            conflict_tx,
        );
        let update = update_secondary_indexes(
            &post_schema,
            ours.schema(),
            theirs.schema(),
            ancestor.schema(),
            ours.index_set(),
            theirs.index_set(),
            edit_rx,
        );
        let process = processor.process(conflict_rx, merged_artifacts.editor());

        let (outcome, (ours_set, theirs_set), (artifact_editor, conflicts, violations)) =
            tokio::try_join!(reconcile, update, process)?;

        let merged_index_set = merge_secondary_indexes(
            &post_schema,
            ours.schema(),
            &outcome.merged,
            &ours_set,
            &theirs_set,
            ancestor.index_set(),
        );

        let mut output = ours
            .with_schema(post_schema.clone())
            .with_row_data(outcome.merged)
            .with_index_set(merged_index_set)
            .with_artifacts(artifact_editor.flush());

        if let Some(ai) = merge_auto_increment(&post_schema, &ours, &theirs) {
            output = output.with_auto_increment(ai);
        }

        let stats = MergeStats {
            operation: MergeOperation::Modified,
            adds: outcome.adds,
            deletes: outcome.deletes,
            modifications: outcome.modifications,
            conflicts,
            constraint_violations: violations,
        };
        Ok((Some(output), stats))
    }
}

/// `max(ours, theirs)` when the merged schema has an auto-increment column.
///
/// A merged schema can only declare auto-increment if an input schema did;
/// anything else is corrupt state and panics.
fn merge_auto_increment(post_schema: &Schema, ours: &Table, theirs: &Table) -> Option<u64> {
    if !post_schema.has_auto_increment() {
        return None;
    }
    assert!(
        ours.schema().has_auto_increment() || theirs.schema().has_auto_increment(),
        "merged schema declares an auto-increment column but neither input schema does"
    );
    Some(
        ours.auto_increment()
            .unwrap_or(0)
            .max(theirs.auto_increment().unwrap_or(0)),
    )
}
