//! The row-level three-way reconciler.
//!
//! Walks `diff(ancestor → ours)` and `diff(ancestor → theirs)` in lock-step
//! by key. Ours-only changes are already reflected in the output (the
//! output starts from ours' rows); theirs-only changes are applied to the
//! output editor; co-changes at the same key go to the [`ValueMerger`].
//! Conflicts are not errors; they are records emitted on the conflict
//! channel, paired with a revert-theirs index edit so unresolved rows stay
//! out of the merged secondary indexes.
//!
//! Emits at most one index edit per key: a key either cell-merges or
//! conflicts, never both.

use tokio::sync::mpsc;

use forkdb_error::{ForkError, Result};
use forkdb_store::{Change, IndexEditor, IndexSet, OrderedIndex};
use forkdb_types::{KeyTuple, RowTuple, Schema, Tuple};

use crate::value_merger::{RowMerge, ValueMerger};

/// An edit the secondary-index updater must apply to keep both sides'
/// indexes consistent with the primary merge outcome.
#[derive(Debug, Clone)]
pub(crate) enum IndexEdit {
    /// A cell-wise merge succeeded; both sides' index entries at this key
    /// must transition to entries consistent with `merged_row`.
    CellWiseMerge {
        left: Change,
        right: Change,
        merged_row: RowTuple,
    },
    /// The key conflicted; theirs' index entries must be reverted so the
    /// later secondary-index three-way merge sees no change from theirs.
    ConflictRevert { right: Change },
}

/// A record emitted on the conflict channel.
#[derive(Debug, Clone)]
pub(crate) enum ConflictRecord {
    /// An irreconcilable row: ours stays in the output, the artifact
    /// records all three versions' provenance.
    Conflict {
        key: KeyTuple,
        ours: Option<RowTuple>,
        theirs: Option<RowTuple>,
        base: Option<RowTuple>,
    },
    /// Applying theirs' insert collided with an existing row on a unique
    /// secondary index; both rows are implicated.
    UniqueViolation {
        index_name: String,
        columns: Vec<String>,
        existing_key: KeyTuple,
        existing_row: RowTuple,
        offending_key: KeyTuple,
        offending_row: RowTuple,
    },
}

/// What the reconciler produced.
#[derive(Debug)]
pub(crate) struct ReconcileOutcome {
    pub merged: OrderedIndex,
    pub adds: usize,
    pub deletes: usize,
    pub modifications: usize,
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn reconcile_rows(
    post_schema: &Schema,
    ours_schema: &Schema,
    theirs_schema: &Schema,
    base_schema: &Schema,
    ours: &OrderedIndex,
    theirs: &OrderedIndex,
    ancestor: &OrderedIndex,
    ours_index_set: &IndexSet,
    edits: mpsc::Sender<IndexEdit>,
    conflicts: mpsc::Sender<ConflictRecord>,
) -> Result<ReconcileOutcome> {
    let merger = ValueMerger::new(post_schema, ours_schema, theirs_schema, base_schema);
    let keyless = post_schema.is_keyless();

    let mut editor = ours.editor();
    let mut ours_diff = ours.diff(ancestor).peekable();
    let mut theirs_diff = theirs.diff(ancestor).peekable();
    let mut outcome = Counters::default();

    loop {
        let ordering = match (ours_diff.peek(), theirs_diff.peek()) {
            (None, None) => break,
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (Some(l), Some(r)) => l.key().cmp(r.key()),
        };

        match ordering {
            std::cmp::Ordering::Less => {
                // Ours-only change: the output was initialized from ours'
                // rows, so it is already reflected. Stats are relative to
                // the ancestor, so it still counts.
                let change = ours_diff.next().expect("peeked");
                outcome.count(keyless, &change);
            }
            std::cmp::Ordering::Greater => {
                let change = theirs_diff.next().expect("peeked");
                apply_theirs_change(
                    post_schema,
                    theirs_schema,
                    ours_index_set,
                    &mut editor,
                    &mut outcome,
                    &conflicts,
                    keyless,
                    change,
                )
                .await?;
            }
            std::cmp::Ordering::Equal => {
                let left = ours_diff.next().expect("peeked");
                let right = theirs_diff.next().expect("peeked");
                reconcile_co_change(
                    &merger,
                    &mut editor,
                    &mut outcome,
                    &edits,
                    &conflicts,
                    keyless,
                    left,
                    right,
                )
                .await?;
            }
        }
    }

    // Dropping the senders closes both channels; the index updater and
    // conflict processor drain to completion.
    drop(edits);
    drop(conflicts);

    Ok(ReconcileOutcome {
        merged: editor.flush(),
        adds: outcome.adds,
        deletes: outcome.deletes,
        modifications: outcome.modifications,
    })
}

#[derive(Debug, Default)]
struct Counters {
    adds: usize,
    deletes: usize,
    modifications: usize,
}

impl Counters {
    /// Count one change relative to the ancestor. Keyless changes count by
    /// cardinality delta.
    fn count(&mut self, keyless: bool, change: &Change) {
        if keyless {
            match change {
                Change::Added { new, .. } => self.adds += new.cardinality() as usize,
                Change::Removed { old, .. } => self.deletes += old.cardinality() as usize,
                Change::Modified { key, old, new } => {
                    let delta = new.cardinality() as i64 - old.cardinality() as i64;
                    assert!(
                        delta != 0,
                        "keyless diff produced a modification with zero cardinality delta at {key:?}"
                    );
                    if delta > 0 {
                        self.adds += delta as usize;
                    } else {
                        self.deletes += delta.unsigned_abs() as usize;
                    }
                }
            }
        } else {
            match change {
                Change::Added { .. } => self.adds += 1,
                Change::Removed { .. } => self.deletes += 1,
                Change::Modified { .. } => self.modifications += 1,
            }
        }
    }
}

/// Both streams changed the same key.
#[allow(clippy::too_many_arguments)]
async fn reconcile_co_change(
    merger: &ValueMerger,
    editor: &mut IndexEditor,
    outcome: &mut Counters,
    edits: &mpsc::Sender<IndexEdit>,
    conflicts: &mpsc::Sender<ConflictRecord>,
    keyless: bool,
    left: Change,
    right: Change,
) -> Result<()> {
    if keyless {
        // Keyless rows carry no identity to cell-merge on; any co-change
        // at the same surrogate key is a conflict.
        emit_conflict(edits, conflicts, &left, right).await?;
        return Ok(());
    }

    if left.to() == right.to() {
        // Identical changes on both sides: nothing to reconcile, but the
        // change relative to the ancestor still happened.
        outcome.count(false, &left);
        return Ok(());
    }

    match merger.try_merge(left.to(), right.to(), left.from()) {
        RowMerge::Conflict => emit_conflict(edits, conflicts, &left, right).await?,
        RowMerge::Merged(None) => {
            // Both sides deleted; the output (seeded from ours) already
            // lacks the key.
        }
        RowMerge::Merged(Some(merged_row)) => {
            editor.put(left.key().clone(), merged_row.clone());
            outcome.modifications += 1;
            send_edit(
                edits,
                IndexEdit::CellWiseMerge {
                    left,
                    right,
                    merged_row,
                },
            )
            .await?;
        }
    }
    Ok(())
}

async fn emit_conflict(
    edits: &mpsc::Sender<IndexEdit>,
    conflicts: &mpsc::Sender<ConflictRecord>,
    left: &Change,
    right: Change,
) -> Result<()> {
    send_conflict(
        conflicts,
        ConflictRecord::Conflict {
            key: left.key().clone(),
            ours: left.to().cloned(),
            theirs: right.to().cloned(),
            base: left.from().cloned(),
        },
    )
    .await?;
    send_edit(edits, IndexEdit::ConflictRevert { right }).await
}

/// Apply a theirs-only change to the output editor.
#[allow(clippy::too_many_arguments)]
async fn apply_theirs_change(
    post_schema: &Schema,
    theirs_schema: &Schema,
    ours_index_set: &IndexSet,
    editor: &mut IndexEditor,
    outcome: &mut Counters,
    conflicts: &mpsc::Sender<ConflictRecord>,
    keyless: bool,
    change: Change,
) -> Result<()> {
    if keyless {
        return apply_keyless_change(editor, outcome, change);
    }

    match change {
        Change::Added { key, new } => {
            check_unique_indexes(
                post_schema,
                theirs_schema,
                ours_index_set,
                editor,
                conflicts,
                &key,
                &new,
            )
            .await?;
            if editor.contains_key(&key) {
                // The key landed in ours through a path the diff didn't
                // cover; demote the insert to an update.
                editor.update(key, new)?;
            } else {
                editor.insert(key, new)?;
            }
            outcome.adds += 1;
        }
        Change::Removed { key, .. } => {
            editor.delete(&key);
            outcome.deletes += 1;
        }
        Change::Modified { key, new, .. } => {
            editor.update(key, new)?;
            outcome.modifications += 1;
        }
    }
    Ok(())
}

/// Keyless cardinality accounting: a modification becomes an equivalent
/// add or remove applied `|delta|` times.
fn apply_keyless_change(
    editor: &mut IndexEditor,
    outcome: &mut Counters,
    change: Change,
) -> Result<()> {
    let (key, row, delta) = match change {
        Change::Added { key, new } => {
            let n = new.cardinality();
            (key, new, n as i64)
        }
        Change::Removed { key, old } => {
            let n = old.cardinality();
            (key, old, -(n as i64))
        }
        Change::Modified { key, old, new } => {
            let delta = new.cardinality() as i64 - old.cardinality() as i64;
            assert!(
                delta != 0,
                "keyless diff produced a modification with zero cardinality delta at {key:?}"
            );
            (key, new, delta)
        }
    };

    if delta > 0 {
        for _ in 0..delta {
            match editor.get(&key) {
                Some(existing) => {
                    let card = existing.cardinality() + 1;
                    editor.put(key.clone(), existing.with_cardinality(card));
                }
                None => {
                    editor.insert(key.clone(), row.with_cardinality(1))?;
                }
            }
            outcome.adds += 1;
        }
    } else {
        for _ in 0..delta.unsigned_abs() {
            match editor.get(&key) {
                Some(existing) if existing.cardinality() > 1 => {
                    let card = existing.cardinality() - 1;
                    editor.put(key.clone(), existing.with_cardinality(card));
                    outcome.deletes += 1;
                }
                Some(_) => {
                    editor.delete(&key);
                    outcome.deletes += 1;
                }
                None => {
                    return Err(ForkError::internal(format!(
                        "keyless delete of missing row {key:?}"
                    )))
                }
            }
        }
    }
    Ok(())
}

/// Probe ours' unique secondary indexes for rows that would collide with a
/// row theirs is inserting. The inserted row is laid out by theirs'
/// schema; the index definitions come from the post-merge schema. The
/// holder must still exist in the output for the collision to count.
#[allow(clippy::too_many_arguments)]
async fn check_unique_indexes(
    post_schema: &Schema,
    theirs_schema: &Schema,
    ours_index_set: &IndexSet,
    editor: &IndexEditor,
    conflicts: &mpsc::Sender<ConflictRecord>,
    key: &KeyTuple,
    new_row: &RowTuple,
) -> Result<()> {
    for def in post_schema.indexes().iter().filter(|d| d.unique) {
        let Some(ours_index) = ours_index_set.get(&def.name) else {
            continue;
        };

        let mut unique_vals = Vec::with_capacity(def.tags.len());
        for &tag in &def.tags {
            match theirs_schema.value_by_tag(key, new_row, tag) {
                Some(v) if !v.is_null() => unique_vals.push(v.clone()),
                // NULLs never collide; missing columns read as NULL.
                _ => {
                    unique_vals.clear();
                    break;
                }
            }
        }
        if unique_vals.is_empty() {
            continue;
        }

        let prefix = Tuple::new(unique_vals);
        for (entry_key, _) in ours_index.prefix_scan(&prefix) {
            let holder_key: KeyTuple =
                Tuple::new(entry_key.values()[prefix.len()..].to_vec());
            if holder_key == *key {
                continue;
            }
            let Some(holder_row) = editor.get(&holder_key) else {
                // The holder was deleted during this merge; no collision.
                continue;
            };
            let columns = def
                .tags
                .iter()
                .filter_map(|&t| {
                    post_schema
                        .all_cols()
                        .find(|c| c.tag == t)
                        .map(|c| c.name.clone())
                })
                .collect();
            send_conflict(
                conflicts,
                ConflictRecord::UniqueViolation {
                    index_name: def.name.clone(),
                    columns,
                    existing_key: holder_key.clone(),
                    existing_row: holder_row.clone(),
                    offending_key: key.clone(),
                    offending_row: new_row.clone(),
                },
            )
            .await?;
        }
    }
    Ok(())
}

async fn send_edit(tx: &mpsc::Sender<IndexEdit>, edit: IndexEdit) -> Result<()> {
    tx.send(edit)
        .await
        .map_err(|_| ForkError::internal("index-edit channel closed mid-merge"))
}

async fn send_conflict(tx: &mpsc::Sender<ConflictRecord>, rec: ConflictRecord) -> Result<()> {
    tx.send(rec)
        .await
        .map_err(|_| ForkError::internal("conflict channel closed mid-merge"))
}
