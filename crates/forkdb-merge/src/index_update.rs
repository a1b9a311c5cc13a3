//! Secondary-index maintenance during and after the primary merge.
//!
//! A cell-wise merge result contains values from neither branch, so both
//! branches' secondary indexes must be rewritten before they can be merged:
//! the updater rewinds each side's entries at the merged key and re-emits
//! entries consistent with the merged row. A conflicted key instead has
//! theirs' entries reverted, so the later index three-way merge sees no
//! change from theirs and unresolved rows stay out of the merged indexes.
//!
//! The index three-way merge itself runs after the reconciler finishes.
//! Its value merging is trivial: the merged entry at a key is uniquely
//! determined by the primary merged row, so a colliding unequal entry is a
//! logical bug and panics.

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use forkdb_error::Result;
use forkdb_store::{Change, IndexEditor, IndexSet, OrderedIndex};
use forkdb_types::{IndexDef, KeyTuple, RowTuple, Schema, Tuple};

use crate::reconciler::IndexEdit;

/// Compute the entry an index stores for a row: the projected column
/// values followed by the primary key. `None` when the schema cannot
/// supply every projected column.
fn index_entry(
    schema: &Schema,
    def: &IndexDef,
    key: &KeyTuple,
    row: &RowTuple,
) -> Option<KeyTuple> {
    let mut vals = Vec::with_capacity(def.tags.len() + key.len());
    for &tag in &def.tags {
        vals.push(schema.value_by_tag(key, row, tag)?.clone());
    }
    vals.extend(key.values().iter().cloned());
    Some(Tuple::new(vals))
}

/// Per-side editors over every secondary index the side carries.
struct SideEditors<'a> {
    schema: &'a Schema,
    editors: BTreeMap<String, IndexEditor>,
}

impl<'a> SideEditors<'a> {
    fn new(schema: &'a Schema, set: &IndexSet) -> Self {
        let editors = schema
            .indexes()
            .iter()
            .filter_map(|def| {
                set.get(&def.name)
                    .map(|idx| (def.name.clone(), idx.editor()))
            })
            .collect();
        Self { schema, editors }
    }

    /// Remove the entries a row contributed to every index on this side.
    fn remove_row(&mut self, key: &KeyTuple, row: &RowTuple) {
        for def in self.schema.indexes() {
            if let Some(entry) = index_entry(self.schema, def, key, row) {
                if let Some(ed) = self.editors.get_mut(&def.name) {
                    ed.delete(&entry);
                }
            }
        }
    }

    /// Add the entries a row contributes, computing them with `row_schema`
    /// (the row may be laid out by a different schema than this side's).
    fn add_row(&mut self, row_schema: &Schema, key: &KeyTuple, row: &RowTuple) {
        for def in self.schema.indexes() {
            if let Some(entry) = index_entry(row_schema, def, key, row) {
                if let Some(ed) = self.editors.get_mut(&def.name) {
                    ed.put(entry, Tuple::empty());
                }
            }
        }
    }

    fn flush(self, base: &IndexSet) -> IndexSet {
        let mut out = base.clone();
        for (name, ed) in self.editors {
            out = out.with_index(name, ed.flush());
        }
        out
    }
}

/// Drain the index-edit channel, rewriting both sides' secondary indexes
/// so they stay consistent with the primary merge outcome. Returns the two
/// updated index sets.
pub(crate) async fn update_secondary_indexes(
    post_schema: &Schema,
    ours_schema: &Schema,
    theirs_schema: &Schema,
    base_schema: &Schema,
    ours_set: &IndexSet,
    theirs_set: &IndexSet,
    mut edits: mpsc::Receiver<IndexEdit>,
) -> Result<(IndexSet, IndexSet)> {
    let mut ours = SideEditors::new(ours_schema, ours_set);
    let mut theirs = SideEditors::new(theirs_schema, theirs_set);

    while let Some(edit) = edits.recv().await {
        match edit {
            IndexEdit::CellWiseMerge {
                left,
                right,
                merged_row,
            } => {
                let key = left.key();
                if let Some(to) = left.to() {
                    ours.remove_row(key, to);
                }
                if let Some(to) = right.to() {
                    theirs.remove_row(key, to);
                }
                ours.add_row(post_schema, key, &merged_row);
                theirs.add_row(post_schema, key, &merged_row);
            }
            IndexEdit::ConflictRevert { right } => {
                let key = right.key();
                if let Some(to) = right.to() {
                    theirs.remove_row(key, to);
                }
                if let Some(from) = right.from() {
                    // The From row is laid out by the ancestor's schema.
                    theirs.add_row(base_schema, key, from);
                }
            }
        }
    }

    Ok((ours.flush(ours_set), theirs.flush(theirs_set)))
}

/// Three-way merge of the secondary index sets, run after the primary
/// reconciler completes. Indexes added during the schema merge are rebuilt
/// from the merged primary rows.
pub(crate) fn merge_secondary_indexes(
    post_schema: &Schema,
    ours_schema: &Schema,
    merged_primary: &OrderedIndex,
    ours_set: &IndexSet,
    theirs_set: &IndexSet,
    ancestor_set: &IndexSet,
) -> IndexSet {
    let mut out = IndexSet::empty();
    for def in post_schema.indexes() {
        let merged = if ours_schema.index(&def.name).is_none() {
            rebuild_index(post_schema, def, merged_primary)
        } else {
            let empty = OrderedIndex::empty();
            let ours = ours_set.get(&def.name).unwrap_or(&empty);
            let theirs = theirs_set.get(&def.name).unwrap_or(&empty);
            let anc = ancestor_set.get(&def.name).unwrap_or(&empty);
            merge_one_index(&def.name, ours, theirs, anc)
        };
        out = out.with_index(def.name.clone(), merged);
    }
    out
}

fn rebuild_index(schema: &Schema, def: &IndexDef, primary: &OrderedIndex) -> OrderedIndex {
    tracing::debug!(index = %def.name, "rebuilding index added by schema merge");
    let mut ed = OrderedIndex::empty().editor();
    for (key, row) in primary.iter() {
        if let Some(entry) = index_entry(schema, def, key, row) {
            ed.put(entry, Tuple::empty());
        }
    }
    ed.flush()
}

/// Diff-of-diffs over one named index. The primary merge already rewrote
/// both sides, so co-changes must agree; disagreement is corrupt state.
fn merge_one_index(
    name: &str,
    ours: &OrderedIndex,
    theirs: &OrderedIndex,
    ancestor: &OrderedIndex,
) -> OrderedIndex {
    let mut out = ours.editor();
    let mut d1 = ours.diff(ancestor).peekable();
    let mut d2 = theirs.diff(ancestor).peekable();

    loop {
        let ordering = match (d1.peek(), d2.peek()) {
            (None, None) => break,
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (Some(l), Some(r)) => l.key().cmp(r.key()),
        };
        match ordering {
            std::cmp::Ordering::Less => {
                d1.next();
            }
            std::cmp::Ordering::Greater => {
                match d2.next().expect("peeked") {
                    Change::Added { key, new } | Change::Modified { key, new, .. } => {
                        out.put(key, new);
                    }
                    Change::Removed { key, .. } => out.delete(&key),
                }
            }
            std::cmp::Ordering::Equal => {
                let left = d1.next().expect("peeked");
                let right = d2.next().expect("peeked");
                assert!(
                    left.to() == right.to(),
                    "index '{name}' diverged at {:?} after primary merge",
                    left.key()
                );
            }
        }
    }
    out.flush()
}
