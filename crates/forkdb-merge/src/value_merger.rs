//! Cell-wise merging of row value tuples.
//!
//! Given the merged, ours, theirs and ancestor schemas, a [`ValueMerger`]
//! precomputes one ordinal mapping per side: for each non-PK column of the
//! merged schema, the column's index in that side's projection, or absent
//! when the side lacks the column (schema evolution). A missing column is
//! coerced to NULL, so rows written before a column was added merge
//! naturally against rows written after.

use forkdb_types::{RowTuple, Schema, Tuple, Value};

/// Outcome of a cell-wise merge attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RowMerge {
    /// The rows reconciled; `None` means both sides deleted the row.
    Merged(Option<RowTuple>),
    /// The rows conflict and must be surfaced to the user.
    Conflict,
}

/// Ordinal mapping from merged-schema columns into one side's projection.
type OrdinalMapping = Vec<Option<usize>>;

/// Reconciles two value tuples against a base tuple column-by-column.
#[derive(Debug)]
pub struct ValueMerger {
    num_cols: usize,
    merged_schema: Schema,
    left_mapping: OrdinalMapping,
    right_mapping: OrdinalMapping,
    base_mapping: OrdinalMapping,
}

impl ValueMerger {
    pub fn new(merged: &Schema, left: &Schema, right: &Schema, base: &Schema) -> Self {
        let map_into = |side: &Schema| -> OrdinalMapping {
            merged
                .non_pk_cols()
                .tags()
                .map(|tag| side.non_pk_cols().index_of(tag))
                .collect()
        };
        Self {
            num_cols: merged.non_pk_cols().len(),
            merged_schema: merged.clone(),
            left_mapping: map_into(left),
            right_mapping: map_into(right),
            base_mapping: map_into(base),
        }
    }

    /// Cell-wise merge of `left` and `right` against `base`.
    ///
    /// Callers must only invoke this when left and right produced
    /// non-identical diffs against base at the same key; in particular both
    /// sides absent with base absent never happens.
    pub fn try_merge(
        &self,
        left: Option<&RowTuple>,
        right: Option<&RowTuple>,
        base: Option<&RowTuple>,
    ) -> RowMerge {
        if base.is_some() && (left.is_none() != right.is_none()) {
            // One side deleted the row, the other modified it.
            return RowMerge::Conflict;
        }

        let (left, right) = match (left, right) {
            (None, None) => return RowMerge::Merged(None),
            (Some(l), Some(r)) => (l, r),
            _ => panic!("row merge received one absent side with no base row"),
        };

        let mut merged_values = Vec::with_capacity(self.num_cols);
        for i in 0..self.num_cols {
            match self.process_column(i, left, right, base) {
                Some(v) => merged_values.push(v),
                None => return RowMerge::Conflict,
            }
        }

        RowMerge::Merged(Some(Tuple::new(merged_values)))
    }

    /// Merged value of column `i`, or `None` on a conflict.
    fn process_column(
        &self,
        i: usize,
        left: &RowTuple,
        right: &RowTuple,
        base: Option<&RowTuple>,
    ) -> Option<Value> {
        let lv = field(left, self.left_mapping[i]);
        let rv = field(right, self.right_mapping[i]);

        if self.merged_schema.compare_at(i, lv, rv).is_eq() {
            return Some(lv.clone());
        }

        let Some(base) = base else {
            // Conflicting insert.
            return None;
        };

        let bv = field(base, self.base_mapping[i]);
        let left_modified = !self.merged_schema.compare_at(i, lv, bv).is_eq();
        let right_modified = !self.merged_schema.compare_at(i, rv, bv).is_eq();

        match (left_modified, right_modified) {
            (true, true) => None,
            (true, false) => Some(lv.clone()),
            (false, _) => Some(rv.clone()),
        }
    }
}

static NULL: Value = Value::Null;

/// A side's value for a mapped column; absent columns read as NULL.
fn field(row: &RowTuple, mapping: Option<usize>) -> &Value {
    mapping.and_then(|j| row.get(j)).unwrap_or(&NULL)
}
