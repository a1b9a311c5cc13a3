//! The ForkDB three-way table-data merge engine.
//!
//! Tables evolve across branches and commits; [`merge_roots`] reconciles
//! two divergent roots against their common ancestor at both the schema
//! and row level. Rows merge cell-wise where possible; irreconcilable rows
//! become durable conflict artifacts the caller can enumerate and resolve.
//! Secondary indexes, auto-increment counters, foreign keys and constraint
//! violations are carried through the merge with at-most-once semantics.
//!
//! The engine is a library: it defines no wire protocol and no CLI, and it
//! consumes the store layer (`forkdb-store`) purely through immutable
//! values and editors.

mod conflicts;
mod fk_merge;
mod index_update;
mod reconciler;
mod root_merge;
mod schema_merge;
mod stats;
mod table_merge;
mod value_merger;

pub use root_merge::{
    may_have_constraint_violations, merge_roots, merge_would_stomp_changes, tables_in_conflict,
    tables_with_violations, ArtifactStorage, MergeOptions,
};
pub use schema_merge::{merge_schemas, SchemaConflict};
pub use stats::{diff_summary, MergeOperation, MergeStats};
pub use table_merge::{CONFLICT_CHANNEL_CAPACITY, INDEX_EDIT_CHANNEL_CAPACITY};
pub use value_merger::{RowMerge, ValueMerger};
