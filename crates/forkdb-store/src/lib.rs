//! The persistent store layer the ForkDB merge engine consumes: ordered
//! row indexes with streaming diffs, named secondary-index sets, artifact
//! maps, tables and roots.
//!
//! Everything here is an immutable value; mutation goes through editors
//! whose `flush` seals a new value. The merge engine relies on that: a
//! failed merge drops its editors and no side effect escapes.

pub mod artifact;
pub mod index;
pub mod index_set;
pub mod root;
pub mod table;

pub use artifact::{
    Artifact, ArtifactEditor, ArtifactMap, ArtifactType, ConflictMetadata, ConflictSchemas,
    ForeignKeyViolationMetadata, UniqueViolationMetadata,
};
pub use index::{Change, DiffIter, IndexEditor, OrderedIndex};
pub use index_set::IndexSet;
pub use root::{ForeignKey, ForeignKeyCollection, Root};
pub use table::Table;
