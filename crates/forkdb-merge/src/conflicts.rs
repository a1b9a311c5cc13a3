//! The conflict processor: turns conflict records into durable artifacts,
//! or aborts the merge when pre-existing conflicts are incompatible.
//!
//! Conflicts are data, not errors, with one exception. Two non-empty sets
//! of conflicts with differing structural schemas cannot be merged, so if
//! the table already holds conflicts whose recorded schema triple does not
//! match the current merge, the aborting variant fails the merge on the
//! first conflict record that arrives.

use tokio::sync::mpsc;

use forkdb_error::{ForkError, Result};
use forkdb_store::{
    Artifact, ArtifactEditor, ArtifactType, ConflictMetadata, ConflictSchemas, Table,
    UniqueViolationMetadata,
};
use forkdb_types::{Hash, Schema};

use crate::reconciler::ConflictRecord;

/// How a table merge handles conflict records.
#[derive(Debug)]
pub(crate) enum ConflictProcessor {
    /// Insert conflict artifacts with provenance metadata.
    Inserting {
        provenance: Hash,
        metadata: ConflictMetadata,
        schemas: ConflictSchemas,
    },
    /// Pre-existing conflicts are incompatible: fail on the first conflict.
    Aborting { provenance: Hash },
}

/// Pick the processor for a table: inserting when the table holds no
/// conflicts or its recorded schema triple matches the current merge,
/// aborting otherwise. Compatibility is column-collection equality on all
/// three schemas.
pub(crate) fn processor_for_table(
    table: &Table,
    base_schema: &Schema,
    ours_schema: &Schema,
    theirs_schema: &Schema,
    theirs_cm_hash: Hash,
    base_tbl_hash: Hash,
    theirs_tbl_hash: Hash,
) -> ConflictProcessor {
    let metadata = ConflictMetadata {
        base_tbl_hash,
        their_tbl_hash: theirs_tbl_hash,
    };

    let compatible = match table.artifacts().conflict_schemas() {
        None => true,
        Some((b, o, t)) => {
            collections_equal(b, base_schema)
                && collections_equal(o, ours_schema)
                && collections_equal(t, theirs_schema)
        }
    };

    if compatible {
        ConflictProcessor::Inserting {
            provenance: theirs_cm_hash,
            metadata,
            schemas: (
                base_schema.clone(),
                ours_schema.clone(),
                theirs_schema.clone(),
            ),
        }
    } else {
        ConflictProcessor::Aborting {
            provenance: theirs_cm_hash,
        }
    }
}

fn collections_equal(a: &Schema, b: &Schema) -> bool {
    a.pk_cols().equal_ignoring_order(b.pk_cols())
        && a.non_pk_cols().equal_ignoring_order(b.non_pk_cols())
}

impl ConflictProcessor {
    /// Drain the conflict channel into the artifact editor.
    ///
    /// Returns the editor (its ownership is exclusive to this task while
    /// the pipeline runs) plus the number of conflicts and violations
    /// recorded.
    pub(crate) async fn process(
        self,
        mut records: mpsc::Receiver<ConflictRecord>,
        mut editor: ArtifactEditor,
    ) -> Result<(ArtifactEditor, usize, usize)> {
        let mut conflicts = 0usize;
        let mut violations = 0usize;

        while let Some(record) = records.recv().await {
            match (&self, record) {
                (
                    Self::Inserting {
                        provenance,
                        metadata,
                        schemas,
                    },
                    ConflictRecord::Conflict { key, .. },
                ) => {
                    if conflicts == 0 {
                        editor.set_conflict_schemas(schemas.clone());
                    }
                    editor.add(
                        key,
                        ArtifactType::Conflict,
                        Artifact::conflict(*provenance, metadata),
                    );
                    conflicts += 1;
                }
                (Self::Aborting { .. }, ConflictRecord::Conflict { .. }) => {
                    return Err(ForkError::ConflictsIncompatible);
                }
                (
                    Self::Inserting { provenance, .. } | Self::Aborting { provenance },
                    ConflictRecord::UniqueViolation {
                        index_name,
                        columns,
                        existing_key,
                        existing_row,
                        offending_key,
                        offending_row,
                    },
                ) => {
                    let meta = UniqueViolationMetadata {
                        index_name,
                        columns,
                    };
                    editor.add(
                        existing_key,
                        ArtifactType::ConstraintViolation,
                        Artifact::unique_violation(*provenance, &meta, existing_row),
                    );
                    editor.add(
                        offending_key,
                        ArtifactType::ConstraintViolation,
                        Artifact::unique_violation(*provenance, &meta, offending_row),
                    );
                    violations += 2;
                }
            }
        }

        Ok((editor, conflicts, violations))
    }
}
