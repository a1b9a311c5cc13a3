use thiserror::Error;

/// Primary error type for ForkDB merge operations.
///
/// Structured variants for the named merge outcomes, plus operational
/// variants for I/O and internal-consistency failures. Logical bugs
/// (corrupt input state that cannot be safely continued) panic instead of
/// returning a variant; see the merge crate's invariant assertions.
#[derive(Error, Debug)]
pub enum ForkError {
    // === Structural merge errors ===
    /// The merge is a fast-forward; no three-way merge is required.
    #[error("fast forward")]
    FastForward,

    /// A table with the same name was added in both commits with
    /// incompatible schemas.
    #[error("table '{table}' with same name added in 2 commits can't be merged")]
    SameTableAddedTwice { table: String },

    /// A table was deleted on one side of the merge and modified on the other.
    #[error("conflict: table '{table}' deleted and modified")]
    TableDeletedAndModified { table: String },

    /// The schema merge produced conflicts; row merging is not attempted.
    #[error("schema conflict in table '{table}': {detail}")]
    SchemaConflict { table: String, detail: String },

    /// Two foreign keys with the same name resolved to different definitions.
    #[error("foreign key conflict: {name}")]
    ForeignKeyConflict { name: String },

    /// Schema changes across a cherry-pick are not supported.
    #[error("schema changes not supported: {detail}")]
    CherryPickSchemaChange { detail: String },

    // === Policy errors ===
    /// Unresolved conflicts exist and the merge produced new conflicts.
    /// There is no model for merging two sets of conflicts together.
    #[error(
        "existing unresolved conflicts would be overridden by new conflicts \
         produced by this merge; resolve them and try again"
    )]
    CannotOverwriteConflicts,

    /// Pre-existing conflicts have a different schema than the conflicts
    /// this merge would generate.
    #[error(
        "the existing conflicts are of a different schema than the conflicts \
         generated by this merge; resolve them and try again"
    )]
    ConflictsIncompatible,

    // === Operational errors ===
    /// A row insert collided with an existing primary key.
    #[error("duplicate key '{key}'")]
    DuplicateKey { key: String },

    /// Store I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal consistency error (merge state that should be impossible).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ForkError {
    /// Create an internal-consistency error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a cherry-pick schema-change error.
    pub fn cherry_pick(detail: impl Into<String>) -> Self {
        Self::CherryPickSchemaChange {
            detail: detail.into(),
        }
    }

    /// Whether this error is fatal to the merge (no output is produced).
    ///
    /// Every variant is fatal today; the distinction exists so callers can
    /// branch on policy errors that preserve pre-existing state.
    pub const fn preserves_existing_state(&self) -> bool {
        matches!(
            self,
            Self::CannotOverwriteConflicts | Self::ConflictsIncompatible
        )
    }

    /// Whether the user can resolve this without touching the data
    /// (e.g. by resolving conflicts first and retrying).
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CannotOverwriteConflicts
                | Self::ConflictsIncompatible
                | Self::FastForward
                | Self::CherryPickSchemaChange { .. }
        )
    }
}

/// Result type alias using `ForkError`.
pub type Result<T> = std::result::Result<T, ForkError>;
