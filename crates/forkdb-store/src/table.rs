//! Tables: schema + primary index + secondary indexes + artifacts.

use forkdb_types::{Hash, Hasher, Schema};

use crate::artifact::ArtifactMap;
use crate::index::OrderedIndex;
use crate::index_set::IndexSet;

/// A table value. Immutable; setters return new tables.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    schema: Schema,
    primary: OrderedIndex,
    index_set: IndexSet,
    artifacts: ArtifactMap,
    auto_increment: Option<u64>,
}

impl Table {
    /// A new empty table with empty secondary indexes per the schema.
    pub fn new(schema: Schema) -> Self {
        let index_set = IndexSet::empty_for(&schema);
        Self {
            schema,
            primary: OrderedIndex::empty(),
            index_set,
            artifacts: ArtifactMap::empty(),
            auto_increment: None,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn row_data(&self) -> &OrderedIndex {
        &self.primary
    }

    pub fn index_set(&self) -> &IndexSet {
        &self.index_set
    }

    pub fn artifacts(&self) -> &ArtifactMap {
        &self.artifacts
    }

    pub fn auto_increment(&self) -> Option<u64> {
        self.auto_increment
    }

    #[must_use]
    pub fn with_schema(&self, schema: Schema) -> Self {
        Self {
            schema,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_row_data(&self, primary: OrderedIndex) -> Self {
        Self {
            primary,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_index_set(&self, index_set: IndexSet) -> Self {
        Self {
            index_set,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_artifacts(&self, artifacts: ArtifactMap) -> Self {
        Self {
            artifacts,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_auto_increment(&self, value: u64) -> Self {
        Self {
            auto_increment: Some(value),
            ..self.clone()
        }
    }

    /// Content address over schema, rows, indexes, artifacts and the
    /// auto-increment counter. Used for fast-path equality in the merge
    /// decision table.
    pub fn hash_of(&self) -> Hash {
        let mut hasher = Hasher::new();
        let schema_json =
            serde_json::to_vec(&self.schema).expect("schema serializes");
        hasher.update(&schema_json);
        hasher.update(self.primary.hash_of().as_bytes());
        hasher.update(self.index_set.hash_of().as_bytes());
        hasher.update(self.artifacts.hash_of().as_bytes());
        if let Some(ai) = self.auto_increment {
            hasher.update(&ai.to_be_bytes());
        }
        hasher.finish()
    }
}
