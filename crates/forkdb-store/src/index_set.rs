//! Named sets of secondary indexes.

use std::collections::BTreeMap;
use std::sync::Arc;

use forkdb_types::{Hash, Hasher, Schema};

use crate::index::OrderedIndex;

/// A mapping from secondary-index name to the ordered index holding its
/// entries. Cheap to clone; mutation builds a new set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSet {
    indexes: Arc<BTreeMap<String, OrderedIndex>>,
}

impl IndexSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// An index set with an empty ordered index per definition in `schema`.
    pub fn empty_for(schema: &Schema) -> Self {
        Self {
            indexes: Arc::new(
                schema
                    .indexes()
                    .iter()
                    .map(|d| (d.name.clone(), OrderedIndex::empty()))
                    .collect(),
            ),
        }
    }

    pub fn get(&self, name: &str) -> Option<&OrderedIndex> {
        self.indexes.get(name)
    }

    #[must_use]
    pub fn with_index(&self, name: impl Into<String>, index: OrderedIndex) -> Self {
        let mut indexes = (*self.indexes).clone();
        indexes.insert(name.into(), index);
        Self {
            indexes: Arc::new(indexes),
        }
    }

    #[must_use]
    pub fn without_index(&self, name: &str) -> Self {
        let mut indexes = (*self.indexes).clone();
        indexes.remove(name);
        Self {
            indexes: Arc::new(indexes),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.indexes.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OrderedIndex)> {
        self.indexes.iter().map(|(n, i)| (n.as_str(), i))
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    pub fn hash_of(&self) -> Hash {
        let mut hasher = Hasher::new();
        for (name, idx) in self.indexes.iter() {
            hasher.update(name.as_bytes());
            hasher.update(idx.hash_of().as_bytes());
        }
        hasher.finish()
    }
}
