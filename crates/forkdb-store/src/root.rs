//! Roots: the named-table namespace at a point in history, plus the
//! foreign-key collection.

use std::collections::BTreeMap;
use std::sync::Arc;

use forkdb_types::{Hash, Tag};

use crate::table::Table;

/// A named foreign-key declaration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub child_table: String,
    pub child_tags: Vec<Tag>,
    pub parent_table: String,
    pub parent_tags: Vec<Tag>,
}

/// The set of foreign keys declared in a root, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForeignKeyCollection {
    decls: Arc<BTreeMap<String, ForeignKey>>,
}

impl ForeignKeyCollection {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_decls(decls: impl IntoIterator<Item = ForeignKey>) -> Self {
        Self {
            decls: Arc::new(decls.into_iter().map(|d| (d.name.clone(), d)).collect()),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ForeignKey> {
        self.decls.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ForeignKey> {
        self.decls.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.decls.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    /// Table names referenced by any declaration, child or parent side.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.decls
            .values()
            .flat_map(|fk| [fk.child_table.as_str(), fk.parent_table.as_str()])
    }

    #[must_use]
    pub fn with_decl(&self, fk: ForeignKey) -> Self {
        let mut decls = (*self.decls).clone();
        decls.insert(fk.name.clone(), fk);
        Self {
            decls: Arc::new(decls),
        }
    }
}

/// A root value: the table namespace plus the foreign-key collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Root {
    tables: BTreeMap<String, Table>,
    foreign_keys: ForeignKeyCollection,
}

impl Root {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn put_table(&mut self, name: impl Into<String>, table: Table) {
        self.tables.insert(name.into(), table);
    }

    pub fn remove_tables<S: AsRef<str>>(&mut self, names: &[S]) {
        for name in names {
            self.tables.remove(name.as_ref());
        }
    }

    /// Table names in lexicographic order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &Table)> {
        self.tables.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn foreign_keys(&self) -> &ForeignKeyCollection {
        &self.foreign_keys
    }

    pub fn put_foreign_keys(&mut self, fks: ForeignKeyCollection) {
        self.foreign_keys = fks;
    }

    /// `name → table hash` for every table in the root.
    pub fn table_hashes(&self) -> BTreeMap<String, Hash> {
        self.tables
            .iter()
            .map(|(n, t)| (n.clone(), t.hash_of()))
            .collect()
    }
}
