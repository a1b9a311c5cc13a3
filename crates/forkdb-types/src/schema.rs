//! Table schemas.
//!
//! A schema is an ordered primary-key column list plus an ordered non-PK
//! column list. Every column carries a stable [`Tag`], a unique identity
//! independent of position and name, which is what the merge engine keys
//! its ordinal mappings on. Secondary index definitions live on the schema.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::tuple::{KeyTuple, RowTuple, KEYLESS_CARDINALITY_IDX};
use crate::value::{Value, ValueType};

/// Stable column identity, independent of position and name.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct Tag(pub u64);

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Column {
    pub tag: Tag,
    pub name: String,
    pub ty: ValueType,
    pub nullable: bool,
    pub auto_increment: bool,
}

impl Column {
    pub fn new(tag: u64, name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            tag: Tag(tag),
            name: name.into(),
            ty,
            nullable: true,
            auto_increment: false,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// An ordered collection of columns with a tag → index lookup.
///
/// Serializes as the plain column list; the lookup map is rebuilt on
/// deserialization.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(from = "Vec<Column>", into = "Vec<Column>")]
pub struct ColumnCollection {
    cols: Vec<Column>,
    tag_to_idx: BTreeMap<Tag, usize>,
}

impl From<Vec<Column>> for ColumnCollection {
    fn from(cols: Vec<Column>) -> Self {
        Self::new(cols)
    }
}

impl From<ColumnCollection> for Vec<Column> {
    fn from(coll: ColumnCollection) -> Self {
        coll.cols
    }
}

impl ColumnCollection {
    pub fn new(cols: Vec<Column>) -> Self {
        let tag_to_idx = cols.iter().enumerate().map(|(i, c)| (c.tag, i)).collect();
        Self { cols, tag_to_idx }
    }

    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.cols.iter()
    }

    /// Column tags in projection order.
    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.cols.iter().map(|c| c.tag)
    }

    pub fn get(&self, idx: usize) -> Option<&Column> {
        self.cols.get(idx)
    }

    pub fn by_tag(&self, tag: Tag) -> Option<&Column> {
        self.index_of(tag).map(|i| &self.cols[i])
    }

    pub fn index_of(&self, tag: Tag) -> Option<usize> {
        self.tag_to_idx.get(&tag).copied()
    }

    /// Order-insensitive equality on column definitions.
    ///
    /// Two collections are equal when they define the same columns (by tag,
    /// name, type, nullability and auto-increment flag), regardless of
    /// projection order. This is the equality conflict-compatibility checks
    /// use.
    pub fn equal_ignoring_order(&self, other: &Self) -> bool {
        if self.cols.len() != other.cols.len() {
            return false;
        }
        self.cols
            .iter()
            .all(|c| other.by_tag(c.tag).is_some_and(|o| o == c))
    }
}

/// A secondary index definition: a named projection of column tags.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub tags: Vec<Tag>,
    pub unique: bool,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, tags: Vec<u64>) -> Self {
        Self {
            name: name.into(),
            tags: tags.into_iter().map(Tag).collect(),
            unique: false,
        }
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A table schema: ordered PK columns, ordered non-PK columns, and
/// secondary index definitions.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Schema {
    pk_cols: ColumnCollection,
    non_pk_cols: ColumnCollection,
    indexes: Vec<IndexDef>,
}

impl Schema {
    pub fn new(pk_cols: Vec<Column>, non_pk_cols: Vec<Column>) -> Self {
        Self {
            pk_cols: ColumnCollection::new(pk_cols),
            non_pk_cols: ColumnCollection::new(non_pk_cols),
            indexes: Vec::new(),
        }
    }

    /// A schema without a primary key. Rows are identified by surrogate
    /// keys and carry a cardinality.
    pub fn keyless(cols: Vec<Column>) -> Self {
        Self::new(Vec::new(), cols)
    }

    #[must_use]
    pub fn with_index(mut self, def: IndexDef) -> Self {
        self.indexes.push(def);
        self
    }

    pub fn pk_cols(&self) -> &ColumnCollection {
        &self.pk_cols
    }

    pub fn non_pk_cols(&self) -> &ColumnCollection {
        &self.non_pk_cols
    }

    pub fn all_cols(&self) -> impl Iterator<Item = &Column> {
        self.pk_cols.iter().chain(self.non_pk_cols.iter())
    }

    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|d| d.name == name)
    }

    pub fn set_indexes(&mut self, indexes: Vec<IndexDef>) {
        self.indexes = indexes;
    }

    pub fn is_keyless(&self) -> bool {
        self.pk_cols.is_empty()
    }

    pub fn has_auto_increment(&self) -> bool {
        self.all_cols().any(|c| c.auto_increment)
    }

    /// Typed comparison of two values in the given non-PK column.
    ///
    /// All value classes are totally ordered; the schema hook exists so a
    /// column type can refine the comparison (numeric columns cross-compare
    /// integers and floats numerically).
    pub fn compare_at(&self, col_idx: usize, a: &Value, b: &Value) -> Ordering {
        debug_assert!(col_idx < self.non_pk_cols.len());
        a.total_cmp(b)
    }

    /// Position of a non-PK column's value within a row tuple.
    ///
    /// Keyless row tuples carry their cardinality first, so field values
    /// are shifted by one.
    pub fn row_value_idx(&self, non_pk_idx: usize) -> usize {
        if self.is_keyless() {
            KEYLESS_CARDINALITY_IDX + 1 + non_pk_idx
        } else {
            non_pk_idx
        }
    }

    /// Look up the value a row holds for `tag`, whichever side of the
    /// key/row split the column lives on.
    pub fn value_by_tag<'a>(
        &self,
        key: &'a KeyTuple,
        row: &'a RowTuple,
        tag: Tag,
    ) -> Option<&'a Value> {
        if let Some(i) = self.pk_cols.index_of(tag) {
            return key.get(i);
        }
        self.non_pk_cols
            .index_of(tag)
            .and_then(|i| row.get(self.row_value_idx(i)))
    }
}
