//! Three-way schema merging.
//!
//! Columns are matched across the three schemas by tag, never by name or
//! position. A column changed on one side wins; changed differently on both
//! sides, or dropped on one side while changed on the other, is a schema
//! conflict. Schema conflicts are not resolvable data: the table merge
//! fails before any row merging is attempted.

use std::fmt;

use forkdb_types::{Column, IndexDef, Schema, Tag};

/// One irreconcilable difference found during a schema merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaConflict {
    /// The primary-key column sets differ.
    PrimaryKeyMismatch,
    /// A column was changed differently on both sides.
    ColumnBothModified { tag: Tag },
    /// A column was dropped on one side and changed on the other.
    ColumnDroppedAndModified { tag: Tag },
    /// The same tag was added on both sides with different definitions.
    ColumnAddedTwice { tag: Tag },
    /// An index was changed differently on both sides.
    IndexBothModified { name: String },
    /// An index was dropped on one side and changed on the other.
    IndexDroppedAndModified { name: String },
}

impl fmt::Display for SchemaConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryKeyMismatch => f.write_str("primary key definitions differ"),
            Self::ColumnBothModified { tag } => {
                write!(f, "column {tag} modified on both sides")
            }
            Self::ColumnDroppedAndModified { tag } => {
                write!(f, "column {tag} dropped on one side and modified on the other")
            }
            Self::ColumnAddedTwice { tag } => {
                write!(f, "column {tag} added on both sides with different definitions")
            }
            Self::IndexBothModified { name } => {
                write!(f, "index '{name}' modified on both sides")
            }
            Self::IndexDroppedAndModified { name } => {
                write!(f, "index '{name}' dropped on one side and modified on the other")
            }
        }
    }
}

/// Three-way merge of `ours` and `theirs` against `ancestor`.
///
/// Returns the post-merge schema and any conflicts. A non-empty conflict
/// list means the schema result is unusable and the table merge must fail.
pub fn merge_schemas(
    ours: &Schema,
    theirs: &Schema,
    ancestor: &Schema,
) -> (Schema, Vec<SchemaConflict>) {
    let mut conflicts = Vec::new();

    // Primary keys must agree on all three sides; PK evolution is not a
    // mergeable change.
    let pk_ok = pk_equal(ours, theirs) && pk_equal(ours, ancestor);
    if !pk_ok {
        conflicts.push(SchemaConflict::PrimaryKeyMismatch);
    }

    let mut merged_cols: Vec<Column> = Vec::new();
    for tag in column_tag_union(ours, theirs) {
        let o = ours.non_pk_cols().by_tag(tag);
        let t = theirs.non_pk_cols().by_tag(tag);
        let a = ancestor.non_pk_cols().by_tag(tag);
        match merge_one_column(tag, o, t, a) {
            Ok(Some(col)) => merged_cols.push(col),
            Ok(None) => {}
            Err(conflict) => conflicts.push(conflict),
        }
    }

    let mut merged = Schema::new(
        ours.pk_cols().iter().cloned().collect(),
        merged_cols,
    );
    merged.set_indexes(merge_index_defs(ours, theirs, ancestor, &mut conflicts));

    (merged, conflicts)
}

fn pk_equal(a: &Schema, b: &Schema) -> bool {
    a.pk_cols().len() == b.pk_cols().len()
        && a.pk_cols().iter().zip(b.pk_cols().iter()).all(|(x, y)| x == y)
}

/// Tags of ours' non-PK columns in ours' order, then theirs-only tags in
/// theirs' order.
fn column_tag_union(ours: &Schema, theirs: &Schema) -> Vec<Tag> {
    let mut tags: Vec<Tag> = ours.non_pk_cols().tags().collect();
    tags.extend(
        theirs
            .non_pk_cols()
            .tags()
            .filter(|t| ours.non_pk_cols().index_of(*t).is_none()),
    );
    tags
}

fn merge_one_column(
    tag: Tag,
    ours: Option<&Column>,
    theirs: Option<&Column>,
    anc: Option<&Column>,
) -> Result<Option<Column>, SchemaConflict> {
    match (ours, theirs, anc) {
        (Some(o), Some(t), _) if o == t => Ok(Some(o.clone())),
        (Some(o), Some(t), Some(a)) => {
            if o == a {
                Ok(Some(t.clone()))
            } else if t == a {
                Ok(Some(o.clone()))
            } else {
                Err(SchemaConflict::ColumnBothModified { tag })
            }
        }
        (Some(_), Some(_), None) => Err(SchemaConflict::ColumnAddedTwice { tag }),
        (Some(o), None, None) => Ok(Some(o.clone())),
        (None, Some(t), None) => Ok(Some(t.clone())),
        (Some(o), None, Some(a)) => {
            if o == a {
                // Theirs dropped an unchanged column.
                Ok(None)
            } else {
                Err(SchemaConflict::ColumnDroppedAndModified { tag })
            }
        }
        (None, Some(t), Some(a)) => {
            if t == a {
                Ok(None)
            } else {
                Err(SchemaConflict::ColumnDroppedAndModified { tag })
            }
        }
        (None, None, _) => Ok(None),
    }
}

fn merge_index_defs(
    ours: &Schema,
    theirs: &Schema,
    ancestor: &Schema,
    conflicts: &mut Vec<SchemaConflict>,
) -> Vec<IndexDef> {
    let mut names: Vec<&str> = ours.indexes().iter().map(|d| d.name.as_str()).collect();
    names.extend(
        theirs
            .indexes()
            .iter()
            .map(|d| d.name.as_str())
            .filter(|n| ours.index(n).is_none()),
    );

    let mut merged = Vec::new();
    for name in names {
        let o = ours.index(name);
        let t = theirs.index(name);
        let a = ancestor.index(name);
        match (o, t, a) {
            (Some(o), Some(t), _) if o == t => merged.push(o.clone()),
            (Some(o), Some(t), Some(a)) => {
                if o == a {
                    merged.push(t.clone());
                } else if t == a {
                    merged.push(o.clone());
                } else {
                    conflicts.push(SchemaConflict::IndexBothModified { name: name.to_owned() });
                }
            }
            (Some(_), Some(_), None) => {
                conflicts.push(SchemaConflict::IndexBothModified { name: name.to_owned() });
            }
            (Some(o), None, None) => merged.push(o.clone()),
            (None, Some(t), None) => merged.push(t.clone()),
            (Some(o), None, Some(a)) => {
                if o != a {
                    conflicts.push(SchemaConflict::IndexDroppedAndModified {
                        name: name.to_owned(),
                    });
                }
            }
            (None, Some(t), Some(a)) => {
                if t != a {
                    conflicts.push(SchemaConflict::IndexDroppedAndModified {
                        name: name.to_owned(),
                    });
                }
            }
            (None, None, _) => {}
        }
    }
    merged
}
