//! Three-way merge of the foreign-key collection, and the post-merge scan
//! that turns newly broken references into artifacts.

use tracing::debug;

use forkdb_error::{ForkError, Result};
use forkdb_store::{
    Artifact, ArtifactType, ForeignKey, ForeignKeyCollection, ForeignKeyViolationMetadata, Root,
    Table,
};
use forkdb_types::{Hash, KeyTuple, RowTuple, Tuple, Value};

/// Three-way merge of the named foreign-key declarations. A declaration
/// changed on one side wins; the same name resolving to different
/// definitions on both sides is fatal.
pub(crate) fn merge_foreign_keys(
    ours: &ForeignKeyCollection,
    theirs: &ForeignKeyCollection,
    ancestor: &ForeignKeyCollection,
) -> Result<ForeignKeyCollection> {
    let mut names: Vec<&str> = ours.names().collect();
    names.extend(theirs.names().filter(|n| ours.get(n).is_none()));

    let mut merged = Vec::new();
    for name in names {
        let o = ours.get(name);
        let t = theirs.get(name);
        let a = ancestor.get(name);
        match (o, t, a) {
            (Some(o), Some(t), _) if o == t => merged.push(o.clone()),
            (Some(o), Some(t), Some(a)) => {
                if o == a {
                    merged.push(t.clone());
                } else if t == a {
                    merged.push(o.clone());
                } else {
                    return Err(ForkError::ForeignKeyConflict {
                        name: name.to_owned(),
                    });
                }
            }
            (Some(_), Some(_), None) => {
                return Err(ForkError::ForeignKeyConflict {
                    name: name.to_owned(),
                })
            }
            (Some(o), None, None) => merged.push(o.clone()),
            (None, Some(t), None) => merged.push(t.clone()),
            (Some(o), None, Some(a)) => {
                if o != a {
                    return Err(ForkError::ForeignKeyConflict {
                        name: name.to_owned(),
                    });
                }
                // Theirs dropped an unchanged declaration.
            }
            (None, Some(t), Some(a)) => {
                if t != a {
                    return Err(ForkError::ForeignKeyConflict {
                        name: name.to_owned(),
                    });
                }
            }
            (None, None, _) => {}
        }
    }
    Ok(ForeignKeyCollection::from_decls(merged))
}

/// Scan the merged root for rows whose foreign-key references no longer
/// resolve, and record them as foreign-key-violation artifacts on the
/// child table. Returns the number of violations added.
pub(crate) fn compute_fk_violations(root: &mut Root, provenance: Hash) -> Result<usize> {
    let mut total = 0usize;
    let fks: Vec<ForeignKey> = root.foreign_keys().iter().cloned().collect();

    for fk in fks {
        let (Some(child), Some(parent)) =
            (root.get_table(&fk.child_table), root.get_table(&fk.parent_table))
        else {
            // A side of the declaration is gone; the schema layer owns
            // that problem.
            continue;
        };

        let violations = find_violations(&fk, child, parent);
        if violations.is_empty() {
            continue;
        }
        debug!(
            foreign_key = %fk.name,
            count = violations.len(),
            "foreign-key violations introduced by merge"
        );

        let meta = ForeignKeyViolationMetadata {
            foreign_key: fk.name.clone(),
        };
        let mut editor = child.artifacts().editor();
        for (key, row) in &violations {
            editor.add(
                key.clone(),
                ArtifactType::ForeignKeyViolation,
                Artifact::foreign_key_violation(provenance, &meta, row.clone()),
            );
        }
        total += violations.len();

        let updated = child.with_artifacts(editor.flush());
        let child_name = fk.child_table.clone();
        root.put_table(child_name, updated);
    }
    Ok(total)
}

/// Child rows whose fully-non-NULL FK projection has no matching parent row.
fn find_violations(fk: &ForeignKey, child: &Table, parent: &Table) -> Vec<(KeyTuple, RowTuple)> {
    let child_schema = child.schema();
    let parent_schema = parent.schema();

    // Fast path: the declaration targets the parent's primary key.
    let parent_pk_tags: Vec<_> = parent_schema.pk_cols().tags().collect();
    let targets_parent_pk = parent_pk_tags == fk.parent_tags;

    let mut out = Vec::new();
    'rows: for (key, row) in child.row_data().iter() {
        let mut vals: Vec<Value> = Vec::with_capacity(fk.child_tags.len());
        for &tag in &fk.child_tags {
            match child_schema.value_by_tag(key, row, tag) {
                Some(v) if !v.is_null() => vals.push(v.clone()),
                // NULL references are vacuously satisfied.
                _ => continue 'rows,
            }
        }

        let resolves = if targets_parent_pk {
            parent.row_data().contains_key(&Tuple::new(vals.clone()))
        } else {
            parent.row_data().iter().any(|(pk, prow)| {
                fk.parent_tags
                    .iter()
                    .zip(&vals)
                    .all(|(&tag, v)| parent_schema.value_by_tag(pk, prow, tag) == Some(v))
            })
        };

        if !resolves {
            out.push((key.clone(), row.clone()));
        }
    }
    out
}
