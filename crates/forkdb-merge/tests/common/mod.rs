//! Shared builders for the merge integration tests.
//!
//! Each test binary compiles this module separately and uses a subset.
#![allow(dead_code)]

use forkdb_store::{IndexSet, OrderedIndex, Root, Table};
use forkdb_types::{Column, Hash, KeyTuple, RowTuple, Schema, Tuple, Value, ValueType};

/// The scenario schema: `(id PK int, v int)` with tags 1 and 2.
pub fn schema_iv() -> Schema {
    Schema::new(
        vec![Column::new(1, "id", ValueType::Integer).not_null()],
        vec![Column::new(2, "v", ValueType::Integer)],
    )
}

pub fn key(id: i64) -> KeyTuple {
    Tuple::new(vec![Value::Integer(id)])
}

pub fn row(v: i64) -> RowTuple {
    Tuple::new(vec![Value::Integer(v)])
}

pub fn rows_index(rows: &[(i64, i64)]) -> OrderedIndex {
    OrderedIndex::from_rows(rows.iter().map(|&(k, v)| (key(k), row(v))))
}

/// A table over [`schema_iv`] with the given `(id, v)` rows.
pub fn table_iv(rows: &[(i64, i64)]) -> Table {
    Table::new(schema_iv()).with_row_data(rows_index(rows))
}

/// A single-table root.
pub fn root_with(name: &str, table: Table) -> Root {
    let mut root = Root::empty();
    root.put_table(name, table);
    root
}

pub fn theirs_cm_hash() -> Hash {
    Hash::from_padded(b"theirs-commit")
}

pub fn ancestor_cm_hash() -> Hash {
    Hash::from_padded(b"ancestor-commit")
}

/// Populate a table's secondary indexes from its primary rows, using the
/// same entry layout the engine writes: projected columns then primary key.
pub fn with_populated_indexes(table: Table) -> Table {
    let schema = table.schema().clone();
    let mut set = IndexSet::empty();
    for def in schema.indexes() {
        let mut ed = OrderedIndex::empty().editor();
        for (k, r) in table.row_data().iter() {
            let mut vals = Vec::new();
            let mut complete = true;
            for &tag in &def.tags {
                match schema.value_by_tag(k, r, tag) {
                    Some(v) => vals.push(v.clone()),
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete {
                vals.extend(k.values().iter().cloned());
                ed.put(Tuple::new(vals), Tuple::empty());
            }
        }
        set = set.with_index(def.name.clone(), ed.flush());
    }
    table.with_index_set(set)
}
