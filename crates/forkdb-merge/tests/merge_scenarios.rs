//! End-to-end merge scenarios through `merge_roots`.

mod common;

use common::*;

use forkdb_error::ForkError;
use forkdb_merge::{
    merge_roots, tables_in_conflict, tables_with_violations, ArtifactStorage, MergeOperation,
    MergeOptions,
};
use forkdb_store::{
    Artifact, ArtifactMap, ArtifactType, ConflictMetadata, ForeignKey, ForeignKeyCollection,
    OrderedIndex, Root, Table,
};
use forkdb_types::{Column, Hash, IndexDef, RowTuple, Schema, Tuple, Value, ValueType};

async fn merge(
    ours: &Root,
    theirs: &Root,
    ancestor: &Root,
) -> Result<(Root, std::collections::BTreeMap<String, forkdb_merge::MergeStats>), ForkError> {
    merge_roots(
        ours,
        theirs,
        ancestor,
        theirs_cm_hash(),
        ancestor_cm_hash(),
        &MergeOptions::default(),
    )
    .await
}

#[tokio::test]
async fn independent_row_edits_merge_cleanly() {
    let ancestor = root_with("t", table_iv(&[(1, 10), (2, 20)]));
    let ours = root_with("t", table_iv(&[(1, 10), (2, 21)]));
    let theirs = root_with("t", table_iv(&[(1, 11), (2, 20)]));

    let (merged, stats) = merge(&ours, &theirs, &ancestor).await.unwrap();
    let table = merged.get_table("t").unwrap();
    assert_eq!(table.row_data().get(&key(1)), Some(&row(11)));
    assert_eq!(table.row_data().get(&key(2)), Some(&row(21)));
    assert!(table.artifacts().is_empty());

    let s = &stats["t"];
    assert_eq!(s.modifications, 2);
    assert_eq!(s.conflicts, 0);
    assert_eq!(s.operation, MergeOperation::Modified);
}

#[tokio::test]
async fn same_cell_edit_conflicts_and_keeps_ours() {
    let ancestor = root_with("t", table_iv(&[(1, 10)]));
    let ours = root_with("t", table_iv(&[(1, 11)]));
    let theirs = root_with("t", table_iv(&[(1, 12)]));

    let (merged, stats) = merge(&ours, &theirs, &ancestor).await.unwrap();
    let table = merged.get_table("t").unwrap();

    // The merged row at the conflicted key is ours, unchanged.
    assert_eq!(table.row_data().get(&key(1)), Some(&row(11)));

    let artifact = table
        .artifacts()
        .get(&key(1), ArtifactType::Conflict)
        .expect("conflict artifact");
    assert_eq!(artifact.provenance, theirs_cm_hash());
    let base_bytes = artifact.metadata.get("BaseTblHash").unwrap();
    assert_eq!(base_bytes.as_array().unwrap().len(), 20);
    assert_eq!(
        artifact.metadata.get("TheirTblHash").unwrap().as_array().unwrap().len(),
        20
    );

    assert_eq!(stats["t"].conflicts, 1);
    assert_eq!(tables_in_conflict(&merged), vec!["t".to_owned()]);
}

#[tokio::test]
async fn delete_vs_modify_conflicts() {
    let ancestor = root_with("t", table_iv(&[(1, 10)]));
    let ours = root_with("t", table_iv(&[]));
    let theirs = root_with("t", table_iv(&[(1, 11)]));

    let (merged, stats) = merge(&ours, &theirs, &ancestor).await.unwrap();
    let table = merged.get_table("t").unwrap();

    // Ours deleted the row; it stays deleted while the conflict is open.
    assert!(table.row_data().is_empty());
    assert!(table
        .artifacts()
        .get(&key(1), ArtifactType::Conflict)
        .is_some());
    assert_eq!(stats["t"].conflicts, 1);
}

#[tokio::test]
async fn both_delete_is_clean() {
    // Both sides delete key 1; ours also edits key 2, so the identical-
    // tables shortcut does not fire and the co-removal is reconciled.
    let ancestor = root_with("t", table_iv(&[(1, 10), (2, 20)]));
    let ours = root_with("t", table_iv(&[(2, 21)]));
    let theirs = root_with("t", table_iv(&[(2, 20)]));

    let (merged, stats) = merge(&ours, &theirs, &ancestor).await.unwrap();
    let table = merged.get_table("t").unwrap();
    assert!(!table.row_data().contains_key(&key(1)));
    assert_eq!(table.row_data().get(&key(2)), Some(&row(21)));
    assert!(table.artifacts().is_empty());
    assert_eq!(stats["t"].deletes, 1);
    assert_eq!(stats["t"].modifications, 1);
    assert_eq!(stats["t"].conflicts, 0);
}

#[tokio::test]
async fn identical_deletions_short_circuit_as_unmodified() {
    // When both sides end up byte-identical the decision table wins before
    // any row reconciliation: the result is ours, unmodified.
    let ancestor = root_with("t", table_iv(&[(1, 10)]));
    let ours = root_with("t", table_iv(&[]));
    let theirs = root_with("t", table_iv(&[]));

    let (merged, stats) = merge(&ours, &theirs, &ancestor).await.unwrap();
    assert!(merged.get_table("t").unwrap().row_data().is_empty());
    assert_eq!(stats["t"].operation, MergeOperation::Unmodified);
}

#[tokio::test]
async fn schema_evolution_merges_cell_wise() {
    // Ours adds a nullable column w; theirs modifies v at key 1.
    let wide_schema = Schema::new(
        vec![Column::new(1, "id", ValueType::Integer).not_null()],
        vec![
            Column::new(2, "v", ValueType::Integer),
            Column::new(3, "w", ValueType::Integer),
        ],
    );
    let ancestor = root_with("t", table_iv(&[(1, 10)]));
    let ours = root_with(
        "t",
        Table::new(wide_schema).with_row_data(OrderedIndex::from_rows(vec![(
            key(1),
            RowTuple::new(vec![Value::Integer(10), Value::Null]),
        )])),
    );
    let theirs = root_with("t", table_iv(&[(1, 11)]));

    let (merged, stats) = merge(&ours, &theirs, &ancestor).await.unwrap();
    let table = merged.get_table("t").unwrap();
    assert_eq!(table.schema().non_pk_cols().len(), 2);
    assert_eq!(
        table.row_data().get(&key(1)),
        Some(&RowTuple::new(vec![Value::Integer(11), Value::Null]))
    );
    assert_eq!(stats["t"].conflicts, 0);
}

#[tokio::test]
async fn keyless_co_insert_conflicts() {
    let keyless_schema = Schema::keyless(vec![Column::new(1, "v", ValueType::Text)]);
    let entry = |s: &str, card: u64| {
        let fields = [Value::Text(s.to_owned())];
        (Tuple::surrogate_key(&fields), Tuple::keyless_row(&fields, card))
    };

    let base_rows = vec![entry("a", 1), entry("b", 1)];
    let grown_rows = vec![entry("a", 1), entry("b", 1), entry("c", 1)];

    let table = |rows: &[(Tuple, Tuple)]| {
        Table::new(keyless_schema.clone())
            .with_row_data(OrderedIndex::from_rows(rows.iter().cloned()))
    };

    let ancestor = root_with("t", table(&base_rows));
    let ours = root_with("t", table(&grown_rows));
    let theirs = root_with("t", table(&grown_rows));

    let (merged, stats) = merge(&ours, &theirs, &ancestor).await.unwrap();
    let table = merged.get_table("t").unwrap();
    let (surrogate, ours_row) = entry("c", 1);
    assert!(table
        .artifacts()
        .get(&surrogate, ArtifactType::Conflict)
        .is_some());
    assert_eq!(table.row_data().get(&surrogate), Some(&ours_row));
    assert_eq!(stats["t"].conflicts, 1);
}

// ---------------------------------------------------------------------------
// Decision-table short circuits
// ---------------------------------------------------------------------------

#[tokio::test]
async fn table_added_only_in_theirs_fast_forwards() {
    let ancestor = Root::empty();
    let ours = Root::empty();
    let theirs = root_with("t", table_iv(&[(1, 10)]));

    let (merged, stats) = merge(&ours, &theirs, &ancestor).await.unwrap();
    assert!(merged.has_table("t"));
    assert_eq!(stats["t"].operation, MergeOperation::Added);
}

#[tokio::test]
async fn table_added_only_in_ours_is_unmodified() {
    let ancestor = Root::empty();
    let ours = root_with("t", table_iv(&[(1, 10)]));
    let theirs = Root::empty();

    let (merged, stats) = merge(&ours, &theirs, &ancestor).await.unwrap();
    assert!(merged.has_table("t"));
    assert_eq!(stats["t"].operation, MergeOperation::Unmodified);
}

#[tokio::test]
async fn same_table_added_twice_with_equal_schemas_merges() {
    let ancestor = Root::empty();
    let ours = root_with("t", table_iv(&[(1, 10)]));
    let theirs = root_with("t", table_iv(&[(2, 20)]));

    let (merged, _) = merge(&ours, &theirs, &ancestor).await.unwrap();
    let table = merged.get_table("t").unwrap();
    assert_eq!(table.row_data().len(), 2);
    assert!(table.artifacts().is_empty());
}

#[tokio::test]
async fn same_table_added_twice_with_differing_schemas_fails() {
    let other_schema = Schema::new(
        vec![Column::new(1, "id", ValueType::Integer).not_null()],
        vec![Column::new(2, "v", ValueType::Text)],
    );
    let ancestor = Root::empty();
    let ours = root_with("t", table_iv(&[]));
    let theirs = root_with("t", Table::new(other_schema));

    let err = merge(&ours, &theirs, &ancestor).await.unwrap_err();
    assert!(matches!(err, ForkError::SameTableAddedTwice { table } if table == "t"));
}

#[tokio::test]
async fn table_removed_in_both_sides() {
    let ancestor = root_with("t", table_iv(&[(1, 10)]));
    let ours = Root::empty();
    let theirs = Root::empty();

    let (merged, stats) = merge(&ours, &theirs, &ancestor).await.unwrap();
    assert!(!merged.has_table("t"));
    assert_eq!(stats["t"].operation, MergeOperation::Removed);
}

#[tokio::test]
async fn table_deleted_and_modified_fails() {
    let ancestor = root_with("t", table_iv(&[(1, 10)]));
    let ours = Root::empty();
    let theirs = root_with("t", table_iv(&[(1, 11)]));

    let err = merge(&ours, &theirs, &ancestor).await.unwrap_err();
    assert!(matches!(err, ForkError::TableDeletedAndModified { .. }));
}

#[tokio::test]
async fn table_deleted_on_one_side_unchanged_on_other_is_removed() {
    let ancestor = root_with("t", table_iv(&[(1, 10)]));
    let ours = root_with("t", table_iv(&[(1, 10)]));
    let theirs = Root::empty();

    let (merged, stats) = merge(&ours, &theirs, &ancestor).await.unwrap();
    assert!(!merged.has_table("t"));
    assert_eq!(stats["t"].operation, MergeOperation::Removed);
}

#[tokio::test]
async fn theirs_unchanged_keeps_ours() {
    let ancestor = root_with("t", table_iv(&[(1, 10)]));
    let ours = root_with("t", table_iv(&[(1, 11), (2, 20)]));
    let theirs = root_with("t", table_iv(&[(1, 10)]));

    let (merged, stats) = merge(&ours, &theirs, &ancestor).await.unwrap();
    let table = merged.get_table("t").unwrap();
    assert_eq!(table.row_data().len(), 2);
    assert_eq!(stats["t"].operation, MergeOperation::Unmodified);
}

#[tokio::test]
async fn ours_unchanged_fast_forwards_to_theirs() {
    let ancestor = root_with("t", table_iv(&[(1, 10), (2, 20)]));
    let ours = root_with("t", table_iv(&[(1, 10), (2, 20)]));
    let theirs = root_with("t", table_iv(&[(1, 11), (3, 30)]));

    let (merged, stats) = merge(&ours, &theirs, &ancestor).await.unwrap();
    let table = merged.get_table("t").unwrap();
    assert_eq!(table.row_data().get(&key(1)), Some(&row(11)));
    assert!(table.row_data().contains_key(&key(3)));
    assert!(!table.row_data().contains_key(&key(2)));

    let s = &stats["t"];
    assert_eq!(s.operation, MergeOperation::Modified);
    assert_eq!((s.adds, s.deletes, s.modifications), (1, 1, 1));
}

// ---------------------------------------------------------------------------
// Cherry-pick restrictions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cherry_pick_with_differing_schemas_fails() {
    let wide = Schema::new(
        vec![Column::new(1, "id", ValueType::Integer).not_null()],
        vec![
            Column::new(2, "v", ValueType::Integer),
            Column::new(3, "w", ValueType::Integer),
        ],
    );
    let ancestor = root_with("t", table_iv(&[(1, 10)]));
    let ours = root_with("t", table_iv(&[(1, 11)]));
    let theirs = root_with("t", Table::new(wide));

    let opts = MergeOptions {
        is_cherry_pick: true,
        ..MergeOptions::default()
    };
    let err = merge_roots(
        &ours,
        &theirs,
        &ancestor,
        theirs_cm_hash(),
        ancestor_cm_hash(),
        &opts,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ForkError::CherryPickSchemaChange { .. }));
}

#[tokio::test]
async fn cherry_pick_drop_of_table_fails() {
    let ancestor = root_with("t", table_iv(&[(1, 10)]));
    let ours = root_with("t", table_iv(&[(1, 10)]));
    let theirs = Root::empty();

    let opts = MergeOptions {
        is_cherry_pick: true,
        ..MergeOptions::default()
    };
    let err = merge_roots(
        &ours,
        &theirs,
        &ancestor,
        theirs_cm_hash(),
        ancestor_cm_hash(),
        &opts,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ForkError::CherryPickSchemaChange { .. }));
}

#[tokio::test]
async fn cherry_pick_skips_fast_forward() {
    // Ours is unchanged, which would normally fast-forward to theirs; a
    // cherry-pick must run the full merge instead.
    let ancestor = root_with("t", table_iv(&[(1, 10)]));
    let ours = root_with("t", table_iv(&[(1, 10)]));
    let theirs = root_with("t", table_iv(&[(1, 11)]));

    let opts = MergeOptions {
        is_cherry_pick: true,
        ..MergeOptions::default()
    };
    let (merged, stats) = merge_roots(
        &ours,
        &theirs,
        &ancestor,
        theirs_cm_hash(),
        ancestor_cm_hash(),
        &opts,
    )
    .await
    .unwrap();
    let table = merged.get_table("t").unwrap();
    assert_eq!(table.row_data().get(&key(1)), Some(&row(11)));
    assert_eq!(stats["t"].operation, MergeOperation::Modified);
    assert_eq!(stats["t"].modifications, 1);
}

// ---------------------------------------------------------------------------
// Schema conflicts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn schema_conflict_fails_before_row_merge() {
    let ours_schema = Schema::new(
        vec![Column::new(1, "id", ValueType::Integer).not_null()],
        vec![Column::new(2, "v", ValueType::Float)],
    );
    let theirs_schema = Schema::new(
        vec![Column::new(1, "id", ValueType::Integer).not_null()],
        vec![Column::new(2, "v", ValueType::Text)],
    );
    let ancestor = root_with("t", table_iv(&[(1, 10)]));
    let ours = root_with("t", Table::new(ours_schema));
    let theirs = root_with("t", Table::new(theirs_schema));

    let err = merge(&ours, &theirs, &ancestor).await.unwrap_err();
    assert!(matches!(err, ForkError::SchemaConflict { table, .. } if table == "t"));
}

// ---------------------------------------------------------------------------
// Auto-increment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auto_increment_merges_to_max() {
    let ai_schema = Schema::new(
        vec![Column::new(1, "id", ValueType::Integer).not_null().auto_increment()],
        vec![Column::new(2, "v", ValueType::Integer)],
    );
    let table = |rows: &[(i64, i64)], ai: u64| {
        Table::new(ai_schema.clone())
            .with_row_data(rows_index(rows))
            .with_auto_increment(ai)
    };
    let ancestor = root_with("t", table(&[(1, 10)], 2));
    let ours = root_with("t", table(&[(1, 10), (2, 20)], 3));
    let theirs = root_with("t", table(&[(1, 10), (7, 70)], 8));

    let (merged, _) = merge(&ours, &theirs, &ancestor).await.unwrap();
    assert_eq!(merged.get_table("t").unwrap().auto_increment(), Some(8));
}

// ---------------------------------------------------------------------------
// Secondary indexes and unique violations
// ---------------------------------------------------------------------------

fn email_schema() -> Schema {
    Schema::new(
        vec![Column::new(1, "id", ValueType::Integer).not_null()],
        vec![Column::new(2, "email", ValueType::Text)],
    )
    .with_index(IndexDef::new("email_uniq", vec![2]).unique())
}

fn email_table(rows: &[(i64, &str)]) -> Table {
    let table = Table::new(email_schema()).with_row_data(OrderedIndex::from_rows(
        rows.iter().map(|&(id, email)| {
            (
                key(id),
                RowTuple::new(vec![Value::Text(email.to_owned())]),
            )
        }),
    ));
    with_populated_indexes(table)
}

#[tokio::test]
async fn unique_index_duplicate_records_violations_for_both_rows() {
    // Ours changed elsewhere, so the merge cannot fast-forward to theirs
    // and must apply theirs' insert onto ours.
    let ancestor = root_with("t", email_table(&[(1, "a@x")]));
    let ours = root_with("t", email_table(&[(1, "a@x"), (3, "b@y")]));
    let theirs = root_with("t", email_table(&[(1, "a@x"), (2, "a@x")]));

    let (merged, stats) = merge(&ours, &theirs, &ancestor).await.unwrap();
    let table = merged.get_table("t").unwrap();

    // Both the existing and the offending row carry a violation artifact.
    for id in [1, 2] {
        let art = table
            .artifacts()
            .get(&key(id), ArtifactType::ConstraintViolation)
            .expect("violation artifact");
        assert_eq!(art.metadata.get("IndexName").unwrap(), "email_uniq");
    }
    assert_eq!(stats["t"].constraint_violations, 2);
    assert_eq!(tables_with_violations(&merged), vec!["t".to_owned()]);
}

#[tokio::test]
async fn secondary_index_follows_merged_rows() {
    let indexed_schema = Schema::new(
        vec![Column::new(1, "id", ValueType::Integer).not_null()],
        vec![Column::new(2, "v", ValueType::Integer)],
    )
    .with_index(IndexDef::new("v_idx", vec![2]));

    let table = |rows: &[(i64, i64)]| {
        with_populated_indexes(
            Table::new(indexed_schema.clone()).with_row_data(rows_index(rows)),
        )
    };

    let ancestor = root_with("t", table(&[(1, 10), (2, 20)]));
    let ours = root_with("t", table(&[(1, 10), (2, 21)]));
    let theirs = root_with("t", table(&[(1, 11), (2, 20)]));

    let (merged, _) = merge(&ours, &theirs, &ancestor).await.unwrap();
    let idx = merged
        .get_table("t")
        .unwrap()
        .index_set()
        .get("v_idx")
        .unwrap();

    let entry = |v: i64, pk: i64| Tuple::new(vec![Value::Integer(v), Value::Integer(pk)]);
    assert!(idx.contains_key(&entry(11, 1)));
    assert!(idx.contains_key(&entry(21, 2)));
    assert!(!idx.contains_key(&entry(10, 1)));
    assert!(!idx.contains_key(&entry(20, 2)));
}

#[tokio::test]
async fn conflicted_key_reverts_theirs_index_entries() {
    let indexed_schema = Schema::new(
        vec![Column::new(1, "id", ValueType::Integer).not_null()],
        vec![Column::new(2, "v", ValueType::Integer)],
    )
    .with_index(IndexDef::new("v_idx", vec![2]));

    let table = |rows: &[(i64, i64)]| {
        with_populated_indexes(
            Table::new(indexed_schema.clone()).with_row_data(rows_index(rows)),
        )
    };

    let ancestor = root_with("t", table(&[(1, 10)]));
    let ours = root_with("t", table(&[(1, 11)]));
    let theirs = root_with("t", table(&[(1, 12)]));

    let (merged, _) = merge(&ours, &theirs, &ancestor).await.unwrap();
    let idx = merged
        .get_table("t")
        .unwrap()
        .index_set()
        .get("v_idx")
        .unwrap();

    // The conflicted row keeps ours' entry; theirs' change is reverted.
    let entry = |v: i64, pk: i64| Tuple::new(vec![Value::Integer(v), Value::Integer(pk)]);
    assert!(idx.contains_key(&entry(11, 1)));
    assert!(!idx.contains_key(&entry(12, 1)));
}

#[tokio::test]
async fn index_added_during_schema_merge_is_rebuilt() {
    let indexed_schema = Schema::new(
        vec![Column::new(1, "id", ValueType::Integer).not_null()],
        vec![Column::new(2, "v", ValueType::Integer)],
    )
    .with_index(IndexDef::new("v_idx", vec![2]));

    let ancestor = root_with("t", table_iv(&[(1, 10)]));
    let ours = root_with("t", table_iv(&[(1, 11)]));
    // Theirs added the index definition (and no data change beyond it).
    let theirs = root_with(
        "t",
        with_populated_indexes(
            Table::new(indexed_schema).with_row_data(rows_index(&[(1, 10)])),
        ),
    );

    let (merged, _) = merge(&ours, &theirs, &ancestor).await.unwrap();
    let table = merged.get_table("t").unwrap();
    assert!(table.schema().index("v_idx").is_some());
    let idx = table.index_set().get("v_idx").unwrap();
    assert!(idx.contains_key(&Tuple::new(vec![Value::Integer(11), Value::Integer(1)])));
}

// ---------------------------------------------------------------------------
// Conflict compatibility and stash policy
// ---------------------------------------------------------------------------

fn table_with_existing_conflict(rows: &[(i64, i64)], conflict_schema: &Schema) -> Table {
    let mut editor = ArtifactMap::empty().editor();
    editor.set_conflict_schemas((
        conflict_schema.clone(),
        conflict_schema.clone(),
        conflict_schema.clone(),
    ));
    editor.add(
        key(99),
        ArtifactType::Conflict,
        Artifact::conflict(
            Hash::from_padded(b"old-merge"),
            &ConflictMetadata {
                base_tbl_hash: Hash::ZERO,
                their_tbl_hash: Hash::ZERO,
            },
        ),
    );
    table_iv(rows).with_artifacts(editor.flush())
}

#[tokio::test]
async fn incompatible_existing_conflicts_abort() {
    let other_schema = Schema::new(
        vec![Column::new(1, "id", ValueType::Integer).not_null()],
        vec![
            Column::new(2, "v", ValueType::Integer),
            Column::new(3, "w", ValueType::Integer),
        ],
    );
    let ancestor = root_with("t", table_iv(&[(1, 10)]));
    let ours = root_with("t", table_with_existing_conflict(&[(1, 11)], &other_schema));
    let theirs = root_with("t", table_iv(&[(1, 12)]));

    let err = merge(&ours, &theirs, &ancestor).await.unwrap_err();
    assert!(matches!(err, ForkError::ConflictsIncompatible));
}

#[tokio::test]
async fn compatible_existing_conflicts_accumulate() {
    let ancestor = root_with("t", table_iv(&[(1, 10)]));
    let ours = root_with("t", table_with_existing_conflict(&[(1, 11)], &schema_iv()));
    let theirs = root_with("t", table_iv(&[(1, 12)]));

    let (merged, stats) = merge(&ours, &theirs, &ancestor).await.unwrap();
    let arts = merged.get_table("t").unwrap().artifacts();
    // The old conflict at key 99 survives beside the new one at key 1.
    assert!(arts.get(&key(99), ArtifactType::Conflict).is_some());
    assert!(arts.get(&key(1), ArtifactType::Conflict).is_some());
    assert_eq!(stats["t"].conflicts, 2);
}

#[tokio::test]
async fn inline_storage_cannot_overwrite_existing_conflicts() {
    let ancestor = root_with("t", table_iv(&[(1, 10)]));
    let ours = root_with("t", table_with_existing_conflict(&[(1, 11)], &schema_iv()));
    let theirs = root_with("t", table_iv(&[(1, 12)]));

    let opts = MergeOptions {
        artifact_storage: ArtifactStorage::Inline,
        ..MergeOptions::default()
    };
    let err = merge_roots(
        &ours,
        &theirs,
        &ancestor,
        theirs_cm_hash(),
        ancestor_cm_hash(),
        &opts,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ForkError::CannotOverwriteConflicts));
}

#[tokio::test]
async fn inline_storage_reapplies_stash_after_clean_merge() {
    let ancestor = root_with("t", table_iv(&[(1, 10)]));
    let ours = root_with("t", table_with_existing_conflict(&[(1, 10)], &schema_iv()));
    let theirs = root_with("t", table_iv(&[(1, 11)]));

    let opts = MergeOptions {
        artifact_storage: ArtifactStorage::Inline,
        ..MergeOptions::default()
    };
    let (merged, stats) = merge_roots(
        &ours,
        &theirs,
        &ancestor,
        theirs_cm_hash(),
        ancestor_cm_hash(),
        &opts,
    )
    .await
    .unwrap();

    let table = merged.get_table("t").unwrap();
    assert_eq!(table.row_data().get(&key(1)), Some(&row(11)));
    // The stashed conflict came back untouched; merge-generated stats do
    // not include it.
    assert!(table.artifacts().get(&key(99), ArtifactType::Conflict).is_some());
    assert_eq!(stats["t"].conflicts, 0);
}

// ---------------------------------------------------------------------------
// Foreign keys
// ---------------------------------------------------------------------------

fn parent_child_roots(parent_ids: &[i64], child_rows: &[(i64, i64)]) -> Root {
    let parent_schema = Schema::new(
        vec![Column::new(1, "id", ValueType::Integer).not_null()],
        vec![],
    );
    let child_schema = Schema::new(
        vec![Column::new(10, "id", ValueType::Integer).not_null()],
        vec![Column::new(11, "pid", ValueType::Integer)],
    );

    let mut root = Root::empty();
    root.put_table(
        "parent",
        Table::new(parent_schema).with_row_data(OrderedIndex::from_rows(
            parent_ids
                .iter()
                .map(|&i| (key(i), RowTuple::new(vec![]))),
        )),
    );
    root.put_table(
        "child",
        Table::new(child_schema).with_row_data(OrderedIndex::from_rows(
            child_rows
                .iter()
                .map(|&(i, p)| (key(i), RowTuple::new(vec![Value::Integer(p)]))),
        )),
    );
    root.put_foreign_keys(ForeignKeyCollection::from_decls(vec![ForeignKey {
        name: "child_parent".into(),
        child_table: "child".into(),
        child_tags: vec![forkdb_types::Tag(11)],
        parent_table: "parent".into(),
        parent_tags: vec![forkdb_types::Tag(1)],
    }]));
    root
}

#[tokio::test]
async fn merge_detects_new_fk_violations() {
    // Theirs deletes the parent row ours' new child row references.
    let ancestor = parent_child_roots(&[1, 2], &[(100, 1)]);
    let ours = parent_child_roots(&[1, 2], &[(100, 1), (101, 2)]);
    let theirs = parent_child_roots(&[1], &[(100, 1)]);

    let (merged, stats) = merge(&ours, &theirs, &ancestor).await.unwrap();
    let child = merged.get_table("child").unwrap();
    assert!(child
        .artifacts()
        .get(&key(101), ArtifactType::ForeignKeyViolation)
        .is_some());
    assert_eq!(stats["child"].constraint_violations, 1);
}

#[tokio::test]
async fn divergent_foreign_keys_are_fatal() {
    let ancestor = parent_child_roots(&[1], &[(100, 1)]);
    let mut ours = parent_child_roots(&[1], &[(100, 1)]);
    let mut theirs = parent_child_roots(&[1], &[(100, 1)]);

    // Same name, different child column on each side.
    ours.put_foreign_keys(ForeignKeyCollection::from_decls(vec![ForeignKey {
        name: "fk".into(),
        child_table: "child".into(),
        child_tags: vec![forkdb_types::Tag(11)],
        parent_table: "parent".into(),
        parent_tags: vec![forkdb_types::Tag(1)],
    }]));
    theirs.put_foreign_keys(ForeignKeyCollection::from_decls(vec![ForeignKey {
        name: "fk".into(),
        child_table: "child".into(),
        child_tags: vec![forkdb_types::Tag(10)],
        parent_table: "parent".into(),
        parent_tags: vec![forkdb_types::Tag(1)],
    }]));

    let err = merge(&ours, &theirs, &ancestor).await.unwrap_err();
    assert!(matches!(err, ForkError::ForeignKeyConflict { .. }));
}
