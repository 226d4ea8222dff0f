//! End-to-end executor scenarios driven through in-memory mocks.

use metadb_catalog::mocks::{stored, MockCatalog};
use metadb_core::{Command, CommandColumn, CommandList, DataType, Op, SyncMode, Table};
use metadb_executor::{execute_command_list, ExecError};
use metadb_store::mocks::{json_row, MockStore};
use serde_json::json;

const TS: &str = "2024-01-01T00:00:00Z";

fn column(name: &str, dtype: DataType, size: i64, pk: i32, value: serde_json::Value, sql: &str) -> CommandColumn {
    CommandColumn {
        name: name.to_string(),
        dtype,
        dtype_size: size,
        primary_key: pk,
        data: Some(value),
        sql_data: Some(sql.to_string()),
        unavailable: false,
    }
}

fn merge_command() -> Command {
    Command {
        op: Op::Merge,
        schema_name: "s".to_string(),
        table_name: "t".to_string(),
        parent_table: None,
        origin: "o".to_string(),
        source_timestamp: TS.to_string(),
        transformed: false,
        columns: vec![
            column("id", DataType::Integer, 8, 1, json!(1), "1"),
            column("name", DataType::Text, 5, 0, json!("alice"), "alice"),
        ],
    }
}

async fn execute(
    cat: &MockCatalog,
    store: &MockStore,
    commands: Vec<Command>,
    sync_mode: SyncMode,
) -> Result<(), ExecError> {
    let mut list = CommandList { cmd: commands };
    execute_command_list(cat, store, &mut list, "src", sync_mode).await
}

#[tokio::test]
async fn fresh_create_builds_table_and_inserts_current_row() {
    let cat = MockCatalog::new();
    let store = MockStore::new();

    execute(&cat, &store, vec![merge_command()], SyncMode::Normal)
        .await
        .unwrap();

    assert_eq!(
        cat.calls(),
        vec![
            "create_new_table s.t transformed=false parent=none",
            "add_column s.t id integer 8",
            "add_column s.t name text 5",
            "add_index s.t.id",
        ]
    );
    let batches = store.transactions();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        batches[0],
        vec![
            format!(
                "UPDATE \"s\".\"t__\" SET __end='{TS}',__current='f' \
                 WHERE __current AND __origin='o' AND \"id\"=1"
            ),
            format!(
                "INSERT INTO \"s\".\"t__\"(__start,__end,__current,__origin,\"id\",\"name\")\
                 VALUES('{TS}','9999-12-31 00:00:00Z','t','o',1,'alice') RETURNING __id"
            ),
        ]
    );
}

#[tokio::test]
async fn reapplied_command_is_identity_hit() {
    let cat = MockCatalog::new();
    let table = Table::new("s", "t");
    cat.add_table(
        &table,
        vec![
            stored("id", DataType::Integer, 8, None),
            stored("name", DataType::Text, 5, Some(5)),
        ],
    );
    cat.add_existing_index(metadb_core::Column::new(&table, "id"));

    let store = MockStore::new();
    store.push_row(json_row(&[
        ("__id", json!(1)),
        ("__origin", json!("o")),
        ("id", json!(1)),
        ("name", json!("alice")),
    ]));

    execute(&cat, &store, vec![merge_command()], SyncMode::Normal)
        .await
        .unwrap();

    // no schema work, no row statements
    assert!(cat.calls().is_empty());
    assert!(store.transactions().is_empty());
    assert!(store.executed().is_empty());
}

#[tokio::test]
async fn integer_column_widens_before_insert() {
    let cat = MockCatalog::new();
    let table = Table::new("s", "t");
    cat.add_table(
        &table,
        vec![
            stored("id", DataType::Integer, 8, None),
            stored("n", DataType::Integer, 2, None),
        ],
    );
    cat.add_existing_index(metadb_core::Column::new(&table, "id"));

    let store = MockStore::new();
    let cmd = Command {
        columns: vec![
            column("id", DataType::Integer, 8, 1, json!(1), "1"),
            column("n", DataType::Integer, 4, 0, json!(70000), "70000"),
        ],
        ..merge_command()
    };
    execute(&cat, &store, vec![cmd], SyncMode::Normal).await.unwrap();

    assert_eq!(cat.calls(), vec!["alter_column_type s.t n integer 4"]);
    let batches = store.transactions();
    assert!(batches[0][1].contains(",70000)"));
}

#[tokio::test]
async fn text_clash_keeps_column_text_and_quotes_literal() {
    let cat = MockCatalog::new();
    let table = Table::new("s", "t");
    cat.add_table(
        &table,
        vec![
            stored("id", DataType::Integer, 8, None),
            stored("note", DataType::Text, 50, Some(50)),
        ],
    );
    cat.add_existing_index(metadb_core::Column::new(&table, "id"));

    let store = MockStore::new();
    let cmd = Command {
        columns: vec![
            column("id", DataType::Integer, 8, 1, json!(1), "1"),
            column("note", DataType::Integer, 4, 0, json!(42), "42"),
        ],
        ..merge_command()
    };
    execute(&cat, &store, vec![cmd], SyncMode::Normal).await.unwrap();

    // 2 <= 50, so no DDL at all; the literal is inserted as text
    assert!(cat.calls().is_empty());
    let batches = store.transactions();
    assert!(batches[0][1].contains(",'42')"));
}

#[tokio::test]
async fn delete_propagates_to_descendants() {
    let cat = MockCatalog::new();
    let table = Table::new("s", "t");
    let descendant = Table::new("s", "t__d");
    cat.add_table(&table, vec![stored("id", DataType::Integer, 8, None)]);
    cat.add_table(&descendant, Vec::new());
    cat.set_descendants(&table, vec![table.clone(), descendant.clone()]);

    let store = MockStore::new();
    let cmd = Command {
        op: Op::Delete,
        columns: vec![column("id", DataType::Integer, 8, 1, json!(7), "7")],
        ..merge_command()
    };
    execute(&cat, &store, vec![cmd], SyncMode::Normal).await.unwrap();

    let predicate =
        format!("SET __end='{TS}',__current=FALSE WHERE __current AND __origin='o' AND \"id\"=7");
    let executed = store.executed();
    assert_eq!(executed.len(), 2);
    assert!(executed[0].starts_with("UPDATE \"s\".\"t__\" "));
    assert!(executed[0].ends_with(&predicate));
    assert!(executed[1].starts_with("UPDATE \"s\".\"t__d__\" "));
    assert!(executed[1].ends_with(&predicate));
}

#[tokio::test]
async fn truncate_closes_all_origin_rows_without_pk() {
    let cat = MockCatalog::new();
    let table = Table::new("s", "t");
    cat.add_table(&table, vec![stored("id", DataType::Integer, 8, None)]);

    let store = MockStore::new();
    let cmd = Command {
        op: Op::Truncate,
        columns: Vec::new(),
        ..merge_command()
    };
    execute(&cat, &store, vec![cmd], SyncMode::Normal).await.unwrap();

    assert_eq!(
        store.executed(),
        vec![format!(
            "UPDATE \"s\".\"t__\" SET __end='{TS}',__current=FALSE \
             WHERE __current AND __origin='o'"
        )]
    );
}

#[tokio::test]
async fn delete_requires_primary_key() {
    let cat = MockCatalog::new();
    let table = Table::new("s", "t");
    cat.add_table(&table, vec![stored("id", DataType::Integer, 8, None)]);

    let store = MockStore::new();
    let cmd = Command {
        op: Op::Delete,
        columns: vec![column("id", DataType::Integer, 8, 0, json!(7), "7")],
        ..merge_command()
    };
    let err = execute(&cat, &store, vec![cmd], SyncMode::Normal)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::MissingPrimaryKey));
}

#[tokio::test]
async fn delete_on_unknown_table_is_a_no_op() {
    let cat = MockCatalog::new();
    let store = MockStore::new();
    let cmd = Command {
        op: Op::Delete,
        columns: vec![column("id", DataType::Integer, 8, 1, json!(7), "7")],
        ..merge_command()
    };
    execute(&cat, &store, vec![cmd], SyncMode::Normal).await.unwrap();
    assert!(store.executed().is_empty());
}

#[tokio::test]
async fn resync_identity_hit_writes_sync_side_table() {
    let cat = MockCatalog::new();
    let table = Table::new("s", "t");
    cat.add_table(
        &table,
        vec![
            stored("id", DataType::Integer, 8, None),
            stored("name", DataType::Text, 5, Some(5)),
        ],
    );
    cat.add_existing_index(metadb_core::Column::new(&table, "id"));

    let store = MockStore::new();
    store.push_row(json_row(&[
        ("__id", json!(99)),
        ("id", json!(1)),
        ("name", json!("alice")),
    ]));

    execute(&cat, &store, vec![merge_command()], SyncMode::Resync)
        .await
        .unwrap();

    assert_eq!(
        store.transactions(),
        vec![vec![
            r#"INSERT INTO "s"."t__sync"(__id)VALUES(99) ON CONFLICT (__id) DO NOTHING"#.to_string()
        ]]
    );
}

#[tokio::test]
async fn mixed_stream_flushes_per_sub_batch() {
    let cat = MockCatalog::new();
    let t = Table::new("s", "t");
    let u = Table::new("s", "u");
    cat.add_table(
        &t,
        vec![
            stored("id", DataType::Integer, 8, None),
            stored("name", DataType::Text, 5, Some(5)),
        ],
    );
    cat.add_table(&u, vec![stored("id", DataType::Integer, 8, None)]);
    cat.add_existing_index(metadb_core::Column::new(&t, "id"));
    cat.add_existing_index(metadb_core::Column::new(&u, "id"));

    let store = MockStore::new();
    let to_u = Command {
        schema_name: "s".to_string(),
        table_name: "u".to_string(),
        columns: vec![column("id", DataType::Integer, 8, 1, json!(2), "2")],
        ..merge_command()
    };
    // different destination table forces a sub-batch cut
    execute(
        &cat,
        &store,
        vec![merge_command(), to_u],
        SyncMode::Normal,
    )
    .await
    .unwrap();

    let batches = store.transactions();
    assert_eq!(batches.len(), 2);
    assert!(batches[0][0].contains("\"s\".\"t__\""));
    assert!(batches[1][0].contains("\"s\".\"u__\""));
}
