//! Live Postgres tests.
//!
//! Ignored by default. Point the `DB_*` variables at a server where the
//! user may create databases, then run:
//!
//! ```text
//! DB_HOST=localhost DB_USER=postgres DB_PASS=postgres cargo test -- --ignored
//! ```
//!
//! Every test works in its own throwaway database.

use serde_json::{Value, json};
use tablesync::*;

fn unique_name(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

async fn fresh_helper() -> DbHelper {
    let config = Config::from_env()
        .expect("DB_* configuration")
        .with_database(unique_name("tablesync_test"));
    let helper = DbHelper::new(config);
    assert!(helper.initialize().await.expect("create test database"));
    helper
}

async fn drop_database(helper: &DbHelper) {
    let admin = DbHelper::new(helper.config().with_database("postgres"));
    let sql = format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", quote_ident(&helper.config().database));
    admin.run(&Command::raw(sql)).await.expect("drop test database");
}

fn items_table() -> TableSchema {
    TableSchema::new("items")
        .column(ColumnSchema::typed("position", ColumnType::Integer).not_null())
        .column(ColumnSchema::typed("label", ColumnType::String))
}

#[tokio::test]
#[ignore = "requires a running Postgres server"]
async fn ensure_database_exists_creates_once() {
    let config = Config::from_env().expect("DB_* configuration");
    let manager = ConnectionManager::new(config.clone());
    let name = unique_name("tablesync_ensure");

    assert!(manager.ensure_database_exists(&name).await.unwrap());
    assert!(!manager.ensure_database_exists(&name).await.unwrap());

    drop_database(&DbHelper::new(config.with_database(name))).await;
}

#[tokio::test]
#[ignore = "requires a running Postgres server"]
async fn reconcile_twice_changes_nothing_the_second_time() {
    let helper = fresh_helper().await;
    let tables = vec![items_table()];

    let first = helper.load_tables(&tables).await.unwrap();
    assert_eq!(first.mutations(), 1);

    let second = helper.load_tables(&tables).await.unwrap();
    assert!(second.is_noop());

    // A new column is added; the existing ones stay put.
    let grown = vec![items_table().column(ColumnSchema::typed("weight", ColumnType::Integer))];
    let third = helper.load_tables(&grown).await.unwrap();
    assert_eq!(
        third.tables,
        vec![TableChange::ColumnsAdded {
            table: "items".into(),
            columns: vec!["weight".into()],
        }]
    );

    drop_database(&helper).await;
}

#[tokio::test]
#[ignore = "requires a running Postgres server"]
async fn list_pages_through_rows() {
    let helper = fresh_helper().await;
    helper.load_tables(&vec![items_table()]).await.unwrap();

    let records: Vec<Value> = (1..=25)
        .map(|i| json!({"position": i, "label": format!("item {i}")}))
        .collect();
    let inserted = helper
        .run(&Command::insert("items", Value::Array(records)).unwrap())
        .await
        .unwrap();
    assert!(matches!(inserted, CrudOutcome::Ids(ref ids) if ids.len() == 25));

    let mut seen = Vec::new();
    for (page, expected) in [(1, 10), (2, 10), (3, 5), (4, 0)] {
        let rows = helper
            .run(&Command::list("items", page, 10).unwrap())
            .await
            .unwrap()
            .into_rows();
        assert_eq!(rows.len(), expected, "page {page}");
        seen.extend(rows.iter().filter_map(|row| row["position"].as_i64()));
    }

    // Pages never overlap and together cover every row.
    seen.sort_unstable();
    assert_eq!(seen, (1..=25).collect::<Vec<i64>>());

    drop_database(&helper).await;
}

#[tokio::test]
#[ignore = "requires a running Postgres server"]
async fn inserted_record_loads_back_with_server_defaults() {
    let helper = fresh_helper().await;
    helper.load_tables(&vec![items_table()]).await.unwrap();

    let request: CrudRequest = serde_json::from_value(json!({
        "commandName": "insert",
        "tableName": "items",
        "data": {"position": 7, "label": "seven"}
    }))
    .unwrap();
    let ids = match helper.execute(request).await.unwrap() {
        CrudOutcome::Ids(ids) => ids,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(ids.len(), 1);

    let rows = helper
        .execute(
            serde_json::from_value(json!({
                "commandName": "load",
                "tableName": "items",
                "conditions": {"id": ids[0]}
            }))
            .unwrap(),
        )
        .await
        .unwrap()
        .into_rows();

    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row["id"], ids[0]);
    assert_eq!(row["position"], json!(7));
    assert_eq!(row["label"], json!("seven"));
    assert!(row["createdDate_tz"].is_string());
    assert!(row["deletedDate_tz"].is_null());

    let updated = helper
        .run(
            &Command::update(
                "items",
                json!({"id": ids[0]}).as_object().cloned().unwrap(),
                json!({"label": "SEVEN"}).as_object().cloned().unwrap(),
            )
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(updated, CrudOutcome::Affected(1));

    let deleted = helper
        .run(&Command::del("items", json!({"id": ids[0]}).as_object().cloned().unwrap()).unwrap())
        .await
        .unwrap();
    assert_eq!(deleted, CrudOutcome::Affected(1));

    drop_database(&helper).await;
}

#[tokio::test]
#[ignore = "requires a running Postgres server"]
async fn raw_sql_errors_are_surfaced() {
    let helper = fresh_helper().await;
    let err = helper
        .run(&Command::raw("SELEC nonsense"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Database(_)));
    drop_database(&helper).await;
}

#[tokio::test]
#[ignore = "requires a running Postgres server"]
async fn text_columns_keep_values_that_look_like_other_types() {
    let helper = fresh_helper().await;
    helper.load_tables(&vec![items_table()]).await.unwrap();

    let labels = [
        json!("2024-03-01T10:00:00Z"),
        json!("A0EEBC99-9C0B-4EF8-BB6D-6BB9BD380A11"),
        json!("42"),
    ];
    for (position, label) in labels.iter().enumerate() {
        helper
            .run(&Command::insert("items", json!({"position": position, "label": label})).unwrap())
            .await
            .unwrap();
    }

    for label in &labels {
        let rows = helper
            .run(&Command::load("items", json!({"label": label}).as_object().cloned().unwrap()))
            .await
            .unwrap()
            .into_rows();
        assert_eq!(rows.len(), 1, "label {label}");
        assert_eq!(&rows[0]["label"], label);
    }

    // A JSON number compares against a text column as its text.
    let rows = helper
        .run(&Command::load("items", json!({"label": 42}).as_object().cloned().unwrap()))
        .await
        .unwrap()
        .into_rows();
    assert_eq!(rows.len(), 1);

    // And a string compares against an integer column as a number.
    let rows = helper
        .run(&Command::load("items", json!({"position": "1"}).as_object().cloned().unwrap()))
        .await
        .unwrap()
        .into_rows();
    assert_eq!(rows[0]["label"], labels[1]);

    drop_database(&helper).await;
}

#[tokio::test]
#[ignore = "requires a running Postgres server"]
async fn numeric_results_are_decoded() {
    let helper = fresh_helper().await;
    helper.load_tables(&vec![items_table()]).await.unwrap();
    let records: Vec<Value> = (1..=4).map(|i| json!({"position": i})).collect();
    helper
        .run(&Command::insert("items", Value::Array(records)).unwrap())
        .await
        .unwrap();

    let rows = helper
        .run(&Command::raw("SELECT avg(position) AS mean FROM items"))
        .await
        .unwrap()
        .into_rows();
    let mean: f64 = rows[0]["mean"].as_str().unwrap().parse().unwrap();
    assert_eq!(mean, 2.5);

    // Types without a decoder are reported, not turned into null.
    let err = helper
        .run(&Command::raw("SELECT interval '1 day' AS span"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Database(_)));

    drop_database(&helper).await;
}
