use chrono::{TimeZone, Utc};
use kvrel::catalog::schema::TableSchema;
use kvrel::catalog::types::Value;
use kvrel::config::StoreConfig;
use kvrel::storage::memory::MemoryBackend;
use kvrel::{ColumnDef, ColumnType, IndexDef, IndexOrder, JsonField, KvRelStore, record};
use serde_json::json;
use std::sync::Arc;

fn events_table() -> TableSchema {
    TableSchema::new("events")
        .column(ColumnDef::new("id", ColumnType::Text))
        .column(ColumnDef::new("kind", ColumnType::Text))
        .column(ColumnDef::new("payload", ColumnType::Json).nullable())
        .column(ColumnDef::new("weight", ColumnType::Float).nullable())
        .column(ColumnDef::new("createdAt", ColumnType::Timestamp))
        .primary_key(&["id"])
        .ordered_by("createdAt")
        .index(IndexDef::columns(
            "by_kind",
            &["kind"],
            IndexOrder::Column("createdAt".into()),
        ))
}

async fn open(config: StoreConfig) -> (KvRelStore, Arc<MemoryBackend>) {
    let kv = Arc::new(MemoryBackend::new());
    let store = KvRelStore::open(config, kv.clone()).expect("open");
    store.init().await.expect("init");
    store.create_table(events_table()).await.expect("events table");
    (store, kv)
}

#[tokio::test]
async fn insert_then_load_materializes_columns() {
    let (store, _kv) = open(StoreConfig::default()).await;
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
    store
        .insert(
            "events",
            record([
                ("id", Value::from("e1")),
                ("kind", Value::from("click")),
                ("payload", Value::from(json!({"x": 1, "nested": [1, 2]}))),
                ("weight", Value::Integer(3)),
                ("createdAt", Value::Integer(at.timestamp_millis())),
            ]),
        )
        .await
        .expect("insert");

    let row = store
        .load("events", &[Value::from("e1")])
        .await
        .expect("load")
        .expect("row present");
    assert_eq!(row["kind"], Value::from("click"));
    assert_eq!(row["weight"], Value::Float(3.0));
    assert_eq!(row["createdAt"], Value::Timestamp(at));
    assert_eq!(
        JsonField::from_value(row["payload"].clone()),
        Some(JsonField::Parsed(json!({"x": 1, "nested": [1, 2]})))
    );
    assert_eq!(
        store.load("events", &[Value::from("missing")]).await.expect("load"),
        None
    );
}

#[tokio::test]
async fn constraint_violations_are_rejected() {
    let (store, _kv) = open(StoreConfig::default()).await;
    let now = Value::from(Utc::now());

    let err = store
        .insert("events", record([("kind", Value::from("a")), ("createdAt", now.clone())]))
        .await
        .expect_err("missing pk");
    assert_eq!(err.code_str(), "missing_primary_key");

    let err = store
        .insert(
            "events",
            record([
                ("id", Value::from("e1")),
                ("kind", Value::from("a")),
                ("createdAt", now.clone()),
                ("color", Value::from("red")),
            ]),
        )
        .await
        .expect_err("unknown column");
    assert_eq!(err.code_str(), "unknown_column");

    let err = store
        .insert(
            "events",
            record([("id", Value::from("e1")), ("createdAt", now.clone())]),
        )
        .await
        .expect_err("kind is required");
    assert_eq!(err.code_str(), "not_null_violation");

    let err = store
        .insert(
            "events",
            record([
                ("id", Value::from("e1")),
                ("kind", Value::from("a")),
                ("createdAt", Value::Boolean(true)),
            ]),
        )
        .await
        .expect_err("bad timestamp");
    assert_eq!(err.code_str(), "type_mismatch");
    assert!(err.is_constraint_violation());

    let err = store
        .insert("nope", record([("id", Value::from("x"))]))
        .await
        .expect_err("unknown table");
    assert_eq!(err.code_str(), "table_not_found");
}

#[tokio::test]
async fn redeclaration_merges_compatible_columns_only() {
    let (store, _kv) = open(StoreConfig::default()).await;

    let widened = events_table().column(ColumnDef::new("source", ColumnType::Text).nullable());
    let merged = store.create_table(widened).await.expect("compatible");
    assert!(merged.find_column("source").is_some());
    assert!(merged.find_column("payload").is_some());

    let narrowed = events_table().column(ColumnDef::new("source", ColumnType::Integer).nullable());
    let err = store.create_table(narrowed).await.expect_err("type change");
    assert_eq!(err.code_str(), "incompatible_schema");

    let required = events_table().column(ColumnDef::new("owner", ColumnType::Text));
    let err = store.create_table(required).await.expect_err("non-null addition");
    assert_eq!(err.code_str(), "incompatible_schema");

    let bad = TableSchema::new("__hidden")
        .column(ColumnDef::new("id", ColumnType::Text))
        .primary_key(&["id"]);
    let err = store.create_table(bad).await.expect_err("reserved name");
    assert_eq!(err.code_str(), "invalid_schema");
}

#[tokio::test]
async fn batch_insert_resolves_duplicates_last_wins() {
    let (store, _kv) = open(StoreConfig::default().with_batch_chunk_rows(2)).await;
    let now = Value::from(Utc::now());
    let rows = vec![
        record([("id", Value::from("a")), ("kind", Value::from("first")), ("createdAt", now.clone())]),
        record([("id", Value::from("b")), ("kind", Value::from("x")), ("createdAt", now.clone())]),
        record([("id", Value::from("a")), ("kind", Value::from("second")), ("createdAt", now.clone())]),
        record([("id", Value::from("c")), ("kind", Value::from("x")), ("createdAt", now.clone())]),
    ];
    let written = store.batch_insert("events", rows).await.expect("batch");
    assert_eq!(written, 3);

    let a = store
        .load("events", &[Value::from("a")])
        .await
        .expect("load")
        .expect("a");
    assert_eq!(a["kind"], Value::from("second"));
}

#[tokio::test]
async fn failure_mid_batch_keeps_completed_chunks() {
    let plain = TableSchema::new("plain")
        .column(ColumnDef::new("id", ColumnType::Integer))
        .column(ColumnDef::new("body", ColumnType::Text))
        .primary_key(&["id"]);
    let (store, kv) = open(StoreConfig::default().with_batch_chunk_rows(10)).await;
    store.create_table(plain).await.expect("plain table");

    // One chunk without indexes costs a sequence bump, the registry update
    // and the row write.
    kv.fail_writes_after(3);
    let rows: Vec<_> = (0..25i64)
        .map(|i| record([("id", Value::Integer(i)), ("body", Value::from(format!("row {i}")))]))
        .collect();
    let err = store.batch_insert("plain", rows).await.expect_err("injected failure");
    assert_eq!(err.code_str(), "backend");
    kv.heal();

    for i in 0..10i64 {
        assert!(
            store.load("plain", &[Value::Integer(i)]).await.expect("load").is_some(),
            "row {i} of the first chunk survives"
        );
    }
    assert_eq!(store.load("plain", &[Value::Integer(15)]).await.expect("load"), None);
}

#[tokio::test]
async fn clear_table_drops_rows_and_indexes_but_keeps_schema() {
    let (store, kv) = open(StoreConfig::default().with_key_prefix("app")).await;
    let rows: Vec<_> = (0..5)
        .map(|i| {
            record([
                ("id", Value::from(format!("e{i}"))),
                ("kind", Value::from(if i % 2 == 0 { "even" } else { "odd" })),
                ("createdAt", Value::from(Utc::now())),
            ])
        })
        .collect();
    store.batch_insert("events", rows).await.expect("batch");
    assert!(store.delete("events", &[Value::from("e0")]).await.expect("delete"));
    assert!(!store.delete("events", &[Value::from("e0")]).await.expect("delete again"));

    store.clear_table("events").await.expect("clear");
    assert_eq!(store.load("events", &[Value::from("e1")]).await.expect("load"), None);
    assert!(
        kv.keys()
            .iter()
            .all(|k| !k.starts_with("app:events:") && !k.contains("events:by_kind")),
        "leftover keys: {:?}",
        kv.keys()
    );
    assert!(kv.keys().contains(&"app:__schema:events".to_string()));

    store
        .insert(
            "events",
            record([
                ("id", Value::from("again")),
                ("kind", Value::from("x")),
                ("createdAt", Value::from(Utc::now())),
            ]),
        )
        .await
        .expect("table usable after clear");
}

#[tokio::test]
async fn rows_written_before_a_failed_index_update_are_still_cleared() {
    let (store, kv) = open(StoreConfig::default()).await;
    // The sequence bump, the registry update and the row write succeed; the
    // index update that follows fails.
    kv.fail_writes_after(3);
    let err = store
        .insert(
            "events",
            record([
                ("id", Value::from("orphan")),
                ("kind", Value::from("click")),
                ("createdAt", Value::from(Utc::now())),
            ]),
        )
        .await
        .expect_err("index update fails");
    assert_eq!(err.code_str(), "backend");
    kv.heal();
    assert!(
        store
            .load("events", &[Value::from("orphan")])
            .await
            .expect("load")
            .is_some()
    );

    store.clear_table("events").await.expect("clear");
    assert_eq!(
        store.load("events", &[Value::from("orphan")]).await.expect("load"),
        None
    );
    assert!(
        kv.keys().iter().all(|k| !k.starts_with("events:")),
        "leftover keys: {:?}",
        kv.keys()
    );
}

#[tokio::test]
async fn key_prefixes_keep_stores_on_one_backend_apart() {
    let kv = Arc::new(MemoryBackend::new());
    let short = KvRelStore::open(StoreConfig::default().with_key_prefix("app"), kv.clone())
        .expect("open app");
    let long = KvRelStore::open(StoreConfig::default().with_key_prefix("appe"), kv.clone())
        .expect("open appe");
    short.init().await.expect("init app");
    long.init().await.expect("init appe");
    let table = |name: &str| {
        TableSchema::new(name)
            .column(ColumnDef::new("id", ColumnType::Text))
            .column(ColumnDef::new("body", ColumnType::Text))
            .primary_key(&["id"])
    };
    short.create_table(table("evx")).await.expect("evx");
    long.create_table(table("vx")).await.expect("vx");

    short
        .insert(
            "evx",
            record([("id", Value::from("k")), ("body", Value::from("from-app"))]),
        )
        .await
        .expect("insert");
    assert_eq!(long.load("vx", &[Value::from("k")]).await.expect("load"), None);

    long.insert(
        "vx",
        record([("id", Value::from("k")), ("body", Value::from("from-appe"))]),
    )
    .await
    .expect("insert");
    long.clear_table("vx").await.expect("clear");
    let kept = short
        .load("evx", &[Value::from("k")])
        .await
        .expect("load")
        .expect("row of the other store");
    assert_eq!(kept["body"], Value::from("from-app"));
}
