use chrono::{DateTime, Duration, TimeZone, Utc};
use kvrel::catalog::types::Value;
use kvrel::config::StoreConfig;
use kvrel::{JsonField, KvRelStore, Trace, TraceQuery, record};
use serde_json::json;
use uuid::Uuid;

async fn store() -> KvRelStore {
    let store = KvRelStore::open_in_memory(StoreConfig::default()).expect("open");
    store.init().await.expect("init");
    store
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

fn span(name: &str, scope: &str, minutes: i64) -> Trace {
    let at = base() + Duration::minutes(minutes);
    let mut trace = Trace::new(Uuid::new_v4().to_string(), "trace-1", name, at)
        .with_scope(scope)
        .with_attributes(json!({"componentName": "agent", "attempt": minutes}));
    trace.status = Some(json!({"code": 0}).into());
    trace.events = Some(json!([]).into());
    trace.start_time = Some(at);
    trace.end_time = Some(at + Duration::seconds(1));
    trace
}

#[tokio::test]
async fn traces_filter_by_name_prefix_scope_and_attributes() {
    let store = store().await;
    let written = store
        .insert_traces(vec![
            span("agent.run", "libA", 1),
            span("agent.stream", "libA", 2),
            span("agent.run", "libB", 3),
            span("tool.call", "libA", 4),
        ])
        .await
        .expect("insert");
    assert_eq!(written, 4);

    let all = store.get_traces(&TraceQuery::default()).await.expect("all");
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].name, "tool.call", "most recent first");

    let agent = store
        .get_traces(&TraceQuery::default().with_name("agent."))
        .await
        .expect("prefix");
    assert_eq!(agent.len(), 3);

    let scoped = store
        .get_traces(&TraceQuery::default().with_name("agent").with_scope("libA"))
        .await
        .expect("prefix and scope");
    let names: Vec<&str> = scoped.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["agent.stream", "agent.run"]);

    let by_attr = store
        .get_traces(&TraceQuery::default().with_attribute("attempt", 3))
        .await
        .expect("attribute");
    assert_eq!(by_attr.len(), 1);
    assert_eq!(by_attr[0].scope.as_deref(), Some("libB"));
    assert_eq!(by_attr[0].status, Some(JsonField::Parsed(json!({"code": 0}))));
    assert_eq!(by_attr[0].kind, "internal");
    assert_eq!(by_attr[0].start_time, Some(base() + Duration::minutes(3)));

    let none = store
        .get_traces(
            &TraceQuery::default()
                .with_attribute("componentName", "agent")
                .with_scope("missing"),
        )
        .await
        .expect("no match");
    assert!(none.is_empty());
}

#[tokio::test]
async fn traces_paginate_from_page_zero() {
    let store = store().await;
    let spans: Vec<Trace> = (0..7).map(|i| span("page.span", "lib", i)).collect();
    store.insert_traces(spans).await.expect("insert");

    let first = store.get_traces(&TraceQuery::page(0, 3)).await.expect("page 0");
    let second = store.get_traces(&TraceQuery::page(1, 3)).await.expect("page 1");
    let last = store.get_traces(&TraceQuery::page(2, 3)).await.expect("page 2");
    let beyond = store.get_traces(&TraceQuery::page(3, 3)).await.expect("page 3");
    assert_eq!((first.len(), second.len(), last.len(), beyond.len()), (3, 3, 1, 0));
    assert!(first[0].created_at > second[0].created_at);
    assert_eq!(last[0].created_at, base());
}

#[tokio::test]
async fn traces_filter_by_created_at_range() {
    let store = store().await;
    let spans: Vec<Trace> = (0..5).map(|i| span("ranged", "lib", i * 10)).collect();
    store.insert_traces(spans).await.expect("insert");

    let query = TraceQuery::default().between(
        Some(base() + Duration::minutes(10)),
        Some(base() + Duration::minutes(30)),
    );
    let hits = store.get_traces(&query).await.expect("range");
    let minutes: Vec<i64> = hits
        .iter()
        .map(|t| (t.created_at - base()).num_minutes())
        .collect();
    assert_eq!(minutes, vec![30, 20, 10]);

    let inverted = TraceQuery::default().between(Some(base() + Duration::hours(1)), Some(base()));
    assert!(store.get_traces(&inverted).await.expect("inverted").is_empty());
}

#[tokio::test]
async fn malformed_json_columns_come_back_raw() {
    let store = store().await;
    store
        .insert(
            "traces",
            record([
                ("id", Value::from("broken")),
                ("traceId", Value::from("t")),
                ("name", Value::from("broken.span")),
                ("kind", Value::from("internal")),
                ("attributes", Value::from("{invalid json")),
                ("status", Value::from("{\"code\":1}")),
                ("createdAt", Value::from(base())),
            ]),
        )
        .await
        .expect("insert");

    let traces = store
        .get_traces(&TraceQuery::default().with_name("broken"))
        .await
        .expect("query");
    assert_eq!(traces.len(), 1);
    assert_eq!(
        traces[0].attributes,
        Some(JsonField::Raw("{invalid json".into()))
    );
    assert_eq!(traces[0].status, Some(JsonField::Parsed(json!({"code": 1}))));
    assert_eq!(traces[0].start_time, None);

    store
        .insert(
            "traces",
            record([
                ("id", Value::from("bad-status")),
                ("traceId", Value::from("t")),
                ("name", Value::from("status.span")),
                ("kind", Value::from("internal")),
                ("status", Value::from("invalid-json{")),
                ("createdAt", Value::from(base())),
            ]),
        )
        .await
        .expect("insert");
    let traces = store
        .get_traces(&TraceQuery::default().with_name("status."))
        .await
        .expect("query");
    assert_eq!(traces.len(), 1);
    assert_eq!(
        traces[0].status,
        Some(JsonField::Raw("invalid-json{".into()))
    );
    assert_eq!(traces[0].attributes, None);
}
