use chrono::{DateTime, Duration, TimeZone, Utc};
use kvrel::config::StoreConfig;
use kvrel::{JsonField, KvRelStore, WorkflowRun, WorkflowRunsQuery};
use serde_json::json;

const NS: &str = "default";

async fn store() -> KvRelStore {
    let store = KvRelStore::open_in_memory(StoreConfig::default()).expect("open");
    store.init().await.expect("init");
    store
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap()
}

fn run(workflow: &str, run_id: &str, days: i64) -> WorkflowRun {
    WorkflowRun::new(
        NS,
        workflow,
        run_id,
        json!({"runId": run_id, "value": "test", "context": {"steps": {}}}),
        base() + Duration::days(days),
    )
}

async fn seed(store: &KvRelStore) {
    for run in [
        run("wf-a", "run-1", 0),
        run("wf-b", "run-2", 1),
        run("wf-a", "run-3", 2).with_resource("resource-1"),
        run("wf-b", "run-4", 3).with_resource("resource-1"),
    ] {
        store.save_workflow_run(run).await.expect("save run");
    }
}

fn run_ids(runs: &[WorkflowRun]) -> Vec<&str> {
    runs.iter().map(|r| r.run_id.as_str()).collect()
}

#[tokio::test]
async fn snapshot_persist_and_load() {
    let store = store().await;
    let snapshot = json!({"status": "running", "context": {"input": {"n": 1}}});
    let first = store
        .persist_workflow_snapshot(NS, "wf", "run-1", snapshot.clone())
        .await
        .expect("persist");
    assert_eq!(
        store.load_workflow_snapshot(NS, "wf", "run-1").await.expect("load"),
        Some(JsonField::Parsed(snapshot))
    );

    let second = store
        .persist_workflow_snapshot(NS, "wf", "run-1", json!({"status": "done"}))
        .await
        .expect("persist again");
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at >= first.updated_at);
    assert_eq!(
        store.load_workflow_snapshot(NS, "wf", "run-1").await.expect("load"),
        Some(JsonField::Parsed(json!({"status": "done"})))
    );
    assert_eq!(
        store.load_workflow_snapshot(NS, "wf", "missing").await.expect("load"),
        None
    );
}

#[tokio::test]
async fn re_persisting_keeps_the_resource() {
    let store = store().await;
    store
        .save_workflow_run(run("wf", "run-r", 0).with_resource("resource-9"))
        .await
        .expect("save");
    let updated = store
        .persist_workflow_snapshot(NS, "wf", "run-r", json!({"step": 2}))
        .await
        .expect("persist");
    assert_eq!(updated.resource_id.as_deref(), Some("resource-9"));
    assert_eq!(updated.created_at, base());
}

#[tokio::test]
async fn runs_default_to_most_recent_first() {
    let store = store().await;
    seed(&store).await;
    let all = store
        .get_workflow_runs(&WorkflowRunsQuery::new())
        .await
        .expect("runs");
    assert_eq!(all.total, 4);
    assert_eq!(run_ids(&all.runs), vec!["run-4", "run-3", "run-2", "run-1"]);
    assert_eq!(all.runs[0].snapshot.get("runId"), Some(&json!("run-4")));
}

#[tokio::test]
async fn runs_filter_by_workflow_namespace_and_resource() {
    let store = store().await;
    seed(&store).await;
    store
        .save_workflow_run(WorkflowRun::new("other", "wf-a", "run-x", json!({}), base()))
        .await
        .expect("other namespace");

    let by_name = store
        .get_workflow_runs(&WorkflowRunsQuery::new().workflow_name("wf-a"))
        .await
        .expect("by name");
    assert_eq!(run_ids(&by_name.runs), vec!["run-3", "run-1", "run-x"]);

    let scoped = store
        .get_workflow_runs(&WorkflowRunsQuery::new().namespace(NS).workflow_name("wf-a"))
        .await
        .expect("namespace and name");
    assert_eq!(run_ids(&scoped.runs), vec!["run-3", "run-1"]);

    let namespace = store
        .get_workflow_runs(&WorkflowRunsQuery::new().namespace("other"))
        .await
        .expect("namespace");
    assert_eq!(namespace.total, 1);

    let by_resource = store
        .get_workflow_runs(
            &WorkflowRunsQuery::new()
                .workflow_name("wf-b")
                .resource_id("resource-1"),
        )
        .await
        .expect("resource");
    assert_eq!(run_ids(&by_resource.runs), vec!["run-4"]);
}

#[tokio::test]
async fn runs_filter_by_date_range_and_paginate() {
    let store = store().await;
    seed(&store).await;

    let ranged = store
        .get_workflow_runs(
            &WorkflowRunsQuery::new()
                .between(Some(base() + Duration::days(1)), Some(base() + Duration::days(2))),
        )
        .await
        .expect("range");
    assert_eq!(run_ids(&ranged.runs), vec!["run-3", "run-2"]);
    assert_eq!(ranged.total, 2);

    let page = store
        .get_workflow_runs(&WorkflowRunsQuery::new().paginate(2, 1))
        .await
        .expect("page");
    assert_eq!(page.total, 4);
    assert_eq!(run_ids(&page.runs), vec!["run-3", "run-2"]);

    let past_end = store
        .get_workflow_runs(&WorkflowRunsQuery::new().paginate(2, 10))
        .await
        .expect("past end");
    assert_eq!(past_end.total, 4);
    assert!(past_end.runs.is_empty());
}

#[tokio::test]
async fn run_by_id_is_an_exact_lookup() {
    let store = store().await;
    seed(&store).await;
    let found = store
        .get_workflow_run_by_id(NS, "wf-b", "run-2")
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(found.created_at, base() + Duration::days(1));
    assert_eq!(found.resource_id, None);
    assert!(
        store
            .get_workflow_run_by_id(NS, "wf-a", "run-2")
            .await
            .expect("lookup")
            .is_none()
    );
}

#[tokio::test]
async fn three_runs_page_by_two() {
    let store = store().await;
    for (run_id, days) in [("run-old", 0), ("run-mid", 1), ("run-new", 2)] {
        store
            .save_workflow_run(run("wf-page", run_id, days))
            .await
            .expect("save run");
    }

    let first = store
        .get_workflow_runs(&WorkflowRunsQuery::new().paginate(2, 0))
        .await
        .expect("first page");
    assert_eq!(first.total, 3);
    assert_eq!(run_ids(&first.runs), vec!["run-new", "run-mid"]);

    let second = store
        .get_workflow_runs(&WorkflowRunsQuery::new().paginate(2, 2))
        .await
        .expect("second page");
    assert_eq!(second.total, 3);
    assert_eq!(run_ids(&second.runs), vec!["run-old"]);
}
