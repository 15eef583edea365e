use crate::catalog::schema::{ColumnDef, IndexDef, IndexOrder, TableSchema};
use crate::catalog::types::ColumnType;

pub const TABLE_THREADS: &str = "threads";
pub const TABLE_MESSAGES: &str = "messages";
pub const TABLE_WORKFLOW_SNAPSHOT: &str = "workflow_snapshot";
pub const TABLE_EVALS: &str = "evals";
pub const TABLE_TRACES: &str = "traces";

pub const BY_RESOURCE: &str = "by_resource";
pub const BY_THREAD: &str = "by_thread";
pub const BY_NAMESPACE: &str = "by_namespace";
pub const BY_WORKFLOW: &str = "by_workflow";
pub const BY_WORKFLOW_NAME: &str = "by_workflow_name";
pub const BY_AGENT: &str = "by_agent";
pub const BY_NAME: &str = "by_name";
pub const BY_SCOPE: &str = "by_scope";
pub const BY_ATTRIBUTE: &str = "by_attribute";

fn col(name: &str, col_type: ColumnType) -> ColumnDef {
    ColumnDef::new(name, col_type)
}

fn by_created_at() -> IndexOrder {
    IndexOrder::Column("createdAt".into())
}

pub fn threads() -> TableSchema {
    TableSchema::new(TABLE_THREADS)
        .column(col("id", ColumnType::Text))
        .column(col("resourceId", ColumnType::Text))
        .column(col("title", ColumnType::Text).nullable())
        .column(col("metadata", ColumnType::Json).nullable())
        .column(col("createdAt", ColumnType::Timestamp))
        .column(col("updatedAt", ColumnType::Timestamp))
        .primary_key(&["id"])
        .ordered_by("createdAt")
        .index(IndexDef::columns(BY_RESOURCE, &["resourceId"], by_created_at()))
}

pub fn messages() -> TableSchema {
    TableSchema::new(TABLE_MESSAGES)
        .column(col("id", ColumnType::Text))
        .column(col("thread_id", ColumnType::Text))
        .column(col("role", ColumnType::Text))
        .column(col("type", ColumnType::Text).nullable())
        .column(col("content", ColumnType::Json))
        .column(col("createdAt", ColumnType::Timestamp))
        .column(col("resourceId", ColumnType::Text).nullable())
        .primary_key(&["id"])
        .index(IndexDef::columns(BY_THREAD, &["thread_id"], IndexOrder::Insertion))
}

pub fn workflow_snapshot() -> TableSchema {
    TableSchema::new(TABLE_WORKFLOW_SNAPSHOT)
        .column(col("workflow_name", ColumnType::Text))
        .column(col("run_id", ColumnType::Text))
        .column(col("namespace", ColumnType::Text))
        .column(col("snapshot", ColumnType::Json))
        .column(col("resourceId", ColumnType::Text).nullable())
        .column(col("createdAt", ColumnType::Timestamp))
        .column(col("updatedAt", ColumnType::Timestamp))
        .primary_key(&["namespace", "workflow_name", "run_id"])
        .ordered_by("createdAt")
        .index(IndexDef::columns(BY_NAMESPACE, &["namespace"], by_created_at()))
        .index(IndexDef::columns(
            BY_WORKFLOW,
            &["namespace", "workflow_name"],
            by_created_at(),
        ))
        .index(IndexDef::columns(
            BY_WORKFLOW_NAME,
            &["workflow_name"],
            by_created_at(),
        ))
        .index(IndexDef::columns(BY_RESOURCE, &["resourceId"], by_created_at()))
}

pub fn evals() -> TableSchema {
    TableSchema::new(TABLE_EVALS)
        .column(col("input", ColumnType::Text))
        .column(col("output", ColumnType::Text))
        .column(col("result", ColumnType::Json))
        .column(col("agent_name", ColumnType::Text))
        .column(col("metric_name", ColumnType::Text))
        .column(col("instructions", ColumnType::Text).nullable())
        .column(col("test_info", ColumnType::Json).nullable())
        .column(col("global_run_id", ColumnType::Text))
        .column(col("run_id", ColumnType::Text))
        .column(col("created_at", ColumnType::Timestamp))
        .primary_key(&["run_id"])
        .ordered_by("created_at")
        .index(IndexDef::columns(
            BY_AGENT,
            &["agent_name"],
            IndexOrder::Column("created_at".into()),
        ))
}

pub fn traces() -> TableSchema {
    TableSchema::new(TABLE_TRACES)
        .column(col("id", ColumnType::Text))
        .column(col("parentSpanId", ColumnType::Text).nullable())
        .column(col("traceId", ColumnType::Text))
        .column(col("name", ColumnType::Text))
        .column(col("scope", ColumnType::Text).nullable())
        .column(col("kind", ColumnType::Text))
        .column(col("status", ColumnType::Json).nullable())
        .column(col("events", ColumnType::Json).nullable())
        .column(col("links", ColumnType::Json).nullable())
        .column(col("attributes", ColumnType::Json).nullable())
        .column(col("startTime", ColumnType::Timestamp).nullable())
        .column(col("endTime", ColumnType::Timestamp).nullable())
        .column(col("other", ColumnType::Json).nullable())
        .column(col("createdAt", ColumnType::Timestamp))
        .primary_key(&["id"])
        .ordered_by("createdAt")
        .index(IndexDef::columns(BY_NAME, &["name"], by_created_at()).with_group_directory())
        .index(IndexDef::columns(BY_SCOPE, &["scope"], by_created_at()))
        .index(IndexDef::json_entries(BY_ATTRIBUTE, "attributes", by_created_at()))
}

/// Every fixed table, in declaration order.
pub fn builtin_tables() -> Vec<TableSchema> {
    vec![
        threads(),
        messages(),
        workflow_snapshot(),
        evals(),
        traces(),
    ]
}
