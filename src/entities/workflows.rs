use crate::KvRelStore;
use crate::catalog::tables::{
    BY_NAMESPACE, BY_RESOURCE, BY_WORKFLOW, BY_WORKFLOW_NAME, TABLE_WORKFLOW_SNAPSHOT,
};
use crate::catalog::types::{JsonField, Record, Value, record};
use crate::error::KvRelError;
use crate::query::executor::{Source, collect_candidates, load_members, paginate};
use crate::query::plan::{ScoreRange, WorkflowRunsQuery};
use crate::repository::{
    IntoRecord, RecordDecodeError, TryFromRecord, decode_records, json_at, opt_text_at, text_at,
    timestamp_at,
};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// One persisted workflow snapshot, keyed by namespace, workflow and run.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRun {
    pub namespace: String,
    pub workflow_name: String,
    pub run_id: String,
    pub snapshot: JsonField,
    pub resource_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(
        namespace: impl Into<String>,
        workflow_name: impl Into<String>,
        run_id: impl Into<String>,
        snapshot: impl Into<JsonField>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            workflow_name: workflow_name.into(),
            run_id: run_id.into(),
            snapshot: snapshot.into(),
            resource_id: None,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }
}

impl TryFromRecord for WorkflowRun {
    fn try_from_record(record: Record) -> Result<Self, RecordDecodeError> {
        Ok(Self {
            namespace: text_at(&record, "namespace")?,
            workflow_name: text_at(&record, "workflow_name")?,
            run_id: text_at(&record, "run_id")?,
            snapshot: json_at(&record, "snapshot")?,
            resource_id: opt_text_at(&record, "resourceId")?,
            created_at: timestamp_at(&record, "createdAt")?,
            updated_at: timestamp_at(&record, "updatedAt")?,
        })
    }
}

impl IntoRecord for WorkflowRun {
    fn into_record(self) -> Record {
        record([
            ("namespace", Value::from(self.namespace)),
            ("workflow_name", Value::from(self.workflow_name)),
            ("run_id", Value::from(self.run_id)),
            ("snapshot", self.snapshot.into_value()),
            ("resourceId", Value::from(self.resource_id)),
            ("createdAt", Value::from(self.created_at)),
            ("updatedAt", Value::from(self.updated_at)),
        ])
    }
}

/// A page of runs plus the number of runs matching before pagination.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRuns {
    pub runs: Vec<WorkflowRun>,
    pub total: usize,
}

fn run_key(namespace: &str, workflow_name: &str, run_id: &str) -> [Value; 3] {
    [
        Value::from(namespace),
        Value::from(workflow_name),
        Value::from(run_id),
    ]
}

impl KvRelStore {
    pub async fn save_workflow_run(&self, run: WorkflowRun) -> Result<WorkflowRun, KvRelError> {
        self.ready()?
            .insert(TABLE_WORKFLOW_SNAPSHOT, run.clone().into_record())
            .await?;
        Ok(run)
    }

    /// Upserts the snapshot of a run. A run persisted before keeps its
    /// `created_at` and resource; `updated_at` is refreshed.
    pub async fn persist_workflow_snapshot(
        &self,
        namespace: &str,
        workflow_name: &str,
        run_id: &str,
        snapshot: JsonValue,
    ) -> Result<WorkflowRun, KvRelError> {
        let now = Utc::now();
        let run = match self
            .get_workflow_run_by_id(namespace, workflow_name, run_id)
            .await?
        {
            Some(existing) => WorkflowRun {
                snapshot: JsonField::Parsed(snapshot),
                updated_at: now,
                ..existing
            },
            None => WorkflowRun::new(namespace, workflow_name, run_id, snapshot, now),
        };
        self.save_workflow_run(run).await
    }

    pub async fn load_workflow_snapshot(
        &self,
        namespace: &str,
        workflow_name: &str,
        run_id: &str,
    ) -> Result<Option<JsonField>, KvRelError> {
        Ok(self
            .get_workflow_run_by_id(namespace, workflow_name, run_id)
            .await?
            .map(|run| run.snapshot))
    }

    pub async fn get_workflow_run_by_id(
        &self,
        namespace: &str,
        workflow_name: &str,
        run_id: &str,
    ) -> Result<Option<WorkflowRun>, KvRelError> {
        let row = self
            .ready()?
            .load(
                TABLE_WORKFLOW_SNAPSHOT,
                &run_key(namespace, workflow_name, run_id),
            )
            .await?;
        Ok(row.map(WorkflowRun::try_from_record).transpose()?)
    }

    /// Runs matching every filter of `query`, most recent first.
    pub async fn get_workflow_runs(
        &self,
        query: &WorkflowRunsQuery,
    ) -> Result<WorkflowRuns, KvRelError> {
        let tables = self.ready()?;
        let schema = tables.schema(TABLE_WORKFLOW_SNAPSHOT).await?;

        let mut sources = Vec::new();
        match (query.namespace.as_deref(), query.workflow_name.as_deref()) {
            (Some(ns), Some(wf)) => sources.push(Source::group(BY_WORKFLOW, &[ns, wf])),
            (None, Some(wf)) => sources.push(Source::group(BY_WORKFLOW_NAME, &[wf])),
            (Some(ns), None) => sources.push(Source::group(BY_NAMESPACE, &[ns])),
            (None, None) => {}
        }
        if let Some(resource_id) = query.resource_id.as_deref() {
            sources.push(Source::group(BY_RESOURCE, &[resource_id]));
        }

        let range = ScoreRange::from_dates(query.from_date, query.to_date);
        let candidates = collect_candidates(tables, &schema, &sources, range).await?;
        let total = candidates.len();
        let page: Vec<String> = paginate(candidates, query.offset.unwrap_or(0), query.limit)
            .into_iter()
            .map(|m| m.member)
            .collect();
        let rows = load_members(tables, &schema, &page).await?;
        Ok(WorkflowRuns {
            runs: decode_records(rows)?,
            total,
        })
    }
}
