use crate::KvRelStore;
use crate::catalog::tables::{BY_AGENT, TABLE_EVALS};
use crate::catalog::types::{JsonField, Record, Value, record};
use crate::error::KvRelError;
use crate::query::executor::{Source, collect_candidates, load_members};
use crate::query::plan::{EvalKind, ScoreRange};
use crate::repository::{
    IntoRecord, RecordDecodeError, TryFromRecord, decode_records, json_at, json_value,
    opt_json_at, opt_text_at, text_at, timestamp_at,
};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct EvalRecord {
    pub run_id: String,
    pub global_run_id: String,
    pub agent_name: String,
    pub input: String,
    pub output: String,
    pub result: JsonField,
    pub metric_name: String,
    pub instructions: Option<String>,
    /// Present only on evals recorded by a test run.
    pub test_info: Option<JsonField>,
    pub created_at: DateTime<Utc>,
}

impl EvalRecord {
    pub fn kind(&self) -> EvalKind {
        if self.test_info.is_some() {
            EvalKind::Test
        } else {
            EvalKind::Live
        }
    }
}

impl TryFromRecord for EvalRecord {
    fn try_from_record(record: Record) -> Result<Self, RecordDecodeError> {
        Ok(Self {
            run_id: text_at(&record, "run_id")?,
            global_run_id: text_at(&record, "global_run_id")?,
            agent_name: text_at(&record, "agent_name")?,
            input: text_at(&record, "input")?,
            output: text_at(&record, "output")?,
            result: json_at(&record, "result")?,
            metric_name: text_at(&record, "metric_name")?,
            instructions: opt_text_at(&record, "instructions")?,
            test_info: opt_json_at(&record, "test_info")?,
            created_at: timestamp_at(&record, "created_at")?,
        })
    }
}

impl IntoRecord for EvalRecord {
    fn into_record(self) -> Record {
        record([
            ("run_id", Value::from(self.run_id)),
            ("global_run_id", Value::from(self.global_run_id)),
            ("agent_name", Value::from(self.agent_name)),
            ("input", Value::from(self.input)),
            ("output", Value::from(self.output)),
            ("result", self.result.into_value()),
            ("metric_name", Value::from(self.metric_name)),
            ("instructions", Value::from(self.instructions)),
            ("test_info", json_value(self.test_info)),
            ("created_at", Value::from(self.created_at)),
        ])
    }
}

impl KvRelStore {
    pub async fn save_eval(&self, eval: EvalRecord) -> Result<EvalRecord, KvRelError> {
        self.ready()?
            .insert(TABLE_EVALS, eval.clone().into_record())
            .await?;
        Ok(eval)
    }

    /// Evals of one agent, most recent first. `kind` narrows to live or test
    /// evals; an unknown agent yields nothing.
    pub async fn get_evals_by_agent_name(
        &self,
        agent_name: &str,
        kind: Option<EvalKind>,
    ) -> Result<Vec<EvalRecord>, KvRelError> {
        let tables = self.ready()?;
        let schema = tables.schema(TABLE_EVALS).await?;
        let members: Vec<String> = collect_candidates(
            tables,
            &schema,
            &[Source::group(BY_AGENT, &[agent_name])],
            ScoreRange::ALL,
        )
        .await?
        .into_iter()
        .map(|m| m.member)
        .collect();
        let rows = load_members(tables, &schema, &members).await?;
        let evals: Vec<EvalRecord> = decode_records(rows)?;
        Ok(match kind {
            Some(kind) => evals.into_iter().filter(|e| e.kind() == kind).collect(),
            None => evals,
        })
    }
}
