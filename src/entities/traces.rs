use crate::KvRelStore;
use crate::catalog::tables::{BY_ATTRIBUTE, BY_NAME, BY_SCOPE, TABLE_TRACES};
use crate::catalog::types::{JsonField, Record, Value, record};
use crate::error::KvRelError;
use crate::query::executor::{Source, collect_candidates, load_members, paginate};
use crate::query::plan::{ScoreRange, TraceQuery};
use crate::repository::{
    IntoRecord, RecordDecodeError, TryFromRecord, decode_records, json_value, opt_json_at,
    opt_text_at, opt_timestamp_at, text_at, timestamp_at,
};
use chrono::{DateTime, Utc};

/// One span. JSON columns come back as [`JsonField`] so malformed stored
/// text is still readable.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub id: String,
    pub parent_span_id: Option<String>,
    pub trace_id: String,
    pub name: String,
    pub scope: Option<String>,
    pub kind: String,
    pub status: Option<JsonField>,
    pub events: Option<JsonField>,
    pub links: Option<JsonField>,
    pub attributes: Option<JsonField>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub other: Option<JsonField>,
    pub created_at: DateTime<Utc>,
}

impl Trace {
    pub fn new(
        id: impl Into<String>,
        trace_id: impl Into<String>,
        name: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            parent_span_id: None,
            trace_id: trace_id.into(),
            name: name.into(),
            scope: None,
            kind: "internal".to_string(),
            status: None,
            events: None,
            links: None,
            attributes: None,
            start_time: None,
            end_time: None,
            other: None,
            created_at: at,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_attributes(mut self, attributes: impl Into<JsonField>) -> Self {
        self.attributes = Some(attributes.into());
        self
    }
}

impl TryFromRecord for Trace {
    fn try_from_record(record: Record) -> Result<Self, RecordDecodeError> {
        Ok(Self {
            id: text_at(&record, "id")?,
            parent_span_id: opt_text_at(&record, "parentSpanId")?,
            trace_id: text_at(&record, "traceId")?,
            name: text_at(&record, "name")?,
            scope: opt_text_at(&record, "scope")?,
            kind: text_at(&record, "kind")?,
            status: opt_json_at(&record, "status")?,
            events: opt_json_at(&record, "events")?,
            links: opt_json_at(&record, "links")?,
            attributes: opt_json_at(&record, "attributes")?,
            start_time: opt_timestamp_at(&record, "startTime")?,
            end_time: opt_timestamp_at(&record, "endTime")?,
            other: opt_json_at(&record, "other")?,
            created_at: timestamp_at(&record, "createdAt")?,
        })
    }
}

impl IntoRecord for Trace {
    fn into_record(self) -> Record {
        record([
            ("id", Value::from(self.id)),
            ("parentSpanId", Value::from(self.parent_span_id)),
            ("traceId", Value::from(self.trace_id)),
            ("name", Value::from(self.name)),
            ("scope", Value::from(self.scope)),
            ("kind", Value::from(self.kind)),
            ("status", json_value(self.status)),
            ("events", json_value(self.events)),
            ("links", json_value(self.links)),
            ("attributes", json_value(self.attributes)),
            ("startTime", Value::from(self.start_time)),
            ("endTime", Value::from(self.end_time)),
            ("other", json_value(self.other)),
            ("createdAt", Value::from(self.created_at)),
        ])
    }
}

impl KvRelStore {
    /// Returns the number of distinct spans written.
    pub async fn insert_traces(&self, traces: Vec<Trace>) -> Result<usize, KvRelError> {
        if traces.is_empty() {
            return Ok(0);
        }
        let records = traces.into_iter().map(IntoRecord::into_record).collect();
        self.ready()?.batch_insert(TABLE_TRACES, records).await
    }

    /// One page of spans matching every filter of `query`, most recent
    /// first.
    pub async fn get_traces(&self, query: &TraceQuery) -> Result<Vec<Trace>, KvRelError> {
        let tables = self.ready()?;
        let schema = tables.schema(TABLE_TRACES).await?;

        let mut sources = Vec::new();
        if let Some(prefix) = &query.name {
            sources.push(Source::GroupPrefix {
                index: BY_NAME.to_string(),
                prefix: prefix.clone(),
            });
        }
        if let Some(scope) = query.scope.as_deref() {
            sources.push(Source::group(BY_SCOPE, &[scope]));
        }
        for (key, value) in &query.attributes {
            sources.push(Source::Group {
                index: BY_ATTRIBUTE.to_string(),
                group: vec![key.clone(), value.to_string()],
            });
        }

        let range = ScoreRange::from_dates(query.from_date, query.to_date);
        let candidates = collect_candidates(tables, &schema, &sources, range).await?;
        let offset = query.page.saturating_mul(query.per_page);
        let page: Vec<String> = paginate(candidates, offset, Some(query.per_page))
            .into_iter()
            .map(|m| m.member)
            .collect();
        let rows = load_members(tables, &schema, &page).await?;
        Ok(decode_records(rows)?)
    }
}
