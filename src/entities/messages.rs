use crate::KvRelStore;
use crate::catalog::tables::{BY_THREAD, TABLE_MESSAGES};
use crate::catalog::types::{JsonField, Record, Value, record};
use crate::error::KvRelError;
use crate::query::executor::load_members;
use crate::query::plan::MessageSelection;
use crate::repository::{
    IntoRecord, RecordDecodeError, TryFromRecord, decode_records, json_at, opt_text_at, text_at,
    timestamp_at,
};
use crate::storage::table::key_member;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub role: String,
    /// Stored as the `type` column.
    pub kind: Option<String>,
    pub content: JsonField,
    pub created_at: DateTime<Utc>,
    pub resource_id: Option<String>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        thread_id: impl Into<String>,
        role: impl Into<String>,
        content: impl Into<JsonField>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
            role: role.into(),
            kind: None,
            content: content.into(),
            created_at: at,
            resource_id: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }
}

impl TryFromRecord for Message {
    fn try_from_record(record: Record) -> Result<Self, RecordDecodeError> {
        Ok(Self {
            id: text_at(&record, "id")?,
            thread_id: text_at(&record, "thread_id")?,
            role: text_at(&record, "role")?,
            kind: opt_text_at(&record, "type")?,
            content: json_at(&record, "content")?,
            created_at: timestamp_at(&record, "createdAt")?,
            resource_id: opt_text_at(&record, "resourceId")?,
        })
    }
}

impl IntoRecord for Message {
    fn into_record(self) -> Record {
        record([
            ("id", Value::from(self.id)),
            ("thread_id", Value::from(self.thread_id)),
            ("role", Value::from(self.role)),
            ("type", Value::from(self.kind)),
            ("content", self.content.into_value()),
            ("createdAt", Value::from(self.created_at)),
            ("resourceId", Value::from(self.resource_id)),
        ])
    }
}

impl KvRelStore {
    /// Upserts `messages` in the given order. A message saved again keeps
    /// its place in the thread.
    pub async fn save_messages(&self, messages: Vec<Message>) -> Result<Vec<Message>, KvRelError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let records = messages.iter().cloned().map(IntoRecord::into_record).collect();
        self.ready()?.batch_insert(TABLE_MESSAGES, records).await?;
        Ok(messages)
    }

    /// Every message of the thread in insertion order.
    pub async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, KvRelError> {
        let tables = self.ready()?;
        let schema = tables.schema(TABLE_MESSAGES).await?;
        let members = tables
            .index_members_by_rank(&schema, BY_THREAD, &[thread_id.to_string()], 0, -1)
            .await?;
        let rows = load_members(tables, &schema, &members).await?;
        Ok(decode_records(rows)?)
    }

    /// Messages picked by `selection`, de-duplicated and in thread order.
    /// An empty selection returns the whole thread.
    pub async fn get_messages_with(
        &self,
        thread_id: &str,
        selection: &MessageSelection,
    ) -> Result<Vec<Message>, KvRelError> {
        if selection.last.is_none() && selection.include.is_empty() {
            return self.get_messages(thread_id).await;
        }
        let tables = self.ready()?;
        let schema = tables.schema(TABLE_MESSAGES).await?;
        let group = [thread_id.to_string()];
        let mut picked: BTreeMap<u64, String> = BTreeMap::new();

        if let Some(last) = selection.last {
            let len = tables.index_len(&schema, BY_THREAD, &group).await?;
            let start = len.saturating_sub(last as u64);
            if start < len {
                let members = tables
                    .index_members_by_rank(&schema, BY_THREAD, &group, start as i64, -1)
                    .await?;
                picked.extend((start..).zip(members));
            }
        }

        for window in &selection.include {
            let member = key_member(&schema, &[Value::from(&window.id)])?;
            let Some(rank) = tables.index_rank(&schema, BY_THREAD, &group, &member).await? else {
                continue;
            };
            let start = rank.saturating_sub(window.previous as u64);
            let stop = rank.saturating_add(window.next as u64);
            let members = tables
                .index_members_by_rank(
                    &schema,
                    BY_THREAD,
                    &group,
                    start as i64,
                    i64::try_from(stop).unwrap_or(i64::MAX),
                )
                .await?;
            picked.extend((start..).zip(members));
        }

        let members: Vec<String> = picked.into_values().collect();
        let rows = load_members(tables, &schema, &members).await?;
        Ok(decode_records(rows)?)
    }
}
