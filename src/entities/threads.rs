use crate::KvRelStore;
use crate::catalog::tables::{BY_RESOURCE, BY_THREAD, TABLE_MESSAGES, TABLE_THREADS};
use crate::catalog::types::{JsonField, Record, Value, record};
use crate::error::{KvRelError, ResourceType};
use crate::query::executor::load_members;
use crate::repository::{
    IntoRecord, RecordDecodeError, TryFromRecord, decode_records, object_or_empty, opt_json_at,
    opt_text_at, text_at, timestamp_at,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    pub id: String,
    pub resource_id: String,
    pub title: Option<String>,
    pub metadata: JsonField,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(id: impl Into<String>, resource_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            resource_id: resource_id.into(),
            title: None,
            metadata: JsonField::Parsed(JsonValue::Object(Map::new())),
            created_at: at,
            updated_at: at,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = JsonField::Parsed(metadata);
        self
    }
}

impl TryFromRecord for Thread {
    fn try_from_record(record: Record) -> Result<Self, RecordDecodeError> {
        Ok(Self {
            id: text_at(&record, "id")?,
            resource_id: text_at(&record, "resourceId")?,
            title: opt_text_at(&record, "title")?,
            metadata: opt_json_at(&record, "metadata")?
                .unwrap_or(JsonField::Parsed(JsonValue::Object(Map::new()))),
            created_at: timestamp_at(&record, "createdAt")?,
            updated_at: timestamp_at(&record, "updatedAt")?,
        })
    }
}

impl IntoRecord for Thread {
    fn into_record(self) -> Record {
        record([
            ("id", Value::from(self.id)),
            ("resourceId", Value::from(self.resource_id)),
            ("title", Value::from(self.title)),
            ("metadata", self.metadata.into_value()),
            ("createdAt", Value::from(self.created_at)),
            ("updatedAt", Value::from(self.updated_at)),
        ])
    }
}

impl KvRelStore {
    /// Upserts `thread` and hands it back unchanged.
    pub async fn save_thread(&self, thread: Thread) -> Result<Thread, KvRelError> {
        self.ready()?
            .insert(TABLE_THREADS, thread.clone().into_record())
            .await?;
        Ok(thread)
    }

    pub async fn get_thread_by_id(&self, id: &str) -> Result<Option<Thread>, KvRelError> {
        let row = self.ready()?.load(TABLE_THREADS, &[Value::from(id)]).await?;
        Ok(row.map(Thread::try_from_record).transpose()?)
    }

    /// Every thread of the resource, oldest first.
    pub async fn get_threads_by_resource_id(
        &self,
        resource_id: &str,
    ) -> Result<Vec<Thread>, KvRelError> {
        let tables = self.ready()?;
        let schema = tables.schema(TABLE_THREADS).await?;
        let members: Vec<String> = tables
            .index_range(
                &schema,
                BY_RESOURCE,
                &[resource_id.to_string()],
                i64::MIN,
                i64::MAX,
            )
            .await?
            .into_iter()
            .map(|m| m.member)
            .collect();
        let rows = load_members(tables, &schema, &members).await?;
        Ok(decode_records(rows)?)
    }

    /// Sets the title when given, shallow-merges `metadata` into the stored
    /// metadata and stamps `updated_at`. Concurrent updates of one thread
    /// resolve last-write-wins.
    pub async fn update_thread(
        &self,
        id: &str,
        title: Option<String>,
        metadata: Option<Map<String, JsonValue>>,
    ) -> Result<Thread, KvRelError> {
        let mut thread = self
            .get_thread_by_id(id)
            .await?
            .ok_or_else(|| KvRelError::NotFound {
                resource_type: ResourceType::Thread,
                resource_id: id.to_string(),
            })?;
        if let Some(title) = title {
            thread.title = Some(title);
        }
        if let Some(updates) = metadata {
            if !matches!(thread.metadata.as_json(), Some(JsonValue::Object(_))) {
                warn!(thread_id = id, "stored thread metadata is not an object, replacing it");
            }
            let mut merged = object_or_empty(&thread.metadata);
            merged.extend(updates);
            thread.metadata = JsonField::Parsed(JsonValue::Object(merged));
        }
        thread.updated_at = Utc::now();
        self.save_thread(thread).await
    }

    /// Deletes the thread and every message in it. Returns whether the
    /// thread existed.
    pub async fn delete_thread(&self, id: &str) -> Result<bool, KvRelError> {
        let tables = self.ready()?;
        let messages = tables.schema(TABLE_MESSAGES).await?;
        let members = tables
            .index_members_by_rank(&messages, BY_THREAD, &[id.to_string()], 0, -1)
            .await?;
        let removed = tables.delete_members(&messages, members).await?;
        let existed = tables.delete(TABLE_THREADS, &[Value::from(id)]).await?;
        debug!(thread_id = id, messages = removed, existed, "thread deleted");
        Ok(existed)
    }
}
