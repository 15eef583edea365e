use crate::catalog::schema::{IndexKey, IndexOrder, TableSchema};
use crate::catalog::types::{Record, Value, timestamp_score};
use crate::error::{BackendError, KvRelError};
use crate::storage::backend::{KvBackend, ScoredMember};
use crate::storage::keyspace::{Keyspace, encode_components, value_component};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinSet;

/// One sorted-set membership a row holds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexEntry {
    pub key: String,
    pub score: i64,
    /// Directory key and encoded group, for indexes that track groups.
    pub directory: Option<(String, String)>,
}

/// Index work for one written or deleted row.
#[derive(Debug, Clone, Default)]
pub struct RowIndexChange {
    pub member: String,
    /// Row registry score; `None` removes the row from the registry.
    pub registry_score: Option<i64>,
    pub stale: Vec<IndexEntry>,
    pub current: Vec<IndexEntry>,
}

pub fn order_score(order: &IndexOrder, record: &Record, seq: u64) -> i64 {
    match order {
        IndexOrder::Insertion => i64::try_from(seq).unwrap_or(i64::MAX),
        IndexOrder::Column(column) => match record.get(column) {
            Some(Value::Timestamp(ts)) => timestamp_score(ts),
            Some(Value::Integer(v)) => *v,
            _ => 0,
        },
    }
}

/// Encoded groups a row belongs to in `index`. Rows with a null key column
/// are left out of the index.
pub fn index_groups(key: &IndexKey, record: &Record) -> Vec<String> {
    match key {
        IndexKey::Columns(columns) => {
            let parts: Option<Vec<String>> = columns
                .iter()
                .map(|c| record.get(c).and_then(value_component))
                .collect();
            parts.map(|p| vec![encode_components(&p)]).unwrap_or_default()
        }
        IndexKey::JsonEntries(column) => {
            let object = match record.get(column) {
                Some(Value::Json(serde_json::Value::Object(map))) => map.clone(),
                Some(Value::Text(raw)) => match serde_json::from_str(raw) {
                    Ok(serde_json::Value::Object(map)) => map,
                    _ => return Vec::new(),
                },
                _ => return Vec::new(),
            };
            object
                .iter()
                .map(|(k, v)| encode_components(&[k.clone(), v.to_string()]))
                .collect()
        }
    }
}

pub fn index_entries(
    keyspace: &Keyspace,
    schema: &TableSchema,
    record: &Record,
    seq: u64,
) -> Vec<IndexEntry> {
    let table = &schema.table_name;
    let mut entries = Vec::new();
    for index in &schema.indexes {
        let score = order_score(&index.order, record, seq);
        for group in index_groups(&index.key, record) {
            let directory = index.track_groups.then(|| {
                (
                    keyspace.group_directory_key(table, &index.index_name),
                    group.clone(),
                )
            });
            entries.push(IndexEntry {
                key: keyspace.index_key(table, &index.index_name, &group),
                score,
                directory,
            });
        }
    }
    entries
}

/// Index changes for writing `new` over `old`. Memberships the new version
/// keeps are rewritten in place, so an overwrite only ever moves a row.
pub fn plan_write(
    keyspace: &Keyspace,
    schema: &TableSchema,
    member: String,
    old: Option<&Record>,
    new: &Record,
    seq: u64,
) -> RowIndexChange {
    let current = index_entries(keyspace, schema, new, seq);
    let keep: BTreeSet<&str> = current.iter().map(|e| e.key.as_str()).collect();
    let stale = old
        .map(|old| {
            index_entries(keyspace, schema, old, seq)
                .into_iter()
                .filter(|e| !keep.contains(e.key.as_str()))
                .collect()
        })
        .unwrap_or_default();
    RowIndexChange {
        member,
        registry_score: Some(order_score(&schema.order, new, seq)),
        stale,
        current,
    }
}

pub fn plan_delete(
    keyspace: &Keyspace,
    schema: &TableSchema,
    member: String,
    old: &Record,
    seq: u64,
) -> RowIndexChange {
    RowIndexChange {
        member,
        registry_score: None,
        stale: index_entries(keyspace, schema, old, seq),
        current: Vec::new(),
    }
}

/// Maintains the row registry and the index sets of a table. Rows are
/// registered before they are written and indexed after, so every row that
/// exists is reachable from the registry. Removals run before additions so
/// that pruning an emptied group never races a row joining it.
#[derive(Clone)]
pub struct IndexWriter {
    backend: Arc<dyn KvBackend>,
    keyspace: Keyspace,
}

impl IndexWriter {
    pub fn new(backend: Arc<dyn KvBackend>, keyspace: Keyspace) -> Self {
        Self { backend, keyspace }
    }

    /// Adds the written rows of `changes` to the row registry.
    pub async fn register(
        &self,
        table: &str,
        changes: &[RowIndexChange],
    ) -> Result<(), KvRelError> {
        let registered: Vec<ScoredMember> = changes
            .iter()
            .filter_map(|c| {
                c.registry_score
                    .map(|score| ScoredMember::new(c.member.clone(), score))
            })
            .collect();
        if registered.is_empty() {
            return Ok(());
        }
        self.backend
            .zadd(&self.keyspace.row_registry_key(table), &registered)
            .await?;
        Ok(())
    }

    pub async fn apply(&self, table: &str, changes: Vec<RowIndexChange>) -> Result<(), KvRelError> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut removals: BTreeMap<String, (Vec<String>, Option<(String, String)>)> =
            BTreeMap::new();
        let mut unregistered = Vec::new();
        let mut additions: BTreeMap<String, Vec<ScoredMember>> = BTreeMap::new();
        let mut directories: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for change in changes {
            for entry in change.stale {
                let slot = removals
                    .entry(entry.key)
                    .or_insert_with(|| (Vec::new(), entry.directory.clone()));
                slot.0.push(change.member.clone());
            }
            for entry in change.current {
                if let Some((dir_key, group)) = entry.directory {
                    directories.entry(dir_key).or_default().insert(group);
                }
                additions
                    .entry(entry.key)
                    .or_default()
                    .push(ScoredMember::new(change.member.clone(), entry.score));
            }
            if change.registry_score.is_none() {
                unregistered.push(change.member);
            }
        }

        let mut tasks: JoinSet<Result<(), BackendError>> = JoinSet::new();
        if !unregistered.is_empty() {
            let backend = Arc::clone(&self.backend);
            let key = self.keyspace.row_registry_key(table);
            tasks.spawn(async move { backend.zrem(&key, &unregistered).await.map(|_| ()) });
        }
        for (key, (members, directory)) in removals {
            let backend = Arc::clone(&self.backend);
            tasks.spawn(async move {
                backend.zrem(&key, &members).await?;
                if let Some((dir_key, group)) = directory
                    && backend.zcard(&key).await? == 0
                {
                    backend.srem(&dir_key, &[group]).await?;
                }
                Ok::<(), BackendError>(())
            });
        }
        drain(&mut tasks).await?;

        if !additions.is_empty() {
            let index_keys: Vec<String> = additions.keys().cloned().collect();
            self.backend
                .sadd(&self.keyspace.index_registry_key(table), &index_keys)
                .await?;
        }
        for (key, members) in additions {
            let backend = Arc::clone(&self.backend);
            tasks.spawn(async move { backend.zadd(&key, &members).await.map(|_| ()) });
        }
        for (dir_key, groups) in directories {
            let backend = Arc::clone(&self.backend);
            let groups: Vec<String> = groups.into_iter().collect();
            tasks.spawn(async move { backend.sadd(&dir_key, &groups).await.map(|_| ()) });
        }
        drain(&mut tasks).await
    }
}

async fn drain(tasks: &mut JoinSet<Result<(), BackendError>>) -> Result<(), KvRelError> {
    while let Some(joined) = tasks.join_next().await {
        joined.map_err(|e| KvRelError::Internal(format!("index write task failed: {e}")))??;
    }
    Ok(())
}
