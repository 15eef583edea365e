use crate::catalog::Catalog;
use crate::catalog::schema::TableSchema;
use crate::catalog::types::{Record, Value};
use crate::error::KvRelError;
use crate::storage::backend::{KvBackend, ScoredMember};
use crate::storage::codec::{StoredRow, coerce_record, coerce_value, decode_row, encode_row};
use crate::storage::index::{IndexWriter, plan_delete, plan_write};
use crate::storage::keyspace::{Keyspace, decode_components, encode_components, value_component};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rows per `del` call when clearing a table.
const CLEAR_CHUNK_KEYS: usize = 1_000;

/// Table primitives over the backend: rows, their index entries, and the
/// reads the query engine composes.
pub struct TableStore {
    backend: Arc<dyn KvBackend>,
    keyspace: Keyspace,
    catalog: Arc<Catalog>,
    indexes: IndexWriter,
    batch_chunk_rows: usize,
}

impl TableStore {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        keyspace: Keyspace,
        catalog: Arc<Catalog>,
        batch_chunk_rows: usize,
    ) -> Self {
        let indexes = IndexWriter::new(Arc::clone(&backend), keyspace.clone());
        Self {
            backend,
            keyspace,
            catalog,
            indexes,
            batch_chunk_rows: batch_chunk_rows.max(1),
        }
    }

    pub async fn create_table(
        &self,
        schema: TableSchema,
    ) -> Result<Arc<TableSchema>, KvRelError> {
        self.catalog.declare(schema).await
    }

    pub async fn schema(&self, table: &str) -> Result<Arc<TableSchema>, KvRelError> {
        self.catalog.resolve(table).await
    }

    pub async fn insert(&self, table: &str, record: Record) -> Result<(), KvRelError> {
        let schema = self.schema(table).await?;
        let record = coerce_record(&schema, record)?;
        let member = record_member(&schema, &record)?;
        self.write_chunk(&schema, vec![(member, record)]).await
    }

    /// Writes `records` in chunks of the configured size. Every record is
    /// validated before the first write. Later duplicates of a primary key
    /// replace earlier ones. A failure leaves completed chunks in place.
    pub async fn batch_insert(
        &self,
        table: &str,
        records: Vec<Record>,
    ) -> Result<usize, KvRelError> {
        let schema = self.schema(table).await?;
        let mut rows: Vec<(String, Record)> = Vec::with_capacity(records.len());
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(records.len());
        for record in records {
            let record = coerce_record(&schema, record)?;
            let member = record_member(&schema, &record)?;
            match positions.get(&member) {
                Some(&at) => rows[at].1 = record,
                None => {
                    positions.insert(member.clone(), rows.len());
                    rows.push((member, record));
                }
            }
        }
        let total = rows.len();
        let mut chunk_no = 0usize;
        let mut pending = rows.into_iter().peekable();
        while pending.peek().is_some() {
            let chunk: Vec<(String, Record)> =
                pending.by_ref().take(self.batch_chunk_rows).collect();
            let len = chunk.len();
            self.write_chunk(&schema, chunk).await?;
            debug!(table, chunk = chunk_no, rows = len, "batch chunk written");
            chunk_no += 1;
        }
        Ok(total)
    }

    async fn write_chunk(
        &self,
        schema: &TableSchema,
        rows: Vec<(String, Record)>,
    ) -> Result<(), KvRelError> {
        let table = schema.table_name.as_str();
        let keys: Vec<String> = rows
            .iter()
            .map(|(member, _)| self.keyspace.row_key(table, member))
            .collect();
        let previous = self.backend.mget(&keys).await?;
        let previous: Vec<Option<StoredRow>> = previous
            .into_iter()
            .zip(&keys)
            .map(|(bytes, key)| {
                bytes.and_then(|b| match decode_row(schema, &b) {
                    Ok(row) => Some(row),
                    Err(err) => {
                        warn!(key = %key, error = %err, "overwriting unreadable row");
                        None
                    }
                })
            })
            .collect();

        let fresh = previous.iter().filter(|p| p.is_none()).count() as i64;
        let mut next_seq = if fresh > 0 {
            let last = self
                .backend
                .incr_by(&self.keyspace.sequence_key(table), fresh)
                .await?;
            (last - fresh + 1).max(1) as u64
        } else {
            0
        };

        let mut writes = Vec::with_capacity(rows.len());
        let mut changes = Vec::with_capacity(rows.len());
        for ((key, (member, record)), old) in keys.into_iter().zip(rows).zip(previous) {
            let seq = match &old {
                Some(old) => old.seq,
                None => {
                    let seq = next_seq;
                    next_seq += 1;
                    seq
                }
            };
            writes.push((key, encode_row(seq, &record)?));
            changes.push(plan_write(
                &self.keyspace,
                schema,
                member,
                old.as_ref().map(|o| &o.record),
                &record,
                seq,
            ));
        }
        self.indexes.register(table, &changes).await?;
        self.backend.mset(writes).await?;
        self.indexes.apply(table, changes).await
    }

    /// Point lookup by primary key values, given in primary key order.
    pub async fn load(&self, table: &str, key: &[Value]) -> Result<Option<Record>, KvRelError> {
        let schema = self.schema(table).await?;
        let member = key_member(&schema, key)?;
        Ok(self
            .fetch_one(&schema, &member)
            .await?
            .map(|row| row.record))
    }

    pub async fn fetch_one(
        &self,
        schema: &TableSchema,
        member: &str,
    ) -> Result<Option<StoredRow>, KvRelError> {
        let key = self.keyspace.row_key(&schema.table_name, member);
        match self.backend.get(&key).await? {
            Some(bytes) => Ok(Some(decode_row(schema, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Rows for `members`, in order. Missing rows come back as `None`.
    pub async fn fetch_many(
        &self,
        schema: &TableSchema,
        members: &[String],
    ) -> Result<Vec<Option<StoredRow>>, KvRelError> {
        if members.is_empty() {
            return Ok(Vec::new());
        }
        let mut rows = Vec::with_capacity(members.len());
        for chunk in members.chunks(self.batch_chunk_rows) {
            let keys: Vec<String> = chunk
                .iter()
                .map(|m| self.keyspace.row_key(&schema.table_name, m))
                .collect();
            for bytes in self.backend.mget(&keys).await? {
                rows.push(bytes.map(|b| decode_row(schema, &b)).transpose()?);
            }
        }
        Ok(rows)
    }

    /// Deletes one row and its index entries. Returns whether it existed.
    pub async fn delete(&self, table: &str, key: &[Value]) -> Result<bool, KvRelError> {
        let schema = self.schema(table).await?;
        let member = key_member(&schema, key)?;
        Ok(self.delete_members(&schema, vec![member]).await? == 1)
    }

    pub async fn delete_members(
        &self,
        schema: &TableSchema,
        members: Vec<String>,
    ) -> Result<usize, KvRelError> {
        let rows = self.fetch_many(schema, &members).await?;
        let mut keys = Vec::new();
        let mut changes = Vec::new();
        for (member, row) in members.into_iter().zip(rows) {
            let Some(row) = row else { continue };
            keys.push(self.keyspace.row_key(&schema.table_name, &member));
            changes.push(plan_delete(
                &self.keyspace,
                schema,
                member,
                &row.record,
                row.seq,
            ));
        }
        if keys.is_empty() {
            return Ok(0);
        }
        self.backend.del(&keys).await?;
        let deleted = changes.len();
        self.indexes.apply(&schema.table_name, changes).await?;
        Ok(deleted)
    }

    /// Removes every row, index key, group directory and the insertion
    /// counter. The schema stays declared.
    pub async fn clear_table(&self, table: &str) -> Result<(), KvRelError> {
        let schema = self.schema(table).await?;
        let registry_key = self.keyspace.row_registry_key(table);
        let index_registry_key = self.keyspace.index_registry_key(table);

        let members = self.backend.zrange_by_rank(&registry_key, 0, -1).await?;
        let row_keys: Vec<String> = members
            .iter()
            .map(|m| self.keyspace.row_key(table, m))
            .collect();
        for chunk in row_keys.chunks(CLEAR_CHUNK_KEYS) {
            self.backend.del(chunk).await?;
        }
        let index_keys = self.backend.smembers(&index_registry_key).await?;
        for chunk in index_keys.chunks(CLEAR_CHUNK_KEYS) {
            self.backend.del(chunk).await?;
        }

        let mut bookkeeping: Vec<String> = schema
            .indexes
            .iter()
            .filter(|i| i.track_groups)
            .map(|i| self.keyspace.group_directory_key(table, &i.index_name))
            .collect();
        bookkeeping.push(self.keyspace.sequence_key(table));
        bookkeeping.push(registry_key);
        bookkeeping.push(index_registry_key);
        self.backend.del(&bookkeeping).await?;

        info!(
            table,
            rows = members.len(),
            index_keys = index_keys.len(),
            "table cleared"
        );
        Ok(())
    }

    /// Registry members ordered by the table ordering, within `min..=max`.
    pub async fn registry_range(
        &self,
        schema: &TableSchema,
        min: i64,
        max: i64,
    ) -> Result<Vec<ScoredMember>, KvRelError> {
        let key = self.keyspace.row_registry_key(&schema.table_name);
        Ok(self.backend.zrange_by_score(&key, min, max).await?)
    }

    pub async fn index_range(
        &self,
        schema: &TableSchema,
        index: &str,
        group: &[String],
        min: i64,
        max: i64,
    ) -> Result<Vec<ScoredMember>, KvRelError> {
        let key = self.group_key(schema, index, group)?;
        Ok(self.backend.zrange_by_score(&key, min, max).await?)
    }

    pub async fn index_members_by_rank(
        &self,
        schema: &TableSchema,
        index: &str,
        group: &[String],
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, KvRelError> {
        let key = self.group_key(schema, index, group)?;
        Ok(self.backend.zrange_by_rank(&key, start, stop).await?)
    }

    pub async fn index_len(
        &self,
        schema: &TableSchema,
        index: &str,
        group: &[String],
    ) -> Result<u64, KvRelError> {
        let key = self.group_key(schema, index, group)?;
        Ok(self.backend.zcard(&key).await?)
    }

    pub async fn index_rank(
        &self,
        schema: &TableSchema,
        index: &str,
        group: &[String],
        member: &str,
    ) -> Result<Option<u64>, KvRelError> {
        let key = self.group_key(schema, index, group)?;
        Ok(self.backend.zrank(&key, member).await?)
    }

    /// Distinct groups currently present in an index with a group directory.
    pub async fn index_groups(
        &self,
        schema: &TableSchema,
        index: &str,
    ) -> Result<Vec<Vec<String>>, KvRelError> {
        let def = schema.find_index(index).ok_or_else(|| unknown_index(schema, index))?;
        if !def.track_groups {
            return Err(KvRelError::InvalidSchema {
                table: schema.table_name.clone(),
                reason: format!("index '{index}' keeps no group directory"),
            });
        }
        let dir = self.keyspace.group_directory_key(&schema.table_name, index);
        Ok(self
            .backend
            .smembers(&dir)
            .await?
            .iter()
            .map(|g| decode_components(g))
            .collect())
    }

    fn group_key(
        &self,
        schema: &TableSchema,
        index: &str,
        group: &[String],
    ) -> Result<String, KvRelError> {
        schema.find_index(index).ok_or_else(|| unknown_index(schema, index))?;
        Ok(self
            .keyspace
            .index_key(&schema.table_name, index, &encode_components(group)))
    }
}

fn unknown_index(schema: &TableSchema, index: &str) -> KvRelError {
    KvRelError::InvalidSchema {
        table: schema.table_name.clone(),
        reason: format!("no index named '{index}'"),
    }
}

/// Encoded primary key of a coerced record.
pub fn record_member(schema: &TableSchema, record: &Record) -> Result<String, KvRelError> {
    let parts = schema
        .primary_key
        .iter()
        .map(|pk| {
            record
                .get(pk)
                .and_then(value_component)
                .ok_or_else(|| KvRelError::MissingPrimaryKey {
                    table: schema.table_name.clone(),
                    column: pk.clone(),
                })
        })
        .collect::<Result<Vec<String>, KvRelError>>()?;
    Ok(encode_components(&parts))
}

/// Encoded primary key from caller-supplied key values, coerced to the key
/// columns' types.
pub fn key_member(schema: &TableSchema, key: &[Value]) -> Result<String, KvRelError> {
    if key.len() != schema.primary_key.len() {
        let missing = schema
            .primary_key
            .get(key.len())
            .cloned()
            .unwrap_or_else(|| schema.primary_key.join(","));
        return Err(KvRelError::MissingPrimaryKey {
            table: schema.table_name.clone(),
            column: missing,
        });
    }
    let mut record = Record::new();
    for (pk, value) in schema.primary_key.iter().zip(key) {
        let column = schema
            .find_column(pk)
            .ok_or_else(|| KvRelError::InvalidSchema {
                table: schema.table_name.clone(),
                reason: format!("primary key column '{pk}' is not declared"),
            })?;
        let value = coerce_value(&schema.table_name, column, value.clone()).map_err(|err| {
            match err {
                KvRelError::NotNullViolation { table, column } => {
                    KvRelError::MissingPrimaryKey { table, column }
                }
                other => other,
            }
        })?;
        record.insert(pk.clone(), value);
    }
    record_member(schema, &record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::{ColumnDef, IndexDef, IndexOrder};
    use crate::catalog::types::{ColumnType, record};
    use crate::storage::memory::MemoryBackend;

    fn store(kv: Arc<MemoryBackend>, chunk: usize) -> TableStore {
        let ks = Keyspace::new(None);
        let catalog = Arc::new(Catalog::new(kv.clone(), ks.clone()));
        TableStore::new(kv, ks, catalog, chunk)
    }

    fn pairs() -> TableSchema {
        TableSchema::new("pairs")
            .column(ColumnDef::new("a", ColumnType::Text))
            .column(ColumnDef::new("b", ColumnType::Integer))
            .column(ColumnDef::new("tag", ColumnType::Text).nullable())
            .primary_key(&["a", "b"])
            .index(
                IndexDef::columns("by_tag", &["tag"], IndexOrder::Insertion).with_group_directory(),
            )
    }

    #[tokio::test]
    async fn composite_keys_load_and_delete() {
        let kv = Arc::new(MemoryBackend::new());
        let tables = store(kv.clone(), 10);
        tables.create_table(pairs()).await.expect("create");
        tables
            .insert("pairs", record([("a", Value::from("x:y")), ("b", Value::from(1_i64))]))
            .await
            .expect("insert");
        tables
            .insert("pairs", record([("a", Value::from("x")), ("b", Value::from(1_i64))]))
            .await
            .expect("insert");

        let row = tables
            .load("pairs", &[Value::from("x:y"), Value::from(1_i64)])
            .await
            .expect("load")
            .expect("present");
        assert_eq!(row.get("a"), Some(&Value::Text("x:y".into())));
        assert!(row.get("tag").is_some_and(Value::is_null));

        let err = tables
            .load("pairs", &[Value::from("x")])
            .await
            .expect_err("partial key");
        assert_eq!(err.code_str(), "missing_primary_key");

        assert!(tables
            .delete("pairs", &[Value::from("x"), Value::from(1_i64)])
            .await
            .expect("delete"));
        assert!(!tables
            .delete("pairs", &[Value::from("x"), Value::from(1_i64)])
            .await
            .expect("delete again"));
        assert!(tables
            .load("pairs", &[Value::from("x:y"), Value::from(1_i64)])
            .await
            .expect("load")
            .is_some());
    }

    #[tokio::test]
    async fn sequences_survive_overwrites_and_clear_resets_them() {
        let kv = Arc::new(MemoryBackend::new());
        let tables = store(kv.clone(), 2);
        let schema = tables.create_table(pairs()).await.expect("create");
        let batch = (0..5_i64)
            .map(|b| record([("a", Value::from("k")), ("b", Value::from(b))]))
            .collect();
        assert_eq!(tables.batch_insert("pairs", batch).await.expect("batch"), 5);

        let member =
            key_member(&schema, &[Value::from("k"), Value::from(3_i64)]).expect("member");
        let before = tables.fetch_one(&schema, &member).await.expect("fetch").expect("row");
        tables
            .insert(
                "pairs",
                record([
                    ("a", Value::from("k")),
                    ("b", Value::from(3_i64)),
                    ("tag", Value::from("t")),
                ]),
            )
            .await
            .expect("overwrite");
        let after = tables.fetch_one(&schema, &member).await.expect("fetch").expect("row");
        assert_eq!(before.seq, 4);
        assert_eq!(after.seq, 4);
        assert_eq!(
            tables.index_groups(&schema, "by_tag").await.expect("groups"),
            vec![vec!["t".to_string()]]
        );

        tables.clear_table("pairs").await.expect("clear");
        assert_eq!(kv.keys(), vec!["__schema:pairs".to_string(), "__tables".to_string()]);
    }
}
