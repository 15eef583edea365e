pub mod schema;
pub mod tables;
pub mod types;

use crate::catalog::schema::TableSchema;
use crate::error::{KvRelError, ResourceType};
use crate::storage::backend::KvBackend;
use crate::storage::keyspace::Keyspace;
use im::HashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

/// Declared table schemas. The backend holds the durable copy; the cache
/// is filled at init and on every declaration or lookup miss.
pub struct Catalog {
    backend: Arc<dyn KvBackend>,
    keyspace: Keyspace,
    tables: RwLock<HashMap<String, Arc<TableSchema>>>,
}

impl Catalog {
    pub fn new(backend: Arc<dyn KvBackend>, keyspace: Keyspace) -> Self {
        Self {
            backend,
            keyspace,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Loads every persisted schema into the cache.
    pub async fn load_all(&self) -> Result<usize, KvRelError> {
        let names = self.backend.smembers(&self.keyspace.tables_key()).await?;
        let keys: Vec<String> = names.iter().map(|n| self.keyspace.schema_key(n)).collect();
        let payloads = self.backend.mget(&keys).await?;
        let mut loaded = HashMap::new();
        for (name, payload) in names.into_iter().zip(payloads) {
            let Some(bytes) = payload else {
                debug!(table = %name, "table listed without schema payload");
                continue;
            };
            loaded.insert(name, Arc::new(decode_schema(&bytes)?));
        }
        let count = loaded.len();
        *self.tables.write() = loaded;
        info!(tables = count, "catalog loaded");
        Ok(count)
    }

    /// Declares `schema`, or merges it into an existing declaration when
    /// the two are compatible.
    pub async fn declare(&self, schema: TableSchema) -> Result<Arc<TableSchema>, KvRelError> {
        schema.validate()?;
        let table = schema.table_name.clone();
        let existing = match self.get(&table) {
            Some(existing) => Some(existing),
            None => self.fetch(&table).await?,
        };
        let next = match existing {
            None => Arc::new(schema),
            Some(existing) => match existing.merge_redeclaration(&schema)? {
                None => {
                    self.tables.write().insert(table, Arc::clone(&existing));
                    return Ok(existing);
                }
                Some(merged) => {
                    info!(
                        table = %table,
                        columns = merged.columns.len(),
                        "table redeclared with additional columns"
                    );
                    Arc::new(merged)
                }
            },
        };
        self.backend
            .set(&self.keyspace.schema_key(&table), encode_schema(&next)?)
            .await?;
        self.backend
            .sadd(&self.keyspace.tables_key(), std::slice::from_ref(&table))
            .await?;
        self.tables.write().insert(table, Arc::clone(&next));
        Ok(next)
    }

    pub fn get(&self, table: &str) -> Option<Arc<TableSchema>> {
        self.tables.read().get(table).cloned()
    }

    /// Cached schema, falling back to the backend for tables declared by
    /// another process.
    pub async fn resolve(&self, table: &str) -> Result<Arc<TableSchema>, KvRelError> {
        if let Some(schema) = self.get(table) {
            return Ok(schema);
        }
        self.fetch(table).await?.ok_or_else(|| KvRelError::NotFound {
            resource_type: ResourceType::Table,
            resource_id: table.to_string(),
        })
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    async fn fetch(&self, table: &str) -> Result<Option<Arc<TableSchema>>, KvRelError> {
        let Some(bytes) = self.backend.get(&self.keyspace.schema_key(table)).await? else {
            return Ok(None);
        };
        let schema = Arc::new(decode_schema(&bytes)?);
        self.tables
            .write()
            .insert(table.to_string(), Arc::clone(&schema));
        Ok(Some(schema))
    }
}

pub fn encode_schema(schema: &TableSchema) -> Result<Vec<u8>, KvRelError> {
    rmp_serde::to_vec_named(schema).map_err(|e| KvRelError::Encode(e.to_string()))
}

pub fn decode_schema(bytes: &[u8]) -> Result<TableSchema, KvRelError> {
    rmp_serde::from_slice(bytes).map_err(|e| KvRelError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::ColumnDef;
    use crate::catalog::types::ColumnType;
    use crate::storage::memory::MemoryBackend;

    fn notes() -> TableSchema {
        TableSchema::new("notes")
            .column(ColumnDef::new("id", ColumnType::Text))
            .primary_key(&["id"])
    }

    #[tokio::test]
    async fn declarations_persist_and_reload() {
        let kv = Arc::new(MemoryBackend::new());
        let catalog = Catalog::new(kv.clone(), Keyspace::new(None));
        catalog.declare(notes()).await.expect("declare");
        catalog
            .declare(notes().column(ColumnDef::new("body", ColumnType::Text).nullable()))
            .await
            .expect("widen");

        let reopened = Catalog::new(kv.clone(), Keyspace::new(None));
        assert_eq!(reopened.load_all().await.expect("load"), 1);
        let schema = reopened.get("notes").expect("cached");
        assert!(schema.find_column("body").is_some());
        assert_eq!(reopened.table_names(), vec!["notes".to_string()]);
    }

    #[tokio::test]
    async fn resolve_reads_through_and_reports_missing_tables() {
        let kv = Arc::new(MemoryBackend::new());
        Catalog::new(kv.clone(), Keyspace::new(None))
            .declare(notes())
            .await
            .expect("declare");

        let other = Catalog::new(kv, Keyspace::new(None));
        assert!(other.get("notes").is_none());
        other.resolve("notes").await.expect("read through");
        let err = other.resolve("missing").await.expect_err("missing");
        assert_eq!(err.code_str(), "table_not_found");
    }

    #[test]
    fn schema_payload_roundtrips() {
        let schema = notes();
        let bytes = encode_schema(&schema).expect("encode");
        assert_eq!(decode_schema(&bytes).expect("decode"), schema);
        assert_eq!(decode_schema(b"\xc1").expect_err("bad").code_str(), "decode");
    }
}
