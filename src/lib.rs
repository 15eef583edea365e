pub mod catalog;
pub mod config;
pub mod entities;
pub mod error;
pub mod query;
pub mod repository;
pub mod storage;

use crate::catalog::Catalog;
use crate::catalog::schema::TableSchema;
use crate::catalog::tables::builtin_tables;
use crate::catalog::types::{Record, Value};
use crate::config::{StoreConfig, validate_config};
use crate::error::KvRelError;
use crate::storage::backend::KvBackend;
use crate::storage::keyspace::Keyspace;
use crate::storage::memory::MemoryBackend;
use crate::storage::table::TableStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

pub use crate::catalog::schema::{ColumnDef, IndexDef, IndexKey, IndexOrder};
pub use crate::catalog::types::{ColumnType, JsonField, record};
pub use crate::entities::{EvalRecord, Message, Thread, Trace, WorkflowRun, WorkflowRuns};
pub use crate::query::{EvalKind, MessageSelection, TraceQuery, WorkflowRunsQuery};

/// Relational tables over a [`KvBackend`]. Cheap to share behind an `Arc`;
/// every operation goes straight to the backend.
pub struct KvRelStore {
    config: StoreConfig,
    backend: Arc<dyn KvBackend>,
    catalog: Arc<Catalog>,
    tables: TableStore,
    initialized: AtomicBool,
}

impl KvRelStore {
    pub fn open(config: StoreConfig, backend: Arc<dyn KvBackend>) -> Result<Self, KvRelError> {
        validate_config(&config)?;
        info!(
            url = %config.url,
            key_prefix = config.key_prefix.as_deref().unwrap_or(""),
            batch_chunk_rows = config.batch_chunk_rows,
            has_token = config.has_token(),
            "kvrel config"
        );
        if !config.has_token() {
            warn!(url = %config.url, "opening store without an auth token");
        }
        let keyspace = Keyspace::new(config.key_prefix.as_deref());
        let catalog = Arc::new(Catalog::new(Arc::clone(&backend), keyspace.clone()));
        let tables = TableStore::new(
            Arc::clone(&backend),
            keyspace,
            Arc::clone(&catalog),
            config.batch_chunk_rows,
        );
        Ok(Self {
            config,
            backend,
            catalog,
            tables,
            initialized: AtomicBool::new(false),
        })
    }

    /// Opens a store over a fresh [`MemoryBackend`].
    pub fn open_in_memory(config: StoreConfig) -> Result<Self, KvRelError> {
        Self::open(config, Arc::new(MemoryBackend::new()))
    }

    /// Checks the backend, loads declared schemas and declares the fixed
    /// tables. Must complete before any other operation.
    pub async fn init(&self) -> Result<(), KvRelError> {
        self.backend.ping().await?;
        let loaded = self.catalog.load_all().await?;
        for schema in builtin_tables() {
            self.tables.create_table(schema).await?;
        }
        self.initialized.store(true, Ordering::Release);
        info!(
            tables = self.catalog.table_names().len(),
            previously_declared = loaded,
            "kvrel store initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    pub fn table_names(&self) -> Vec<String> {
        self.catalog.table_names()
    }

    pub(crate) fn ready(&self) -> Result<&TableStore, KvRelError> {
        if self.is_initialized() {
            Ok(&self.tables)
        } else {
            Err(KvRelError::NotInitialized)
        }
    }

    pub async fn create_table(
        &self,
        schema: TableSchema,
    ) -> Result<Arc<TableSchema>, KvRelError> {
        self.ready()?.create_table(schema).await
    }

    pub async fn insert(&self, table: &str, record: Record) -> Result<(), KvRelError> {
        self.ready()?.insert(table, record).await
    }

    /// Returns the number of distinct rows written.
    pub async fn batch_insert(
        &self,
        table: &str,
        records: Vec<Record>,
    ) -> Result<usize, KvRelError> {
        self.ready()?.batch_insert(table, records).await
    }

    /// `key` holds the primary key values in declaration order.
    pub async fn load(&self, table: &str, key: &[Value]) -> Result<Option<Record>, KvRelError> {
        self.ready()?.load(table, key).await
    }

    pub async fn delete(&self, table: &str, key: &[Value]) -> Result<bool, KvRelError> {
        self.ready()?.delete(table, key).await
    }

    pub async fn clear_table(&self, table: &str) -> Result<(), KvRelError> {
        self.ready()?.clear_table(table).await
    }
}
