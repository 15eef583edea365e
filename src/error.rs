use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Table,
    Row,
    Thread,
    WorkflowRun,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Table => write!(f, "table"),
            ResourceType::Row => write!(f, "row"),
            ResourceType::Thread => write!(f, "thread"),
            ResourceType::WorkflowRun => write!(f, "workflow run"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidConfig,
    NotInitialized,
    TableNotFound,
    RowNotFound,
    ThreadNotFound,
    WorkflowRunNotFound,
    MissingPrimaryKey,
    NotNullViolation,
    UnknownColumn,
    TypeMismatch,
    IncompatibleSchema,
    InvalidSchema,
    Encode,
    Decode,
    Internal,
    Backend,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidConfig => "invalid_config",
            ErrorCode::NotInitialized => "not_initialized",
            ErrorCode::TableNotFound => "table_not_found",
            ErrorCode::RowNotFound => "row_not_found",
            ErrorCode::ThreadNotFound => "thread_not_found",
            ErrorCode::WorkflowRunNotFound => "workflow_run_not_found",
            ErrorCode::MissingPrimaryKey => "missing_primary_key",
            ErrorCode::NotNullViolation => "not_null_violation",
            ErrorCode::UnknownColumn => "unknown_column",
            ErrorCode::TypeMismatch => "type_mismatch",
            ErrorCode::IncompatibleSchema => "incompatible_schema",
            ErrorCode::InvalidSchema => "invalid_schema",
            ErrorCode::Encode => "encode",
            ErrorCode::Decode => "decode",
            ErrorCode::Internal => "internal",
            ErrorCode::Backend => "backend",
        }
    }
}

/// Failures reported by a [`crate::storage::backend::KvBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("wrong value type at key '{key}': expected {expected}")]
    WrongType { key: String, expected: &'static str },
    #[error("backend rejected operation on '{key}': {message}")]
    Rejected { key: String, message: String },
}

#[derive(Debug, Error)]
pub enum KvRelError {
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("store not initialized: call init() before issuing operations")]
    NotInitialized,
    #[error("{resource_type} '{resource_id}' not found")]
    NotFound {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("primary key column '{column}' missing for table '{table}'")]
    MissingPrimaryKey { table: String, column: String },
    #[error("NOT NULL violation: column '{column}' in table '{table}'")]
    NotNullViolation { table: String, column: String },
    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },
    #[error(
        "type mismatch: column '{column}' in table '{table}' expected {expected}, got {actual}"
    )]
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
    #[error("incompatible redeclaration of table '{table}': {reason}")]
    IncompatibleSchema { table: String, reason: String },
    #[error("invalid schema for table '{table}': {reason}")]
    InvalidSchema { table: String, reason: String },
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl KvRelError {
    pub fn code(&self) -> ErrorCode {
        match self {
            KvRelError::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            KvRelError::NotInitialized => ErrorCode::NotInitialized,
            KvRelError::NotFound { resource_type, .. } => match resource_type {
                ResourceType::Table => ErrorCode::TableNotFound,
                ResourceType::Row => ErrorCode::RowNotFound,
                ResourceType::Thread => ErrorCode::ThreadNotFound,
                ResourceType::WorkflowRun => ErrorCode::WorkflowRunNotFound,
            },
            KvRelError::MissingPrimaryKey { .. } => ErrorCode::MissingPrimaryKey,
            KvRelError::NotNullViolation { .. } => ErrorCode::NotNullViolation,
            KvRelError::UnknownColumn { .. } => ErrorCode::UnknownColumn,
            KvRelError::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            KvRelError::IncompatibleSchema { .. } => ErrorCode::IncompatibleSchema,
            KvRelError::InvalidSchema { .. } => ErrorCode::InvalidSchema,
            KvRelError::Encode(_) => ErrorCode::Encode,
            KvRelError::Decode(_) => ErrorCode::Decode,
            KvRelError::Internal(_) => ErrorCode::Internal,
            KvRelError::Backend(_) => ErrorCode::Backend,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// Schema violations detected while validating a record for insert.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            KvRelError::MissingPrimaryKey { .. }
                | KvRelError::NotNullViolation { .. }
                | KvRelError::UnknownColumn { .. }
                | KvRelError::TypeMismatch { .. }
        )
    }

    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            KvRelError::IncompatibleSchema { .. } | KvRelError::InvalidSchema { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, KvRelError::NotFound { .. })
    }
}
