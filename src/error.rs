use crate::index::settings::SettingsGroup;
use http::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Schema self-consistency failures. Fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Duplicate field in schema: {0}")]
    DuplicateField(String),

    #[error("{attribute} references undeclared field: {reference}")]
    DanglingReference { attribute: String, reference: String },

    #[error("Schema declares no primary key field")]
    NoPrimaryKey,

    #[error("Schema declares more than one primary key field: {0:?}")]
    MultiplePrimaryKeys(Vec<String>),

    #[error("Primary key is {declared} but field {flagged} is flagged as primary key")]
    PrimaryKeyMismatch { declared: String, flagged: String },

    #[error("Invalid index name: {0:?}")]
    InvalidIndexName(String),
}

/// Settings reconciliation failures. Each carries the group and task it
/// concerns so the caller knows which attribute group is out of sync.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error("Backend rejected {group} update (task {task_id}): {message}")]
    BackendRejected {
        group: SettingsGroup,
        task_id: String,
        message: String,
    },

    /// The run's deadline elapsed. `task_id` is unset when it ran out during
    /// a request rather than while polling a task.
    #[error("Settings deadline elapsed (group: {group:?}, task: {task_id:?})")]
    Timeout {
        group: Option<SettingsGroup>,
        task_id: Option<String>,
    },

    #[error("Primary key is immutable: index has {current}, schema declares {declared}")]
    ImmutablePrimaryKey { current: String, declared: String },

    #[error("Settings reconciliation cancelled (group: {group:?}, task: {task_id:?})")]
    Cancelled {
        group: Option<SettingsGroup>,
        task_id: Option<String>,
    },

    #[error("Transport failure during reconciliation (group: {group:?}): {source}")]
    Transport {
        group: Option<SettingsGroup>,
        #[source]
        source: TransportError,
    },
}

/// Per-document conversion failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Missing required field: {field}")]
    MissingRequiredField { field: String },

    #[error("Invalid value for field {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

/// Malformed search requests. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Limit {limit} out of range (1..={max})")]
    LimitOutOfRange { limit: u32, max: u32 },

    #[error("Field is not filterable: {field}")]
    FieldNotFilterable { field: String },

    #[error("Field is not sortable: {field}")]
    FieldNotSortable { field: String },

    #[error("Invalid filter {expression:?}: {reason}")]
    InvalidFilter { expression: String, reason: String },

    #[error("Invalid sort expression: {expression:?}")]
    InvalidSort { expression: String },
}

/// Failures talking to the search backend. Always recoverable by the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Backend request timed out: {0}")]
    Timeout(String),

    #[error("Backend authentication failed: {0}")]
    AuthFailed(String),

    #[error("Backend rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Unexpected backend response: {0}")]
    Protocol(String),

    #[error("Backend task {task_id} failed: {message}")]
    TaskFailed { task_id: String, message: String },
}

impl TransportError {
    /// Whether repeating the same idempotent call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Unreachable(_)
            | TransportError::Timeout(_)
            | TransportError::RateLimited { .. } => true,
            TransportError::AuthFailed(_)
            | TransportError::Protocol(_)
            | TransportError::TaskFailed { .. } => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

#[derive(Error, Debug, Clone)]
pub enum IndexError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IndexError::Schema(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IndexError::Sync(SyncError::ImmutablePrimaryKey { .. }) => StatusCode::CONFLICT,
            IndexError::Sync(SyncError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            IndexError::Sync(_) => StatusCode::BAD_GATEWAY,
            IndexError::Codec(_) => StatusCode::BAD_REQUEST,
            IndexError::Query(_) => StatusCode::BAD_REQUEST,
            IndexError::Transport(TransportError::RateLimited { .. }) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            IndexError::Transport(TransportError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            IndexError::Transport(TransportError::TaskFailed { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            IndexError::Transport(_) => StatusCode::BAD_GATEWAY,
            IndexError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
