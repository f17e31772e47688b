pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod index;
pub mod query;
pub mod types;

pub use backend::{MeilisearchBackend, MemoryBackend, SearchBackend};
pub use client::IndexClient;
pub use config::{PollConfig, RetryPolicy, SyncConfig};
pub use error::{
    CodecError, ConfigError, IndexError, QueryError, Result, SchemaError, SyncError,
    TransportError,
};
pub use index::schema::{user_profile_schema, AttributeRole, FieldSpec, IndexSchema, SchemaRegistry};
pub use index::settings::SettingsGroup;
pub use query::planner::{PlannedQuery, QueryPlanner};
pub use types::{
    ApplyOutcome, BatchSummary, DocFailure, Pagination, ProfileDocument, SearchRequest,
    SearchResult,
};

pub use tokio_util::sync::CancellationToken;
