//! The search backend collaborator and its implementations.

pub mod http;
pub mod memory;

use crate::error::TransportError;
use crate::index::document::BackendDocument;
use crate::index::settings::{BackendSettings, SettingsChange};
use crate::index::task::TaskState;
use crate::query::planner::PlannedQuery;
use async_trait::async_trait;

pub use http::MeilisearchBackend;
pub use memory::MemoryBackend;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendSearchResponse {
    pub hits: Vec<BackendDocument>,
    /// The backend's estimate of all matches, not just this page.
    pub total: u64,
    pub processing_time_ms: u64,
}

/// Everything the sync core needs from a search backend. Every call may
/// fail with a [`TransportError`]; none of them is fatal.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Currently applied settings, or `None` when the index does not exist.
    async fn get_settings(&self, index: &str) -> Result<Option<BackendSettings>, TransportError>;

    /// Returns the id of the asynchronous creation task.
    async fn create_index(&self, index: &str, primary_key: &str) -> Result<String, TransportError>;

    /// Returns the id of the asynchronous update task.
    async fn update_settings(
        &self,
        index: &str,
        change: &SettingsChange,
    ) -> Result<String, TransportError>;

    async fn get_task(&self, task_id: &str) -> Result<TaskState, TransportError>;

    /// Full replace of the document keyed by `primary_key`.
    async fn upsert_document(
        &self,
        index: &str,
        primary_key: &str,
        doc: &BackendDocument,
    ) -> Result<(), TransportError>;

    async fn get_document(
        &self,
        index: &str,
        id: &str,
    ) -> Result<Option<BackendDocument>, TransportError>;

    async fn search(
        &self,
        index: &str,
        query: &PlannedQuery,
    ) -> Result<BackendSearchResponse, TransportError>;
}
