use crate::backend::{MeilisearchBackend, SearchBackend};
use crate::config::{PollConfig, RetryPolicy, SyncConfig};
use crate::error::{Result, SyncError, TransportError};
use crate::index::document::{self, BackendDocument};
use crate::index::reconcile::SettingsReconciler;
use crate::index::schema::{IndexSchema, SchemaRegistry};
use crate::index::task::Backoff;
use crate::query::planner::QueryPlanner;
use crate::types::{
    ApplyOutcome, BatchSummary, DocFailure, ProfileDocument, SearchRequest, SearchResult,
};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Entry point for the application: settings sync, document writes and
/// search against one index. Cheap to clone and safe to share across tasks.
#[derive(Clone)]
pub struct IndexClient {
    backend: Arc<dyn SearchBackend>,
    schema: Arc<IndexSchema>,
    planner: QueryPlanner,
    poll: PollConfig,
    retry: RetryPolicy,
}

impl IndexClient {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        registry: &SchemaRegistry,
        config: &SyncConfig,
    ) -> Self {
        let schema = registry.get();
        IndexClient {
            backend,
            planner: QueryPlanner::new(Arc::clone(&schema), config.max_limit),
            schema,
            poll: config.poll.clone(),
            retry: config.retry.clone(),
        }
    }

    /// Client for the Meilisearch server named in `config`.
    pub fn connect(registry: &SchemaRegistry, config: &SyncConfig) -> Result<Self> {
        let backend = MeilisearchBackend::new(
            &config.url,
            config.api_key.as_deref(),
            config.request_timeout(),
        )?
        .with_task_polling(config.poll.clone());
        Ok(Self::new(Arc::new(backend), registry, config))
    }

    pub fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    pub fn index_name(&self) -> &str {
        &self.schema.index_name
    }

    pub async fn apply_settings(
        &self,
        cancel: &CancellationToken,
    ) -> std::result::Result<ApplyOutcome, SyncError> {
        SettingsReconciler::new(self.backend.as_ref(), self.poll.clone())
            .apply(&self.schema, cancel)
            .await
    }

    /// Full replace of the stored document with the same id.
    pub async fn upsert_document(&self, doc: &ProfileDocument) -> Result<()> {
        document::validate(doc)?;
        let encoded = document::encode(doc);
        let index = self.index_name();
        let primary_key = self.schema.primary_key_field.as_str();
        let backend = self.backend.as_ref();
        let encoded = &encoded;
        self.with_retry("upsert", move || {
            backend.upsert_document(index, primary_key, encoded)
        })
        .await?;
        tracing::debug!("[DOCS {}] upserted {}", index, doc.id);
        Ok(())
    }

    /// Upsert each document in turn. A failing document is reported and the
    /// rest of the batch still goes through.
    pub async fn upsert_documents(&self, docs: &[ProfileDocument]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for doc in docs {
            match self.upsert_document(doc).await {
                Ok(()) => summary.upserted.push(doc.id.clone()),
                Err(error) => {
                    tracing::warn!(
                        "[DOCS {}] rejected {:?}: {}",
                        self.index_name(),
                        doc.id,
                        error
                    );
                    summary.rejected.push(DocFailure {
                        doc_id: doc.id.clone(),
                        error,
                    });
                }
            }
        }
        tracing::info!(
            "[DOCS {}] batch: {} upserted, {} rejected",
            self.index_name(),
            summary.upserted.len(),
            summary.rejected.len()
        );
        summary
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<ProfileDocument>> {
        let index = self.index_name();
        let backend = self.backend.as_ref();
        let found = self
            .with_retry("get_document", move || backend.get_document(index, id))
            .await?;
        match found {
            Some(doc) => Ok(Some(document::decode(&doc)?)),
            None => Ok(None),
        }
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResult> {
        let planned = self.planner.plan(request)?;
        let index = self.index_name();
        let backend = self.backend.as_ref();
        let planned_ref = &planned;
        let resp = self
            .with_retry("search", move || backend.search(index, planned_ref))
            .await?;

        let mut documents = Vec::with_capacity(resp.hits.len());
        let mut rejected = Vec::new();
        for hit in &resp.hits {
            match document::decode(hit) {
                Ok(doc) => documents.push(doc),
                Err(e) => {
                    let doc_id = hit_id(hit, &self.schema.primary_key_field);
                    tracing::warn!("[SEARCH {}] skipping hit {:?}: {}", index, doc_id, e);
                    rejected.push(DocFailure {
                        doc_id,
                        error: e.into(),
                    });
                }
            }
        }

        Ok(SearchResult {
            pagination: planned.paginate(resp.total, resp.hits.len()),
            documents,
            processing_time_ms: resp.processing_time_ms,
            rejected,
        })
    }

    /// Repeat `call` while it fails with a retryable error, up to the policy's
    /// attempt limit. A `Retry-After` from the backend overrides the backoff
    /// but never exceeds the policy's maximum delay.
    async fn with_retry<T, F, Fut>(
        &self,
        op: &str,
        mut call: F,
    ) -> std::result::Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        let mut backoff = Backoff::new(self.retry.initial_delay(), self.retry.max_delay());
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = match &e {
                        TransportError::RateLimited {
                            retry_after: Some(after),
                        } => (*after).min(self.retry.max_delay()),
                        _ => backoff.next_delay(),
                    };
                    tracing::warn!(
                        "[{} {}] attempt {}/{} failed, retrying in {:?}: {}",
                        op,
                        self.index_name(),
                        attempt,
                        self.retry.max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn hit_id(hit: &BackendDocument, primary_key: &str) -> String {
    match hit.get(primary_key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}
