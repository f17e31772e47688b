use super::{BackendSearchResponse, SearchBackend};
use crate::error::TransportError;
use crate::index::document::BackendDocument;
use crate::index::settings::{BackendSettings, SettingsChange, SettingsGroup};
use crate::index::task::TaskState;
use crate::query::planner::PlannedQuery;
use crate::query::sort::SortOrder;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};

#[derive(Debug, Clone)]
struct MemoryIndex {
    settings: BackendSettings,
    documents: BTreeMap<String, BackendDocument>,
}

impl MemoryIndex {
    fn new(primary_key: Option<String>) -> Self {
        MemoryIndex {
            settings: BackendSettings::fresh(primary_key),
            documents: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum TaskKind {
    CreateIndex { index: String, primary_key: String },
    Settings { index: String, change: SettingsChange },
}

#[derive(Debug, Clone)]
struct MemoryTask {
    kind: TaskKind,
    state: TaskState,
}

/// In-process [`SearchBackend`] with Meilisearch-like task semantics.
///
/// Tasks advance one state per `get_task` call and only change settings when
/// they succeed. Document writes apply immediately, last write wins on
/// `updated_at`.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    indexes: DashMap<String, MemoryIndex>,
    tasks: DashMap<String, MemoryTask>,
    next_task: AtomicU64,
    rejected_groups: DashMap<SettingsGroup, String>,
    stalled: AtomicBool,
    hanging_updates: AtomicBool,
    transient_failures: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an index without going through tasks. Not counted as a write.
    pub fn insert_index(&self, index: &str, settings: BackendSettings) {
        self.indexes.insert(
            index.to_string(),
            MemoryIndex {
                settings,
                documents: BTreeMap::new(),
            },
        );
    }

    /// Seed a document directly. Not counted as a write.
    pub fn seed_document(&self, index: &str, id: &str, doc: BackendDocument) {
        self.indexes
            .entry(index.to_string())
            .or_insert_with(|| MemoryIndex::new(None))
            .documents
            .insert(id.to_string(), doc);
    }

    /// Settings tasks for `group` fail with `message` once processed.
    pub fn reject_group(&self, group: SettingsGroup, message: impl Into<String>) {
        self.rejected_groups.insert(group, message.into());
    }

    /// While stalled, tasks never leave their current state.
    pub fn stall_tasks(&self, stalled: bool) {
        self.stalled.store(stalled, AtomicOrdering::SeqCst);
    }

    /// While set, settings update requests never get a response.
    pub fn hang_settings_updates(&self, hanging: bool) {
        self.hanging_updates.store(hanging, AtomicOrdering::SeqCst);
    }

    /// The next `n` calls of any kind fail with a retryable error.
    pub fn fail_next(&self, n: usize) {
        self.transient_failures.store(n, AtomicOrdering::SeqCst);
    }

    /// Mutating calls received: index creation, settings updates, upserts.
    pub fn write_count(&self) -> usize {
        self.writes.load(AtomicOrdering::SeqCst)
    }

    pub fn document_count(&self, index: &str) -> usize {
        self.indexes
            .get(index)
            .map(|idx| idx.documents.len())
            .unwrap_or(0)
    }

    pub fn settings(&self, index: &str) -> Option<BackendSettings> {
        self.indexes.get(index).map(|idx| idx.settings.clone())
    }

    fn injected_failure(&self) -> Result<(), TransportError> {
        let took = self.transient_failures.fetch_update(
            AtomicOrdering::SeqCst,
            AtomicOrdering::SeqCst,
            |n| n.checked_sub(1),
        );
        match took {
            Ok(_) => Err(TransportError::Unreachable(
                "injected transient failure".to_string(),
            )),
            Err(_) => Ok(()),
        }
    }

    fn enqueue(&self, kind: TaskKind) -> String {
        self.writes.fetch_add(1, AtomicOrdering::SeqCst);
        let id = self.next_task.fetch_add(1, AtomicOrdering::SeqCst).to_string();
        self.tasks.insert(
            id.clone(),
            MemoryTask {
                kind,
                state: TaskState::Enqueued,
            },
        );
        id
    }

    fn execute(&self, kind: &TaskKind) -> Result<(), String> {
        match kind {
            TaskKind::CreateIndex { index, primary_key } => {
                if self.indexes.contains_key(index) {
                    return Err(format!("Index `{}` already exists.", index));
                }
                self.indexes
                    .insert(index.clone(), MemoryIndex::new(Some(primary_key.clone())));
                Ok(())
            }
            TaskKind::Settings { index, change } => {
                if let Some(message) = self.rejected_groups.get(&change.group()) {
                    return Err(message.value().clone());
                }
                let mut idx = self
                    .indexes
                    .get_mut(index)
                    .ok_or_else(|| format!("Index `{}` not found.", index))?;
                if let SettingsChange::PrimaryKey(pk) = change {
                    let current = idx.settings.primary_key.as_deref();
                    if !idx.documents.is_empty() && current.is_some_and(|c| c != pk.as_str()) {
                        return Err(format!("Index `{}` already has a primary key.", index));
                    }
                }
                idx.settings.apply(change);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl SearchBackend for MemoryBackend {
    async fn get_settings(&self, index: &str) -> Result<Option<BackendSettings>, TransportError> {
        self.injected_failure()?;
        Ok(self.indexes.get(index).map(|idx| {
            let mut settings = idx.settings.clone();
            settings.number_of_documents = idx.documents.len() as u64;
            settings
        }))
    }

    async fn create_index(&self, index: &str, primary_key: &str) -> Result<String, TransportError> {
        self.injected_failure()?;
        Ok(self.enqueue(TaskKind::CreateIndex {
            index: index.to_string(),
            primary_key: primary_key.to_string(),
        }))
    }

    async fn update_settings(
        &self,
        index: &str,
        change: &SettingsChange,
    ) -> Result<String, TransportError> {
        self.injected_failure()?;
        if self.hanging_updates.load(AtomicOrdering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.enqueue(TaskKind::Settings {
            index: index.to_string(),
            change: change.clone(),
        }))
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskState, TransportError> {
        self.injected_failure()?;
        let mut task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TransportError::Protocol(format!("unknown task {}", task_id)))?;
        if self.stalled.load(AtomicOrdering::SeqCst) {
            return Ok(task.state.clone());
        }
        task.state = match &task.state {
            TaskState::Enqueued => TaskState::Processing,
            TaskState::Processing => match self.execute(&task.kind) {
                Ok(()) => TaskState::Succeeded,
                Err(message) => TaskState::Failed(message),
            },
            terminal => terminal.clone(),
        };
        Ok(task.state.clone())
    }

    async fn upsert_document(
        &self,
        index: &str,
        primary_key: &str,
        doc: &BackendDocument,
    ) -> Result<(), TransportError> {
        self.injected_failure()?;
        let id = match doc.get(primary_key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(TransportError::Protocol(format!(
                    "document has no `{}` primary key",
                    primary_key
                )))
            }
        };
        self.writes.fetch_add(1, AtomicOrdering::SeqCst);

        let mut idx = self
            .indexes
            .entry(index.to_string())
            .or_insert_with(|| MemoryIndex::new(Some(primary_key.to_string())));
        if idx.settings.primary_key.is_none() {
            idx.settings.primary_key = Some(primary_key.to_string());
        }
        if let Some(existing) = idx.documents.get(&id) {
            if updated_at(existing) > updated_at(doc) {
                tracing::debug!("[MEMORY {}] stale write for {} ignored", index, id);
                return Ok(());
            }
        }
        idx.documents.insert(id, doc.clone());
        Ok(())
    }

    async fn get_document(
        &self,
        index: &str,
        id: &str,
    ) -> Result<Option<BackendDocument>, TransportError> {
        self.injected_failure()?;
        Ok(self
            .indexes
            .get(index)
            .and_then(|idx| idx.documents.get(id).cloned()))
    }

    async fn search(
        &self,
        index: &str,
        query: &PlannedQuery,
    ) -> Result<BackendSearchResponse, TransportError> {
        self.injected_failure()?;
        let idx = self
            .indexes
            .get(index)
            .ok_or_else(|| TransportError::Protocol(format!("Index `{}` not found.", index)))?;

        let terms: Vec<String> = query
            .query()
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        let searchable = &idx.settings.searchable_attributes;
        let all_fields = searchable.iter().any(|a| a == "*");

        let mut hits: Vec<&BackendDocument> = idx
            .documents
            .values()
            .filter(|doc| {
                terms.iter().all(|term| {
                    doc.iter()
                        .filter(|(k, _)| all_fields || searchable.iter().any(|a| a == *k))
                        .any(|(_, v)| value_contains(v, term))
                })
            })
            .filter(|doc| query.filter_exprs().iter().all(|f| f.matches(doc)))
            .collect();

        hits.sort_by(|a, b| {
            for sort in query.sort_exprs() {
                let ord = match (sort_key(a.get(&sort.field)), sort_key(b.get(&sort.field))) {
                    (Some(x), Some(y)) => {
                        let o = x.compare(&y);
                        match sort.order {
                            SortOrder::Asc => o,
                            SortOrder::Desc => o.reverse(),
                        }
                    }
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        if let Some(distinct) = &idx.settings.distinct_attribute {
            let mut seen = HashSet::new();
            hits.retain(|doc| match doc.get(distinct) {
                Some(v) if !v.is_null() => seen.insert(v.to_string()),
                _ => true,
            });
        }

        let total = hits.len() as u64;
        let page = hits
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit() as usize)
            .cloned()
            .collect();

        Ok(BackendSearchResponse {
            hits: page,
            total,
            processing_time_ms: 0,
        })
    }
}

fn updated_at(doc: &BackendDocument) -> u64 {
    doc.get("updated_at").and_then(Value::as_u64).unwrap_or(0)
}

fn value_contains(value: &Value, term: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(term),
        Value::Number(n) => n.to_string().contains(term),
        Value::Array(items) => items.iter().any(|v| value_contains(v, term)),
        _ => false,
    }
}

enum SortKey {
    Number(f64),
    Text(String),
}

impl SortKey {
    fn compare(&self, other: &SortKey) -> Ordering {
        match (self, other) {
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::Number(_), SortKey::Text(_)) => Ordering::Less,
            (SortKey::Text(_), SortKey::Number(_)) => Ordering::Greater,
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
        }
    }
}

fn sort_key(value: Option<&Value>) -> Option<SortKey> {
    match value? {
        Value::Number(n) => n.as_f64().map(SortKey::Number),
        Value::String(s) => Some(SortKey::Text(s.to_lowercase())),
        _ => None,
    }
}
