use super::{BackendSearchResponse, SearchBackend};
use crate::config::PollConfig;
use crate::error::{ConfigError, TransportError};
use crate::index::document::BackendDocument;
use crate::index::settings::{BackendSettings, SettingsChange};
use crate::index::task::{Backoff, BackendTask, TaskProgress, TaskState};
use crate::query::planner::PlannedQuery;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// [`SearchBackend`] speaking the Meilisearch HTTP API.
#[derive(Debug, Clone)]
pub struct MeilisearchBackend {
    client: reqwest::Client,
    base: Url,
    /// How document write tasks are awaited.
    poll: PollConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexInfo {
    #[serde(default)]
    primary_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexStats {
    #[serde(default)]
    number_of_documents: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsBody {
    #[serde(default)]
    searchable_attributes: Vec<String>,
    /// Strings, or `{"attributePatterns": [...]}` objects on newer servers.
    #[serde(default)]
    filterable_attributes: Vec<Value>,
    #[serde(default)]
    sortable_attributes: Vec<String>,
    #[serde(default)]
    ranking_rules: Vec<String>,
    #[serde(default)]
    distinct_attribute: Option<String>,
}

#[derive(Deserialize)]
struct TaskBody {
    status: String,
    #[serde(default)]
    error: Option<TaskErrorBody>,
}

#[derive(Deserialize)]
struct TaskErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchBody {
    #[serde(default)]
    hits: Vec<BackendDocument>,
    #[serde(default)]
    estimated_total_hits: Option<u64>,
    #[serde(default)]
    total_hits: Option<u64>,
    #[serde(default)]
    processing_time_ms: u64,
}

impl MeilisearchBackend {
    pub fn new(
        url: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let base = Url::parse(url).map_err(|e| ConfigError::InvalidValue {
            key: "url".to_string(),
            value: url.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(ConfigError::InvalidValue {
                key: "url".to_string(),
                value: url.to_string(),
                reason: "not a base URL".to_string(),
            });
        }

        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|e| {
                ConfigError::InvalidValue {
                    key: "api_key".to_string(),
                    value: "<redacted>".to_string(),
                    reason: e.to_string(),
                }
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "url".to_string(),
                value: url.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(MeilisearchBackend {
            client,
            base,
            poll: PollConfig::default(),
        })
    }

    pub fn with_task_polling(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // `new` rejects cannot-be-a-base URLs, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        self.client.request(method, self.endpoint(segments))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        request.send().await.map_err(map_send_error)
    }

    /// Send and fail on any non-success status.
    async fn send_ok(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        let resp = self.send(request).await?;
        check_status(resp).await
    }

    async fn enqueue(&self, request: RequestBuilder) -> Result<String, TransportError> {
        let body: Value = read_json(self.send_ok(request).await?).await?;
        task_uid(&body)
    }

    /// Poll a document task until the server has processed it. Meilisearch
    /// accepts every well-formed write request, so rejections only show up
    /// on the task.
    async fn await_document_task(
        &self,
        index: &str,
        task_id: String,
    ) -> Result<(), TransportError> {
        let mut task = BackendTask::new(task_id, format!("{} documents", index));
        let mut backoff = Backoff::new(self.poll.initial_delay(), self.poll.max_delay());
        let deadline = Instant::now() + self.poll.deadline();
        loop {
            let reported = self.get_task(&task.task_id).await;
            match reported {
                Ok(state) => match task.observe(state) {
                    TaskProgress::Succeeded => return Ok(()),
                    TaskProgress::Failed(message) => {
                        tracing::warn!(
                            "[MEILI {}] document task {} failed: {}",
                            index,
                            task.task_id,
                            message
                        );
                        return Err(TransportError::TaskFailed {
                            task_id: task.task_id,
                            message,
                        });
                    }
                    TaskProgress::Pending => {}
                },
                Err(e) if e.is_retryable() => {
                    tracing::warn!("[TASK {}] poll failed, will retry: {}", task.task_id, e);
                }
                Err(e) => return Err(e),
            }

            let delay = backoff.next_delay();
            if Instant::now() + delay > deadline {
                return Err(TransportError::Timeout(format!(
                    "document task {} still pending after {} poll(s)",
                    task.task_id,
                    task.polls()
                )));
            }
            sleep(delay).await;
        }
    }
}

fn map_send_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() {
        TransportError::Unreachable(e.to_string())
    } else {
        TransportError::Protocol(e.to_string())
    }
}

async fn check_status(resp: Response) -> Result<Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| "failed to read response body".into());
    let message = format!("backend returned {status}: {body}");
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportError::AuthFailed(message),
        StatusCode::TOO_MANY_REQUESTS => TransportError::RateLimited { retry_after },
        s if s.is_server_error() => TransportError::Unreachable(message),
        _ => TransportError::Protocol(message),
    })
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, TransportError> {
    resp.json::<T>()
        .await
        .map_err(|e| TransportError::Protocol(format!("failed to parse response JSON: {e}")))
}

fn task_uid(body: &Value) -> Result<String, TransportError> {
    match body.get("taskUid").or_else(|| body.get("uid")) {
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(TransportError::Protocol(format!(
            "response has no task uid: {body}"
        ))),
    }
}

fn flatten_filterable(entries: Vec<Value>) -> Vec<String> {
    let mut out = Vec::new();
    for entry in entries {
        match entry {
            Value::String(s) => out.push(s),
            Value::Object(obj) => {
                if let Some(Value::Array(patterns)) = obj.get("attributePatterns") {
                    out.extend(patterns.iter().filter_map(|p| p.as_str().map(str::to_string)));
                }
            }
            _ => {}
        }
    }
    out
}

#[async_trait]
impl SearchBackend for MeilisearchBackend {
    async fn get_settings(&self, index: &str) -> Result<Option<BackendSettings>, TransportError> {
        let resp = self.send(self.request(Method::GET, &["indexes", index])).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            tracing::debug!("[MEILI {}] index not found", index);
            return Ok(None);
        }
        let info: IndexInfo = read_json(check_status(resp).await?).await?;

        let stats: IndexStats = read_json(
            self.send_ok(self.request(Method::GET, &["indexes", index, "stats"]))
                .await?,
        )
        .await?;

        let settings: SettingsBody = read_json(
            self.send_ok(self.request(Method::GET, &["indexes", index, "settings"]))
                .await?,
        )
        .await?;

        Ok(Some(BackendSettings {
            primary_key: info.primary_key,
            number_of_documents: stats.number_of_documents,
            searchable_attributes: settings.searchable_attributes,
            filterable_attributes: flatten_filterable(settings.filterable_attributes),
            sortable_attributes: settings.sortable_attributes,
            ranking_rules: settings.ranking_rules,
            distinct_attribute: settings.distinct_attribute,
        }))
    }

    async fn create_index(&self, index: &str, primary_key: &str) -> Result<String, TransportError> {
        let task = self
            .enqueue(
                self.request(Method::POST, &["indexes"])
                    .json(&json!({"uid": index, "primaryKey": primary_key})),
            )
            .await?;
        tracing::info!("[MEILI {}] create index enqueued as task {}", index, task);
        Ok(task)
    }

    async fn update_settings(
        &self,
        index: &str,
        change: &SettingsChange,
    ) -> Result<String, TransportError> {
        let group = change.group();
        let request = match change {
            SettingsChange::PrimaryKey(pk) => self
                .request(Method::PATCH, &["indexes", index])
                .json(&json!({ "primaryKey": pk })),
            SettingsChange::DistinctAttribute(None) => self.request(
                Method::DELETE,
                &["indexes", index, "settings", "distinct-attribute"],
            ),
            other => {
                let route = group.route().ok_or_else(|| {
                    TransportError::Protocol(format!("{group} has no settings route"))
                })?;
                self.request(Method::PUT, &["indexes", index, "settings", route])
                    .json(&other.to_json())
            }
        };
        let task = self.enqueue(request).await?;
        tracing::debug!("[MEILI {}] {} update enqueued as task {}", index, group, task);
        Ok(task)
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskState, TransportError> {
        let body: TaskBody =
            read_json(self.send_ok(self.request(Method::GET, &["tasks", task_id])).await?).await?;
        let message = || {
            body.error
                .as_ref()
                .map(|e| e.message.clone())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("task {}", body.status))
        };
        match body.status.as_str() {
            "enqueued" => Ok(TaskState::Enqueued),
            "processing" => Ok(TaskState::Processing),
            "succeeded" => Ok(TaskState::Succeeded),
            "failed" | "canceled" => Ok(TaskState::Failed(message())),
            other => Err(TransportError::Protocol(format!(
                "unknown task status {other:?} for task {task_id}"
            ))),
        }
    }

    async fn upsert_document(
        &self,
        index: &str,
        primary_key: &str,
        doc: &BackendDocument,
    ) -> Result<(), TransportError> {
        let request = self
            .request(Method::POST, &["indexes", index, "documents"])
            .query(&[("primaryKey", primary_key)])
            .json(&[doc]);
        let task = self.enqueue(request).await?;
        tracing::debug!("[MEILI {}] document write enqueued as task {}", index, task);
        self.await_document_task(index, task).await
    }

    async fn get_document(
        &self,
        index: &str,
        id: &str,
    ) -> Result<Option<BackendDocument>, TransportError> {
        let resp = self
            .send(self.request(Method::GET, &["indexes", index, "documents", id]))
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(read_json(check_status(resp).await?).await?))
    }

    async fn search(
        &self,
        index: &str,
        query: &PlannedQuery,
    ) -> Result<BackendSearchResponse, TransportError> {
        let mut body = json!({
            "q": query.query(),
            "limit": query.limit(),
            "offset": query.offset(),
        });
        if !query.filter_exprs().is_empty() {
            body["filter"] = Value::Array(
                query
                    .filter_exprs()
                    .iter()
                    .map(|f| Value::String(f.to_string()))
                    .collect(),
            );
        }
        if !query.sort_exprs().is_empty() {
            body["sort"] = Value::Array(
                query
                    .sort_exprs()
                    .iter()
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            );
        }

        let resp: SearchBody = read_json(
            self.send_ok(
                self.request(Method::POST, &["indexes", index, "search"])
                    .json(&body),
            )
            .await?,
        )
        .await?;

        let total = resp
            .estimated_total_hits
            .or(resp.total_hits)
            .unwrap_or(resp.hits.len() as u64);
        tracing::debug!(
            "[MEILI {}] search {:?}: {} hits of {} in {}ms",
            index,
            query.query(),
            resp.hits.len(),
            total,
            resp.processing_time_ms
        );
        Ok(BackendSearchResponse {
            hits: resp.hits,
            total,
            processing_time_ms: resp.processing_time_ms,
        })
    }
}
