use crate::backend::SearchBackend;
use crate::config::PollConfig;
use crate::error::{SyncError, TransportError};
use crate::index::schema::IndexSchema;
use crate::index::settings::{diff_settings, BackendSettings, SettingsGroup};
use crate::index::task::{Backoff, SettingsTask, TaskProgress};
use crate::types::ApplyOutcome;
use std::future::Future;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Brings a backend index's settings in line with a schema.
///
/// Changed groups are submitted one at a time and each task is polled to a
/// terminal state before the next group is sent, so a failure always names
/// exactly one group. Callers must not run two reconcilers against the same
/// index concurrently.
pub struct SettingsReconciler<'a> {
    backend: &'a dyn SearchBackend,
    poll: PollConfig,
}

impl<'a> SettingsReconciler<'a> {
    pub fn new(backend: &'a dyn SearchBackend, poll: PollConfig) -> Self {
        SettingsReconciler { backend, poll }
    }

    pub async fn apply(
        &self,
        schema: &IndexSchema,
        cancel: &CancellationToken,
    ) -> Result<ApplyOutcome, SyncError> {
        let index = schema.index_name.as_str();
        let run = uuid::Uuid::new_v4();
        let deadline = Instant::now() + self.poll.deadline();
        let mut groups = Vec::new();

        let current = match self
            .call(None, deadline, cancel, self.backend.get_settings(index))
            .await?
        {
            Some(settings) => settings,
            None => {
                tracing::info!(
                    "[SETTINGS {}] run {}: index missing, creating with primary key {}",
                    index,
                    run,
                    schema.primary_key_field
                );
                let group = SettingsGroup::PrimaryKey;
                let task_id = self
                    .call(
                        Some(group),
                        deadline,
                        cancel,
                        self.backend.create_index(index, &schema.primary_key_field),
                    )
                    .await?;
                self.wait_for(SettingsTask::new(task_id, group), deadline, cancel)
                    .await?;
                groups.push(group);
                self.fetch_created(index, deadline, cancel).await?
            }
        };

        let changes = diff_settings(schema, &current).map_err(|e| {
            tracing::error!("[SETTINGS {}] run {}: {}", index, run, e);
            e
        })?;

        if changes.is_empty() && groups.is_empty() {
            tracing::info!("[SETTINGS {}] run {}: already in sync", index, run);
            return Ok(ApplyOutcome::unchanged());
        }

        for change in &changes {
            let group = change.group();
            let task_id = self
                .call(
                    Some(group),
                    deadline,
                    cancel,
                    self.backend.update_settings(index, change),
                )
                .await?;
            tracing::info!(
                "[SETTINGS {}] run {}: {} update submitted as task {}",
                index,
                run,
                group,
                task_id
            );
            self.wait_for(SettingsTask::new(task_id, group), deadline, cancel)
                .await?;
            groups.push(group);
        }

        tracing::info!(
            "[SETTINGS {}] run {}: applied {} group(s)",
            index,
            run,
            groups.len()
        );
        Ok(ApplyOutcome {
            success: true,
            changed: true,
            groups,
        })
    }

    async fn fetch_created(
        &self,
        index: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<BackendSettings, SyncError> {
        self.call(None, deadline, cancel, self.backend.get_settings(index))
            .await?
            .ok_or_else(|| SyncError::Transport {
                group: None,
                source: TransportError::Protocol(format!(
                    "index {} missing right after creation",
                    index
                )),
            })
    }

    /// Run one backend call, racing it against cancellation and the deadline.
    async fn call<T, F>(
        &self,
        group: Option<SettingsGroup>,
        deadline: Instant,
        cancel: &CancellationToken,
        fut: F,
    ) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled { group, task_id: None }),
            _ = sleep_until(deadline) => Err(SyncError::Timeout { group, task_id: None }),
            res = fut => res.map_err(|source| SyncError::Transport { group, source }),
        }
    }

    async fn wait_for(
        &self,
        mut task: SettingsTask,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let mut backoff = Backoff::new(self.poll.initial_delay(), self.poll.max_delay());
        let group = task.subject;
        let cancelled = |task: &SettingsTask| SyncError::Cancelled {
            group: Some(group),
            task_id: Some(task.task_id.clone()),
        };
        let timed_out = |task: &SettingsTask| SyncError::Timeout {
            group: Some(group),
            task_id: Some(task.task_id.clone()),
        };

        loop {
            let reported = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(&task)),
                _ = sleep_until(deadline) => return Err(timed_out(&task)),
                res = self.backend.get_task(&task.task_id) => res,
            };

            match reported {
                Ok(state) => match task.observe(state) {
                    TaskProgress::Succeeded => {
                        tracing::debug!(
                            "[TASK {}] {} succeeded after {} poll(s)",
                            task.task_id,
                            group,
                            task.polls()
                        );
                        return Ok(());
                    }
                    TaskProgress::Failed(message) => {
                        tracing::warn!("[TASK {}] {} rejected: {}", task.task_id, group, message);
                        return Err(SyncError::BackendRejected {
                            group,
                            task_id: task.task_id.clone(),
                            message,
                        });
                    }
                    TaskProgress::Pending => {}
                },
                Err(e) if e.is_retryable() => {
                    tracing::warn!("[TASK {}] poll failed, will retry: {}", task.task_id, e);
                }
                Err(source) => {
                    return Err(SyncError::Transport {
                        group: Some(group),
                        source,
                    })
                }
            }

            let delay = backoff.next_delay();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(&task)),
                _ = sleep_until(deadline) => return Err(timed_out(&task)),
                _ = sleep(delay) => {}
            }
        }
    }
}
