//! Outbox worker pool.
//!
//! Each worker loops: sweep stale claims, claim the best ready item, skip it
//! if its key already completed, suppress it if the recipient opted out, then
//! run the handler under a timeout and record the outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;

use leadline_core::actions::catalog::{INTERNAL_NOTIFICATION, SMS_SEND, VOICE_CALL_INITIATE};
use leadline_core::config::OutboxConfig;
use leadline_core::domain::conversation::LeadId;
use leadline_core::domain::outbox::{OutboxItem, OutboxStatus, Priority};
use leadline_core::executors::FailureKind;
use leadline_core::outbox_engine::NewOutboxItem;
use leadline_core::phone::normalize_e164;
use leadline_core::ActionRegistry;
use leadline_db::repositories::{RepositoryError, SessionRepository};
use leadline_db::{OutboxQueue, QueueError};

pub const STOPPED_REASON: &str = "stopped";

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessorSettings {
    pub workers: usize,
    pub poll_interval: Duration,
    pub dispatch_timeout: Duration,
}

impl ProcessorSettings {
    pub fn from_config(config: &OutboxConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
            dispatch_timeout: Duration::from_secs(config.dispatch_timeout_secs.max(1)),
        }
    }
}

/// What one worker iteration did.
#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    Idle,
    Completed(OutboxItem),
    SkippedDuplicate(OutboxItem),
    Suppressed(OutboxItem),
    Retrying(OutboxItem),
    DeadLettered(OutboxItem),
}

#[derive(Clone)]
pub struct OutboxProcessor {
    queue: OutboxQueue,
    registry: Arc<ActionRegistry>,
    sessions: Arc<dyn SessionRepository>,
    settings: ProcessorSettings,
}

impl OutboxProcessor {
    pub fn new(
        queue: OutboxQueue,
        registry: Arc<ActionRegistry>,
        sessions: Arc<dyn SessionRepository>,
        settings: ProcessorSettings,
    ) -> Self {
        Self { queue, registry, sessions, settings }
    }

    /// Runs the worker pool until `shutdown` flips to `true`. In-flight
    /// dispatches finish before a worker exits.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let mut workers = JoinSet::new();
        for index in 0..self.settings.workers {
            let processor = self.clone();
            let shutdown = shutdown.clone();
            workers.spawn(async move { processor.work(format!("worker-{index}"), shutdown).await });
        }

        tracing::info!(
            event_name = "outbox.processor.started",
            correlation_id = "bootstrap",
            workers = self.settings.workers,
            "outbox processor started"
        );
        while workers.join_next().await.is_some() {}
        tracing::info!(
            event_name = "outbox.processor.stopped",
            correlation_id = "shutdown",
            "outbox processor stopped"
        );
    }

    async fn work(&self, worker_id: String, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self.tick(&worker_id, Utc::now()).await {
                Ok(TickOutcome::Idle) => Some(self.settings.poll_interval),
                Ok(_) => None,
                Err(error) => {
                    tracing::error!(
                        event_name = "outbox.worker.error",
                        worker_id = %worker_id,
                        error = %error,
                        "outbox worker iteration failed"
                    );
                    Some(self.settings.poll_interval)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    pub async fn tick(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TickOutcome, ProcessorError> {
        let recovered = self.queue.recover_stale(now).await?;
        if !recovered.is_empty() {
            tracing::warn!(
                event_name = "outbox.claims.recovered",
                worker_id,
                count = recovered.len(),
                "expired claims returned to the queue"
            );
        }

        let Some(item) = self.queue.claim_next(worker_id, now).await? else {
            return Ok(TickOutcome::Idle);
        };

        if let Some(original) = self.queue.completed_duplicate(&item).await? {
            tracing::info!(
                event_name = "outbox.item.duplicate_skipped",
                item_id = %item.id,
                duplicate_of = %original.id,
                correlation_id = %item.correlation_id,
                "key already completed; handler not invoked"
            );
            let skipped = self.queue.skip_duplicate(item, &original.id, Utc::now()).await?;
            return Ok(TickOutcome::SkippedDuplicate(skipped));
        }

        if self.recipient_stopped(&item).await? {
            tracing::warn!(
                event_name = "outbox.item.suppressed",
                item_id = %item.id,
                action_type = %item.action_type,
                correlation_id = %item.correlation_id,
                "recipient opted out after enqueue; send suppressed"
            );
            let suppressed = self.queue.suppress(item, STOPPED_REASON, Utc::now()).await?;
            return Ok(TickOutcome::Suppressed(suppressed));
        }

        let dispatched = tokio::time::timeout(
            self.settings.dispatch_timeout,
            self.registry.dispatch(&item.action_type, &item.payload),
        )
        .await;

        let finished_at = Utc::now();
        let failure = match dispatched {
            Ok(Ok(receipt)) => {
                let result = serde_json::to_string(&receipt)
                    .unwrap_or_else(|_| receipt.provider.clone());
                let completed = self.queue.complete(item, result, finished_at).await?;
                tracing::info!(
                    event_name = "outbox.item.completed",
                    item_id = %completed.id,
                    action_type = %completed.action_type,
                    attempt = completed.attempt,
                    correlation_id = %completed.correlation_id,
                    "outbox item delivered"
                );
                return Ok(TickOutcome::Completed(completed));
            }
            Ok(Err(error)) => (error.to_string(), error.error_class(), error.kind()),
            Err(_) => (
                format!("dispatch exceeded {:?}", self.settings.dispatch_timeout),
                "timeout",
                FailureKind::Transient,
            ),
        };

        let (error, error_class, kind) = failure;
        let failed = self.queue.fail(item, error, error_class, kind, finished_at).await?;
        if failed.status != OutboxStatus::Dead {
            tracing::warn!(
                event_name = "outbox.item.retry_scheduled",
                item_id = %failed.id,
                attempt = failed.attempt,
                error_class,
                available_at = %failed.available_at,
                correlation_id = %failed.correlation_id,
                "transient failure; retry scheduled"
            );
            return Ok(TickOutcome::Retrying(failed));
        }

        tracing::warn!(
            event_name = "outbox.item.dead_lettered",
            item_id = %failed.id,
            action_type = %failed.action_type,
            attempt = failed.attempt,
            error_class,
            correlation_id = %failed.correlation_id,
            "outbox item dead-lettered"
        );
        self.raise_alert(&failed, finished_at).await?;
        Ok(TickOutcome::DeadLettered(failed))
    }

    /// Customer-facing sends re-check the opt-out flag right before dispatch,
    /// both on the item's session and on every session holding the
    /// recipient's number. Compliance replies are exempt.
    async fn recipient_stopped(&self, item: &OutboxItem) -> Result<bool, ProcessorError> {
        let canonical =
            self.registry.resolve(&item.action_type).unwrap_or(item.action_type.as_str());
        if canonical != SMS_SEND && canonical != VOICE_CALL_INITIATE {
            return Ok(false);
        }
        if item.payload.get("compliance").and_then(Value::as_bool) == Some(true) {
            return Ok(false);
        }

        if let Some(session_key) = item.session_key.as_deref() {
            let session = self.sessions.find(&LeadId(session_key.to_string())).await?;
            if session.is_some_and(|session| session.stopped) {
                return Ok(true);
            }
        }

        let Some(phone) = item.payload.get("phone").and_then(Value::as_str).and_then(normalize_e164)
        else {
            return Ok(false);
        };
        let sessions = self.sessions.list_by_phone(&phone).await?;
        Ok(sessions.iter().any(|session| session.stopped))
    }

    async fn raise_alert(
        &self,
        dead: &OutboxItem,
        now: DateTime<Utc>,
    ) -> Result<(), ProcessorError> {
        let canonical =
            self.registry.resolve(&dead.action_type).unwrap_or(dead.action_type.as_str());
        if canonical == INTERNAL_NOTIFICATION {
            tracing::error!(
                event_name = "outbox.alert.undeliverable",
                item_id = %dead.id,
                correlation_id = %dead.correlation_id,
                "alert itself dead-lettered; not re-alerting"
            );
            return Ok(());
        }

        let message = format!(
            "Outbox item {} ({}) dead after {} attempt(s): {}",
            dead.id,
            dead.action_type,
            dead.attempt,
            dead.last_error.as_deref().unwrap_or("unknown error")
        );
        let alert = NewOutboxItem::new(
            INTERNAL_NOTIFICATION,
            json!({"message": message, "severity": "critical", "item_id": dead.id.0}),
        )
        .with_priority(Priority::High)
        .with_idempotency_key(format!("alert:{}", dead.id))
        .with_correlation_id(dead.correlation_id.clone());

        let outcome = self.queue.enqueue(alert, now).await?;
        tracing::info!(
            event_name = "outbox.alert.enqueued",
            item_id = %dead.id,
            alert_id = %outcome.item.id,
            correlation_id = %dead.correlation_id,
            "dead-letter alert enqueued"
        );
        Ok(())
    }
}
