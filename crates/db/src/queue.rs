//! Persistent outbox: the pure [`OutboxEngine`] decides, the repository
//! stores, and every accepted change is written together with its transition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use leadline_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use leadline_core::domain::conversation::LeadId;
use leadline_core::domain::outbox::{OutboxItem, OutboxItemId, OutboxStatus, OutboxTransition};
use leadline_core::executors::FailureKind;
use leadline_core::outbox_engine::{NewOutboxItem, OutboxEngine, OutboxError, TransitionResult};

use crate::repositories::{InsertOutcome, OutboxRepository, RepositoryError};

const CLAIM_BATCH: u32 = 8;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Outbox(#[from] OutboxError),
    #[error("outbox item {0} was changed by another worker")]
    Conflict(OutboxItemId),
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnqueueOutcome {
    pub item: OutboxItem,
    /// The key already belonged to a live item, which is returned instead.
    pub duplicate: bool,
}

#[derive(Clone)]
pub struct OutboxQueue {
    repository: Arc<dyn OutboxRepository>,
    engine: OutboxEngine,
    audit: Arc<dyn AuditSink>,
}

impl OutboxQueue {
    pub fn new(
        repository: Arc<dyn OutboxRepository>,
        engine: OutboxEngine,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { repository, engine, audit }
    }

    pub fn engine(&self) -> &OutboxEngine {
        &self.engine
    }

    pub async fn enqueue(
        &self,
        new_item: NewOutboxItem,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, QueueError> {
        let created = self.engine.create_item(new_item, now);

        match self.repository.insert_if_absent(created.item.clone()).await? {
            InsertOutcome::Inserted => {
                self.repository.append_transition(created.transition.clone()).await?;
                self.emit(&created.item, &created.transition);
                tracing::debug!(
                    event_name = "outbox.item.enqueued",
                    item_id = %created.item.id,
                    action_type = %created.item.action_type,
                    priority = created.item.priority.as_str(),
                    correlation_id = %created.item.correlation_id,
                    "outbox item enqueued"
                );
                Ok(EnqueueOutcome { item: created.item, duplicate: false })
            }
            InsertOutcome::Existing(existing) => {
                self.audit.emit(
                    AuditEvent::new(
                        lead_of(&existing),
                        created.item.correlation_id.as_str(),
                        "outbox.item.duplicate_rejected",
                        AuditCategory::Outbox,
                        "ingress",
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("existing_item_id", existing.id.0.as_str())
                    .with_metadata("idempotency_key", existing.idempotency_key.0.as_str()),
                );
                Ok(EnqueueOutcome { item: existing, duplicate: true })
            }
        }
    }

    /// Claims the best ready item for `worker_id`. Losing a race to another
    /// worker moves on to the next candidate.
    pub async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxItem>, QueueError> {
        for candidate in self.repository.list_claimable(now, CLAIM_BATCH).await? {
            let expected = candidate.state_version;
            let claimed = match self.engine.claim_item(candidate, worker_id, now) {
                Ok(claimed) => claimed,
                Err(_) => continue,
            };
            if self.repository.compare_and_set(claimed.item.clone(), expected).await? {
                self.repository.append_transition(claimed.transition).await?;
                return Ok(Some(claimed.item));
            }
        }
        Ok(None)
    }

    /// A completed item, other than `item`, that carries the same key.
    pub async fn completed_duplicate(
        &self,
        item: &OutboxItem,
    ) -> Result<Option<OutboxItem>, QueueError> {
        Ok(self.repository.find_completed_by_key(&item.idempotency_key, &item.id).await?)
    }

    pub async fn complete(
        &self,
        item: OutboxItem,
        result: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<OutboxItem, QueueError> {
        let expected = item.state_version;
        let outcome = self.engine.complete_item(item, result, now)?;
        self.record(expected, outcome).await
    }

    pub async fn skip_duplicate(
        &self,
        item: OutboxItem,
        completed_by: &OutboxItemId,
        now: DateTime<Utc>,
    ) -> Result<OutboxItem, QueueError> {
        let expected = item.state_version;
        let outcome = self.engine.skip_duplicate(item, completed_by, now)?;
        self.record(expected, outcome).await
    }

    pub async fn suppress(
        &self,
        item: OutboxItem,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<OutboxItem, QueueError> {
        let expected = item.state_version;
        let outcome = self.engine.suppress_item(item, reason, now)?;
        self.record(expected, outcome).await
    }

    pub async fn fail(
        &self,
        item: OutboxItem,
        error: impl Into<String>,
        error_class: impl Into<String>,
        kind: FailureKind,
        now: DateTime<Utc>,
    ) -> Result<OutboxItem, QueueError> {
        let expected = item.state_version;
        let outcome = self.engine.fail_item(item, error, error_class, kind, now)?;
        self.record(expected, outcome).await
    }

    /// Returns expired claims to `failed_transient`. Claims recovered by a
    /// concurrent sweep are skipped.
    pub async fn recover_stale(&self, now: DateTime<Utc>) -> Result<Vec<OutboxItem>, QueueError> {
        let processing = self.repository.list_by_status(OutboxStatus::Processing, u32::MAX).await?;
        let mut recovered = Vec::new();

        for item in self.engine.stale_items(processing, now) {
            let expected = item.state_version;
            let outcome = self.engine.recover_stale(item, now)?;
            match self.record(expected, outcome).await {
                Ok(item) => recovered.push(item),
                Err(QueueError::Conflict(_)) => continue,
                Err(error) => return Err(error),
            }
        }

        Ok(recovered)
    }

    pub async fn find(&self, id: &OutboxItemId) -> Result<Option<OutboxItem>, QueueError> {
        Ok(self.repository.find(id).await?)
    }

    pub async fn dead_letters(&self, limit: u32) -> Result<Vec<OutboxItem>, QueueError> {
        Ok(self.repository.list_by_status(OutboxStatus::Dead, limit).await?)
    }

    pub async fn transitions(
        &self,
        id: &OutboxItemId,
    ) -> Result<Vec<OutboxTransition>, QueueError> {
        Ok(self.repository.list_transitions(id).await?)
    }

    async fn record(
        &self,
        expected_version: u32,
        outcome: TransitionResult,
    ) -> Result<OutboxItem, QueueError> {
        let TransitionResult { item, transition } = outcome;
        if !self.repository.compare_and_set(item.clone(), expected_version).await? {
            return Err(QueueError::Conflict(item.id));
        }
        self.repository.append_transition(transition.clone()).await?;
        self.emit(&item, &transition);
        Ok(item)
    }

    fn emit(&self, item: &OutboxItem, transition: &OutboxTransition) {
        let (event_type, outcome) = match transition.reason.as_str() {
            "item_enqueued" => ("outbox.item.enqueued", AuditOutcome::Success),
            "item_completed" => ("outbox.item.completed", AuditOutcome::Success),
            "duplicate_skipped" => ("outbox.item.duplicate_skipped", AuditOutcome::Success),
            "send_suppressed" => ("outbox.item.suppressed", AuditOutcome::Suppressed),
            "attempt_failed_transient" => ("outbox.item.retry_scheduled", AuditOutcome::Failed),
            "item_dead_lettered" => ("outbox.item.dead_lettered", AuditOutcome::Failed),
            "claim_expired" => ("outbox.item.claim_expired", AuditOutcome::Failed),
            _ => return,
        };

        let mut event = AuditEvent::new(
            lead_of(item),
            item.correlation_id.as_str(),
            event_type,
            AuditCategory::Outbox,
            transition.actor_id.as_str(),
            outcome,
        )
        .with_metadata("item_id", item.id.0.as_str())
        .with_metadata("action_type", item.action_type.as_str())
        .with_metadata("attempt", item.attempt.to_string());
        if let Some(error_class) = &transition.error_class {
            event = event.with_metadata("error_class", error_class.as_str());
        }
        if let Some(result) = &item.result {
            event = event.with_metadata("result", result.as_str());
        }
        self.audit.emit(event);
    }
}

fn lead_of(item: &OutboxItem) -> Option<LeadId> {
    item.session_key.clone().map(LeadId)
}
