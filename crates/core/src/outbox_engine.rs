//! Deterministic outbox state machine.
//!
//! Every status change an outbox item goes through is computed here and paired
//! with an auditable [`OutboxTransition`]. Persistence is someone else's job:
//! the engine takes an item by value and hands back the next version of it.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::outbox::{
    IdempotencyKey, OutboxItem, OutboxItemId, OutboxStatus, OutboxTransition, OutboxTransitionId,
    Priority,
};
use crate::executors::FailureKind;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxPolicy {
    /// How long a claim may be held before another worker may take it over.
    pub claim_timeout_seconds: i64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for OutboxPolicy {
    fn default() -> Self {
        Self {
            claim_timeout_seconds: 300,
            max_attempts: 3,
            retry_base_delay_ms: 2_000,
            retry_max_delay_ms: 300_000,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OutboxError {
    #[error("invalid outbox transition from {from:?} to {to:?}: {reason}")]
    InvalidTransition { from: OutboxStatus, to: OutboxStatus, reason: String },
    #[error("outbox item not found: {0}")]
    ItemNotFound(OutboxItemId),
    #[error("idempotency key `{key}` already belongs to live item {existing}")]
    DuplicateKey { key: IdempotencyKey, existing: OutboxItemId },
    #[error("claim conflict: item {0} already claimed by {1}")]
    ClaimConflict(OutboxItemId, String),
    #[error("item not yet available: {0}")]
    NotYetAvailable(OutboxItemId),
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewOutboxItem {
    pub action_type: String,
    pub payload: Value,
    pub priority: Priority,
    pub idempotency_key: Option<IdempotencyKey>,
    pub session_key: Option<String>,
    pub correlation_id: String,
}

impl NewOutboxItem {
    pub fn new(action_type: impl Into<String>, payload: Value) -> Self {
        Self {
            action_type: action_type.into(),
            payload,
            priority: Priority::Normal,
            idempotency_key: None,
            session_key: None,
            correlation_id: "unassigned".to_string(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(IdempotencyKey(key.into()));
        self
    }

    pub fn with_session_key(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = Some(session_key.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Caller-supplied key, or the deterministic hash of type and payload.
    pub fn resolved_key(&self) -> IdempotencyKey {
        self.idempotency_key
            .clone()
            .unwrap_or_else(|| derive_idempotency_key(&self.action_type, &self.payload))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransitionResult {
    pub item: OutboxItem,
    pub transition: OutboxTransition,
}

#[derive(Clone, Debug, Default)]
pub struct OutboxEngine {
    policy: OutboxPolicy,
}

impl OutboxEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: OutboxPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &OutboxPolicy {
        &self.policy
    }

    /// Builds the initial `pending` item and its enqueue transition.
    pub fn create_item(&self, new_item: NewOutboxItem, now: DateTime<Utc>) -> TransitionResult {
        let idempotency_key = new_item.resolved_key();
        let item = OutboxItem {
            id: OutboxItemId(Uuid::new_v4().to_string()),
            action_type: new_item.action_type,
            payload: new_item.payload,
            priority: new_item.priority,
            status: OutboxStatus::Pending,
            attempt: 0,
            max_attempts: self.policy.max_attempts.max(1),
            idempotency_key,
            session_key: new_item.session_key,
            available_at: now,
            claimed_by: None,
            claimed_at: None,
            last_error: None,
            result: None,
            correlation_id: new_item.correlation_id,
            state_version: 1,
            created_at: now,
            last_attempt_at: None,
            updated_at: now,
        };

        let transition = self.transition_event(
            &item,
            None,
            "item_enqueued",
            None,
            serde_json::json!({
                "action_type": item.action_type,
                "priority": item.priority.as_str(),
            }),
            "ingress",
            now,
        );

        TransitionResult { item, transition }
    }

    /// `pending | failed_transient -> processing`.
    pub fn claim_item(
        &self,
        mut item: OutboxItem,
        worker_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, OutboxError> {
        let worker_id = worker_id.into();

        match item.status {
            OutboxStatus::Pending | OutboxStatus::FailedTransient => {}
            OutboxStatus::Processing => {
                if !self.claim_is_stale(&item, now) {
                    return Err(OutboxError::ClaimConflict(
                        item.id.clone(),
                        item.claimed_by.clone().unwrap_or_default(),
                    ));
                }
            }
            OutboxStatus::Completed | OutboxStatus::Dead => {
                return Err(OutboxError::InvalidTransition {
                    from: item.status,
                    to: OutboxStatus::Processing,
                    reason: "item already in terminal state".to_string(),
                });
            }
        }

        if now < item.available_at {
            return Err(OutboxError::NotYetAvailable(item.id.clone()));
        }

        let from = item.status;
        item.status = OutboxStatus::Processing;
        item.claimed_by = Some(worker_id.clone());
        item.claimed_at = Some(now);
        item.last_attempt_at = Some(now);
        item.state_version += 1;
        item.updated_at = now;

        let transition = self.transition_event(
            &item,
            Some(from),
            "item_claimed",
            None,
            serde_json::json!({
                "worker_id": worker_id,
                "attempt": item.attempt + 1,
                "claim_timeout_seconds": self.policy.claim_timeout_seconds,
            }),
            &worker_id,
            now,
        );

        Ok(TransitionResult { item, transition })
    }

    /// `processing -> completed` after the handler succeeded.
    pub fn complete_item(
        &self,
        item: OutboxItem,
        result: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, OutboxError> {
        let result = result.into();
        let context = serde_json::json!({ "result": result });
        self.finish(item, Some(result), "item_completed", context, now)
    }

    /// `processing -> completed` without running the handler, because another
    /// item carrying the same key already completed.
    pub fn skip_duplicate(
        &self,
        item: OutboxItem,
        completed_by: &OutboxItemId,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, OutboxError> {
        let context = serde_json::json!({ "duplicate_of": completed_by.0 });
        let result = format!("duplicate_of:{}", completed_by.0);
        self.finish(item, Some(result), "duplicate_skipped", context, now)
    }

    /// `processing -> completed` without a side effect, because a guardrail
    /// forbids the send at dispatch time.
    pub fn suppress_item(
        &self,
        item: OutboxItem,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, OutboxError> {
        let context = serde_json::json!({ "suppressed_because": reason });
        self.finish(item, Some(format!("suppressed:{reason}")), "send_suppressed", context, now)
    }

    /// Records a failed attempt.
    ///
    /// Transient failures go back to `failed_transient` with capped exponential
    /// backoff until `max_attempts` is spent; permanent failures and exhausted
    /// retries go to `dead`.
    pub fn fail_item(
        &self,
        mut item: OutboxItem,
        error: impl Into<String>,
        error_class: impl Into<String>,
        kind: FailureKind,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, OutboxError> {
        let error = error.into();
        let error_class = error_class.into();
        self.validate_transition(&item, OutboxStatus::FailedTransient)?;

        let from = item.status;
        item.attempt = item.attempt.saturating_add(1);
        item.last_error = Some(error.clone());
        item.claimed_by = None;
        item.claimed_at = None;
        item.state_version += 1;
        item.updated_at = now;

        let should_retry = kind == FailureKind::Transient && item.attempt < item.max_attempts;

        let transition = if should_retry {
            let delay = self.backoff_delay(item.attempt);
            item.status = OutboxStatus::FailedTransient;
            item.available_at = now + delay;

            self.transition_event(
                &item,
                Some(from),
                "attempt_failed_transient",
                Some(error_class.clone()),
                serde_json::json!({
                    "attempt": item.attempt,
                    "max_attempts": item.max_attempts,
                    "next_available_at": item.available_at,
                    "error": error,
                }),
                "worker",
                now,
            )
        } else {
            item.status = OutboxStatus::Dead;
            let reason = match kind {
                FailureKind::Transient => "retries_exhausted",
                FailureKind::Permanent => "permanent_failure",
            };

            self.transition_event(
                &item,
                Some(from),
                "item_dead_lettered",
                Some(error_class.clone()),
                serde_json::json!({
                    "attempt": item.attempt,
                    "max_attempts": item.max_attempts,
                    "error": error,
                    "reason": reason,
                }),
                "worker",
                now,
            )
        };

        Ok(TransitionResult { item, transition })
    }

    /// Hands a stale claim back to the queue. The interrupted attempt is not
    /// counted because its outcome is unknown.
    pub fn recover_stale(
        &self,
        mut item: OutboxItem,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, OutboxError> {
        if item.status != OutboxStatus::Processing || !self.claim_is_stale(&item, now) {
            return Err(OutboxError::InvalidTransition {
                from: item.status,
                to: OutboxStatus::FailedTransient,
                reason: "only stale processing claims can be released".to_string(),
            });
        }

        let previous_worker = item.claimed_by.take().unwrap_or_default();
        item.status = OutboxStatus::FailedTransient;
        item.claimed_at = None;
        item.available_at = now;
        item.state_version += 1;
        item.updated_at = now;

        let transition = self.transition_event(
            &item,
            Some(OutboxStatus::Processing),
            "claim_expired",
            Some("claim_timeout".to_string()),
            serde_json::json!({ "previous_worker": previous_worker }),
            "sweeper",
            now,
        );

        Ok(TransitionResult { item, transition })
    }

    pub fn stale_items(
        &self,
        items: Vec<OutboxItem>,
        reference_time: DateTime<Utc>,
    ) -> Vec<OutboxItem> {
        items.into_iter().filter(|item| self.claim_is_stale(item, reference_time)).collect()
    }

    /// `base * 2^(attempt - 1)`, capped at the policy maximum.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay_ms = self
            .policy
            .retry_base_delay_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.policy.retry_max_delay_ms);
        Duration::milliseconds(i64::try_from(delay_ms).unwrap_or(i64::MAX))
    }

    fn claim_is_stale(&self, item: &OutboxItem, now: DateTime<Utc>) -> bool {
        item.status == OutboxStatus::Processing
            && item.claimed_at.is_some_and(|claimed_at| {
                claimed_at + Duration::seconds(self.policy.claim_timeout_seconds) <= now
            })
    }

    fn finish(
        &self,
        mut item: OutboxItem,
        result: Option<String>,
        reason: &str,
        context: Value,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, OutboxError> {
        self.validate_transition(&item, OutboxStatus::Completed)?;

        let from = item.status;
        item.status = OutboxStatus::Completed;
        item.result = result;
        item.claimed_by = None;
        item.claimed_at = None;
        item.state_version += 1;
        item.updated_at = now;

        let transition =
            self.transition_event(&item, Some(from), reason, None, context, "worker", now);
        Ok(TransitionResult { item, transition })
    }

    fn validate_transition(&self, item: &OutboxItem, to: OutboxStatus) -> Result<(), OutboxError> {
        let valid = matches!(
            (item.status, to),
            (OutboxStatus::Processing, OutboxStatus::Completed)
                | (OutboxStatus::Processing, OutboxStatus::FailedTransient)
                | (OutboxStatus::Processing, OutboxStatus::Dead)
                | (OutboxStatus::Pending, OutboxStatus::Processing)
                | (OutboxStatus::FailedTransient, OutboxStatus::Processing)
        );

        if valid {
            Ok(())
        } else {
            Err(OutboxError::InvalidTransition {
                from: item.status,
                to,
                reason: format!("cannot transition from {:?} to {:?}", item.status, to),
            })
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn transition_event(
        &self,
        item: &OutboxItem,
        from: Option<OutboxStatus>,
        reason: &str,
        error_class: Option<String>,
        context: Value,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> OutboxTransition {
        OutboxTransition {
            id: OutboxTransitionId(Uuid::new_v4().to_string()),
            item_id: item.id.clone(),
            from_status: from,
            to_status: item.status,
            reason: reason.to_string(),
            error_class,
            context_json: context.to_string(),
            actor_id: actor_id.to_string(),
            idempotency_key: item.idempotency_key.clone(),
            correlation_id: item.correlation_id.clone(),
            state_version: item.state_version,
            occurred_at: now,
        }
    }
}

/// Picks the next runnable item: ready, not blocked by a busy session, highest
/// priority, oldest first.
pub fn select_next<'a, I>(
    items: I,
    busy_sessions: &HashSet<String>,
    now: DateTime<Utc>,
) -> Option<&'a OutboxItem>
where
    I: IntoIterator<Item = &'a OutboxItem>,
{
    items
        .into_iter()
        .filter(|item| item.is_ready(now))
        .filter(|item| {
            item.session_key.as_ref().map_or(true, |session| !busy_sessions.contains(session))
        })
        .min_by(|left, right| left.selection_order(right))
}

/// Deterministic key for callers that do not supply one: `auto:` followed by
/// the SHA-256 of the action type and the key-sorted JSON payload.
pub fn derive_idempotency_key(action_type: &str, payload: &Value) -> IdempotencyKey {
    let mut canonical = String::new();
    write_canonical_json(payload, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(action_type.as_bytes());
    hasher.update([0_u8]);
    hasher.update(canonical.as_bytes());
    IdempotencyKey(format!("auto:{:x}", hasher.finalize()))
}

fn write_canonical_json(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(child) = map.get(key) {
                    write_canonical_json(child, out);
                }
            }
            out.push('}');
        }
        Value::Array(values) => {
            out.push('[');
            for (index, child) in values.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical_json(child, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::*;

    fn sms_item() -> NewOutboxItem {
        NewOutboxItem::new("sms.send", json!({ "phone": "+12075550100", "message": "hi" }))
            .with_idempotency_key("evt-123")
            .with_correlation_id("corr-001")
    }

    fn claimed_sms(engine: &OutboxEngine, now: DateTime<Utc>) -> TransitionResult {
        let created = engine.create_item(sms_item(), now);
        engine.claim_item(created.item, "worker-1", now).expect("claim")
    }

    fn no_delay_engine(max_attempts: u32) -> OutboxEngine {
        OutboxEngine::with_policy(OutboxPolicy {
            max_attempts,
            retry_base_delay_ms: 0,
            ..Default::default()
        })
    }

    #[test]
    fn create_item_initializes_pending_state() {
        let engine = OutboxEngine::new();
        let now = Utc::now();
        let created = engine.create_item(sms_item(), now);

        assert_eq!(created.item.status, OutboxStatus::Pending);
        assert_eq!(created.item.attempt, 0);
        assert_eq!(created.item.max_attempts, 3);
        assert_eq!(created.item.idempotency_key, IdempotencyKey("evt-123".to_string()));
        assert_eq!(created.transition.from_status, None);
        assert_eq!(created.transition.reason, "item_enqueued");
    }

    #[test]
    fn claim_then_complete_records_both_transitions() {
        let engine = OutboxEngine::new();
        let now = Utc::now();
        let created = engine.create_item(sms_item(), now);

        let claimed = engine.claim_item(created.item, "worker-1", now).expect("claim");
        assert_eq!(claimed.item.status, OutboxStatus::Processing);
        assert_eq!(claimed.item.claimed_by.as_deref(), Some("worker-1"));
        assert_eq!(claimed.item.last_attempt_at, Some(now));

        let completed = engine.complete_item(claimed.item, "msg-77", now).expect("complete");
        assert_eq!(completed.item.status, OutboxStatus::Completed);
        assert_eq!(completed.item.result.as_deref(), Some("msg-77"));
        assert_eq!(completed.transition.from_status, Some(OutboxStatus::Processing));
        assert_eq!(completed.item.state_version, 3);
    }

    #[test]
    fn three_transient_failures_dead_letter_the_item() {
        let engine = no_delay_engine(3);
        let now = Utc::now();
        let mut item = engine.create_item(sms_item(), now).item;

        for expected_attempt in 1..=2 {
            let claimed = engine.claim_item(item, "worker-1", now).expect("claim");
            let failed = engine
                .fail_item(claimed.item, "gateway timeout", "timeout", FailureKind::Transient, now)
                .expect("fail");
            assert_eq!(failed.item.status, OutboxStatus::FailedTransient);
            assert_eq!(failed.item.attempt, expected_attempt);
            item = failed.item;
        }

        let claimed = engine.claim_item(item, "worker-1", now).expect("third claim");
        let dead = engine
            .fail_item(claimed.item, "gateway timeout", "timeout", FailureKind::Transient, now)
            .expect("third failure");

        assert_eq!(dead.item.status, OutboxStatus::Dead);
        assert_eq!(dead.item.attempt, 3);
        assert_eq!(dead.transition.reason, "item_dead_lettered");
        assert!(dead.transition.context_json.contains("retries_exhausted"));
    }

    #[test]
    fn permanent_failure_goes_straight_to_dead() {
        let engine = OutboxEngine::new();
        let now = Utc::now();
        let claimed = claimed_sms(&engine, now);

        let dead = engine
            .fail_item(
                claimed.item,
                "invalid number",
                "invalid_recipient",
                FailureKind::Permanent,
                now,
            )
            .expect("fail");

        assert_eq!(dead.item.status, OutboxStatus::Dead);
        assert_eq!(dead.item.attempt, 1);
        assert_eq!(dead.transition.error_class.as_deref(), Some("invalid_recipient"));
    }

    #[test]
    fn transient_failure_is_not_claimable_until_backoff_elapses() {
        let engine = OutboxEngine::with_policy(OutboxPolicy {
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 60_000,
            ..Default::default()
        });
        let now = Utc::now();
        let claimed = claimed_sms(&engine, now);
        let failed = engine
            .fail_item(claimed.item, "503", "upstream", FailureKind::Transient, now)
            .expect("fail");

        assert_eq!(failed.item.available_at, now + Duration::seconds(1));
        let early = engine.claim_item(failed.item.clone(), "worker-2", now);
        assert!(matches!(early, Err(OutboxError::NotYetAvailable(_))));

        let later = engine.claim_item(failed.item, "worker-2", now + Duration::seconds(1));
        assert!(later.is_ok());
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let engine = OutboxEngine::with_policy(OutboxPolicy {
            retry_base_delay_ms: 2_000,
            retry_max_delay_ms: 10_000,
            ..Default::default()
        });

        assert_eq!(engine.backoff_delay(1), Duration::milliseconds(2_000));
        assert_eq!(engine.backoff_delay(2), Duration::milliseconds(4_000));
        assert_eq!(engine.backoff_delay(3), Duration::milliseconds(8_000));
        assert_eq!(engine.backoff_delay(4), Duration::milliseconds(10_000));
        assert_eq!(engine.backoff_delay(40), Duration::milliseconds(10_000));
    }

    #[test]
    fn duplicate_skip_completes_without_result_from_handler() {
        let engine = OutboxEngine::new();
        let now = Utc::now();
        let claimed = claimed_sms(&engine, now);

        let skipped = engine
            .skip_duplicate(claimed.item, &OutboxItemId("item-original".to_string()), now)
            .expect("skip");

        assert_eq!(skipped.item.status, OutboxStatus::Completed);
        assert_eq!(skipped.item.result.as_deref(), Some("duplicate_of:item-original"));
        assert_eq!(skipped.transition.reason, "duplicate_skipped");
    }

    #[test]
    fn cannot_claim_completed_or_dead_items() {
        let engine = OutboxEngine::new();
        let now = Utc::now();
        let claimed = claimed_sms(&engine, now);
        let completed = engine.complete_item(claimed.item, "ok", now).expect("complete");

        let result = engine.claim_item(completed.item, "worker-2", now);
        assert!(matches!(
            result,
            Err(OutboxError::InvalidTransition { from: OutboxStatus::Completed, .. })
        ));
    }

    #[test]
    fn live_claim_conflicts_but_stale_claim_can_be_released() {
        let engine = OutboxEngine::with_policy(OutboxPolicy {
            claim_timeout_seconds: 300,
            ..Default::default()
        });
        let now = Utc::now();
        let claimed = claimed_sms(&engine, now);

        let conflict =
            engine.claim_item(claimed.item.clone(), "worker-2", now + Duration::seconds(10));
        assert!(matches!(
            conflict,
            Err(OutboxError::ClaimConflict(_, ref worker)) if worker == "worker-1"
        ));

        assert!(engine.recover_stale(claimed.item.clone(), now + Duration::seconds(10)).is_err());
        let stale = engine.stale_items(vec![claimed.item.clone()], now + Duration::seconds(400));
        assert_eq!(stale.len(), 1);

        let released =
            engine.recover_stale(claimed.item, now + Duration::seconds(400)).expect("release");
        assert_eq!(released.item.status, OutboxStatus::FailedTransient);
        assert_eq!(released.item.attempt, 0);
        assert_eq!(released.transition.reason, "claim_expired");
    }

    #[test]
    fn selection_prefers_priority_then_age_and_skips_busy_sessions() {
        let engine = OutboxEngine::new();
        let base = Utc::now();
        let old_low = engine
            .create_item(
                NewOutboxItem::new("sms.send", json!({"n": 1})).with_priority(Priority::Low),
                base,
            )
            .item;
        let new_high = engine
            .create_item(
                NewOutboxItem::new("sms.send", json!({"n": 2}))
                    .with_priority(Priority::High)
                    .with_session_key("lead-1"),
                base + Duration::seconds(5),
            )
            .item;
        let newer_high = engine
            .create_item(
                NewOutboxItem::new("sms.send", json!({"n": 3})).with_priority(Priority::High),
                base + Duration::seconds(9),
            )
            .item;
        let items = vec![old_low.clone(), new_high.clone(), newer_high.clone()];
        let now = base + Duration::seconds(10);

        let first = select_next(&items, &HashSet::new(), now).expect("next");
        assert_eq!(first.id, new_high.id);

        let busy: HashSet<String> = ["lead-1".to_string()].into_iter().collect();
        let second = select_next(&items, &busy, now).expect("next");
        assert_eq!(second.id, newer_high.id);
    }

    #[test]
    fn derived_key_is_stable_across_payload_key_order() {
        let first = derive_idempotency_key("sms.send", &json!({ "phone": "+1", "message": "hi" }));
        let second = derive_idempotency_key("sms.send", &json!({ "message": "hi", "phone": "+1" }));
        let other_type = derive_idempotency_key(
            "voice.call.initiate",
            &json!({ "phone": "+1", "message": "hi" }),
        );

        assert_eq!(first, second);
        assert_ne!(first, other_type);
        assert!(first.0.starts_with("auto:"));
    }
}
