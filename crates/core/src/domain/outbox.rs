use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutboxItemId(pub String);

impl std::fmt::Display for OutboxItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub String);

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutboxTransitionId(pub String);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Lower rank is selected first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    /// Accepts `high|normal|low` and the legacy `P0`..`P3` tiers.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" | "p0" => Some(Self::High),
            "normal" | "p1" => Some(Self::Normal),
            "low" | "p2" | "p3" => Some(Self::Low),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Completed,
    FailedTransient,
    Dead,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::FailedTransient => "failed_transient",
            Self::Dead => "dead",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed_transient" | "failed-transient" => Some(Self::FailedTransient),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Dead)
    }

    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Pending | Self::FailedTransient)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboxItem {
    pub id: OutboxItemId,
    pub action_type: String,
    pub payload: Value,
    pub priority: Priority,
    pub status: OutboxStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    pub idempotency_key: IdempotencyKey,
    /// Items that share a session key never execute concurrently.
    pub session_key: Option<String>,
    pub available_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result: Option<String>,
    pub correlation_id: String,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxItem {
    /// Selection order: highest priority first, then oldest.
    pub fn selection_order(&self, other: &Self) -> Ordering {
        self.priority
            .rank()
            .cmp(&other.priority.rank())
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.id.0.cmp(&other.id.0))
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.available_at <= now
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxTransition {
    pub id: OutboxTransitionId,
    pub item_id: OutboxItemId,
    pub from_status: Option<OutboxStatus>,
    pub to_status: OutboxStatus,
    pub reason: String,
    pub error_class: Option<String>,
    pub context_json: String,
    pub actor_id: String,
    pub idempotency_key: IdempotencyKey,
    pub correlation_id: String,
    pub state_version: u32,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{OutboxStatus, Priority};

    #[test]
    fn outbox_status_round_trips_from_storage_encoding() {
        let cases = [
            OutboxStatus::Pending,
            OutboxStatus::Processing,
            OutboxStatus::Completed,
            OutboxStatus::FailedTransient,
            OutboxStatus::Dead,
        ];

        for status in cases {
            assert_eq!(OutboxStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn legacy_priority_tiers_map_onto_three_levels() {
        assert_eq!(Priority::parse("P0"), Some(Priority::High));
        assert_eq!(Priority::parse("p1"), Some(Priority::Normal));
        assert_eq!(Priority::parse("P2"), Some(Priority::Low));
        assert_eq!(Priority::parse("P3"), Some(Priority::Low));
        assert_eq!(Priority::parse(" High "), Some(Priority::High));
        assert_eq!(Priority::parse("urgent"), None);
    }

    #[test]
    fn only_pending_and_transient_failures_are_claimable() {
        assert!(OutboxStatus::Pending.is_claimable());
        assert!(OutboxStatus::FailedTransient.is_claimable());
        assert!(!OutboxStatus::Processing.is_claimable());
        assert!(!OutboxStatus::Completed.is_claimable());
        assert!(!OutboxStatus::Dead.is_claimable());
        assert!(OutboxStatus::Dead.is_terminal());
    }
}
