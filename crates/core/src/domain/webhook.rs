use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::outbox::IdempotencyKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookSource {
    Automation,
    Receptionist,
    SmsOptOut,
}

impl WebhookSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automation => "automation",
            Self::Receptionist => "receptionist",
            Self::SmsOptOut => "sms_opt_out",
        }
    }
}

/// An authenticated inbound request before it is routed. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub source: WebhookSource,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub correlation_id: String,
}

impl WebhookEvent {
    pub fn new(
        source: WebhookSource,
        payload: Value,
        idempotency_key: Option<IdempotencyKey>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            source,
            payload,
            received_at: Utc::now(),
            idempotency_key,
            correlation_id: correlation_id.into(),
        }
    }
}
