//! Capability contracts for the external channels actions are delivered through.
//!
//! Adapters live outside the core. Each one classifies its own failures so the
//! outbox processor can decide between backoff and dead-lettering without
//! knowing anything about the provider.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("rate limited")]
    RateLimited,
    #[error("upstream error (status {status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("channel not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) | Self::Connection(_) | Self::RateLimited | Self::Upstream { .. } => {
                FailureKind::Transient
            }
            Self::Rejected { .. }
            | Self::InvalidRecipient(_)
            | Self::InvalidPayload(_)
            | Self::NotConfigured(_) => FailureKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Connection(_) => "connection",
            Self::RateLimited => "rate_limited",
            Self::Upstream { .. } => "upstream",
            Self::Rejected { .. } => "rejected",
            Self::InvalidRecipient(_) => "invalid_recipient",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::NotConfigured(_) => "not_configured",
        }
    }

    /// 429 and 5xx are worth retrying; every other non-success status is final.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited,
            500..=599 => Self::Upstream { status, message },
            _ => Self::Rejected { status, message },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub provider: String,
    pub reference: Option<String>,
}

impl DeliveryReceipt {
    pub fn new(provider: impl Into<String>, reference: Option<String>) -> Self {
        Self { provider: provider.into(), reference }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallScript {
    pub first_name: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub due_in_minutes: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactMutation {
    #[serde(default)]
    pub tags: Vec<String>,
    /// Tags dropped after `tags` are added.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_tags: Vec<String>,
    /// Pipeline stage name; resolved to a provider stage id by the adapter.
    #[serde(default)]
    pub stage: Option<String>,
    /// Required with `stage`: the opportunity that moves.
    #[serde(default)]
    pub opportunity_id: Option<String>,
    #[serde(default)]
    pub task: Option<CrmTask>,
}

impl ContactMutation {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
            && self.remove_tags.is_empty()
            && self.stage.is_none()
            && self.task.is_none()
    }
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, phone: &str, body: &str) -> Result<DeliveryReceipt, ProviderError>;
}

#[async_trait]
pub trait CallInitiator: Send + Sync {
    async fn initiate_call(
        &self,
        phone: &str,
        script: &CallScript,
    ) -> Result<DeliveryReceipt, ProviderError>;
}

#[async_trait]
pub trait AttributionSink: Send + Sync {
    async fn fire_event(&self, kind: &str, payload: &Value)
        -> Result<DeliveryReceipt, ProviderError>;
}

#[async_trait]
pub trait CrmMutator: Send + Sync {
    async fn mutate_contact(
        &self,
        contact_id: &str,
        mutation: &ContactMutation,
    ) -> Result<DeliveryReceipt, ProviderError>;

    /// The contact registered under an E.164 number, if any.
    async fn find_contact_by_phone(&self, phone: &str) -> Result<Option<String>, ProviderError>;
}

/// Chat-completion backend that answers in a single JSON object.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete_json(&self, system: &str, user: &str) -> Result<String, ProviderError>;
}

/// The channel adapters an action catalog is wired against.
#[derive(Clone)]
pub struct ExecutorSet {
    pub sms: Arc<dyn SmsSender>,
    pub voice: Arc<dyn CallInitiator>,
    pub attribution: Arc<dyn AttributionSink>,
    pub crm: Arc<dyn CrmMutator>,
}
