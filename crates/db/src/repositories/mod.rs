use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use leadline_core::domain::conversation::{ConversationSession, LeadId, Message};
use leadline_core::domain::outbox::{
    IdempotencyKey, OutboxItem, OutboxItemId, OutboxStatus, OutboxTransition,
};

pub mod conversation;
pub mod memory;
pub mod outbox;

pub use conversation::SqlConversationStore;
pub use memory::{InMemoryConversationStore, InMemoryOutboxRepository};
pub use outbox::SqlOutboxRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// A live item already holds the key; nothing was written.
    Existing(OutboxItem),
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Atomically inserts `item` unless a non-dead item already carries its
    /// idempotency key.
    async fn insert_if_absent(&self, item: OutboxItem) -> Result<InsertOutcome, RepositoryError>;

    async fn find(&self, id: &OutboxItemId) -> Result<Option<OutboxItem>, RepositoryError>;

    async fn find_completed_by_key(
        &self,
        key: &IdempotencyKey,
        excluding: &OutboxItemId,
    ) -> Result<Option<OutboxItem>, RepositoryError>;

    /// Ready items in selection order, skipping sessions that already have an
    /// item in flight.
    async fn list_claimable(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OutboxItem>, RepositoryError>;

    async fn list_by_status(
        &self,
        status: OutboxStatus,
        limit: u32,
    ) -> Result<Vec<OutboxItem>, RepositoryError>;

    /// Writes `item` only if the stored row is still at `expected_version`.
    /// A move into `processing` additionally requires that no other item of
    /// the same session is processing. Returns whether the write happened.
    async fn compare_and_set(
        &self,
        item: OutboxItem,
        expected_version: u32,
    ) -> Result<bool, RepositoryError>;

    async fn append_transition(&self, transition: OutboxTransition) -> Result<(), RepositoryError>;

    async fn list_transitions(
        &self,
        item_id: &OutboxItemId,
    ) -> Result<Vec<OutboxTransition>, RepositoryError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find(&self, lead_id: &LeadId) -> Result<Option<ConversationSession>, RepositoryError>;

    /// Most recently updated session for `phone`.
    async fn find_by_phone(&self, phone: &str)
        -> Result<Option<ConversationSession>, RepositoryError>;

    /// Every session for `phone`, most recently updated first.
    async fn list_by_phone(&self, phone: &str) -> Result<Vec<ConversationSession>, RepositoryError>;

    async fn save(&self, session: ConversationSession) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Appends `message`. Returns `false` without writing when its
    /// `source_event_id` was already logged.
    async fn append(&self, message: Message) -> Result<bool, RepositoryError>;

    async fn has_source_event(&self, source_event_id: &str) -> Result<bool, RepositoryError>;

    /// The latest `limit` messages for `lead_id`, oldest first.
    async fn recent(&self, lead_id: &LeadId, limit: u32) -> Result<Vec<Message>, RepositoryError>;
}

/// Fixed-width UTC encoding; lexical order matches time order.
pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}
