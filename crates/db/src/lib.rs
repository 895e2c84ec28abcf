pub mod connection;
pub mod migrations;
pub mod queue;
pub mod repositories;

pub use connection::{connect, connect_from_config, connect_with_settings, DbPool};
pub use queue::{EnqueueOutcome, OutboxQueue, QueueError};
pub use repositories::{
    InMemoryConversationStore, InMemoryOutboxRepository, MessageRepository, OutboxRepository,
    RepositoryError, SessionRepository, SqlConversationStore, SqlOutboxRepository,
};
