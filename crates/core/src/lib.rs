pub mod actions;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod executors;
pub mod flows;
pub mod outbox_engine;
pub mod phone;

pub use actions::{ActionHandler, ActionRegistry, ActionSchema, DispatchError};
pub use domain::conversation::{
    ConversationSession, ConversationStep, LeadId, Message, MessageDirection, MessageId,
};
pub use domain::outbox::{
    IdempotencyKey, OutboxItem, OutboxItemId, OutboxStatus, OutboxTransition, Priority,
};
pub use domain::webhook::{WebhookEvent, WebhookSource};
pub use errors::{ApplicationError, AuthError, DomainError, InterfaceError, ValidationError};
pub use executors::{CompletionClient, DeliveryReceipt, ExecutorSet, FailureKind, ProviderError};
pub use outbox_engine::{
    derive_idempotency_key, NewOutboxItem, OutboxEngine, OutboxError, OutboxPolicy,
};
pub use phone::normalize_e164;
