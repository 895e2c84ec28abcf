pub mod conversation;
pub mod outbox;
pub mod webhook;
