use leadline_core::config::{AppConfig, LoadOptions};
use leadline_core::domain::outbox::{OutboxItem, OutboxStatus};
use leadline_db::{OutboxRepository, SqlOutboxRepository};
use serde::Serialize;

use crate::commands::{block_on, open_pool, CommandResult};

#[derive(Debug, Serialize)]
struct DeadLetter {
    id: String,
    action_type: String,
    attempt: u32,
    max_attempts: u32,
    last_error: Option<String>,
    idempotency_key: String,
    session_key: Option<String>,
    correlation_id: String,
    created_at: String,
    dead_at: String,
}

impl From<OutboxItem> for DeadLetter {
    fn from(item: OutboxItem) -> Self {
        Self {
            id: item.id.0,
            action_type: item.action_type,
            attempt: item.attempt,
            max_attempts: item.max_attempts,
            last_error: item.last_error,
            idempotency_key: item.idempotency_key.0,
            session_key: item.session_key,
            correlation_id: item.correlation_id,
            created_at: item.created_at.to_rfc3339(),
            dead_at: item.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DeadLetterReport {
    command: &'static str,
    status: &'static str,
    count: usize,
    items: Vec<DeadLetter>,
}

pub fn run(limit: u32) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "dead-letters",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let result = block_on(async {
        let pool = open_pool(&config).await.map_err(|error| ("db_connectivity", error, 4u8))?;
        let items = SqlOutboxRepository::new(pool.clone())
            .list_by_status(OutboxStatus::Dead, limit.max(1))
            .await
            .map_err(|error| ("query", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<Vec<OutboxItem>, (&'static str, String, u8)>(items)
    });

    let items = match result {
        Ok(Ok(items)) => items,
        Ok(Err((error_class, message, exit_code))) => {
            return CommandResult::failure("dead-letters", error_class, message, exit_code)
        }
        Err(message) => return CommandResult::failure("dead-letters", "runtime_init", message, 3),
    };

    let items: Vec<DeadLetter> = items.into_iter().map(DeadLetter::from).collect();
    let report =
        DeadLetterReport { command: "dead-letters", status: "ok", count: items.len(), items };
    match serde_json::to_string_pretty(&report) {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure("dead-letters", "serialization", error.to_string(), 6),
    }
}
