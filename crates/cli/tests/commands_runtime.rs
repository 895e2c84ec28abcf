use std::env;
use std::sync::{Mutex, OnceLock};

use chrono::Utc;
use leadline_cli::commands::{config, dead_letters, doctor, migrate};
use leadline_core::domain::outbox::OutboxStatus;
use leadline_core::outbox_engine::{NewOutboxItem, OutboxEngine};
use leadline_db::{connect_with_settings, OutboxRepository, SqlOutboxRepository};
use serde_json::{json, Value};

const SECRET: &str = "whsec_cli_test_secret_0001";

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(
        &[("LEADLINE_WEBHOOK_SECRET", SECRET), ("LEADLINE_DATABASE_URL", "sqlite::memory:")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 0, "expected successful migrate run");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "migrate");
            assert_eq!(payload["status"], "ok");
        },
    );
}

#[test]
fn migrate_returns_config_failure_without_webhook_secret() {
    with_env(&[("LEADLINE_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or_default().contains("webhook.secret"));
    });
}

#[test]
fn config_redacts_secrets_and_names_their_source() {
    with_env(
        &[
            ("LEADLINE_WEBHOOK_SECRET", SECRET),
            ("LEADLINE_DATABASE_URL", "sqlite::memory:"),
            ("LEADLINE_AI_API_KEY", "sk-test-abcdef"),
        ],
        || {
            let output = config::run();

            assert!(!output.contains(SECRET));
            assert!(!output.contains("sk-test-abcdef"));
            assert!(output
                .contains("- webhook.secret = whsec_*** (source: env (LEADLINE_WEBHOOK_SECRET))"));
            assert!(output.contains("- ai.api_key = sk-*** (source: env (LEADLINE_AI_API_KEY))"));
            assert!(output.contains("- sms.api_key = <unset> (source: default)"));
            assert!(output.contains("- delivery.mode = log (source: default)"));
        },
    );
}

#[test]
fn doctor_warns_until_migrations_are_applied() {
    with_env(
        &[("LEADLINE_WEBHOOK_SECRET", SECRET), ("LEADLINE_DATABASE_URL", "sqlite::memory:")],
        || {
            let result = doctor::run(true);
            assert_eq!(result.exit_code, 0, "warnings do not fail the doctor run");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["overall_status"], "warn");
            let checks = payload["checks"].as_array().expect("checks");
            let status_of = |name: &str| {
                checks
                    .iter()
                    .find(|check| check["name"] == name)
                    .map(|check| check["status"].clone())
            };
            assert_eq!(status_of("config_validation"), Some(json!("pass")));
            assert_eq!(status_of("integration_credentials"), Some(json!("pass")));
            assert_eq!(status_of("database"), Some(json!("warn")));
        },
    );
}

#[test]
fn doctor_fails_when_config_is_invalid() {
    with_env(&[], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 1);
        assert!(result.output.contains("[fail] config_validation"));
        assert!(result.output.contains("[skip] database"));
    });
}

#[test]
fn dead_letters_lists_dead_items_only() {
    let directory = tempfile::tempdir().expect("tempdir");
    let database_url = format!("sqlite://{}", directory.path().join("leadline.db").display());

    with_env(
        &[("LEADLINE_WEBHOOK_SECRET", SECRET), ("LEADLINE_DATABASE_URL", database_url.as_str())],
        || {
            assert_eq!(migrate::run().exit_code, 0);
            seed_outbox(&database_url);

            let result = dead_letters::run(10);
            assert_eq!(result.exit_code, 0);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "dead-letters");
            assert_eq!(payload["count"], 1);
            assert_eq!(payload["items"][0]["action_type"], "sms.send");
            assert_eq!(payload["items"][0]["last_error"], "invalid recipient: 555");
        },
    );
}

fn seed_outbox(database_url: &str) {
    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().expect("runtime");
    runtime.block_on(async {
        let pool = connect_with_settings(database_url, 1, 5).await.expect("connect");
        let repository = SqlOutboxRepository::new(pool.clone());
        let engine = OutboxEngine::new();
        let now = Utc::now();

        let mut dead = engine
            .create_item(
                NewOutboxItem::new("sms.send", json!({"phone": "555", "message": "hi"}))
                    .with_idempotency_key("evt-dead"),
                now,
            )
            .item;
        dead.status = OutboxStatus::Dead;
        dead.attempt = 1;
        dead.last_error = Some("invalid recipient: 555".to_string());
        repository.insert_if_absent(dead).await.expect("insert dead");

        let pending = engine
            .create_item(
                NewOutboxItem::new("internal.notification", json!({"message": "still queued"})),
                now,
            )
            .item;
        repository.insert_if_absent(pending).await.expect("insert pending");
        pool.close().await;
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "LEADLINE_DATABASE_URL",
        "LEADLINE_DATABASE_MAX_CONNECTIONS",
        "LEADLINE_DATABASE_TIMEOUT_SECS",
        "LEADLINE_WEBHOOK_SECRET",
        "LEADLINE_DELIVERY_MODE",
        "LEADLINE_SMS_API_KEY",
        "LEADLINE_SMS_FROM_NUMBER_ID",
        "LEADLINE_VOICE_API_KEY",
        "LEADLINE_ATTRIBUTION_PIXEL_ID",
        "LEADLINE_ATTRIBUTION_ACCESS_TOKEN",
        "LEADLINE_CRM_API_KEY",
        "LEADLINE_CRM_LOCATION_ID",
        "LEADLINE_AI_API_KEY",
        "LEADLINE_AI_BASE_URL",
        "LEADLINE_AI_MODEL",
        "LEADLINE_SERVER_BIND_ADDRESS",
        "LEADLINE_SERVER_PORT",
        "LEADLINE_OUTBOX_WORKERS",
        "LEADLINE_OUTBOX_MAX_ATTEMPTS",
        "LEADLINE_LOGGING_LEVEL",
        "LEADLINE_LOGGING_FORMAT",
        "LEADLINE_LOG_LEVEL",
        "LEADLINE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
