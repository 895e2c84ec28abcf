use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use leadline_core::config::AppConfig;
use leadline_core::config::LoadOptions;
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

/// Renders the effective configuration, one line per key, with credentials
/// redacted and the layer each value came from.
pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let entries: Vec<(&str, String)> = vec![
        ("database.url", config.database.url.clone()),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string()),
        ("webhook.secret", redact_secret(&config.webhook.secret)),
        ("outbox.workers", config.outbox.workers.to_string()),
        ("outbox.max_attempts", config.outbox.max_attempts.to_string()),
        ("outbox.retry_base_delay_ms", config.outbox.retry_base_delay_ms.to_string()),
        ("outbox.retry_max_delay_ms", config.outbox.retry_max_delay_ms.to_string()),
        ("outbox.claim_timeout_secs", config.outbox.claim_timeout_secs.to_string()),
        ("receptionist.business_name", config.receptionist.business_name.clone()),
        (
            "receptionist.alert_phone",
            config.receptionist.alert_phone.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        ("receptionist.max_ai_messages", config.receptionist.max_ai_messages.to_string()),
        (
            "receptionist.min_outbound_interval_secs",
            config.receptionist.min_outbound_interval_secs.to_string(),
        ),
        ("receptionist.stale_after_hours", config.receptionist.stale_after_hours.to_string()),
        ("delivery.mode", config.delivery.mode.as_str().to_string()),
        ("sms.api_key", redact_optional(config.sms.api_key.as_ref())),
        (
            "sms.from_number_id",
            config.sms.from_number_id.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        ("voice.api_key", redact_optional(config.voice.api_key.as_ref())),
        ("attribution.access_token", redact_optional(config.attribution.access_token.as_ref())),
        ("crm.api_key", redact_optional(config.crm.api_key.as_ref())),
        ("ai.api_key", redact_optional(config.ai.api_key.as_ref())),
        ("ai.model", config.ai.model.clone()),
        ("ai.base_url", config.ai.base_url.clone()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format)),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value) in entries {
        let source = field_source(key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("leadline.toml"), PathBuf::from("config/leadline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

/// `logging.level` is read from `LEADLINE_LOGGING_LEVEL`.
fn env_key(key_path: &str) -> String {
    format!("LEADLINE_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn field_source(
    key_path: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let env_key = env_key(key_path);
    if env::var_os(&env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &SecretString) -> String {
    let exposed = secret.expose_secret().trim();
    if exposed.is_empty() {
        return "<empty>".to_string();
    }
    // Keeps provider prefixes such as `whsec_` or `sk-` readable.
    match exposed.find(['_', '-']) {
        Some(index) if index > 0 && index <= 6 => format!("{}***", &exposed[..=index]),
        _ => "<redacted>".to_string(),
    }
}

fn redact_optional(secret: Option<&SecretString>) -> String {
    secret.map(redact_secret).unwrap_or_else(|| "<unset>".to_string())
}
