use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub outbox: OutboxConfig,
    pub receptionist: ReceptionistConfig,
    pub delivery: DeliveryConfig,
    pub sms: SmsConfig,
    pub voice: VoiceConfig,
    pub attribution: AttributionConfig,
    pub crm: CrmConfig,
    pub ai: AiConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub secret: SecretString,
}

#[derive(Clone, Debug)]
pub struct OutboxConfig {
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub claim_timeout_secs: u64,
    pub dispatch_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ReceptionistConfig {
    pub business_name: String,
    pub business_phone: String,
    pub business_email: String,
    pub alert_phone: Option<String>,
    pub max_ai_messages: u32,
    pub min_outbound_interval_secs: u64,
    pub stale_after_hours: u64,
    pub opt_out_budget_secs: u64,
    pub decision_timeout_secs: u64,
    pub history_limit: u32,
    pub stop_keywords: Vec<String>,
    pub emergency_keywords: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct DeliveryConfig {
    pub mode: DeliveryMode,
}

#[derive(Clone, Debug)]
pub struct SmsConfig {
    pub api_key: Option<SecretString>,
    pub from_number_id: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct VoiceConfig {
    pub api_key: Option<SecretString>,
    pub pathway_id: Option<String>,
    pub agent_name: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AttributionConfig {
    pub pixel_id: Option<String>,
    pub access_token: Option<SecretString>,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub api_key: Option<SecretString>,
    pub location_id: Option<String>,
    pub pipeline_id: Option<String>,
    pub stage_ids: BTreeMap<String, String>,
    pub base_url: String,
    pub api_version: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AiConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Real provider calls.
    Live,
    /// Side effects are logged and acknowledged with a synthetic receipt.
    Log,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Log => "log",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub webhook_secret: Option<String>,
    pub delivery_mode: Option<DeliveryMode>,
    pub outbox_workers: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_STOP_KEYWORDS: &[&str] = &[
    "stop",
    "unsubscribe",
    "opt out",
    "opt-out",
    "optout",
    "don't text me",
    "dont text me",
    "remove me",
    "leave me alone",
    "not interested",
    "cancel",
    "quit",
];

pub const DEFAULT_EMERGENCY_KEYWORDS: &[&str] = &[
    "leaking right now",
    "water coming in",
    "active leak",
    "emergency",
    "roof collapsed",
    "caved in",
    "talk to someone",
    "talk to a person",
    "speak to someone",
    "speak to a person",
    "insurance claim",
    "falling apart",
    "talk to the owner",
    "frustrated",
    "pissed",
    "angry",
    "terrible",
    "worst",
    "competitor",
    "other quote",
    "another company",
    "beat this price",
    "match this price",
];

const MIN_WEBHOOK_SECRET_BYTES: usize = 16;

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://leadline.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            webhook: WebhookConfig { secret: String::new().into() },
            outbox: OutboxConfig {
                workers: 4,
                poll_interval_ms: 500,
                max_attempts: 3,
                retry_base_delay_ms: 2_000,
                retry_max_delay_ms: 300_000,
                claim_timeout_secs: 300,
                dispatch_timeout_secs: 30,
            },
            receptionist: ReceptionistConfig {
                business_name: "Leadline".to_string(),
                business_phone: String::new(),
                business_email: String::new(),
                alert_phone: None,
                max_ai_messages: 6,
                min_outbound_interval_secs: 60,
                stale_after_hours: 24,
                opt_out_budget_secs: 10,
                decision_timeout_secs: 20,
                history_limit: 20,
                stop_keywords: DEFAULT_STOP_KEYWORDS.iter().map(|word| word.to_string()).collect(),
                emergency_keywords: DEFAULT_EMERGENCY_KEYWORDS
                    .iter()
                    .map(|word| word.to_string())
                    .collect(),
            },
            delivery: DeliveryConfig { mode: DeliveryMode::Log },
            sms: SmsConfig {
                api_key: None,
                from_number_id: None,
                base_url: "https://api.openphone.com/v1".to_string(),
                timeout_secs: 10,
            },
            voice: VoiceConfig {
                api_key: None,
                pathway_id: None,
                agent_name: "Alex".to_string(),
                base_url: "https://api.bland.ai/v1".to_string(),
                timeout_secs: 15,
            },
            attribution: AttributionConfig {
                pixel_id: None,
                access_token: None,
                base_url: "https://graph.facebook.com/v19.0".to_string(),
                timeout_secs: 10,
            },
            crm: CrmConfig {
                api_key: None,
                location_id: None,
                pipeline_id: None,
                stage_ids: BTreeMap::new(),
                base_url: "https://services.leadconnectorhq.com".to_string(),
                api_version: "2021-07-28".to_string(),
                timeout_secs: 10,
            },
            ai: AiConfig {
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 20,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

fn has_secret(value: &Option<SecretString>) -> bool {
    value.as_ref().is_some_and(|secret| !secret.expose_secret().trim().is_empty())
}

fn has_value(value: &Option<String>) -> bool {
    value.as_ref().is_some_and(|value| !value.trim().is_empty())
}

impl std::str::FromStr for DeliveryMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "log" => Ok(Self::Log),
            other => Err(ConfigError::Validation(format!(
                "unsupported delivery mode `{other}` (expected live|log)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

/// Whether an outbound integration has the credentials it needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct IntegrationStatus {
    pub name: &'static str,
    pub configured: bool,
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("leadline.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Configured/missing flags per integration. Reads configuration only.
    pub fn integrations(&self) -> Vec<IntegrationStatus> {
        vec![
            IntegrationStatus {
                name: "webhook",
                configured: !self.webhook.secret.expose_secret().trim().is_empty(),
            },
            IntegrationStatus {
                name: "sms",
                configured: has_secret(&self.sms.api_key) && has_value(&self.sms.from_number_id),
            },
            IntegrationStatus { name: "voice", configured: has_secret(&self.voice.api_key) },
            IntegrationStatus {
                name: "attribution",
                configured: has_value(&self.attribution.pixel_id)
                    && has_secret(&self.attribution.access_token),
            },
            IntegrationStatus { name: "crm", configured: has_secret(&self.crm.api_key) },
            IntegrationStatus { name: "ai", configured: has_secret(&self.ai.api_key) },
        ]
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(webhook) = patch.webhook {
            if let Some(webhook_secret_value) = webhook.secret {
                self.webhook.secret = secret_value(webhook_secret_value);
            }
        }

        if let Some(outbox) = patch.outbox {
            if let Some(workers) = outbox.workers {
                self.outbox.workers = workers;
            }
            if let Some(poll_interval_ms) = outbox.poll_interval_ms {
                self.outbox.poll_interval_ms = poll_interval_ms;
            }
            if let Some(max_attempts) = outbox.max_attempts {
                self.outbox.max_attempts = max_attempts;
            }
            if let Some(retry_base_delay_ms) = outbox.retry_base_delay_ms {
                self.outbox.retry_base_delay_ms = retry_base_delay_ms;
            }
            if let Some(retry_max_delay_ms) = outbox.retry_max_delay_ms {
                self.outbox.retry_max_delay_ms = retry_max_delay_ms;
            }
            if let Some(claim_timeout_secs) = outbox.claim_timeout_secs {
                self.outbox.claim_timeout_secs = claim_timeout_secs;
            }
            if let Some(dispatch_timeout_secs) = outbox.dispatch_timeout_secs {
                self.outbox.dispatch_timeout_secs = dispatch_timeout_secs;
            }
        }

        if let Some(receptionist) = patch.receptionist {
            if let Some(business_name) = receptionist.business_name {
                self.receptionist.business_name = business_name;
            }
            if let Some(business_phone) = receptionist.business_phone {
                self.receptionist.business_phone = business_phone;
            }
            if let Some(business_email) = receptionist.business_email {
                self.receptionist.business_email = business_email;
            }
            if let Some(alert_phone) = receptionist.alert_phone {
                self.receptionist.alert_phone = Some(alert_phone);
            }
            if let Some(max_ai_messages) = receptionist.max_ai_messages {
                self.receptionist.max_ai_messages = max_ai_messages;
            }
            if let Some(min_outbound_interval_secs) = receptionist.min_outbound_interval_secs {
                self.receptionist.min_outbound_interval_secs = min_outbound_interval_secs;
            }
            if let Some(stale_after_hours) = receptionist.stale_after_hours {
                self.receptionist.stale_after_hours = stale_after_hours;
            }
            if let Some(opt_out_budget_secs) = receptionist.opt_out_budget_secs {
                self.receptionist.opt_out_budget_secs = opt_out_budget_secs;
            }
            if let Some(decision_timeout_secs) = receptionist.decision_timeout_secs {
                self.receptionist.decision_timeout_secs = decision_timeout_secs;
            }
            if let Some(history_limit) = receptionist.history_limit {
                self.receptionist.history_limit = history_limit;
            }
            if let Some(stop_keywords) = receptionist.stop_keywords {
                self.receptionist.stop_keywords = stop_keywords;
            }
            if let Some(emergency_keywords) = receptionist.emergency_keywords {
                self.receptionist.emergency_keywords = emergency_keywords;
            }
        }

        if let Some(delivery) = patch.delivery {
            if let Some(mode) = delivery.mode {
                self.delivery.mode = mode;
            }
        }

        if let Some(sms) = patch.sms {
            if let Some(sms_api_key_value) = sms.api_key {
                self.sms.api_key = Some(secret_value(sms_api_key_value));
            }
            if let Some(from_number_id) = sms.from_number_id {
                self.sms.from_number_id = Some(from_number_id);
            }
            if let Some(base_url) = sms.base_url {
                self.sms.base_url = base_url;
            }
            if let Some(timeout_secs) = sms.timeout_secs {
                self.sms.timeout_secs = timeout_secs;
            }
        }

        if let Some(voice) = patch.voice {
            if let Some(voice_api_key_value) = voice.api_key {
                self.voice.api_key = Some(secret_value(voice_api_key_value));
            }
            if let Some(pathway_id) = voice.pathway_id {
                self.voice.pathway_id = Some(pathway_id);
            }
            if let Some(agent_name) = voice.agent_name {
                self.voice.agent_name = agent_name;
            }
            if let Some(base_url) = voice.base_url {
                self.voice.base_url = base_url;
            }
            if let Some(timeout_secs) = voice.timeout_secs {
                self.voice.timeout_secs = timeout_secs;
            }
        }

        if let Some(attribution) = patch.attribution {
            if let Some(pixel_id) = attribution.pixel_id {
                self.attribution.pixel_id = Some(pixel_id);
            }
            if let Some(attribution_token_value) = attribution.access_token {
                self.attribution.access_token = Some(secret_value(attribution_token_value));
            }
            if let Some(base_url) = attribution.base_url {
                self.attribution.base_url = base_url;
            }
            if let Some(timeout_secs) = attribution.timeout_secs {
                self.attribution.timeout_secs = timeout_secs;
            }
        }

        if let Some(crm) = patch.crm {
            if let Some(crm_api_key_value) = crm.api_key {
                self.crm.api_key = Some(secret_value(crm_api_key_value));
            }
            if let Some(location_id) = crm.location_id {
                self.crm.location_id = Some(location_id);
            }
            if let Some(pipeline_id) = crm.pipeline_id {
                self.crm.pipeline_id = Some(pipeline_id);
            }
            if let Some(stage_ids) = crm.stage_ids {
                self.crm.stage_ids = stage_ids;
            }
            if let Some(base_url) = crm.base_url {
                self.crm.base_url = base_url;
            }
            if let Some(api_version) = crm.api_version {
                self.crm.api_version = api_version;
            }
            if let Some(timeout_secs) = crm.timeout_secs {
                self.crm.timeout_secs = timeout_secs;
            }
        }

        if let Some(ai) = patch.ai {
            if let Some(ai_api_key_value) = ai.api_key {
                self.ai.api_key = Some(secret_value(ai_api_key_value));
            }
            if let Some(base_url) = ai.base_url {
                self.ai.base_url = base_url;
            }
            if let Some(model) = ai.model {
                self.ai.model = model;
            }
            if let Some(timeout_secs) = ai.timeout_secs {
                self.ai.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEADLINE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LEADLINE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("LEADLINE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("LEADLINE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADLINE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEADLINE_SERVER_PORT") {
            self.server.port = parse_u16("LEADLINE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("LEADLINE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADLINE_WEBHOOK_SECRET") {
            self.webhook.secret = secret_value(value);
        }

        if let Some(value) = read_env("LEADLINE_OUTBOX_WORKERS") {
            self.outbox.workers = parse_u32("LEADLINE_OUTBOX_WORKERS", &value)? as usize;
        }
        if let Some(value) = read_env("LEADLINE_OUTBOX_POLL_INTERVAL_MS") {
            self.outbox.poll_interval_ms = parse_u64("LEADLINE_OUTBOX_POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_OUTBOX_MAX_ATTEMPTS") {
            self.outbox.max_attempts = parse_u32("LEADLINE_OUTBOX_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_OUTBOX_RETRY_BASE_DELAY_MS") {
            self.outbox.retry_base_delay_ms =
                parse_u64("LEADLINE_OUTBOX_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_OUTBOX_RETRY_MAX_DELAY_MS") {
            self.outbox.retry_max_delay_ms =
                parse_u64("LEADLINE_OUTBOX_RETRY_MAX_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_OUTBOX_CLAIM_TIMEOUT_SECS") {
            self.outbox.claim_timeout_secs =
                parse_u64("LEADLINE_OUTBOX_CLAIM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_OUTBOX_DISPATCH_TIMEOUT_SECS") {
            self.outbox.dispatch_timeout_secs =
                parse_u64("LEADLINE_OUTBOX_DISPATCH_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADLINE_RECEPTIONIST_BUSINESS_NAME") {
            self.receptionist.business_name = value;
        }
        if let Some(value) = read_env("LEADLINE_RECEPTIONIST_BUSINESS_PHONE") {
            self.receptionist.business_phone = value;
        }
        if let Some(value) = read_env("LEADLINE_RECEPTIONIST_BUSINESS_EMAIL") {
            self.receptionist.business_email = value;
        }
        if let Some(value) = read_env("LEADLINE_RECEPTIONIST_ALERT_PHONE") {
            self.receptionist.alert_phone = Some(value);
        }
        if let Some(value) = read_env("LEADLINE_RECEPTIONIST_MAX_AI_MESSAGES") {
            self.receptionist.max_ai_messages =
                parse_u32("LEADLINE_RECEPTIONIST_MAX_AI_MESSAGES", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_RECEPTIONIST_MIN_OUTBOUND_INTERVAL_SECS") {
            self.receptionist.min_outbound_interval_secs =
                parse_u64("LEADLINE_RECEPTIONIST_MIN_OUTBOUND_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_RECEPTIONIST_STALE_AFTER_HOURS") {
            self.receptionist.stale_after_hours =
                parse_u64("LEADLINE_RECEPTIONIST_STALE_AFTER_HOURS", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_RECEPTIONIST_DECISION_TIMEOUT_SECS") {
            self.receptionist.decision_timeout_secs =
                parse_u64("LEADLINE_RECEPTIONIST_DECISION_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADLINE_DELIVERY_MODE") {
            self.delivery.mode = value.parse()?;
        }

        if let Some(value) = read_env("LEADLINE_SMS_API_KEY") {
            self.sms.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADLINE_SMS_FROM_NUMBER_ID") {
            self.sms.from_number_id = Some(value);
        }
        if let Some(value) = read_env("LEADLINE_SMS_BASE_URL") {
            self.sms.base_url = value;
        }

        if let Some(value) = read_env("LEADLINE_VOICE_API_KEY") {
            self.voice.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADLINE_VOICE_PATHWAY_ID") {
            self.voice.pathway_id = Some(value);
        }

        if let Some(value) = read_env("LEADLINE_ATTRIBUTION_PIXEL_ID") {
            self.attribution.pixel_id = Some(value);
        }
        if let Some(value) = read_env("LEADLINE_ATTRIBUTION_ACCESS_TOKEN") {
            self.attribution.access_token = Some(secret_value(value));
        }

        if let Some(value) = read_env("LEADLINE_CRM_API_KEY") {
            self.crm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADLINE_CRM_LOCATION_ID") {
            self.crm.location_id = Some(value);
        }
        if let Some(value) = read_env("LEADLINE_CRM_PIPELINE_ID") {
            self.crm.pipeline_id = Some(value);
        }

        if let Some(value) = read_env("LEADLINE_AI_API_KEY") {
            self.ai.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADLINE_AI_BASE_URL") {
            self.ai.base_url = value;
        }
        if let Some(value) = read_env("LEADLINE_AI_MODEL") {
            self.ai.model = value;
        }
        if let Some(value) = read_env("LEADLINE_AI_TIMEOUT_SECS") {
            self.ai.timeout_secs = parse_u64("LEADLINE_AI_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("LEADLINE_LOGGING_LEVEL").or_else(|| read_env("LEADLINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEADLINE_LOGGING_FORMAT").or_else(|| read_env("LEADLINE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(webhook_secret) = overrides.webhook_secret {
            self.webhook.secret = secret_value(webhook_secret);
        }
        if let Some(delivery_mode) = overrides.delivery_mode {
            self.delivery.mode = delivery_mode;
        }
        if let Some(workers) = overrides.outbox_workers {
            self.outbox.workers = workers;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_webhook(&self.webhook)?;
        validate_outbox(&self.outbox)?;
        validate_receptionist(&self.receptionist)?;
        validate_providers(self)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("leadline.toml"), PathBuf::from("config/leadline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_timeout(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 || value > 300 {
        return Err(ConfigError::Validation(format!("{field} must be in range 1..=300")));
    }
    Ok(())
}

fn validate_base_url(field: &str, value: &str) -> Result<(), ConfigError> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{field} must start with http:// or https://"
        )));
    }
    Ok(())
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    validate_timeout("database.timeout_secs", database.timeout_secs)
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_webhook(webhook: &WebhookConfig) -> Result<(), ConfigError> {
    let secret = webhook.secret.expose_secret();
    if secret.trim().is_empty() {
        return Err(ConfigError::Validation(
            "webhook.secret is required. Set LEADLINE_WEBHOOK_SECRET or [webhook].secret; \
             callers send it in the X-Webhook-Secret header"
                .to_string(),
        ));
    }
    if secret.len() < MIN_WEBHOOK_SECRET_BYTES {
        return Err(ConfigError::Validation(format!(
            "webhook.secret must be at least {MIN_WEBHOOK_SECRET_BYTES} bytes long"
        )));
    }
    Ok(())
}

fn validate_outbox(outbox: &OutboxConfig) -> Result<(), ConfigError> {
    if outbox.workers == 0 {
        return Err(ConfigError::Validation("outbox.workers must be greater than zero".to_string()));
    }
    if outbox.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "outbox.poll_interval_ms must be greater than zero".to_string(),
        ));
    }
    if outbox.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "outbox.max_attempts must be greater than zero".to_string(),
        ));
    }
    if outbox.retry_base_delay_ms > outbox.retry_max_delay_ms {
        return Err(ConfigError::Validation(
            "outbox.retry_base_delay_ms must not exceed outbox.retry_max_delay_ms".to_string(),
        ));
    }
    if outbox.claim_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "outbox.claim_timeout_secs must be greater than zero".to_string(),
        ));
    }
    validate_timeout("outbox.dispatch_timeout_secs", outbox.dispatch_timeout_secs)?;
    // A claim must outlive the dispatch it guards, or the sweep hands a
    // running item to a second worker.
    if outbox.claim_timeout_secs <= outbox.dispatch_timeout_secs {
        return Err(ConfigError::Validation(
            "outbox.claim_timeout_secs must be greater than outbox.dispatch_timeout_secs"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_receptionist(receptionist: &ReceptionistConfig) -> Result<(), ConfigError> {
    if receptionist.business_name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "receptionist.business_name must not be empty".to_string(),
        ));
    }
    if receptionist.max_ai_messages == 0 {
        return Err(ConfigError::Validation(
            "receptionist.max_ai_messages must be greater than zero".to_string(),
        ));
    }
    if receptionist.stale_after_hours == 0 {
        return Err(ConfigError::Validation(
            "receptionist.stale_after_hours must be greater than zero".to_string(),
        ));
    }
    if receptionist.stop_keywords.iter().all(|keyword| keyword.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "receptionist.stop_keywords must contain at least one keyword".to_string(),
        ));
    }
    validate_timeout("receptionist.opt_out_budget_secs", receptionist.opt_out_budget_secs)?;
    validate_timeout("receptionist.decision_timeout_secs", receptionist.decision_timeout_secs)
}

fn validate_providers(config: &AppConfig) -> Result<(), ConfigError> {
    validate_timeout("sms.timeout_secs", config.sms.timeout_secs)?;
    validate_timeout("voice.timeout_secs", config.voice.timeout_secs)?;
    validate_timeout("attribution.timeout_secs", config.attribution.timeout_secs)?;
    validate_timeout("crm.timeout_secs", config.crm.timeout_secs)?;
    validate_timeout("ai.timeout_secs", config.ai.timeout_secs)?;

    validate_base_url("sms.base_url", &config.sms.base_url)?;
    validate_base_url("voice.base_url", &config.voice.base_url)?;
    validate_base_url("attribution.base_url", &config.attribution.base_url)?;
    validate_base_url("crm.base_url", &config.crm.base_url)?;
    validate_base_url("ai.base_url", &config.ai.base_url)?;

    if config.delivery.mode == DeliveryMode::Live {
        if !has_secret(&config.sms.api_key) || !has_value(&config.sms.from_number_id) {
            return Err(ConfigError::Validation(
                "delivery.mode is live but sms.api_key or sms.from_number_id is missing"
                    .to_string(),
            ));
        }
        if !has_secret(&config.ai.api_key) {
            return Err(ConfigError::Validation(
                "delivery.mode is live but ai.api_key is missing".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    webhook: Option<WebhookPatch>,
    outbox: Option<OutboxPatch>,
    receptionist: Option<ReceptionistPatch>,
    delivery: Option<DeliveryPatch>,
    sms: Option<SmsPatch>,
    voice: Option<VoicePatch>,
    attribution: Option<AttributionPatch>,
    crm: Option<CrmPatch>,
    ai: Option<AiPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPatch {
    secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OutboxPatch {
    workers: Option<usize>,
    poll_interval_ms: Option<u64>,
    max_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
    claim_timeout_secs: Option<u64>,
    dispatch_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ReceptionistPatch {
    business_name: Option<String>,
    business_phone: Option<String>,
    business_email: Option<String>,
    alert_phone: Option<String>,
    max_ai_messages: Option<u32>,
    min_outbound_interval_secs: Option<u64>,
    stale_after_hours: Option<u64>,
    opt_out_budget_secs: Option<u64>,
    decision_timeout_secs: Option<u64>,
    history_limit: Option<u32>,
    stop_keywords: Option<Vec<String>>,
    emergency_keywords: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct DeliveryPatch {
    mode: Option<DeliveryMode>,
}

#[derive(Debug, Default, Deserialize)]
struct SmsPatch {
    api_key: Option<String>,
    from_number_id: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct VoicePatch {
    api_key: Option<String>,
    pathway_id: Option<String>,
    agent_name: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AttributionPatch {
    pixel_id: Option<String>,
    access_token: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    api_key: Option<String>,
    location_id: Option<String>,
    pipeline_id: Option<String>,
    stage_ids: Option<BTreeMap<String, String>>,
    base_url: Option<String>,
    api_version: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AiPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
