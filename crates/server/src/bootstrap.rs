use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use leadline_agent::{
    GuardrailPolicy, LlmDecisionEngine, Receptionist, ReceptionistSettings, SessionDispatcher,
};
use leadline_core::actions::registry::RegistryError;
use leadline_core::actions::{standard_registry, CatalogSettings};
use leadline_core::audit::{AuditSink, TracingAuditSink};
use leadline_core::config::{AppConfig, ConfigError, LoadOptions, OutboxConfig};
use leadline_core::executors::ProviderError;
use leadline_core::outbox_engine::{OutboxEngine, OutboxPolicy};
use leadline_db::{
    connect_with_settings, migrations, DbPool, OutboxQueue, SqlConversationStore,
    SqlOutboxRepository,
};
use leadline_providers::{build_completion_client, build_executors};
use thiserror::Error;
use tracing::info;

use crate::health::{self, HealthState};
use crate::ingress::{self, IngressState};
use crate::processor::{OutboxProcessor, ProcessorSettings};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub ingress: IngressState,
    pub health: HealthState,
    pub processor: OutboxProcessor,
}

impl Application {
    pub fn router(&self) -> Router {
        ingress::router(self.ingress.clone()).merge(health::router(self.health.clone()))
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("delivery adapter setup failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("action registry setup failed: {0}")]
    Registry(#[from] RegistryError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        delivery_mode = config.delivery.mode.as_str(),
        "starting application bootstrap"
    );

    // Every connection to `:memory:` is its own database.
    let max_connections =
        if config.database.url.contains(":memory:") { 1 } else { config.database.max_connections };
    let db_pool =
        connect_with_settings(&config.database.url, max_connections, config.database.timeout_secs)
            .await
            .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let store = Arc::new(SqlConversationStore::new(db_pool.clone()));
    let queue = OutboxQueue::new(
        Arc::new(SqlOutboxRepository::new(db_pool.clone())),
        OutboxEngine::with_policy(outbox_policy(&config.outbox)),
        audit.clone(),
    );

    let registry = Arc::new(standard_registry(
        build_executors(&config)?,
        CatalogSettings {
            alert_phone: config.receptionist.alert_phone.clone(),
            business_name: config.receptionist.business_name.clone(),
        },
    )?);
    info!(
        event_name = "system.bootstrap.registry_built",
        correlation_id = "bootstrap",
        action_types = ?registry.action_types(),
        "action registry built"
    );

    let decisions = Arc::new(LlmDecisionEngine::new(
        build_completion_client(&config.ai)?,
        config.receptionist.business_name.clone(),
    ));
    let receptionist = Receptionist::new(
        store.clone(),
        store.clone(),
        queue.clone(),
        decisions,
        GuardrailPolicy::from_config(&config.receptionist),
        audit.clone(),
        ReceptionistSettings::from_config(&config.receptionist),
    );

    let ingress = IngressState {
        registry: registry.clone(),
        queue: queue.clone(),
        dispatcher: SessionDispatcher::new(Arc::new(receptionist)),
        webhook_secret: Arc::new(config.webhook.secret.clone()),
        opt_out_budget: Duration::from_secs(config.receptionist.opt_out_budget_secs.max(1)),
        audit,
    };
    let settings = ProcessorSettings::from_config(&config.outbox);
    let processor = OutboxProcessor::new(queue, registry, store, settings);
    let health = HealthState::from_config(&config);

    Ok(Application { config, db_pool, ingress, health, processor })
}

fn outbox_policy(config: &OutboxConfig) -> OutboxPolicy {
    OutboxPolicy {
        claim_timeout_seconds: i64::try_from(config.claim_timeout_secs).unwrap_or(i64::MAX),
        max_attempts: config.max_attempts,
        retry_base_delay_ms: config.retry_base_delay_ms,
        retry_max_delay_ms: config.retry_max_delay_ms,
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use leadline_core::config::{ConfigOverrides, LoadOptions};
    use tower::ServiceExt;

    use crate::bootstrap::bootstrap;

    fn overrides(webhook_secret: Option<&str>) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                webhook_secret: webhook_secret.map(str::to_string),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_a_webhook_secret() {
        let result = bootstrap(overrides(None)).await;

        let message = result.err().expect("missing secret must fail").to_string();
        assert!(message.contains("webhook.secret"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_serves_health() {
        let app = bootstrap(overrides(Some("bootstrap-secret-0001"))).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN \
             ('outbox_item', 'outbox_transition', 'conversation_session', 'conversation_message')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("tables after bootstrap");
        assert_eq!(table_count, 4);

        let response = app
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        app.db_pool.close().await;
    }
}
