//! Webhook ingress. Every handler authenticates, validates, hands the work
//! off and answers before any provider is called.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use leadline_agent::{
    FirstContact, InboundSms, OptOutKeyword, OptOutSms, ReceptionistCommand, ReceptionistError,
    SessionDispatcher, StageChange,
};
use leadline_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use leadline_core::domain::conversation::LeadId;
use leadline_core::domain::outbox::Priority;
use leadline_core::domain::webhook::{WebhookEvent, WebhookSource};
use leadline_core::errors::{ApplicationError, ValidationError};
use leadline_core::outbox_engine::NewOutboxItem;
use leadline_core::ActionRegistry;
use leadline_db::OutboxQueue;

use crate::auth::verify_webhook_secret;
use crate::error::ApiError;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct IngressState {
    pub registry: Arc<ActionRegistry>,
    pub queue: OutboxQueue,
    pub dispatcher: SessionDispatcher,
    pub webhook_secret: Arc<SecretString>,
    pub opt_out_budget: Duration,
    pub audit: Arc<dyn AuditSink>,
}

pub fn router(state: IngressState) -> Router {
    Router::new()
        .route("/automation", post(automation))
        .route("/receptionist", post(receptionist))
        .route("/sms/opt-out", post(sms_opt_out))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AutomationRequest {
    #[serde(alias = "action_type")]
    action_type: String,
    #[serde(default)]
    payload: Value,
    #[serde(default, alias = "idempotency_key")]
    idempotency_key: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default, alias = "lead_id", alias = "contactId")]
    lead_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationAccepted {
    pub success: bool,
    pub item_id: String,
    pub action_type: String,
    pub duplicate: bool,
    pub correlation_id: String,
}

pub async fn automation(
    State(state): State<IngressState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<AutomationAccepted>), ApiError> {
    let correlation_id = correlation_id(&headers);
    let fail = |error: ApplicationError| ApiError::from_application(error, &correlation_id);

    verify_webhook_secret(&headers, &state.webhook_secret).map_err(|error| fail(error.into()))?;

    let request: AutomationRequest = parse_body(&body).map_err(|error| fail(error.into()))?;
    if !request.payload.is_object() {
        return Err(fail(
            ValidationError::InvalidField {
                field: "payload".to_string(),
                reason: "must be a JSON object".to_string(),
            }
            .into(),
        ));
    }
    let priority = match request.priority.as_deref() {
        None => Priority::Normal,
        Some(raw) => Priority::parse(raw).ok_or_else(|| {
            fail(
                ValidationError::InvalidField {
                    field: "priority".to_string(),
                    reason: format!("unknown priority `{raw}`"),
                }
                .into(),
            )
        })?,
    };

    let canonical = state
        .registry
        .validate(&request.action_type, &request.payload)
        .map_err(|error| fail(error.into()))?;

    let event = WebhookEvent::new(
        WebhookSource::Automation,
        request.payload,
        None,
        correlation_id.clone(),
    );
    let mut new_item = NewOutboxItem::new(canonical, event.payload)
        .with_priority(priority)
        .with_correlation_id(event.correlation_id);
    if let Some(key) = non_blank(request.idempotency_key) {
        new_item = new_item.with_idempotency_key(key);
    }
    if let Some(lead_id) = non_blank(request.lead_id) {
        new_item = new_item.with_session_key(lead_id);
    }

    let outcome = state
        .queue
        .enqueue(new_item, event.received_at)
        .await
        .map_err(|error| fail(ApplicationError::Persistence(error.to_string())))?;

    tracing::info!(
        event_name = "ingress.automation.accepted",
        correlation_id = %correlation_id,
        item_id = %outcome.item.id,
        action_type = %outcome.item.action_type,
        duplicate = outcome.duplicate,
        "automation action accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(AutomationAccepted {
            success: true,
            item_id: outcome.item.id.0,
            action_type: outcome.item.action_type,
            duplicate: outcome.duplicate,
            correlation_id,
        }),
    ))
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ReceptionistQuery {
    pub action: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceptionistAccepted {
    pub success: bool,
    pub action: &'static str,
    pub lead_id: String,
    pub correlation_id: String,
}

/// Accepts a receptionist event and queues it on the lead's lane. The
/// response does not wait for the conversation turn.
pub async fn receptionist(
    State(state): State<IngressState>,
    Query(query): Query<ReceptionistQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ReceptionistAccepted>), ApiError> {
    let correlation_id = correlation_id(&headers);
    let fail = |error: ApplicationError| ApiError::from_application(error, &correlation_id);

    verify_webhook_secret(&headers, &state.webhook_secret).map_err(|error| fail(error.into()))?;

    let command = match query.action.as_deref().map(str::trim).unwrap_or("inbound") {
        "" | "inbound" | "inbound_sms" => ReceptionistCommand::Inbound(
            parse_body::<InboundSms>(&body).map_err(|error| fail(error.into()))?,
        ),
        "first_contact" => ReceptionistCommand::FirstContact(
            parse_body::<FirstContact>(&body).map_err(|error| fail(error.into()))?,
        ),
        "stage_change" => ReceptionistCommand::StageChange(
            parse_body::<StageChange>(&body).map_err(|error| fail(error.into()))?,
        ),
        other => {
            return Err(fail(
                ValidationError::InvalidField {
                    field: "action".to_string(),
                    reason: format!("unsupported receptionist action `{other}`"),
                }
                .into(),
            ))
        }
    };
    let lead_id = command_lead(&command).map(|lead| lead.0.clone()).unwrap_or_default();
    if lead_id.trim().is_empty() {
        return Err(fail(
            ValidationError::MissingField {
                action_type: format!("receptionist.{}", command.name()),
                field: "leadId".to_string(),
            }
            .into(),
        ));
    }
    let action = command.name();

    // The pending reply is dropped; the lane still runs the command.
    let _pending = state
        .dispatcher
        .submit(command, correlation_id.clone())
        .await
        .map_err(|error| fail(receptionist_failure(error)))?;

    state.audit.emit(
        AuditEvent::new(
            Some(LeadId(lead_id.clone())),
            correlation_id.as_str(),
            "ingress.receptionist.accepted",
            AuditCategory::Ingress,
            "ingress",
            AuditOutcome::Success,
        )
        .with_metadata("action", action),
    );
    tracing::info!(
        event_name = "ingress.receptionist.accepted",
        correlation_id = %correlation_id,
        lead_id = %lead_id,
        action,
        "receptionist event queued"
    );

    Ok((
        StatusCode::OK,
        Json(ReceptionistAccepted { success: true, action, lead_id, correlation_id }),
    ))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptOutProcessed {
    pub status: &'static str,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<&'static str>,
}

/// Carrier keyword webhook. Keyword messages are handled to completion
/// within the opt-out budget; anything else is acknowledged and ignored.
pub async fn sms_opt_out(
    State(state): State<IngressState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<OptOutProcessed>), ApiError> {
    let correlation_id = correlation_id(&headers);
    let fail = |error: ApplicationError| ApiError::from_application(error, &correlation_id);

    let event: OptOutSms = parse_body(&body).map_err(|error| fail(error.into()))?;
    for (field, value) in [("from", &event.from), ("body", &event.body)] {
        if value.trim().is_empty() {
            return Err(fail(
                ValidationError::MissingField {
                    action_type: "sms.opt_out".to_string(),
                    field: field.to_string(),
                }
                .into(),
            ));
        }
    }

    let Some(keyword) = OptOutKeyword::detect(&event.body) else {
        tracing::debug!(
            event_name = "ingress.opt_out.ignored",
            correlation_id = %correlation_id,
            "not an opt-out keyword"
        );
        return Ok((
            StatusCode::OK,
            Json(OptOutProcessed {
                status: "ignored",
                action: "none",
                lead_id: None,
                outcome: None,
            }),
        ));
    };

    let pending = state
        .dispatcher
        .submit(ReceptionistCommand::OptOut(event), correlation_id.clone())
        .await
        .map_err(|error| fail(receptionist_failure(error)))?;

    let report = match tokio::time::timeout(state.opt_out_budget, pending).await {
        Ok(Ok(Ok(report))) => report,
        Ok(Ok(Err(error))) => return Err(fail(receptionist_failure(error))),
        Ok(Err(_)) => {
            return Err(fail(ApplicationError::Integration(
                "opt-out lane closed before replying".to_string(),
            )))
        }
        Err(_) => {
            tracing::error!(
                event_name = "ingress.opt_out.budget_exceeded",
                correlation_id = %correlation_id,
                budget_ms = state.opt_out_budget.as_millis() as u64,
                "opt-out not processed within budget"
            );
            return Err(fail(ApplicationError::Integration(format!(
                "opt-out not processed within {}s",
                state.opt_out_budget.as_secs()
            ))));
        }
    };

    tracing::info!(
        event_name = "ingress.opt_out.processed",
        correlation_id = %correlation_id,
        lead_id = %report.lead_id,
        keyword = keyword.as_str(),
        outcome = report.outcome.as_str(),
        "opt-out keyword processed"
    );

    Ok((
        StatusCode::OK,
        Json(OptOutProcessed {
            status: "processed",
            action: keyword.as_str(),
            lead_id: Some(report.lead_id.0),
            outcome: Some(report.outcome.as_str()),
        }),
    ))
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("req-{}", Uuid::new_v4()))
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ValidationError> {
    serde_json::from_slice(body).map_err(|error| ValidationError::MalformedBody(error.to_string()))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn command_lead(command: &ReceptionistCommand) -> Option<&LeadId> {
    match command {
        ReceptionistCommand::Inbound(event) => Some(&event.lead_id),
        ReceptionistCommand::FirstContact(event) => Some(&event.lead_id),
        ReceptionistCommand::StageChange(event) => Some(&event.lead_id),
        ReceptionistCommand::OptOut(_) => None,
    }
}

fn receptionist_failure(error: ReceptionistError) -> ApplicationError {
    match error {
        ReceptionistError::Validation(error) => ApplicationError::Validation(error),
        ReceptionistError::Repository(error) => ApplicationError::Persistence(error.to_string()),
        ReceptionistError::Queue(error) => ApplicationError::Persistence(error.to_string()),
        ReceptionistError::LaneClosed(lane) => {
            ApplicationError::Integration(format!("session lane `{lane}` closed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{Body, Bytes};
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
    use axum::Json;
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use leadline_agent::{
        GuardrailPolicy, LlmDecisionEngine, Receptionist, ReceptionistSettings, SessionDispatcher,
    };
    use leadline_core::actions::{standard_registry, CatalogSettings};
    use leadline_core::audit::InMemoryAuditSink;
    use leadline_core::domain::conversation::LeadId;
    use leadline_core::domain::outbox::OutboxStatus;
    use leadline_core::executors::ExecutorSet;
    use leadline_core::outbox_engine::OutboxEngine;
    use leadline_db::repositories::{OutboxRepository, SessionRepository};
    use leadline_db::{InMemoryConversationStore, InMemoryOutboxRepository, OutboxQueue};
    use leadline_providers::{LogOnlyChannels, UnconfiguredChannel};

    use super::{automation, receptionist, router, sms_opt_out, IngressState, ReceptionistQuery};
    use crate::auth::WEBHOOK_SECRET_HEADER;

    const SECRET: &str = "test-webhook-secret-0001";

    struct Fixture {
        state: IngressState,
        outbox: Arc<InMemoryOutboxRepository>,
        sessions: Arc<InMemoryConversationStore>,
    }

    fn fixture() -> Fixture {
        let channels = Arc::new(LogOnlyChannels);
        let executors = ExecutorSet {
            sms: channels.clone(),
            voice: channels.clone(),
            attribution: channels.clone(),
            crm: channels,
        };
        let registry = standard_registry(
            executors,
            CatalogSettings { alert_phone: None, business_name: "Summit Roofing".into() },
        )
        .expect("registry");

        let audit = Arc::new(InMemoryAuditSink::default());
        let outbox = Arc::new(InMemoryOutboxRepository::default());
        let sessions = Arc::new(InMemoryConversationStore::default());
        let queue = OutboxQueue::new(outbox.clone(), OutboxEngine::new(), audit.clone());
        let decisions = Arc::new(LlmDecisionEngine::new(
            Arc::new(UnconfiguredChannel::new("ai")),
            "Summit Roofing",
        ));
        let settings = ReceptionistSettings {
            business_name: "Summit Roofing".into(),
            business_phone: "(207) 555-0199".into(),
            business_email: String::new(),
            history_limit: 10,
            decision_timeout: Duration::from_secs(2),
        };
        let receptionist = Receptionist::new(
            sessions.clone(),
            sessions.clone(),
            queue.clone(),
            decisions,
            GuardrailPolicy::default(),
            audit.clone(),
            settings,
        );

        let state = IngressState {
            registry: Arc::new(registry),
            queue,
            dispatcher: SessionDispatcher::new(Arc::new(receptionist)),
            webhook_secret: Arc::new(SecretString::from(SECRET.to_string())),
            opt_out_budget: Duration::from_secs(10),
            audit,
        };
        Fixture { state, outbox, sessions }
    }

    fn authed() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(WEBHOOK_SECRET_HEADER, HeaderValue::from_static(SECRET));
        headers.insert("x-correlation-id", HeaderValue::from_static("corr-test"));
        headers
    }

    fn body(value: Value) -> Bytes {
        Bytes::from(value.to_string())
    }

    async fn pending_count(outbox: &InMemoryOutboxRepository) -> usize {
        outbox.list_by_status(OutboxStatus::Pending, 100).await.expect("pending").len()
    }

    #[tokio::test]
    async fn automation_requires_the_shared_secret() {
        let fixture = fixture();
        let request = json!({
            "actionType": "sms.send",
            "payload": {"phone": "+12075550100", "message": "hi"}
        });

        let missing =
            automation(State(fixture.state.clone()), HeaderMap::new(), body(request.clone()))
                .await
                .expect_err("missing secret");
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(missing.body().error, "missing secret");

        let mut wrong = HeaderMap::new();
        wrong.insert(WEBHOOK_SECRET_HEADER, HeaderValue::from_static("not-the-secret"));
        let invalid = automation(State(fixture.state.clone()), wrong, body(request))
            .await
            .expect_err("invalid secret");
        assert_eq!(invalid.status(), StatusCode::FORBIDDEN);
        assert_eq!(invalid.body().error, "invalid secret");
        assert_eq!(pending_count(&fixture.outbox).await, 0);
    }

    #[tokio::test]
    async fn automation_rejects_invalid_actions_before_enqueue() {
        let fixture = fixture();

        let unknown = automation(
            State(fixture.state.clone()),
            authed(),
            body(json!({"actionType": "fax.send", "payload": {}})),
        )
        .await
        .expect_err("unknown type");
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
        assert!(unknown.body().error.contains("fax.send"));
        assert_eq!(unknown.body().correlation_id, "corr-test");

        let missing_field = automation(
            State(fixture.state.clone()),
            authed(),
            body(json!({"actionType": "sms.send", "payload": {"phone": "+12075550100"}})),
        )
        .await
        .expect_err("missing message");
        assert_eq!(missing_field.status(), StatusCode::BAD_REQUEST);

        let not_object = automation(
            State(fixture.state.clone()),
            authed(),
            body(json!({"actionType": "sms.send", "payload": "hello"})),
        )
        .await
        .expect_err("payload must be an object");
        assert_eq!(not_object.status(), StatusCode::BAD_REQUEST);

        let bad_priority = automation(
            State(fixture.state.clone()),
            authed(),
            body(json!({
                "actionType": "sms.send",
                "payload": {"phone": "+12075550100", "message": "hi"},
                "priority": "urgent"
            })),
        )
        .await
        .expect_err("unknown priority");
        assert_eq!(bad_priority.status(), StatusCode::BAD_REQUEST);

        let garbage =
            automation(State(fixture.state.clone()), authed(), Bytes::from_static(b"{not json"))
                .await
                .expect_err("malformed");
        assert_eq!(garbage.status(), StatusCode::BAD_REQUEST);

        assert_eq!(pending_count(&fixture.outbox).await, 0);
    }

    #[tokio::test]
    async fn automation_enqueues_once_per_idempotency_key() {
        let fixture = fixture();
        let request = json!({
            "actionType": "openphone.sms.send",
            "payload": {"phone": "+12075550100", "message": "Your inspection is booked"},
            "idempotencyKey": "evt-123",
            "priority": "P0",
            "leadId": "lead-42"
        });

        let (status, Json(first)) =
            automation(State(fixture.state.clone()), authed(), body(request.clone()))
                .await
                .expect("accepted");
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(first.success);
        assert!(!first.duplicate);
        assert_eq!(first.action_type, "sms.send");

        let (_, Json(second)) = automation(State(fixture.state.clone()), authed(), body(request))
            .await
            .expect("accepted");
        assert!(second.duplicate);
        assert_eq!(second.item_id, first.item_id);

        let pending =
            fixture.outbox.list_by_status(OutboxStatus::Pending, 10).await.expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].idempotency_key.0, "evt-123");
        assert_eq!(pending[0].session_key.as_deref(), Some("lead-42"));
        assert_eq!(pending[0].priority.as_str(), "high");
    }

    #[tokio::test]
    async fn automation_derives_a_key_when_the_caller_omits_one() {
        let fixture = fixture();
        let request = json!({
            "actionType": "internal.notification",
            "payload": {"message": "New lead from Facebook"}
        });

        let (_, Json(first)) =
            automation(State(fixture.state.clone()), authed(), body(request.clone()))
                .await
                .expect("accepted");
        let (_, Json(second)) = automation(State(fixture.state.clone()), authed(), body(request))
            .await
            .expect("accepted");
        assert!(second.duplicate);
        assert_eq!(first.item_id, second.item_id);

        let item_id = leadline_core::OutboxItemId(first.item_id);
        let item = fixture.state.queue.find(&item_id).await.expect("find");
        assert!(item.expect("stored").idempotency_key.0.starts_with("auto:"));
    }

    #[tokio::test]
    async fn receptionist_accepts_first_contact_and_runs_it_on_the_lane() {
        let fixture = fixture();
        let (status, Json(accepted)) = receptionist(
            State(fixture.state.clone()),
            Query(ReceptionistQuery { action: Some("first_contact".into()) }),
            authed(),
            body(json!({"contactId": "lead-7", "phone": "2075550142", "firstName": "Dana"})),
        )
        .await
        .expect("accepted");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(accepted.action, "first_contact");
        assert_eq!(accepted.lead_id, "lead-7");

        let mut session = None;
        for _ in 0..50 {
            session = fixture.sessions.find(&LeadId("lead-7".into())).await.expect("find");
            if session.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let session = session.expect("session created by the lane");
        assert_eq!(session.phone, "+12075550142");
    }

    #[tokio::test]
    async fn receptionist_rejects_unknown_actions_and_bad_bodies() {
        let fixture = fixture();

        let unknown = receptionist(
            State(fixture.state.clone()),
            Query(ReceptionistQuery { action: Some("teleport".into()) }),
            authed(),
            body(json!({"contactId": "lead-7"})),
        )
        .await
        .expect_err("unknown action");
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

        let missing_body = receptionist(
            State(fixture.state.clone()),
            Query(ReceptionistQuery::default()),
            authed(),
            body(json!({"contactId": "lead-7"})),
        )
        .await
        .expect_err("inbound needs a body");
        assert_eq!(missing_body.status(), StatusCode::BAD_REQUEST);

        let unauthenticated = receptionist(
            State(fixture.state.clone()),
            Query(ReceptionistQuery::default()),
            HeaderMap::new(),
            body(json!({"contactId": "lead-7", "body": "hi"})),
        )
        .await
        .expect_err("missing secret");
        assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn stop_is_confirmed_before_the_response() {
        let fixture = fixture();

        let (status, Json(processed)) = sms_opt_out(
            State(fixture.state.clone()),
            HeaderMap::new(),
            body(json!({"from": "(207) 555-0123", "body": " STOP "})),
        )
        .await
        .expect("processed");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(processed.status, "processed");
        assert_eq!(processed.action, "opt_out");
        assert_eq!(processed.lead_id.as_deref(), Some("phone:+12075550123"));

        let session = fixture
            .sessions
            .find_by_phone("+12075550123")
            .await
            .expect("lookup")
            .expect("placeholder session");
        assert!(session.stopped);

        let pending =
            fixture.outbox.list_by_status(OutboxStatus::Pending, 10).await.expect("pending");
        let confirmations: Vec<_> =
            pending.iter().filter(|item| item.action_type == "sms.send").collect();
        assert_eq!(confirmations.len(), 1);
        assert_eq!(confirmations[0].payload["compliance"], json!(true));
    }

    #[tokio::test]
    async fn non_keyword_bodies_are_ignored_and_blank_fields_rejected() {
        let fixture = fixture();

        let (status, Json(ignored)) = sms_opt_out(
            State(fixture.state.clone()),
            HeaderMap::new(),
            body(json!({"from": "+12075550123", "body": "please stop by tomorrow"})),
        )
        .await
        .expect("ignored");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ignored.status, "ignored");
        assert_eq!(ignored.action, "none");
        assert_eq!(pending_count(&fixture.outbox).await, 0);

        let blank = sms_opt_out(
            State(fixture.state.clone()),
            HeaderMap::new(),
            body(json!({"from": "", "body": "STOP"})),
        )
        .await
        .expect_err("blank from");
        assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

        let missing =
            sms_opt_out(State(fixture.state.clone()), HeaderMap::new(), body(json!({"from": "+1"})))
                .await
                .expect_err("missing body");
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn router_serves_the_webhook_routes() {
        let fixture = fixture();
        let app = router(fixture.state.clone());

        let response = app
            .oneshot(
                Request::post("/automation")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"actionType": "sms.send", "payload": {}}).to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

}
