//! The AI receptionist: one dispatch per inbound event, always under the
//! lead's session lane.
//!
//! Order inside a dispatch is fixed: replay check, session load, guardrails,
//! then (only on `proceed`) the AI decision. Every customer-facing side effect
//! goes through the outbox; nothing here talks to a provider directly.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use leadline_core::actions::catalog::{CRM_CONTACT_UPDATE, INTERNAL_NOTIFICATION, SMS_SEND};
use leadline_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use leadline_core::config::ReceptionistConfig;
use leadline_core::domain::conversation::{
    ConversationSession, LeadId, Message, MessageDirection, MessageId,
};
use leadline_core::domain::outbox::{OutboxItemId, Priority};
use leadline_core::errors::ValidationError;
use leadline_core::executors::{ContactMutation, CrmTask};
use leadline_core::flows::{FlowAction, FlowContext, FlowEngine, FlowEvent, ReceptionistFlow};
use leadline_core::outbox_engine::NewOutboxItem;
use leadline_core::phone::normalize_e164;
use leadline_db::repositories::{MessageRepository, RepositoryError, SessionRepository};
use leadline_db::{OutboxQueue, QueueError};

use crate::commands::{
    DispatchOutcome, DispatchReport, FirstContact, InboundSms, OptOutKeyword, OptOutSms,
    ReceptionistCommand, StageChange,
};
use crate::guardrails::{GuardrailInput, GuardrailPolicy, GuardrailVerdict, OutboundKind};
use crate::llm::{AiDecision, DecisionEngine, DecisionError, OpeningContext, ReplyContext};

/// Sessions opened by a keyword SMS from a number we have no lead for.
pub const PHONE_LEAD_PREFIX: &str = "phone:";
pub const OPTED_OUT_TAG: &str = "sms: opted out";
pub const OPTED_IN_TAG: &str = "sms: opted in";

const OPPORTUNITY_KEY: &str = "opportunity_id";
const CRM_STAGE_KEY: &str = "crm_stage";
const SLOT_KEY: &str = "appointment_slot";
const AI_UNAVAILABLE_REPLY: &str =
    "Thanks for your message! Let me have someone from our team get back to you shortly.";

#[derive(Debug, Error)]
pub enum ReceptionistError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("session lane `{0}` closed before replying")]
    LaneClosed(String),
}

#[derive(Clone, Debug)]
pub struct ReceptionistSettings {
    pub business_name: String,
    pub business_phone: String,
    pub business_email: String,
    pub history_limit: u32,
    pub decision_timeout: Duration,
}

impl ReceptionistSettings {
    pub fn from_config(config: &ReceptionistConfig) -> Self {
        Self {
            business_name: config.business_name.clone(),
            business_phone: config.business_phone.clone(),
            business_email: config.business_email.clone(),
            history_limit: config.history_limit,
            decision_timeout: Duration::from_secs(config.decision_timeout_secs.max(1)),
        }
    }

    pub fn opt_out_reply(&self) -> String {
        let mut reply = format!(
            "You have been unsubscribed from {} messages. Reply START to re-subscribe.",
            self.business_name
        );
        if !self.business_phone.trim().is_empty() {
            reply.push_str(&format!(" For help, call {}.", self.business_phone));
        }
        reply
    }

    pub fn help_reply(&self) -> String {
        let contact = match (self.business_phone.trim(), self.business_email.trim()) {
            ("", "") => String::new(),
            (phone, "") => format!(" For support, call {phone}."),
            ("", email) => format!(" For support, email {email}."),
            (phone, email) => format!(" For support, call {phone} or email {email}."),
        };
        format!("{}:{contact} Reply STOP to unsubscribe.", self.business_name)
    }

    pub fn re_opt_in_reply(&self) -> String {
        format!(
            "You have been re-subscribed to {} messages. \
             Reply STOP to unsubscribe. Reply HELP for help.",
            self.business_name
        )
    }

    pub fn fallback_greeting(&self, first_name: Option<&str>) -> String {
        let name = first_name.map(str::trim).filter(|name| !name.is_empty()).unwrap_or("there");
        format!(
            "Hi {name}, this is {}. Thanks for reaching out! What can we help you with: \
             a leak or damage, ice dams, or a full replacement?",
            self.business_name
        )
    }

    pub fn emergency_ack(&self) -> String {
        format!(
            "Thanks for letting us know. I'm having someone from {} call you directly right away.",
            self.business_name
        )
    }

    /// Scripted follow-up for a CRM stage, if that stage has one.
    pub fn stage_follow_up(&self, stage: &str, first_name: Option<&str>) -> Option<String> {
        let name = first_name.map(str::trim).filter(|name| !name.is_empty()).unwrap_or("there");
        let business = &self.business_name;
        match stage.trim().to_ascii_lowercase().as_str() {
            "inspection scheduled" => Some(format!(
                "Hi {name}, your free inspection with {business} is on the calendar. \
                 Our inspector will call about 30 minutes before arriving."
            )),
            "inspection completed" => Some(format!(
                "Thanks for having us out, {name}. \
                 We're putting your quote together now and will send it over shortly."
            )),
            "quoted" => Some(format!(
                "Hi {name}, your quote from {business} is ready. \
                 Reply here with any questions or to get on the schedule."
            )),
            _ => None,
        }
    }
}

fn is_terminal_stage(stage: &str) -> bool {
    matches!(stage.trim().to_ascii_lowercase().as_str(), "won" | "lost")
}

fn is_crm_contact(lead_id: &LeadId) -> bool {
    !lead_id.0.starts_with(PHONE_LEAD_PREFIX)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn normalized_phone(raw: &str) -> String {
    normalize_e164(raw).unwrap_or_else(|| raw.trim().to_string())
}

/// Per-dispatch bookkeeping: idempotency keys are derived from `event_ref` so
/// a re-delivered event can never enqueue the same send twice.
struct Turn {
    correlation_id: String,
    event_ref: String,
    now: DateTime<Utc>,
    enqueued: Vec<OutboxItemId>,
}

impl Turn {
    fn new(correlation_id: &str, event_ref: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            event_ref: event_ref.into(),
            now,
            enqueued: Vec::new(),
        }
    }

    fn key(&self, lead_id: &LeadId, purpose: &str) -> String {
        format!("rcpt:{}:{}:{purpose}", lead_id.0, self.event_ref)
    }

    fn report(
        self,
        session: &ConversationSession,
        outcome: DispatchOutcome,
        verdict: Option<GuardrailVerdict>,
    ) -> DispatchReport {
        DispatchReport {
            lead_id: session.lead_id.clone(),
            outcome,
            step: Some(session.step),
            verdict,
            enqueued: self.enqueued,
        }
    }
}

pub struct Receptionist {
    sessions: Arc<dyn SessionRepository>,
    messages: Arc<dyn MessageRepository>,
    queue: OutboxQueue,
    decisions: Arc<dyn DecisionEngine>,
    guardrails: GuardrailPolicy,
    flow: FlowEngine<ReceptionistFlow>,
    audit: Arc<dyn AuditSink>,
    settings: ReceptionistSettings,
}

impl Receptionist {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        messages: Arc<dyn MessageRepository>,
        queue: OutboxQueue,
        decisions: Arc<dyn DecisionEngine>,
        guardrails: GuardrailPolicy,
        audit: Arc<dyn AuditSink>,
        settings: ReceptionistSettings,
    ) -> Self {
        Self {
            sessions,
            messages,
            queue,
            decisions,
            guardrails,
            flow: FlowEngine::default(),
            audit,
            settings,
        }
    }

    pub fn settings(&self) -> &ReceptionistSettings {
        &self.settings
    }

    /// The lane a command must run on. Keyword SMS only carry a phone number,
    /// so they resolve to the lead that owns it.
    pub async fn lane_key(
        &self,
        command: &ReceptionistCommand,
    ) -> Result<String, ReceptionistError> {
        match command {
            ReceptionistCommand::Inbound(event) => Ok(event.lead_id.0.clone()),
            ReceptionistCommand::FirstContact(event) => Ok(event.lead_id.0.clone()),
            ReceptionistCommand::StageChange(event) => Ok(event.lead_id.0.clone()),
            ReceptionistCommand::OptOut(event) => {
                let phone = normalized_phone(&event.from);
                Ok(self
                    .sessions
                    .find_by_phone(&phone)
                    .await?
                    .map(|session| session.lead_id.0)
                    .unwrap_or_else(|| format!("{PHONE_LEAD_PREFIX}{phone}")))
            }
        }
    }

    pub async fn handle(
        &self,
        command: ReceptionistCommand,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, ReceptionistError> {
        match command {
            ReceptionistCommand::Inbound(event) => {
                self.handle_inbound(event, correlation_id, now).await
            }
            ReceptionistCommand::FirstContact(event) => {
                self.handle_first_contact(event, correlation_id, now).await
            }
            ReceptionistCommand::StageChange(event) => {
                self.handle_stage_change(event, correlation_id, now).await
            }
            ReceptionistCommand::OptOut(event) => {
                self.handle_opt_out(event, correlation_id, now).await
            }
        }
    }

    pub async fn handle_inbound(
        &self,
        event: InboundSms,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, ReceptionistError> {
        let body = event.body.trim().to_string();
        if body.is_empty() {
            return Err(ValidationError::MissingField {
                action_type: "receptionist.inbound_sms".to_string(),
                field: "body".to_string(),
            }
            .into());
        }

        if let Some(source) = non_empty(event.source_event_id.as_deref()) {
            if self.messages.has_source_event(source).await? {
                return self.replayed(&event.lead_id, source, correlation_id).await;
            }
        }

        let mut session = match self.sessions.find(&event.lead_id).await? {
            Some(session) => session,
            None => {
                let phone = non_empty(event.phone.as_deref()).ok_or_else(|| {
                    ValidationError::MissingField {
                        action_type: "receptionist.inbound_sms".to_string(),
                        field: "phone".to_string(),
                    }
                })?;
                self.open_session(&event.lead_id, phone, event.first_name.as_deref(), now).await?
            }
        };

        let inbound = Message {
            id: MessageId(Uuid::new_v4().to_string()),
            lead_id: session.lead_id.clone(),
            direction: MessageDirection::Inbound,
            body: body.clone(),
            channel: "sms".to_string(),
            source_event_id: non_empty(event.source_event_id.as_deref()).map(str::to_string),
            timestamp: now,
        };
        let event_ref = inbound.source_event_id.clone().unwrap_or_else(|| inbound.id.0.clone());
        if !self.messages.append(inbound).await? {
            return self.replayed(&session.lead_id, &event_ref, correlation_id).await;
        }

        session.record_inbound(now);
        if let Some(opportunity_id) = non_empty(event.opportunity_id.as_deref()) {
            session.collected.insert(OPPORTUNITY_KEY.to_string(), opportunity_id.to_string());
        }
        if session.display_name.is_none() {
            session.display_name = non_empty(event.first_name.as_deref()).map(str::to_string);
        }

        let mut turn = Turn::new(correlation_id, event_ref, now);
        let verdict = self.guardrails.evaluate(&session, GuardrailInput::inbound(&body), now);
        let outcome = match &verdict {
            GuardrailVerdict::SuppressStopped { confirm } => {
                verdict.apply(&mut session, now);
                if *confirm {
                    let reply = self.settings.opt_out_reply();
                    self.send_sms(
                        &mut turn,
                        &mut session,
                        &reply,
                        OutboundKind::Compliance,
                        "stop_confirmation",
                    )
                    .await?;
                    self.tag_contact(&mut turn, &session, OPTED_OUT_TAG, OPTED_IN_TAG).await?;
                }
                self.record_suppression(&session, &verdict, &turn);
                DispatchOutcome::Stopped
            }
            GuardrailVerdict::EscalateEmergency { phrase } => {
                let reason = format!("emergency: {phrase}");
                let ack = self.settings.emergency_ack();
                let ack = Some((ack.as_str(), OutboundKind::Scripted));
                self.escalate(&mut turn, &mut session, &reason, &body, ack).await?;
                DispatchOutcome::Escalated
            }
            GuardrailVerdict::EscalateCapReached => {
                self.escalate(&mut turn, &mut session, "cap_reached", &body, None).await?;
                DispatchOutcome::Escalated
            }
            GuardrailVerdict::SuppressRateLimited | GuardrailVerdict::Stale => {
                verdict.apply(&mut session, now);
                self.record_suppression(&session, &verdict, &turn);
                DispatchOutcome::Suppressed
            }
            GuardrailVerdict::Proceed if session.step.is_human_owned() => {
                tracing::info!(
                    event_name = "receptionist.inbound.human_owned",
                    lead_id = %session.lead_id,
                    step = session.step.as_str(),
                    correlation_id,
                    "conversation owned by a human; no automated reply"
                );
                DispatchOutcome::HumanOwned
            }
            GuardrailVerdict::Proceed => self.converse(&mut turn, &mut session, &body).await?,
        };

        self.sessions.save(session.clone()).await?;
        Ok(turn.report(&session, outcome, Some(verdict)))
    }

    pub async fn handle_first_contact(
        &self,
        event: FirstContact,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, ReceptionistError> {
        if let Some(existing) = self.sessions.find(&event.lead_id).await? {
            tracing::info!(
                event_name = "receptionist.first_contact.repeated",
                lead_id = %existing.lead_id,
                correlation_id,
                "session already exists; first contact ignored"
            );
            return Ok(Turn::new(correlation_id, "first_contact", now).report(
                &existing,
                DispatchOutcome::AlreadyStarted,
                None,
            ));
        }

        let phone =
            non_empty(Some(event.phone.as_str())).ok_or_else(|| ValidationError::MissingField {
                action_type: "receptionist.first_contact".to_string(),
                field: "phone".to_string(),
            })?;
        let mut session =
            self.open_session(&event.lead_id, phone, event.first_name.as_deref(), now).await?;
        if let Some(opportunity_id) = non_empty(event.opportunity_id.as_deref()) {
            session.collected.insert(OPPORTUNITY_KEY.to_string(), opportunity_id.to_string());
        }

        let mut turn = Turn::new(correlation_id, "first_contact", now);
        let verdict = self.guardrails.evaluate(
            &session,
            GuardrailInput::proactive(OutboundKind::AiReply),
            now,
        );
        if !verdict.is_proceed() {
            verdict.apply(&mut session, now);
            self.record_suppression(&session, &verdict, &turn);
            self.sessions.save(session.clone()).await?;
            return Ok(turn.report(&session, DispatchOutcome::Suppressed, Some(verdict)));
        }

        let contact_name = [event.first_name.as_deref(), event.last_name.as_deref()]
            .into_iter()
            .filter_map(non_empty)
            .collect::<Vec<_>>()
            .join(" ");
        let context = OpeningContext {
            contact_name: if contact_name.is_empty() { "there".to_string() } else { contact_name },
            source: event.source.clone(),
            project_type: event.project_type.clone(),
        };

        let decision = match self.timed(self.decisions.decide_opening(&context)).await {
            Ok(decision) => Some(decision),
            Err(error) => {
                tracing::warn!(
                    event_name = "receptionist.decision.failed",
                    lead_id = %session.lead_id,
                    correlation_id,
                    error = %error,
                    "opening decision failed; sending scripted greeting"
                );
                None
            }
        };
        let opening = match &decision {
            Some(decision) => decision.next_sms.clone(),
            None => self.settings.fallback_greeting(event.first_name.as_deref()),
        };

        self.send_sms(&mut turn, &mut session, &opening, OutboundKind::AiReply, "opening").await?;
        if let Ok(outcome) = self.flow.apply_with_audit(
            &session.step,
            &FlowEvent::OpeningSent,
            &FlowContext::default(),
            self.audit.as_ref(),
            &session.lead_id,
            correlation_id,
        ) {
            session.step = outcome.to;
        }
        if let Some(decision) = &decision {
            self.apply_crm_changes(&mut turn, &session, decision).await?;
        }

        self.sessions.save(session.clone()).await?;
        Ok(turn.report(&session, DispatchOutcome::Greeted, Some(verdict)))
    }

    pub async fn handle_stage_change(
        &self,
        event: StageChange,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, ReceptionistError> {
        let to_stage = event.to_stage.trim().to_string();
        if to_stage.is_empty() {
            return Err(ValidationError::MissingField {
                action_type: "receptionist.stage_change".to_string(),
                field: "toStage".to_string(),
            }
            .into());
        }

        let Some(mut session) = self.sessions.find(&event.lead_id).await? else {
            tracing::info!(
                event_name = "receptionist.stage_change.no_session",
                lead_id = %event.lead_id,
                to_stage = %to_stage,
                correlation_id,
                "stage change for a lead without a conversation"
            );
            return Ok(DispatchReport {
                lead_id: event.lead_id,
                outcome: DispatchOutcome::Ignored,
                step: None,
                verdict: None,
                enqueued: Vec::new(),
            });
        };

        session.collected.insert(CRM_STAGE_KEY.to_string(), to_stage.clone());
        if let Some(opportunity_id) = non_empty(event.opportunity_id.as_deref()) {
            session.collected.insert(OPPORTUNITY_KEY.to_string(), opportunity_id.to_string());
        }
        session.updated_at = now;

        let stage_ref = format!("stage:{}", to_stage.to_ascii_lowercase().replace(' ', "_"));
        let mut turn = Turn::new(correlation_id, stage_ref, now);
        let mut verdict = None;

        let outcome = if is_terminal_stage(&to_stage) {
            if let Ok(outcome) = self.flow.apply_with_audit(
                &session.step,
                &FlowEvent::Close,
                &FlowContext::default(),
                self.audit.as_ref(),
                &session.lead_id,
                correlation_id,
            ) {
                session.step = outcome.to;
            }
            DispatchOutcome::Closed
        } else if let Some(script) =
            self.settings.stage_follow_up(&to_stage, session.display_name.as_deref())
        {
            let gate = self.guardrails.evaluate(
                &session,
                GuardrailInput::proactive(OutboundKind::Scripted),
                now,
            );
            let outcome = if gate.is_proceed() {
                self.send_sms(&mut turn, &mut session, &script, OutboundKind::Scripted, "follow_up")
                    .await?;
                DispatchOutcome::FollowedUp
            } else {
                gate.apply(&mut session, now);
                self.record_suppression(&session, &gate, &turn);
                DispatchOutcome::Suppressed
            };
            verdict = Some(gate);
            outcome
        } else {
            DispatchOutcome::Logged
        };

        tracing::info!(
            event_name = "receptionist.stage_change.recorded",
            lead_id = %session.lead_id,
            from_stage = event.from_stage.as_deref().unwrap_or("unknown"),
            to_stage = %to_stage,
            outcome = outcome.as_str(),
            correlation_id,
            "stage change recorded"
        );
        self.sessions.save(session.clone()).await?;
        Ok(turn.report(&session, outcome, verdict))
    }

    pub async fn handle_opt_out(
        &self,
        event: OptOutSms,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, ReceptionistError> {
        let phone = normalized_phone(&event.from);
        if phone.is_empty() {
            return Err(ValidationError::MissingField {
                action_type: "receptionist.opt_out".to_string(),
                field: "from".to_string(),
            }
            .into());
        }

        let related = self.sessions.list_by_phone(&phone).await?;
        let existing = related.first().cloned();
        let Some(keyword) = OptOutKeyword::detect(&event.body) else {
            return Ok(DispatchReport {
                lead_id: existing
                    .as_ref()
                    .map(|session| session.lead_id.clone())
                    .unwrap_or_else(|| LeadId(format!("{PHONE_LEAD_PREFIX}{phone}"))),
                outcome: DispatchOutcome::Ignored,
                step: existing.as_ref().map(|session| session.step),
                verdict: None,
                enqueued: Vec::new(),
            });
        };

        let known = existing.is_some();
        let mut session = existing.unwrap_or_else(|| {
            let lead_id = LeadId(format!("{PHONE_LEAD_PREFIX}{phone}"));
            ConversationSession::new(lead_id, phone.clone(), now)
        });

        let message_id = non_empty(event.message_id.as_deref()).map(str::to_string);
        let inbound = Message {
            id: MessageId(Uuid::new_v4().to_string()),
            lead_id: session.lead_id.clone(),
            direction: MessageDirection::Inbound,
            body: event.body.trim().to_string(),
            channel: "sms".to_string(),
            source_event_id: message_id.clone(),
            timestamp: now,
        };
        let event_ref = message_id.unwrap_or_else(|| inbound.id.0.clone());
        if !self.messages.append(inbound).await? {
            return self.replayed(&session.lead_id, &event_ref, correlation_id).await;
        }
        session.record_inbound(now);

        let mut turn = Turn::new(correlation_id, event_ref, now);
        let outcome = match keyword {
            OptOutKeyword::OptOut => {
                // Only the first STOP for a number is confirmed.
                let newly_stopped = !related.iter().any(|other| other.stopped);
                session.mark_stopped(now);
                if newly_stopped {
                    let reply = self.settings.opt_out_reply();
                    let kind = OutboundKind::Compliance;
                    self.send_sms(&mut turn, &mut session, &reply, kind, "opt_out").await?;
                    self.tag_contact(&mut turn, &session, OPTED_OUT_TAG, OPTED_IN_TAG).await?;
                }
                DispatchOutcome::OptedOut
            }
            OptOutKeyword::Help => {
                let reply = self.settings.help_reply();
                self.send_sms(&mut turn, &mut session, &reply, OutboundKind::Compliance, "help")
                    .await?;
                DispatchOutcome::HelpSent
            }
            OptOutKeyword::ReOptIn => {
                session.reopt_in(now);
                for mut other in related.iter().skip(1).filter(|other| other.stopped).cloned() {
                    other.reopt_in(now);
                    self.sessions.save(other).await?;
                }
                let reply = self.settings.re_opt_in_reply();
                let kind = OutboundKind::Compliance;
                self.send_sms(&mut turn, &mut session, &reply, kind, "re_opt_in").await?;
                self.tag_contact(&mut turn, &session, OPTED_IN_TAG, OPTED_OUT_TAG).await?;
                DispatchOutcome::OptedIn
            }
        };

        self.audit.emit(
            AuditEvent::new(
                Some(session.lead_id.clone()),
                correlation_id,
                format!("compliance.{}", keyword.as_str()),
                AuditCategory::Conversation,
                "receptionist",
                AuditOutcome::Success,
            )
            .with_metadata("phone", phone.as_str())
            .with_metadata("known_lead", known.to_string()),
        );

        if known || keyword != OptOutKeyword::Help {
            self.sessions.save(session.clone()).await?;
        }
        Ok(turn.report(&session, outcome, None))
    }

    /// Asks the AI for a reply and applies it. Any decision failure hands the
    /// conversation to a human.
    async fn converse(
        &self,
        turn: &mut Turn,
        session: &mut ConversationSession,
        body: &str,
    ) -> Result<DispatchOutcome, ReceptionistError> {
        let history = self.messages.recent(&session.lead_id, self.settings.history_limit).await?;
        let context = ReplyContext {
            contact_name: session.display_name.clone().unwrap_or_else(|| "Customer".to_string()),
            phone: session.phone.clone(),
            step: session.step,
            messages_sent: session.message_count,
            max_messages: self.guardrails.max_ai_messages,
            messages_received: session.messages_received,
            collected: session.collected.clone(),
            history,
            incoming: body.to_string(),
            now: turn.now,
        };

        let decision = match self.timed(self.decisions.decide_reply(&context)).await {
            Ok(decision) => decision,
            Err(error) => {
                tracing::warn!(
                    event_name = "receptionist.decision.failed",
                    lead_id = %session.lead_id,
                    correlation_id = %turn.correlation_id,
                    error = %error,
                    "reply decision failed; escalating"
                );
                self.escalate(
                    turn,
                    session,
                    "ai_unavailable",
                    body,
                    Some((AI_UNAVAILABLE_REPLY, OutboundKind::Scripted)),
                )
                .await?;
                return Ok(DispatchOutcome::Escalated);
            }
        };

        for (key, value) in &decision.extracted_data {
            session.collected.insert(key.clone(), value.clone());
        }
        if let Some(slot) = non_empty(decision.appointment_slot.as_deref()) {
            session.collected.insert(SLOT_KEY.to_string(), slot.to_string());
        }
        self.apply_crm_changes(turn, session, &decision).await?;

        if decision.escalate {
            let reason = non_empty(decision.escalation_reason.as_deref())
                .unwrap_or("ai_escalation")
                .to_string();
            let handoff = Some((decision.next_sms.as_str(), OutboundKind::AiReply));
            self.escalate(turn, session, &reason, body, handoff).await?;
            return Ok(DispatchOutcome::Escalated);
        }

        let event = FlowEvent::from_intent(&decision.intent);
        let flow_context = FlowContext { appointment_slot: decision.appointment_slot.clone() };
        let actions = match self.flow.apply_with_audit(
            &session.step,
            &event,
            &flow_context,
            self.audit.as_ref(),
            &session.lead_id,
            &turn.correlation_id,
        ) {
            Ok(outcome) => {
                session.step = outcome.to;
                outcome.actions
            }
            Err(_) => vec![FlowAction::SendReply],
        };

        let replies = actions
            .iter()
            .any(|action| matches!(action, FlowAction::SendReply | FlowAction::RepromptForSlot));
        if replies {
            self.send_sms(turn, session, &decision.next_sms, OutboundKind::AiReply, "reply").await?;
        }
        if actions.contains(&FlowAction::NotifyHuman) {
            let message = format!(
                "{} ({}) is ready for a human: {}",
                session.display_name.as_deref().unwrap_or("A lead"),
                session.phone,
                session.step.as_str()
            );
            self.notify_team(turn, session, &message, "info").await?;
        }
        if actions.contains(&FlowAction::CreateFollowUpTask) {
            let slot = session
                .collected
                .get(SLOT_KEY)
                .cloned()
                .unwrap_or_else(|| "to be arranged".to_string());
            let task = CrmTask {
                title: "Confirm inspection appointment".to_string(),
                description: format!("Requested slot: {slot}. Last message: \"{body}\""),
                due_in_minutes: Some(60),
            };
            self.create_task(turn, session, task, "handoff_task").await?;
        }

        Ok(DispatchOutcome::Replied)
    }

    /// Moves the conversation to `Escalated` and brings in a human. `reply`
    /// is sent to the customer only when the flow actually escalates and the
    /// rate limit allows it.
    async fn escalate(
        &self,
        turn: &mut Turn,
        session: &mut ConversationSession,
        reason: &str,
        incoming: &str,
        reply: Option<(&str, OutboundKind)>,
    ) -> Result<(), ReceptionistError> {
        let actions = match self.flow.apply_with_audit(
            &session.step,
            &FlowEvent::Escalate,
            &FlowContext::default(),
            self.audit.as_ref(),
            &session.lead_id,
            &turn.correlation_id,
        ) {
            Ok(outcome) => outcome.actions,
            Err(_) => vec![FlowAction::NotifyHuman],
        };
        let newly_escalated = !session.escalated;
        session.mark_escalated(reason, turn.now);

        if actions.contains(&FlowAction::NotifyHuman) {
            if let Some((text, kind)) = reply {
                if !session.stopped && !self.guardrails.rate_limited(session, turn.now) {
                    self.send_sms(turn, session, text, kind, "escalation_reply").await?;
                }
            }
            let message = format!(
                "URGENT: {} ({}) needs a call. Reason: {reason}",
                session.display_name.as_deref().unwrap_or("Unknown lead"),
                session.phone
            );
            self.notify_team(turn, session, &message, "urgent").await?;
        }
        if actions.contains(&FlowAction::CreateFollowUpTask) {
            let task = CrmTask {
                title: format!("URGENT: {reason}"),
                description: format!("Customer message: \"{incoming}\""),
                due_in_minutes: Some(if reason == "cap_reached" { 10 } else { 5 }),
            };
            self.create_task(turn, session, task, "escalation_task").await?;
        }

        if !newly_escalated {
            return Ok(());
        }
        self.audit.emit(
            AuditEvent::new(
                Some(session.lead_id.clone()),
                turn.correlation_id.as_str(),
                "conversation.escalated",
                AuditCategory::Conversation,
                "receptionist",
                AuditOutcome::Success,
            )
            .with_metadata("reason", reason),
        );
        tracing::warn!(
            event_name = "receptionist.escalated",
            lead_id = %session.lead_id,
            correlation_id = %turn.correlation_id,
            reason,
            "conversation escalated to a human"
        );
        Ok(())
    }

    async fn apply_crm_changes(
        &self,
        turn: &mut Turn,
        session: &ConversationSession,
        decision: &AiDecision,
    ) -> Result<(), ReceptionistError> {
        let mut mutation = ContactMutation {
            tags: decision
                .tags_to_add
                .iter()
                .map(|tag| tag.trim().to_string())
                .filter(|tag| !tag.is_empty())
                .collect(),
            task: decision.requested_task().cloned(),
            ..ContactMutation::default()
        };

        if let Some(stage) = non_empty(decision.stage_update.as_deref()) {
            match session.collected.get(OPPORTUNITY_KEY) {
                Some(opportunity_id) => {
                    mutation.stage = Some(stage.to_string());
                    mutation.opportunity_id = Some(opportunity_id.clone());
                }
                None => tracing::debug!(
                    event_name = "receptionist.stage_update.skipped",
                    lead_id = %session.lead_id,
                    stage,
                    "no opportunity on file for stage update"
                ),
            }
        }

        if mutation.is_empty() {
            return Ok(());
        }
        self.mutate_contact(turn, session, mutation, "ai_changes").await
    }

    async fn send_sms(
        &self,
        turn: &mut Turn,
        session: &mut ConversationSession,
        body: &str,
        kind: OutboundKind,
        purpose: &str,
    ) -> Result<(), ReceptionistError> {
        let mut payload = json!({
            "phone": session.phone,
            "message": body,
            "lead_id": session.lead_id.0,
        });
        if kind == OutboundKind::Compliance {
            payload["compliance"] = Value::Bool(true);
        }

        let item = NewOutboxItem::new(SMS_SEND, payload)
            .with_priority(Priority::High)
            .with_idempotency_key(turn.key(&session.lead_id, purpose))
            .with_session_key(session.lead_id.0.clone())
            .with_correlation_id(turn.correlation_id.clone());
        self.enqueue(turn, item).await?;

        session.record_outbound(turn.now, kind == OutboundKind::AiReply);
        self.messages
            .append(Message {
                id: MessageId(Uuid::new_v4().to_string()),
                lead_id: session.lead_id.clone(),
                direction: MessageDirection::Outbound,
                body: body.to_string(),
                channel: "sms".to_string(),
                source_event_id: None,
                timestamp: turn.now,
            })
            .await?;
        Ok(())
    }

    async fn notify_team(
        &self,
        turn: &mut Turn,
        session: &ConversationSession,
        message: &str,
        severity: &str,
    ) -> Result<(), ReceptionistError> {
        let item = NewOutboxItem::new(
            INTERNAL_NOTIFICATION,
            json!({"message": message, "severity": severity, "lead_id": session.lead_id.0}),
        )
        .with_priority(Priority::High)
        .with_idempotency_key(turn.key(&session.lead_id, "notify"))
        .with_correlation_id(turn.correlation_id.clone());
        self.enqueue(turn, item).await
    }

    /// Adds `tag` and drops `replaces`, which it supersedes.
    async fn tag_contact(
        &self,
        turn: &mut Turn,
        session: &ConversationSession,
        tag: &str,
        replaces: &str,
    ) -> Result<(), ReceptionistError> {
        let mutation = ContactMutation {
            tags: vec![tag.to_string()],
            remove_tags: vec![replaces.to_string()],
            ..ContactMutation::default()
        };
        self.mutate_contact(turn, session, mutation, "tags").await
    }

    async fn create_task(
        &self,
        turn: &mut Turn,
        session: &ConversationSession,
        task: CrmTask,
        purpose: &str,
    ) -> Result<(), ReceptionistError> {
        let mutation = ContactMutation { task: Some(task), ..ContactMutation::default() };
        self.mutate_contact(turn, session, mutation, purpose).await
    }

    async fn mutate_contact(
        &self,
        turn: &mut Turn,
        session: &ConversationSession,
        mutation: ContactMutation,
        purpose: &str,
    ) -> Result<(), ReceptionistError> {
        let mut payload =
            serde_json::to_value(&mutation).map_err(|error| ValidationError::InvalidField {
                field: "crm mutation".to_string(),
                reason: error.to_string(),
            })?;
        if is_crm_contact(&session.lead_id) {
            payload["contact_id"] = Value::String(session.lead_id.0.clone());
        } else if session.phone.is_empty() {
            return Ok(());
        } else {
            // Keyword-only numbers have no lead id; the adapter finds the
            // contact by phone.
            payload["phone"] = Value::String(session.phone.clone());
        }

        let item = NewOutboxItem::new(CRM_CONTACT_UPDATE, payload)
            .with_idempotency_key(turn.key(&session.lead_id, &format!("crm:{purpose}")))
            .with_session_key(session.lead_id.0.clone())
            .with_correlation_id(turn.correlation_id.clone());
        self.enqueue(turn, item).await
    }

    async fn enqueue(&self, turn: &mut Turn, item: NewOutboxItem) -> Result<(), ReceptionistError> {
        let outcome = self.queue.enqueue(item, turn.now).await?;
        if !outcome.duplicate {
            turn.enqueued.push(outcome.item.id);
        }
        Ok(())
    }

    async fn open_session(
        &self,
        lead_id: &LeadId,
        phone: &str,
        first_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ConversationSession, ReceptionistError> {
        let phone = normalized_phone(phone);
        let mut session = ConversationSession::new(lead_id.clone(), phone.clone(), now);
        session.display_name = non_empty(first_name).map(str::to_string);

        // A STOP sent before the lead existed still binds this number.
        let previous = self.sessions.list_by_phone(&phone).await?;
        if let Some(stopped) = previous.iter().find(|previous| previous.stopped) {
            session.mark_stopped(now);
            session.stopped_at = stopped.stopped_at.or(session.stopped_at);
        }
        Ok(session)
    }

    async fn replayed(
        &self,
        lead_id: &LeadId,
        source_event_id: &str,
        correlation_id: &str,
    ) -> Result<DispatchReport, ReceptionistError> {
        self.audit.emit(
            AuditEvent::new(
                Some(lead_id.clone()),
                correlation_id,
                "conversation.inbound.replayed",
                AuditCategory::Conversation,
                "receptionist",
                AuditOutcome::Suppressed,
            )
            .with_metadata("source_event_id", source_event_id),
        );
        let step = self.sessions.find(lead_id).await?.map(|session| session.step);
        Ok(DispatchReport {
            lead_id: lead_id.clone(),
            outcome: DispatchOutcome::Replayed,
            step,
            verdict: None,
            enqueued: Vec::new(),
        })
    }

    fn record_suppression(
        &self,
        session: &ConversationSession,
        verdict: &GuardrailVerdict,
        turn: &Turn,
    ) {
        self.audit.emit(
            AuditEvent::new(
                Some(session.lead_id.clone()),
                turn.correlation_id.as_str(),
                "guardrail.suppressed",
                AuditCategory::Guardrail,
                "receptionist",
                AuditOutcome::Suppressed,
            )
            .with_metadata("verdict", verdict.as_str())
            .with_metadata("step", session.step.as_str()),
        );
        tracing::warn!(
            event_name = "guardrail.suppressed",
            lead_id = %session.lead_id,
            correlation_id = %turn.correlation_id,
            verdict = verdict.as_str(),
            "automated outbound suppressed"
        );
    }

    async fn timed<F>(&self, decision: F) -> Result<AiDecision, DecisionError>
    where
        F: std::future::Future<Output = Result<AiDecision, DecisionError>>,
    {
        match tokio::time::timeout(self.settings.decision_timeout, decision).await {
            Ok(result) => result,
            Err(_) => Err(DecisionError::Timeout),
        }
    }
}

impl std::fmt::Debug for Receptionist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receptionist").field("settings", &self.settings).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use serde_json::{json, Value};

    use leadline_core::audit::InMemoryAuditSink;
    use leadline_core::domain::conversation::{ConversationSession, ConversationStep, LeadId};
    use leadline_core::domain::outbox::{OutboxItem, OutboxStatus, Priority};
    use leadline_core::executors::ProviderError;
    use leadline_core::outbox_engine::OutboxEngine;
    use leadline_db::repositories::{OutboxRepository, SessionRepository};
    use leadline_db::{InMemoryConversationStore, InMemoryOutboxRepository, OutboxQueue};

    use super::{Receptionist, ReceptionistSettings, AI_UNAVAILABLE_REPLY};
    use crate::commands::{DispatchOutcome, FirstContact, InboundSms, OptOutSms, StageChange};
    use crate::guardrails::{GuardrailPolicy, GuardrailVerdict};
    use crate::llm::{AiDecision, DecisionEngine, DecisionError, OpeningContext, ReplyContext};

    const PHONE: &str = "+12075550100";

    #[derive(Default)]
    struct ScriptedDecisions {
        reply: Option<Value>,
        opening: Option<Value>,
        calls: AtomicUsize,
    }

    impl ScriptedDecisions {
        fn answer(&self, scripted: &Option<Value>) -> Result<AiDecision, DecisionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match scripted {
                Some(value) => {
                    Ok(serde_json::from_value(value.clone()).expect("scripted decision"))
                }
                None => Err(ProviderError::Timeout(StdDuration::from_secs(20)).into()),
            }
        }
    }

    #[async_trait]
    impl DecisionEngine for ScriptedDecisions {
        async fn decide_reply(&self, _context: &ReplyContext) -> Result<AiDecision, DecisionError> {
            self.answer(&self.reply)
        }

        async fn decide_opening(
            &self,
            _context: &OpeningContext,
        ) -> Result<AiDecision, DecisionError> {
            self.answer(&self.opening)
        }
    }

    struct Harness {
        receptionist: Receptionist,
        store: Arc<InMemoryConversationStore>,
        outbox: Arc<InMemoryOutboxRepository>,
        audit: InMemoryAuditSink,
        decisions: Arc<ScriptedDecisions>,
    }

    impl Harness {
        fn new(decisions: ScriptedDecisions) -> Self {
            let store = Arc::new(InMemoryConversationStore::default());
            let outbox = Arc::new(InMemoryOutboxRepository::default());
            let audit = InMemoryAuditSink::default();
            let decisions = Arc::new(decisions);
            let queue =
                OutboxQueue::new(outbox.clone(), OutboxEngine::new(), Arc::new(audit.clone()));
            let settings = ReceptionistSettings {
                business_name: "Summit Roofing".to_string(),
                business_phone: "(207) 555-0199".to_string(),
                business_email: "help@summit.test".to_string(),
                history_limit: 20,
                decision_timeout: StdDuration::from_secs(1),
            };
            let receptionist = Receptionist::new(
                store.clone(),
                store.clone(),
                queue,
                decisions.clone(),
                GuardrailPolicy::default(),
                Arc::new(audit.clone()),
                settings,
            );
            Self { receptionist, store, outbox, audit, decisions }
        }

        async fn seed(&self, session: ConversationSession) {
            self.store.save(session).await.expect("seed session");
        }

        async fn session(&self, lead: &str) -> ConversationSession {
            self.store.find(&LeadId(lead.into())).await.expect("find").expect("session exists")
        }

        async fn pending(&self) -> Vec<OutboxItem> {
            let mut items = self
                .outbox
                .list_by_status(OutboxStatus::Pending, 100)
                .await
                .expect("pending items");
            items.sort_by_key(|item| item.created_at);
            items
        }

        async fn pending_of(&self, action_type: &str) -> Vec<OutboxItem> {
            let pending = self.pending().await;
            pending.into_iter().filter(|item| item.action_type == action_type).collect()
        }

        fn ai_calls(&self) -> usize {
            self.decisions.calls.load(Ordering::SeqCst)
        }
    }

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("timestamp").with_timezone(&Utc)
    }

    fn assessing(lead: &str, now: DateTime<Utc>) -> ConversationSession {
        let mut session =
            ConversationSession::new(LeadId(lead.into()), PHONE, now - Duration::hours(2));
        session.step = ConversationStep::NeedsAssessment;
        session.display_name = Some("Dana".into());
        session.message_count = 1;
        session.last_outbound_at = Some(now - Duration::hours(1));
        session.last_inbound_at = Some(now - Duration::minutes(50));
        session.collected.insert("opportunity_id".into(), "opp-7".into());
        session
    }

    fn inbound(lead: &str, body: &str, event: &str) -> InboundSms {
        InboundSms {
            lead_id: LeadId(lead.into()),
            phone: Some(PHONE.into()),
            body: body.into(),
            first_name: None,
            opportunity_id: None,
            source_event_id: Some(event.into()),
        }
    }

    fn scheduling_reply() -> Value {
        json!({
            "next_sms": "Great, we can get someone out this week. \
                         Does Tuesday or Wednesday work better?",
            "intent": "ready_to_schedule",
            "tags_to_add": ["roof: leak"],
            "stage_update": "Contacted",
            "extracted_data": {"issue": "leak over kitchen"},
            "confidence": 0.9
        })
    }

    fn scheduling() -> ScriptedDecisions {
        ScriptedDecisions { reply: Some(scheduling_reply()), ..Default::default() }
    }

    fn keyword(from: &str, body: &str, message_id: Option<&str>) -> OptOutSms {
        OptOutSms { from: from.into(), body: body.into(), message_id: message_id.map(Into::into) }
    }

    #[tokio::test]
    async fn stop_confirms_once_and_never_touches_the_pipeline() {
        let harness = Harness::new(scheduling());
        let now = at("2026-03-02T09:00:00Z");
        harness.seed(assessing("lead-1", now)).await;

        let report = harness
            .receptionist
            .handle_inbound(inbound("lead-1", "STOP texting me", "evt-1"), "corr-1", now)
            .await
            .expect("dispatch");
        assert_eq!(report.outcome, DispatchOutcome::Stopped);
        assert_eq!(report.verdict, Some(GuardrailVerdict::SuppressStopped { confirm: true }));

        let sms = harness.pending_of("sms.send").await;
        assert_eq!(sms.len(), 1);
        assert_eq!(sms[0].payload["compliance"], json!(true));
        let message = sms[0].payload["message"].as_str().expect("message");
        assert!(message.contains("unsubscribed from Summit Roofing"));

        let crm = harness.pending_of("crm.contact.update").await;
        assert_eq!(crm.len(), 1);
        assert_eq!(crm[0].payload["tags"], json!(["sms: opted out"]));
        assert_eq!(crm[0].payload["stage"], Value::Null);

        let later = harness
            .receptionist
            .handle_inbound(
                inbound("lead-1", "are you still there?", "evt-2"),
                "corr-2",
                now + Duration::minutes(2),
            )
            .await
            .expect("dispatch");
        assert_eq!(later.outcome, DispatchOutcome::Stopped);
        assert!(later.enqueued.is_empty());
        assert_eq!(harness.pending().await.len(), 2);
        assert_eq!(harness.ai_calls(), 0);
        assert!(harness.session("lead-1").await.stopped);
    }

    #[tokio::test]
    async fn reaching_the_cap_escalates_without_asking_the_model() {
        let harness = Harness::new(scheduling());
        let now = at("2026-03-02T09:00:00Z");
        let mut session = assessing("lead-1", now);
        session.message_count = 6;
        harness.seed(session).await;

        let report = harness
            .receptionist
            .handle_inbound(inbound("lead-1", "what about Thursday?", "evt-1"), "corr-1", now)
            .await
            .expect("dispatch");

        assert_eq!(report.outcome, DispatchOutcome::Escalated);
        assert_eq!(report.step, Some(ConversationStep::Escalated));
        assert_eq!(harness.ai_calls(), 0);
        assert!(harness.pending_of("sms.send").await.is_empty());

        let alerts = harness.pending_of("internal.notification").await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].priority, Priority::High);
        let tasks = harness.pending_of("crm.contact.update").await;
        assert_eq!(tasks[0].payload["task"]["due_in_minutes"], json!(10));

        let session = harness.session("lead-1").await;
        assert_eq!(session.escalation_reason.as_deref(), Some("cap_reached"));

        let again = harness
            .receptionist
            .handle_inbound(
                inbound("lead-1", "hello?", "evt-2"),
                "corr-2",
                now + Duration::minutes(5),
            )
            .await
            .expect("dispatch");
        assert_eq!(again.outcome, DispatchOutcome::Escalated);
        assert!(again.enqueued.is_empty());
        assert_eq!(harness.audit.events_of_type("conversation.escalated").len(), 1);
    }

    #[tokio::test]
    async fn emergency_acknowledges_and_pages_the_team() {
        let harness = Harness::new(ScriptedDecisions::default());
        let now = at("2026-03-02T09:00:00Z");
        harness.seed(assessing("lead-1", now)).await;

        let report = harness
            .receptionist
            .handle_inbound(
                inbound("lead-1", "Water coming in through the ceiling!", "evt-1"),
                "corr-1",
                now,
            )
            .await
            .expect("dispatch");

        assert_eq!(report.outcome, DispatchOutcome::Escalated);
        assert_eq!(report.enqueued.len(), 3);
        assert_eq!(harness.ai_calls(), 0);
        let alert = &harness.pending_of("internal.notification").await[0];
        assert_eq!(alert.payload["severity"], json!("urgent"));
        let task = &harness.pending_of("crm.contact.update").await[0];
        assert_eq!(task.payload["task"]["due_in_minutes"], json!(5));
        assert_eq!(
            harness.session("lead-1").await.escalation_reason.as_deref(),
            Some("emergency: water coming in")
        );
    }

    #[tokio::test]
    async fn replayed_inbound_is_a_no_op() {
        let harness = Harness::new(scheduling());
        let now = at("2026-03-02T09:00:00Z");
        harness.seed(assessing("lead-1", now)).await;

        let first = harness
            .receptionist
            .handle_inbound(inbound("lead-1", "it leaks over the kitchen", "evt-1"), "corr-1", now)
            .await
            .expect("first");
        assert_eq!(first.outcome, DispatchOutcome::Replied);
        let before = harness.pending().await.len();

        let replay = harness
            .receptionist
            .handle_inbound(
                inbound("lead-1", "it leaks over the kitchen", "evt-1"),
                "corr-1",
                now + Duration::minutes(3),
            )
            .await
            .expect("replay");
        assert_eq!(replay.outcome, DispatchOutcome::Replayed);
        assert!(replay.enqueued.is_empty());
        assert_eq!(harness.pending().await.len(), before);
        assert_eq!(harness.ai_calls(), 1);
        assert_eq!(harness.session("lead-1").await.messages_received, 1);
        assert_eq!(harness.audit.events_of_type("conversation.inbound.replayed").len(), 1);
    }

    #[tokio::test]
    async fn model_reply_advances_the_flow_and_updates_the_crm() {
        let harness = Harness::new(scheduling());
        let now = at("2026-03-02T09:00:00Z");
        harness.seed(assessing("lead-1", now)).await;

        let report = harness
            .receptionist
            .handle_inbound(inbound("lead-1", "it leaks over the kitchen", "evt-1"), "corr-1", now)
            .await
            .expect("dispatch");

        assert_eq!(report.outcome, DispatchOutcome::Replied);
        assert_eq!(report.step, Some(ConversationStep::Scheduling));

        let sms = harness.pending_of("sms.send").await;
        assert_eq!(sms.len(), 1);
        assert_eq!(sms[0].session_key.as_deref(), Some("lead-1"));
        assert_eq!(sms[0].idempotency_key.0, "rcpt:lead-1:evt-1:reply");

        let crm = harness.pending_of("crm.contact.update").await;
        assert_eq!(crm.len(), 1);
        assert_eq!(crm[0].payload["stage"], json!("Contacted"));
        assert_eq!(crm[0].payload["opportunity_id"], json!("opp-7"));
        assert_eq!(crm[0].payload["contact_id"], json!("lead-1"));

        let session = harness.session("lead-1").await;
        assert_eq!(session.message_count, 2);
        assert_eq!(session.collected.get("issue").map(String::as_str), Some("leak over kitchen"));
    }

    #[tokio::test]
    async fn model_failure_hands_off_with_a_holding_reply() {
        let harness = Harness::new(ScriptedDecisions::default());
        let now = at("2026-03-02T09:00:00Z");
        harness.seed(assessing("lead-1", now)).await;

        let report = harness
            .receptionist
            .handle_inbound(inbound("lead-1", "how much for a new roof?", "evt-1"), "corr-1", now)
            .await
            .expect("dispatch");

        assert_eq!(report.outcome, DispatchOutcome::Escalated);
        let sms = harness.pending_of("sms.send").await;
        assert_eq!(sms[0].payload["message"], json!(AI_UNAVAILABLE_REPLY));
        assert_eq!(harness.pending_of("internal.notification").await.len(), 1);
        let session = harness.session("lead-1").await;
        assert_eq!(session.escalation_reason.as_deref(), Some("ai_unavailable"));
        assert_eq!(session.message_count, 1);
    }

    #[tokio::test]
    async fn replies_inside_the_rate_window_are_suppressed() {
        let harness = Harness::new(scheduling());
        let now = at("2026-03-02T09:00:00Z");
        let mut session = assessing("lead-1", now);
        session.last_outbound_at = Some(now - Duration::seconds(30));
        session.last_inbound_at = Some(now - Duration::seconds(40));
        harness.seed(session).await;

        let report = harness
            .receptionist
            .handle_inbound(inbound("lead-1", "ok", "evt-1"), "corr-1", now)
            .await
            .expect("dispatch");

        assert_eq!(report.outcome, DispatchOutcome::Suppressed);
        assert_eq!(report.verdict, Some(GuardrailVerdict::SuppressRateLimited));
        assert_eq!(harness.ai_calls(), 0);
        assert!(harness.pending().await.is_empty());
        let suppressed = harness.audit.events_of_type("guardrail.suppressed");
        assert_eq!(
            suppressed[0].metadata.get("verdict").map(String::as_str),
            Some("suppress_rate_limited")
        );
    }

    #[tokio::test]
    async fn first_contact_greets_once_with_the_scripted_fallback() {
        let harness = Harness::new(ScriptedDecisions::default());
        let now = at("2026-03-02T09:00:00Z");
        let contact = FirstContact {
            lead_id: LeadId("lead-2".into()),
            phone: "(207) 555-0142".into(),
            first_name: Some("Dana".into()),
            last_name: None,
            source: Some("Facebook".into()),
            project_type: None,
            opportunity_id: Some("opp-2".into()),
        };

        let report = harness
            .receptionist
            .handle_first_contact(contact.clone(), "corr-1", now)
            .await
            .expect("greet");
        assert_eq!(report.outcome, DispatchOutcome::Greeted);
        assert_eq!(report.step, Some(ConversationStep::NeedsAssessment));

        let sms = harness.pending_of("sms.send").await;
        assert_eq!(sms[0].payload["phone"], json!("+12075550142"));
        let message = sms[0].payload["message"].as_str().expect("message");
        assert!(message.starts_with("Hi Dana, this is Summit Roofing."));

        let session = harness.session("lead-2").await;
        assert_eq!(session.message_count, 1);
        assert_eq!(session.collected.get("opportunity_id").map(String::as_str), Some("opp-2"));

        let again = harness
            .receptionist
            .handle_first_contact(contact, "corr-2", now + Duration::minutes(1))
            .await
            .expect("repeat");
        assert_eq!(again.outcome, DispatchOutcome::AlreadyStarted);
        assert_eq!(harness.pending().await.len(), 1);
    }

    #[tokio::test]
    async fn stage_changes_send_scripted_follow_ups_and_close_on_won() {
        let harness = Harness::new(ScriptedDecisions::default());
        let now = at("2026-03-02T09:00:00Z");
        harness.seed(assessing("lead-1", now)).await;

        let quoted = harness
            .receptionist
            .handle_stage_change(
                StageChange {
                    lead_id: LeadId("lead-1".into()),
                    opportunity_id: None,
                    from_stage: Some("Inspection Completed".into()),
                    to_stage: "Quoted".into(),
                },
                "corr-1",
                now,
            )
            .await
            .expect("quoted");
        assert_eq!(quoted.outcome, DispatchOutcome::FollowedUp);
        let sms = harness.pending_of("sms.send").await;
        assert_eq!(sms[0].idempotency_key.0, "rcpt:lead-1:stage:quoted:follow_up");
        assert_eq!(harness.session("lead-1").await.message_count, 1);

        let won = harness
            .receptionist
            .handle_stage_change(
                StageChange {
                    lead_id: LeadId("lead-1".into()),
                    opportunity_id: None,
                    from_stage: Some("Quoted".into()),
                    to_stage: "Won".into(),
                },
                "corr-2",
                now + Duration::days(3),
            )
            .await
            .expect("won");
        assert_eq!(won.outcome, DispatchOutcome::Closed);
        assert_eq!(won.step, Some(ConversationStep::Closed));

        let unknown = harness
            .receptionist
            .handle_stage_change(
                StageChange {
                    lead_id: LeadId("lead-404".into()),
                    opportunity_id: None,
                    from_stage: None,
                    to_stage: "Quoted".into(),
                },
                "corr-3",
                now,
            )
            .await
            .expect("unknown");
        assert_eq!(unknown.outcome, DispatchOutcome::Ignored);
    }

    #[tokio::test]
    async fn keyword_opt_out_binds_the_number_before_the_lead_exists() {
        let harness = Harness::new(ScriptedDecisions::default());
        let now = at("2026-03-02T09:00:00Z");

        let stop = harness
            .receptionist
            .handle_opt_out(
                keyword("(207) 555-0123", "Stop", Some("m-1")),
                "corr-1",
                now,
            )
            .await
            .expect("stop");
        assert_eq!(stop.outcome, DispatchOutcome::OptedOut);
        assert_eq!(stop.lead_id.0, "phone:+12075550123");
        assert_eq!(harness.pending_of("sms.send").await.len(), 1);
        let crm = harness.pending_of("crm.contact.update").await;
        assert_eq!(crm.len(), 1);
        assert_eq!(crm[0].payload["phone"], json!("+12075550123"));
        assert_eq!(crm[0].payload["contact_id"], Value::Null);
        assert_eq!(crm[0].payload["remove_tags"], json!(["sms: opted in"]));

        let greeting = harness
            .receptionist
            .handle_first_contact(
                FirstContact {
                    lead_id: LeadId("lead-9".into()),
                    phone: "207-555-0123".into(),
                    first_name: None,
                    last_name: None,
                    source: None,
                    project_type: None,
                    opportunity_id: None,
                },
                "corr-2",
                now + Duration::minutes(10),
            )
            .await
            .expect("first contact");
        assert_eq!(greeting.outcome, DispatchOutcome::Suppressed);
        assert!(greeting.enqueued.is_empty());
        assert_eq!(harness.ai_calls(), 0);

        let help = harness
            .receptionist
            .handle_opt_out(
                keyword("+12075550123", "HELP", Some("m-2")),
                "corr-3",
                now + Duration::minutes(20),
            )
            .await
            .expect("help");
        assert_eq!(help.outcome, DispatchOutcome::HelpSent);

        let start = harness
            .receptionist
            .handle_opt_out(
                keyword("+12075550123", "start", Some("m-3")),
                "corr-4",
                now + Duration::minutes(30),
            )
            .await
            .expect("start");
        assert_eq!(start.outcome, DispatchOutcome::OptedIn);
        let sessions = harness.store.list_by_phone("+12075550123").await.expect("list");
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|session| !session.stopped));

        let ignored = harness
            .receptionist
            .handle_opt_out(
                keyword("+12075550123", "stop please", None),
                "corr-5",
                now + Duration::minutes(40),
            )
            .await
            .expect("ignored");
        assert_eq!(ignored.outcome, DispatchOutcome::Ignored);
    }

    #[tokio::test]
    async fn repeated_stop_keywords_confirm_only_once() {
        let harness = Harness::new(ScriptedDecisions::default());
        let now = at("2026-03-02T09:00:00Z");
        harness.seed(assessing("lead-1", now)).await;

        let first = harness
            .receptionist
            .handle_opt_out(
                keyword(PHONE, "STOP", Some("m1")),
                "corr-1",
                now,
            )
            .await
            .expect("first stop");
        assert_eq!(first.outcome, DispatchOutcome::OptedOut);
        assert_eq!(first.enqueued.len(), 2);

        for (offset, message_id) in [(1, Some("m2")), (2, None)] {
            let again = harness
                .receptionist
                .handle_opt_out(
                    keyword(PHONE, "stop", message_id),
                    "corr-2",
                    now + Duration::minutes(offset),
                )
                .await
                .expect("repeat stop");
            assert_eq!(again.outcome, DispatchOutcome::OptedOut);
            assert!(again.enqueued.is_empty());
        }

        assert_eq!(harness.pending_of("sms.send").await.len(), 1);
        let crm = harness.pending_of("crm.contact.update").await;
        assert_eq!(crm.len(), 1);
        assert_eq!(crm[0].payload["contact_id"], json!("lead-1"));
        assert!(harness.session("lead-1").await.stopped);
    }
}
