//! Prompt and response contract for the AI decision step.
//!
//! The model only proposes: a reply, an intent, and optional CRM changes. The
//! receptionist runtime decides what actually happens.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use leadline_core::domain::conversation::{ConversationStep, Message, MessageDirection};
use leadline_core::executors::{CompletionClient, CrmTask, ProviderError};

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AiDecision {
    pub next_sms: String,
    #[serde(default, alias = "next_step")]
    pub intent: String,
    #[serde(default)]
    pub tags_to_add: Vec<String>,
    #[serde(default)]
    pub stage_update: Option<String>,
    #[serde(default)]
    pub create_task: bool,
    #[serde(default, alias = "task_fields")]
    pub task: Option<CrmTask>,
    #[serde(default)]
    pub appointment_slot: Option<String>,
    #[serde(default, deserialize_with = "string_map")]
    pub extracted_data: BTreeMap<String, String>,
    #[serde(default)]
    pub escalate: bool,
    #[serde(default)]
    pub escalation_reason: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

impl AiDecision {
    /// The follow-up task, if the model asked for one and described it.
    pub fn requested_task(&self) -> Option<&CrmTask> {
        self.task.as_ref().filter(|task| self.create_task && !task.title.trim().is_empty())
    }
}

/// Keeps string and scalar values; nulls and nested values are dropped.
fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::String(text) => text,
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                _ => return None,
            };
            let text = text.trim().to_string();
            (!text.is_empty()).then_some((key, text))
        })
        .collect())
}

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("decision response was not valid JSON: {0}")]
    Malformed(String),
    #[error("decision response had an empty `next_sms`")]
    EmptyReply,
    #[error("decision timed out")]
    Timeout,
}

pub fn parse_decision(raw: &str) -> Result<AiDecision, DecisionError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|inner| inner.strip_suffix("```"))
        .unwrap_or(trimmed);

    let mut decision: AiDecision =
        serde_json::from_str(body).map_err(|error| DecisionError::Malformed(error.to_string()))?;
    decision.next_sms = decision.next_sms.trim().to_string();
    if decision.next_sms.is_empty() {
        return Err(DecisionError::EmptyReply);
    }
    Ok(decision)
}

/// Everything the model sees when answering an inbound message.
#[derive(Clone, Debug)]
pub struct ReplyContext {
    pub contact_name: String,
    pub phone: String,
    pub step: ConversationStep,
    pub messages_sent: u32,
    pub max_messages: u32,
    pub messages_received: u32,
    pub collected: BTreeMap<String, String>,
    /// Oldest first; includes the inbound being answered.
    pub history: Vec<Message>,
    pub incoming: String,
    pub now: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct OpeningContext {
    pub contact_name: String,
    pub source: Option<String>,
    pub project_type: Option<String>,
}

#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn decide_reply(&self, context: &ReplyContext) -> Result<AiDecision, DecisionError>;

    async fn decide_opening(&self, context: &OpeningContext) -> Result<AiDecision, DecisionError>;
}

pub struct LlmDecisionEngine {
    client: Arc<dyn CompletionClient>,
    business_name: String,
}

impl LlmDecisionEngine {
    pub fn new(client: Arc<dyn CompletionClient>, business_name: impl Into<String>) -> Self {
        Self { client, business_name: business_name.into() }
    }

    async fn ask(&self, user: String) -> Result<AiDecision, DecisionError> {
        let raw = self.client.complete_json(&system_prompt(&self.business_name), &user).await?;
        parse_decision(&raw)
    }
}

#[async_trait]
impl DecisionEngine for LlmDecisionEngine {
    async fn decide_reply(&self, context: &ReplyContext) -> Result<AiDecision, DecisionError> {
        self.ask(reply_prompt(context, &self.business_name)).await
    }

    async fn decide_opening(&self, context: &OpeningContext) -> Result<AiDecision, DecisionError> {
        self.ask(opening_prompt(context)).await
    }
}

pub fn system_prompt(business_name: &str) -> String {
    format!(
        "You are the SMS receptionist for {business_name}, a home services company. You are \
texting with a potential customer who asked about our services.

Tone: friendly and professional. Keep each SMS to 2-4 short sentences, ideally under 160 \
characters. No emojis. Never say you are an AI or a bot; you text on behalf of the \
{business_name} team.

Goal: in 2-4 messages learn what they need, their town, how urgent it is and a good time \
for a free inspection, then book it.

Flow: needs_assessment -> scheduling (offer 2-3 weekday slots, 9-11am or 1-3pm, Saturday \
mornings, never Sundays) -> confirmation once they pick a slot.

Never quote prices, promise completion dates or criticise competitors. If the customer \
mentions active leaking, structural damage, an insurance claim, or asks for a person, set \
escalate to true and send a short reassuring message that someone will call them directly.

Respond with one JSON object and nothing else:
{{\"next_sms\": string, \"intent\": one of \"continue\" | \"ready_to_schedule\" | \
\"slot_selected\" | \"confirmed\" | \"requests_human\" | \"closing\", \"tags_to_add\": [string], \
\"stage_update\": string or null, \"create_task\": bool, \"task\": {{\"title\": string, \
\"description\": string, \"due_in_minutes\": number}} or null, \
\"appointment_slot\": string or null, \
\"extracted_data\": {{string: string}}, \"escalate\": bool, \"escalation_reason\": string or null, \
\"confidence\": number between 0 and 1, \"reasoning\": string}}"
    )
}

pub fn reply_prompt(context: &ReplyContext, business_name: &str) -> String {
    let collected = if context.collected.is_empty() {
        "- nothing yet".to_string()
    } else {
        context
            .collected
            .iter()
            .map(|(key, value)| format!("- {key}: {value}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let history = if context.history.is_empty() {
        "This is the first interaction.".to_string()
    } else {
        context
            .history
            .iter()
            .map(|message| {
                let speaker = match message.direction {
                    MessageDirection::Inbound => "Customer",
                    MessageDirection::Outbound => business_name,
                };
                format!("{speaker}: {}", message.body)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "## CURRENT STATE
- Contact: {name} ({phone})
- Current step: {step}
- Messages sent by us: {sent} of {max} max
- Messages received: {received}
- Today: {today}

## DATA COLLECTED SO FAR
{collected}

## CONVERSATION
{history}

## INCOMING MESSAGE FROM CUSTOMER
\"{incoming}\"

Respond with the next action as a JSON object.",
        name = context.contact_name,
        phone = context.phone,
        step = context.step.as_str(),
        sent = context.messages_sent,
        max = context.max_messages,
        received = context.messages_received,
        today = context.now.format("%A, %Y-%m-%d"),
        incoming = context.incoming,
    )
}

pub fn opening_prompt(context: &OpeningContext) -> String {
    let interest = match context.project_type.as_deref().filter(|value| !value.trim().is_empty()) {
        Some(project) => format!("- They indicated interest in: {project}"),
        None => "- No specific service indicated yet".to_string(),
    };
    format!(
        "## SCENARIO
A new lead just came in. Write the FIRST outbound SMS to start the conversation.

- Contact name: {name}
- Lead source: {source}
{interest}

Keep it warm and short and ask what they need help with. Respond with the JSON object; set \
intent to \"continue\".",
        name = context.contact_name,
        source = context.source.as_deref().unwrap_or("website"),
    )
}
