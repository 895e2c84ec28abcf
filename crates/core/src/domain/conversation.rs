use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeadId(pub String);

impl std::fmt::Display for LeadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStep {
    Greeting,
    NeedsAssessment,
    Scheduling,
    Confirmation,
    Handoff,
    Escalated,
    Closed,
}

impl ConversationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::NeedsAssessment => "needs_assessment",
            Self::Scheduling => "scheduling",
            Self::Confirmation => "confirmation",
            Self::Handoff => "handoff",
            Self::Escalated => "escalated",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "greeting" => Some(Self::Greeting),
            "needs_assessment" => Some(Self::NeedsAssessment),
            "scheduling" => Some(Self::Scheduling),
            "confirmation" => Some(Self::Confirmation),
            "handoff" => Some(Self::Handoff),
            "escalated" => Some(Self::Escalated),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    /// Steps owned by a human; the AI no longer replies.
    pub fn is_human_owned(&self) -> bool {
        matches!(self, Self::Handoff | Self::Escalated | Self::Closed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub lead_id: LeadId,
    pub phone: String,
    pub display_name: Option<String>,
    pub step: ConversationStep,
    pub collected: BTreeMap<String, String>,
    /// AI-generated outbound messages. Scripted and compliance sends are not counted.
    pub message_count: u32,
    pub messages_received: u32,
    pub last_outbound_at: Option<DateTime<Utc>>,
    pub last_inbound_at: Option<DateTime<Utc>>,
    pub stopped: bool,
    pub stopped_at: Option<DateTime<Utc>>,
    pub escalated: bool,
    pub escalation_reason: Option<String>,
    pub stale_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(lead_id: LeadId, phone: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            lead_id,
            phone: phone.into(),
            display_name: None,
            step: ConversationStep::Greeting,
            collected: BTreeMap::new(),
            message_count: 0,
            messages_received: 0,
            last_outbound_at: None,
            last_inbound_at: None,
            stopped: false,
            stopped_at: None,
            escalated: false,
            escalation_reason: None,
            stale_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn record_inbound(&mut self, now: DateTime<Utc>) {
        self.messages_received = self.messages_received.saturating_add(1);
        self.last_inbound_at = Some(now);
        self.stale_at = None;
        self.updated_at = now;
    }

    pub fn record_outbound(&mut self, now: DateTime<Utc>, counts_toward_cap: bool) {
        if counts_toward_cap {
            self.message_count = self.message_count.saturating_add(1);
        }
        self.last_outbound_at = Some(now);
        self.updated_at = now;
    }

    /// Sticky: only [`ConversationSession::reopt_in`] clears it.
    pub fn mark_stopped(&mut self, now: DateTime<Utc>) {
        if !self.stopped {
            self.stopped = true;
            self.stopped_at = Some(now);
        }
        self.updated_at = now;
    }

    pub fn mark_escalated(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        if !self.escalated {
            self.escalated = true;
            self.escalation_reason = Some(reason.into());
        }
        if !matches!(self.step, ConversationStep::Closed) {
            self.step = ConversationStep::Escalated;
        }
        self.updated_at = now;
    }

    pub fn mark_stale(&mut self, now: DateTime<Utc>) {
        if self.stale_at.is_none() {
            self.stale_at = Some(now);
        }
        self.updated_at = now;
    }

    pub fn reopt_in(&mut self, now: DateTime<Utc>) {
        self.stopped = false;
        self.stopped_at = None;
        self.updated_at = now;
    }

    /// True when no inbound arrived after the last outbound.
    pub fn awaiting_reply(&self) -> bool {
        match (self.last_outbound_at, self.last_inbound_at) {
            (Some(outbound), Some(inbound)) => inbound < outbound,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub lead_id: LeadId,
    pub direction: MessageDirection,
    pub body: String,
    pub channel: String,
    pub source_event_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}
