use serde::{Deserialize, Serialize};

use leadline_core::domain::conversation::{ConversationStep, LeadId};
use leadline_core::domain::outbox::OutboxItemId;

use crate::guardrails::GuardrailVerdict;

/// An SMS the lead sent us.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundSms {
    #[serde(alias = "contactId")]
    pub lead_id: LeadId,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(alias = "message")]
    pub body: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub opportunity_id: Option<String>,
    #[serde(default, alias = "messageId")]
    pub source_event_id: Option<String>,
}

/// A new lead was created; the opening message goes out.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstContact {
    #[serde(alias = "contactId")]
    pub lead_id: LeadId,
    pub phone: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub project_type: Option<String>,
    #[serde(default)]
    pub opportunity_id: Option<String>,
}

/// The CRM moved the lead's opportunity to another pipeline stage.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageChange {
    #[serde(alias = "contactId")]
    pub lead_id: LeadId,
    #[serde(default)]
    pub opportunity_id: Option<String>,
    #[serde(default)]
    pub from_stage: Option<String>,
    pub to_stage: String,
}

/// Carrier-level keyword SMS (STOP, HELP, START and friends).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptOutSms {
    #[serde(alias = "phone")]
    pub from: String,
    #[serde(alias = "message")]
    pub body: String,
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptOutKeyword {
    OptOut,
    Help,
    ReOptIn,
}

impl OptOutKeyword {
    /// Exact keyword match after trimming, ignoring case.
    pub fn detect(body: &str) -> Option<Self> {
        match body.trim().to_ascii_lowercase().as_str() {
            "stop" | "unsubscribe" | "cancel" | "end" | "quit" => Some(Self::OptOut),
            "help" | "info" => Some(Self::Help),
            "start" | "unstop" | "yes" => Some(Self::ReOptIn),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OptOut => "opt_out",
            Self::Help => "help",
            Self::ReOptIn => "re_opt_in",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceptionistCommand {
    Inbound(InboundSms),
    FirstContact(FirstContact),
    StageChange(StageChange),
    OptOut(OptOutSms),
}

impl ReceptionistCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Inbound(_) => "inbound_sms",
            Self::FirstContact(_) => "first_contact",
            Self::StageChange(_) => "stage_change",
            Self::OptOut(_) => "opt_out",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Replied,
    Greeted,
    FollowedUp,
    Logged,
    Closed,
    Escalated,
    Suppressed,
    Stopped,
    HumanOwned,
    Replayed,
    AlreadyStarted,
    OptedOut,
    HelpSent,
    OptedIn,
    Ignored,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replied => "replied",
            Self::Greeted => "greeted",
            Self::FollowedUp => "followed_up",
            Self::Logged => "logged",
            Self::Closed => "closed",
            Self::Escalated => "escalated",
            Self::Suppressed => "suppressed",
            Self::Stopped => "stopped",
            Self::HumanOwned => "human_owned",
            Self::Replayed => "replayed",
            Self::AlreadyStarted => "already_started",
            Self::OptedOut => "opted_out",
            Self::HelpSent => "help_sent",
            Self::OptedIn => "opted_in",
            Self::Ignored => "ignored",
        }
    }
}

/// What one receptionist dispatch did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub lead_id: LeadId,
    pub outcome: DispatchOutcome,
    /// Session step after the dispatch; `None` when no session exists.
    pub step: Option<ConversationStep>,
    pub verdict: Option<GuardrailVerdict>,
    /// Outbox items this dispatch created. Duplicates of live items are omitted.
    pub enqueued: Vec<OutboxItemId>,
}
