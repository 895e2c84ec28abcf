//! AI receptionist runtime.
//!
//! Turns inbound SMS, new-lead and CRM stage events into outbox work:
//! - `guardrails` decides whether anything automated may go out at all
//! - `llm` asks the model for a reply and parses its proposal
//! - `runtime` applies the proposal to the session and the conversation flow
//! - `dispatcher` serializes work per lead
//!
//! The model never sends anything itself. Every customer-facing message, CRM
//! change and team alert becomes an outbox item.

pub mod commands;
pub mod dispatcher;
pub mod guardrails;
pub mod llm;
pub mod runtime;

pub use commands::{
    DispatchOutcome, DispatchReport, FirstContact, InboundSms, OptOutKeyword, OptOutSms,
    ReceptionistCommand, StageChange,
};
pub use dispatcher::{PendingDispatch, SessionDispatcher};
pub use guardrails::{GuardrailInput, GuardrailPolicy, GuardrailVerdict, OutboundKind};
pub use llm::{AiDecision, DecisionEngine, DecisionError, LlmDecisionEngine};
pub use runtime::{Receptionist, ReceptionistError, ReceptionistSettings};
