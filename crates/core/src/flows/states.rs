use serde::{Deserialize, Serialize};

use crate::domain::conversation::ConversationStep;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    OpeningSent,
    Continue,
    ReadyToSchedule,
    SlotSelected,
    Confirmed,
    HumanRequested,
    Escalate,
    Close,
}

impl FlowEvent {
    /// Maps an AI-classified intent onto a flow event. Unknown intents keep the
    /// conversation where it is.
    pub fn from_intent(intent: &str) -> Self {
        match intent.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "ready_to_schedule" | "scheduling" | "wants_appointment" => Self::ReadyToSchedule,
            "slot_selected" | "appointment_selected" | "appointment" => Self::SlotSelected,
            "confirmed" | "confirm" | "appointment_confirmed" => Self::Confirmed,
            "requests_human" | "human" | "human_requested" => Self::HumanRequested,
            "closing" | "goodbye" | "done" => Self::Close,
            _ => Self::Continue,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub appointment_slot: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    SendReply,
    RepromptForSlot,
    NotifyHuman,
    CreateFollowUpTask,
    StopAutomation,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ConversationStep,
    pub to: ConversationStep,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}

impl TransitionOutcome {
    pub fn has_action(&self, action: &FlowAction) -> bool {
        self.actions.contains(action)
    }
}
