use thiserror::Error;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::conversation::{ConversationStep, LeadId};
use crate::flows::states::{FlowAction, FlowContext, FlowEvent, TransitionOutcome};

pub trait FlowDefinition {
    fn name(&self) -> &'static str;
    fn initial_state(&self) -> ConversationStep;
    fn transition(
        &self,
        current: &ConversationStep,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Greeting, needs assessment, scheduling and confirmation are AI-owned;
/// handoff, escalated and closed belong to a human.
#[derive(Clone, Debug, Default)]
pub struct ReceptionistFlow;

impl FlowDefinition for ReceptionistFlow {
    fn name(&self) -> &'static str {
        "receptionist"
    }

    fn initial_state(&self) -> ConversationStep {
        ConversationStep::Greeting
    }

    fn transition(
        &self,
        current: &ConversationStep,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_receptionist(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn name(&self) -> &'static str {
        self.flow.name()
    }

    pub fn initial_state(&self) -> ConversationStep {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &ConversationStep,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &ConversationStep,
        event: &FlowEvent,
        context: &FlowContext,
        sink: &S,
        lead_id: &LeadId,
        correlation_id: &str,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        Some(lead_id.clone()),
                        correlation_id,
                        "conversation.transition_applied",
                        AuditCategory::Conversation,
                        self.name(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        Some(lead_id.clone()),
                        correlation_id,
                        "conversation.transition_rejected",
                        AuditCategory::Conversation,
                        self.name(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<ReceptionistFlow> {
    fn default() -> Self {
        Self::new(ReceptionistFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("conversation in {state:?} is owned by a human")]
    HumanOwned { state: ConversationStep },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: ConversationStep, event: FlowEvent },
}

fn transition_receptionist(
    current: &ConversationStep,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use ConversationStep::{
        Closed, Confirmation, Escalated, Greeting, Handoff, NeedsAssessment, Scheduling,
    };
    use FlowAction::{CreateFollowUpTask, NotifyHuman, RepromptForSlot, SendReply, StopAutomation};
    use FlowEvent::{
        Close, Confirmed, Continue, Escalate, HumanRequested, OpeningSent, ReadyToSchedule,
        SlotSelected,
    };

    let has_slot = context.appointment_slot.as_deref().is_some_and(|slot| !slot.trim().is_empty());

    let (to, actions) = match (current, event) {
        (Closed, Close) => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                event: event.clone(),
            });
        }
        (_, Close) => (Closed, vec![StopAutomation]),
        (Closed, Escalate) => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                event: event.clone(),
            });
        }
        (Escalated, Escalate) => (Escalated, Vec::new()),
        (_, Escalate) => (Escalated, vec![NotifyHuman, CreateFollowUpTask]),
        (Handoff | Escalated | Closed, _) => {
            return Err(FlowTransitionError::HumanOwned { state: *current });
        }
        (Greeting, OpeningSent) => (NeedsAssessment, vec![SendReply]),
        (Greeting, Continue) | (NeedsAssessment, Continue) => (NeedsAssessment, vec![SendReply]),
        (Greeting | NeedsAssessment, ReadyToSchedule | SlotSelected) => {
            (Scheduling, vec![SendReply])
        }
        (Scheduling, SlotSelected) if has_slot => (Confirmation, vec![SendReply]),
        (Scheduling, SlotSelected) => (Scheduling, vec![RepromptForSlot]),
        (Scheduling, Continue | ReadyToSchedule) => (Scheduling, vec![SendReply]),
        (Confirmation, SlotSelected) if has_slot => (Confirmation, vec![SendReply]),
        (Confirmation, Continue) => (Confirmation, vec![SendReply]),
        (Confirmation, Confirmed) => (Handoff, vec![SendReply, NotifyHuman, CreateFollowUpTask]),
        (Greeting | NeedsAssessment | Scheduling | Confirmation, HumanRequested) => {
            (Handoff, vec![SendReply, NotifyHuman])
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: *current,
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone(), actions })
}
