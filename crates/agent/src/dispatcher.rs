//! Per-session serialization of receptionist work.
//!
//! Every lead gets a lane: an unbounded queue drained by one task, so two
//! events for the same lead never interleave while different leads run in
//! parallel. A lane retires itself after sitting idle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use crate::commands::{DispatchReport, ReceptionistCommand};
use crate::runtime::{Receptionist, ReceptionistError};

pub const DEFAULT_LANE_IDLE: Duration = Duration::from_secs(30);

pub type DispatchResult = Result<DispatchReport, ReceptionistError>;

/// Resolves once the lane has run the command.
pub type PendingDispatch = oneshot::Receiver<DispatchResult>;

struct Job {
    command: ReceptionistCommand,
    correlation_id: String,
    reply: oneshot::Sender<DispatchResult>,
}

type Lanes = DashMap<String, mpsc::UnboundedSender<Job>>;

#[derive(Clone)]
pub struct SessionDispatcher {
    receptionist: Arc<Receptionist>,
    lanes: Arc<Lanes>,
    idle: Duration,
}

impl SessionDispatcher {
    pub fn new(receptionist: Arc<Receptionist>) -> Self {
        Self::with_idle(receptionist, DEFAULT_LANE_IDLE)
    }

    pub fn with_idle(receptionist: Arc<Receptionist>, idle: Duration) -> Self {
        Self { receptionist, lanes: Arc::new(DashMap::new()), idle }
    }

    pub fn receptionist(&self) -> &Arc<Receptionist> {
        &self.receptionist
    }

    pub fn active_lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Runs `command` on its lane and waits for the report.
    pub async fn dispatch(
        &self,
        command: ReceptionistCommand,
        correlation_id: impl Into<String>,
    ) -> DispatchResult {
        let key = self.receptionist.lane_key(&command).await?;
        let pending = self.submit_to(key.clone(), command, correlation_id.into());
        pending.await.map_err(|_| ReceptionistError::LaneClosed(key))?
    }

    /// Queues `command` on its lane without waiting for it to run.
    pub async fn submit(
        &self,
        command: ReceptionistCommand,
        correlation_id: impl Into<String>,
    ) -> Result<PendingDispatch, ReceptionistError> {
        let key = self.receptionist.lane_key(&command).await?;
        Ok(self.submit_to(key, command, correlation_id.into()))
    }

    fn submit_to(
        &self,
        key: String,
        command: ReceptionistCommand,
        correlation_id: String,
    ) -> PendingDispatch {
        let (reply, pending) = oneshot::channel();
        let job = Job { command, correlation_id, reply };

        // The send happens under the entry guard so a retiring lane can never
        // drop a job between its emptiness check and its removal.
        let mut lane =
            self.lanes.entry(key.clone()).or_insert_with(|| self.spawn_lane(key.clone()));
        if let Err(mpsc::error::SendError(job)) = lane.send(job) {
            tracing::warn!(
                event_name = "receptionist.lane.respawned",
                lane = %key,
                "session lane died; starting a new one"
            );
            let fresh = self.spawn_lane(key);
            // A brand-new receiver cannot be closed yet; a failure here only
            // drops the reply sender, which the caller sees as `LaneClosed`.
            let _ = fresh.send(job);
            *lane = fresh;
        }
        pending
    }

    fn spawn_lane(&self, key: String) -> mpsc::UnboundedSender<Job> {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_lane(
            key,
            Arc::clone(&self.receptionist),
            Arc::clone(&self.lanes),
            sender.clone(),
            receiver,
            self.idle,
        ));
        sender
    }
}

async fn run_lane(
    key: String,
    receptionist: Arc<Receptionist>,
    lanes: Arc<Lanes>,
    own: mpsc::UnboundedSender<Job>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    idle: Duration,
) {
    tracing::debug!(event_name = "receptionist.lane.started", lane = %key, "session lane started");
    loop {
        match tokio::time::timeout(idle, jobs.recv()).await {
            Ok(Some(job)) => {
                let result =
                    receptionist.handle(job.command, &job.correlation_id, Utc::now()).await;
                if let Err(error) = &result {
                    tracing::error!(
                        event_name = "receptionist.dispatch.failed",
                        lane = %key,
                        correlation_id = %job.correlation_id,
                        error = %error,
                        "receptionist dispatch failed"
                    );
                }
                let _ = job.reply.send(result);
            }
            Ok(None) => break,
            Err(_) => {
                let retired = lanes
                    .remove_if(&key, |_, sender| sender.same_channel(&own) && jobs.is_empty())
                    .is_some();
                if retired {
                    break;
                }
            }
        }
    }
    tracing::debug!(event_name = "receptionist.lane.retired", lane = %key, "session lane retired");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use serde_json::json;

    use leadline_core::audit::InMemoryAuditSink;
    use leadline_core::domain::conversation::{ConversationSession, ConversationStep, LeadId};
    use leadline_core::outbox_engine::OutboxEngine;
    use leadline_db::repositories::SessionRepository;
    use leadline_db::{InMemoryConversationStore, InMemoryOutboxRepository, OutboxQueue};

    use super::SessionDispatcher;
    use crate::commands::{DispatchOutcome, InboundSms, ReceptionistCommand};
    use crate::guardrails::GuardrailPolicy;
    use crate::llm::{AiDecision, DecisionEngine, DecisionError, OpeningContext, ReplyContext};
    use crate::runtime::{Receptionist, ReceptionistSettings};

    /// Answers slowly and records how many decisions overlap.
    #[derive(Default)]
    struct SlowDecisions {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DecisionEngine for SlowDecisions {
        async fn decide_reply(&self, context: &ReplyContext) -> Result<AiDecision, DecisionError> {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(StdDuration::from_millis(25)).await;
            self.seen.lock().expect("seen").push(context.incoming.clone());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(serde_json::from_value(json!({"next_sms": "Got it, thanks!", "intent": "continue"}))
                .expect("decision"))
        }

        async fn decide_opening(
            &self,
            _context: &OpeningContext,
        ) -> Result<AiDecision, DecisionError> {
            Err(DecisionError::EmptyReply)
        }
    }

    async fn dispatcher(idle: StdDuration) -> (SessionDispatcher, Arc<SlowDecisions>) {
        let store = Arc::new(InMemoryConversationStore::default());
        let audit = Arc::new(InMemoryAuditSink::default());
        let decisions = Arc::new(SlowDecisions::default());
        let queue = OutboxQueue::new(
            Arc::new(InMemoryOutboxRepository::default()),
            OutboxEngine::new(),
            audit.clone(),
        );
        let guardrails = GuardrailPolicy {
            min_outbound_interval: Duration::zero(),
            ..GuardrailPolicy::default()
        };
        let settings = ReceptionistSettings {
            business_name: "Summit Roofing".into(),
            business_phone: String::new(),
            business_email: String::new(),
            history_limit: 10,
            decision_timeout: StdDuration::from_secs(2),
        };

        let mut session = ConversationSession::new(
            LeadId("lead-1".into()),
            "+12075550100",
            Utc::now() - Duration::hours(1),
        );
        session.step = ConversationStep::NeedsAssessment;
        store.save(session).await.expect("seed");

        let receptionist = Receptionist::new(
            store.clone(),
            store,
            queue,
            decisions.clone(),
            guardrails,
            audit,
            settings,
        );
        (SessionDispatcher::with_idle(Arc::new(receptionist), idle), decisions)
    }

    fn inbound(body: &str, event: &str) -> ReceptionistCommand {
        ReceptionistCommand::Inbound(InboundSms {
            lead_id: LeadId("lead-1".into()),
            phone: None,
            body: body.into(),
            first_name: None,
            opportunity_id: None,
            source_event_id: Some(event.into()),
        })
    }

    #[tokio::test]
    async fn same_lead_events_run_one_at_a_time_in_arrival_order() {
        let (dispatcher, decisions) = dispatcher(StdDuration::from_secs(5)).await;

        let first = dispatcher.submit(inbound("first", "evt-1"), "corr-1").await.expect("submit");
        let second = dispatcher.submit(inbound("second", "evt-2"), "corr-2").await.expect("submit");
        assert_eq!(dispatcher.active_lanes(), 1);

        let first = first.await.expect("lane reply").expect("first dispatch");
        let second = second.await.expect("lane reply").expect("second dispatch");
        assert_eq!(first.outcome, DispatchOutcome::Replied);
        assert_eq!(second.outcome, DispatchOutcome::Replied);

        assert_eq!(decisions.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(
            *decisions.seen.lock().expect("seen"),
            vec!["first".to_string(), "second".to_string()]
        );
    }

    #[tokio::test]
    async fn idle_lanes_retire_and_restart_on_demand() {
        let (dispatcher, _decisions) = dispatcher(StdDuration::from_millis(20)).await;

        let report =
            dispatcher.dispatch(inbound("hello", "evt-1"), "corr-1").await.expect("dispatch");
        assert_eq!(report.outcome, DispatchOutcome::Replied);

        tokio::time::sleep(StdDuration::from_millis(150)).await;
        assert_eq!(dispatcher.active_lanes(), 0);

        let again = dispatcher
            .dispatch(inbound("still there?", "evt-2"), "corr-2")
            .await
            .expect("dispatch");
        assert_eq!(again.outcome, DispatchOutcome::Replied);
    }
}
