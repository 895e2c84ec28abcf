use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use leadline_core::domain::conversation::{ConversationSession, LeadId, Message};
use leadline_core::domain::outbox::{
    IdempotencyKey, OutboxItem, OutboxItemId, OutboxStatus, OutboxTransition,
};

use super::{
    InsertOutcome, MessageRepository, OutboxRepository, RepositoryError, SessionRepository,
};

/// Single-lock outbox store; every operation observes a consistent snapshot.
#[derive(Default)]
pub struct InMemoryOutboxRepository {
    state: Mutex<OutboxState>,
}

#[derive(Default)]
struct OutboxState {
    items: HashMap<String, OutboxItem>,
    transitions: Vec<OutboxTransition>,
}

impl OutboxState {
    fn session_busy(&self, session_key: &str, except: &OutboxItemId) -> bool {
        self.items.values().any(|item| {
            item.status == OutboxStatus::Processing
                && item.id != *except
                && item.session_key.as_deref() == Some(session_key)
        })
    }
}

#[async_trait::async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn insert_if_absent(&self, item: OutboxItem) -> Result<InsertOutcome, RepositoryError> {
        let mut state = self.state.lock().await;
        let existing = state
            .items
            .values()
            .filter(|stored| {
                stored.idempotency_key == item.idempotency_key
                    && stored.status != OutboxStatus::Dead
            })
            .min_by_key(|stored| stored.created_at)
            .cloned();

        if let Some(existing) = existing {
            return Ok(InsertOutcome::Existing(existing));
        }
        state.items.insert(item.id.0.clone(), item);
        Ok(InsertOutcome::Inserted)
    }

    async fn find(&self, id: &OutboxItemId) -> Result<Option<OutboxItem>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.items.get(&id.0).cloned())
    }

    async fn find_completed_by_key(
        &self,
        key: &IdempotencyKey,
        excluding: &OutboxItemId,
    ) -> Result<Option<OutboxItem>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .values()
            .filter(|item| {
                item.idempotency_key == *key
                    && item.status == OutboxStatus::Completed
                    && item.id != *excluding
            })
            .min_by_key(|item| item.updated_at)
            .cloned())
    }

    async fn list_claimable(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OutboxItem>, RepositoryError> {
        let state = self.state.lock().await;
        let mut ready: Vec<OutboxItem> = state
            .items
            .values()
            .filter(|item| item.is_ready(now))
            .filter(|item| {
                item.session_key
                    .as_deref()
                    .map_or(true, |session| !state.session_busy(session, &item.id))
            })
            .cloned()
            .collect();
        ready.sort_by(|left, right| left.selection_order(right));
        ready.truncate(limit as usize);
        Ok(ready)
    }

    async fn list_by_status(
        &self,
        status: OutboxStatus,
        limit: u32,
    ) -> Result<Vec<OutboxItem>, RepositoryError> {
        let state = self.state.lock().await;
        let mut items: Vec<OutboxItem> =
            state.items.values().filter(|item| item.status == status).cloned().collect();
        items.sort_by(|left, right| {
            right.updated_at.cmp(&left.updated_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        items.truncate(limit as usize);
        Ok(items)
    }

    async fn compare_and_set(
        &self,
        item: OutboxItem,
        expected_version: u32,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        let version_matches = state
            .items
            .get(&item.id.0)
            .is_some_and(|stored| stored.state_version == expected_version);
        if !version_matches {
            return Ok(false);
        }

        if item.status == OutboxStatus::Processing {
            if let Some(session) = item.session_key.as_deref() {
                if state.session_busy(session, &item.id) {
                    return Ok(false);
                }
            }
        }

        state.items.insert(item.id.0.clone(), item);
        Ok(true)
    }

    async fn append_transition(&self, transition: OutboxTransition) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        state.transitions.push(transition);
        Ok(())
    }

    async fn list_transitions(
        &self,
        item_id: &OutboxItemId,
    ) -> Result<Vec<OutboxTransition>, RepositoryError> {
        let state = self.state.lock().await;
        let mut transitions: Vec<OutboxTransition> = state
            .transitions
            .iter()
            .filter(|transition| transition.item_id == *item_id)
            .cloned()
            .collect();
        transitions.sort_by_key(|transition| transition.state_version);
        Ok(transitions)
    }
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    sessions: RwLock<HashMap<String, ConversationSession>>,
    messages: RwLock<Vec<Message>>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemoryConversationStore {
    async fn find(&self, lead_id: &LeadId) -> Result<Option<ConversationSession>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&lead_id.0).cloned())
    }

    async fn find_by_phone(
        &self,
        phone: &str,
    ) -> Result<Option<ConversationSession>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|session| session.phone == phone)
            .max_by_key(|session| session.updated_at)
            .cloned())
    }

    async fn list_by_phone(
        &self,
        phone: &str,
    ) -> Result<Vec<ConversationSession>, RepositoryError> {
        let sessions = self.sessions.read().await;
        let mut matching: Vec<ConversationSession> =
            sessions.values().filter(|session| session.phone == phone).cloned().collect();
        matching.sort_by(|left, right| right.updated_at.cmp(&left.updated_at));
        Ok(matching)
    }

    async fn save(&self, session: ConversationSession) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.lead_id.0.clone(), session);
        Ok(())
    }
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryConversationStore {
    async fn append(&self, message: Message) -> Result<bool, RepositoryError> {
        let mut messages = self.messages.write().await;
        if let Some(source) = message.source_event_id.as_deref() {
            if messages.iter().any(|logged| logged.source_event_id.as_deref() == Some(source)) {
                return Ok(false);
            }
        }
        messages.push(message);
        Ok(true)
    }

    async fn has_source_event(&self, source_event_id: &str) -> Result<bool, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages.iter().any(|logged| logged.source_event_id.as_deref() == Some(source_event_id)))
    }

    async fn recent(&self, lead_id: &LeadId, limit: u32) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let mut recent: Vec<Message> =
            messages.iter().filter(|message| message.lead_id == *lead_id).cloned().collect();
        recent.sort_by_key(|message| message.timestamp);
        let skip = recent.len().saturating_sub(limit as usize);
        Ok(recent.split_off(skip))
    }
}
