use std::collections::BTreeMap;

use sqlx::{sqlite::SqliteRow, Row};

use leadline_core::domain::conversation::{
    ConversationSession, ConversationStep, LeadId, Message, MessageDirection, MessageId,
};

use super::{
    encode_timestamp, parse_optional_timestamp, parse_timestamp, parse_u32, MessageRepository,
    RepositoryError, SessionRepository,
};
use crate::DbPool;

const SESSION_COLUMNS: &str = "
    lead_id,
    phone,
    display_name,
    step,
    collected_json,
    message_count,
    messages_received,
    last_outbound_at,
    last_inbound_at,
    stopped,
    stopped_at,
    escalated,
    escalation_reason,
    stale_at,
    created_at,
    updated_at";

/// Sessions and the message log share one pool.
pub struct SqlConversationStore {
    pool: DbPool,
}

impl SqlConversationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionRepository for SqlConversationStore {
    async fn find(&self, lead_id: &LeadId) -> Result<Option<ConversationSession>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM conversation_session WHERE lead_id = ?"
        ))
        .bind(&lead_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(session_from_row).transpose()
    }

    async fn find_by_phone(
        &self,
        phone: &str,
    ) -> Result<Option<ConversationSession>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS}
             FROM conversation_session
             WHERE phone = ?
             ORDER BY updated_at DESC
             LIMIT 1"
        ))
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        row.map(session_from_row).transpose()
    }

    async fn list_by_phone(
        &self,
        phone: &str,
    ) -> Result<Vec<ConversationSession>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS}
             FROM conversation_session
             WHERE phone = ?
             ORDER BY updated_at DESC"
        ))
        .bind(phone)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(session_from_row).collect()
    }

    async fn save(&self, session: ConversationSession) -> Result<(), RepositoryError> {
        let collected = serde_json::to_string(&session.collected)
            .map_err(|error| RepositoryError::Decode(format!("collected data: {error}")))?;

        sqlx::query(
            "INSERT INTO conversation_session (
                lead_id,
                phone,
                display_name,
                step,
                collected_json,
                message_count,
                messages_received,
                last_outbound_at,
                last_inbound_at,
                stopped,
                stopped_at,
                escalated,
                escalation_reason,
                stale_at,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(lead_id) DO UPDATE SET
                phone = excluded.phone,
                display_name = excluded.display_name,
                step = excluded.step,
                collected_json = excluded.collected_json,
                message_count = excluded.message_count,
                messages_received = excluded.messages_received,
                last_outbound_at = excluded.last_outbound_at,
                last_inbound_at = excluded.last_inbound_at,
                stopped = excluded.stopped,
                stopped_at = excluded.stopped_at,
                escalated = excluded.escalated,
                escalation_reason = excluded.escalation_reason,
                stale_at = excluded.stale_at,
                updated_at = excluded.updated_at",
        )
        .bind(&session.lead_id.0)
        .bind(&session.phone)
        .bind(session.display_name.as_deref())
        .bind(session.step.as_str())
        .bind(collected)
        .bind(i64::from(session.message_count))
        .bind(i64::from(session.messages_received))
        .bind(session.last_outbound_at.map(encode_timestamp))
        .bind(session.last_inbound_at.map(encode_timestamp))
        .bind(session.stopped)
        .bind(session.stopped_at.map(encode_timestamp))
        .bind(session.escalated)
        .bind(session.escalation_reason.as_deref())
        .bind(session.stale_at.map(encode_timestamp))
        .bind(encode_timestamp(session.created_at))
        .bind(encode_timestamp(session.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlConversationStore {
    async fn append(&self, message: Message) -> Result<bool, RepositoryError> {
        let inserted = sqlx::query(
            "INSERT INTO conversation_message (
                id,
                lead_id,
                direction,
                body,
                channel,
                source_event_id,
                occurred_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(source_event_id) DO NOTHING",
        )
        .bind(&message.id.0)
        .bind(&message.lead_id.0)
        .bind(message.direction.as_str())
        .bind(&message.body)
        .bind(&message.channel)
        .bind(message.source_event_id.as_deref())
        .bind(encode_timestamp(message.timestamp))
        .execute(&self.pool)
        .await?;

        Ok(inserted.rows_affected() == 1)
    }

    async fn has_source_event(&self, source_event_id: &str) -> Result<bool, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM conversation_message WHERE source_event_id = ?",
        )
        .bind(source_event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    async fn recent(&self, lead_id: &LeadId, limit: u32) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, lead_id, direction, body, channel, source_event_id, occurred_at
             FROM conversation_message
             WHERE lead_id = ?
             ORDER BY occurred_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(&lead_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows.into_iter().map(message_from_row).collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

fn session_from_row(row: SqliteRow) -> Result<ConversationSession, RepositoryError> {
    let step_raw = row.try_get::<String, _>("step")?;
    let step = ConversationStep::parse(&step_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown conversation step `{step_raw}`")))?;
    let collected_raw = row.try_get::<String, _>("collected_json")?;
    let collected: BTreeMap<String, String> = serde_json::from_str(&collected_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid collected_json: {error}")))?;

    Ok(ConversationSession {
        lead_id: LeadId(row.try_get("lead_id")?),
        phone: row.try_get("phone")?,
        display_name: row.try_get("display_name")?,
        step,
        collected,
        message_count: parse_u32("message_count", row.try_get("message_count")?)?,
        messages_received: parse_u32("messages_received", row.try_get("messages_received")?)?,
        last_outbound_at: parse_optional_timestamp(
            "last_outbound_at",
            row.try_get("last_outbound_at")?,
        )?,
        last_inbound_at: parse_optional_timestamp(
            "last_inbound_at",
            row.try_get("last_inbound_at")?,
        )?,
        stopped: row.try_get("stopped")?,
        stopped_at: parse_optional_timestamp("stopped_at", row.try_get("stopped_at")?)?,
        escalated: row.try_get("escalated")?,
        escalation_reason: row.try_get("escalation_reason")?,
        stale_at: parse_optional_timestamp("stale_at", row.try_get("stale_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let direction_raw = row.try_get::<String, _>("direction")?;
    let direction = MessageDirection::parse(&direction_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown direction `{direction_raw}`")))?;

    Ok(Message {
        id: MessageId(row.try_get("id")?),
        lead_id: LeadId(row.try_get("lead_id")?),
        direction,
        body: row.try_get("body")?,
        channel: row.try_get("channel")?,
        source_event_id: row.try_get("source_event_id")?,
        timestamp: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use leadline_core::domain::conversation::{
        ConversationSession, ConversationStep, LeadId, Message, MessageDirection, MessageId,
    };

    use super::SqlConversationStore;
    use crate::migrations;
    use crate::repositories::{MessageRepository, SessionRepository};
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("timestamp").with_timezone(&Utc)
    }

    fn message(id: &str, lead: &str, source: Option<&str>, at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId(id.to_string()),
            lead_id: LeadId(lead.to_string()),
            direction: MessageDirection::Inbound,
            body: format!("body {id}"),
            channel: "sms".to_string(),
            source_event_id: source.map(str::to_string),
            timestamp: at,
        }
    }

    #[tokio::test]
    async fn session_round_trip_and_phone_lookup() {
        let pool = setup_pool().await;
        let store = SqlConversationStore::new(pool.clone());
        let now = parse_ts("2026-03-02T09:00:00Z");

        let mut session = ConversationSession::new(LeadId("lead-1".into()), "+12075550100", now);
        session.display_name = Some("Dana".to_string());
        session.collected.insert("roof_type".to_string(), "shingle".to_string());
        session.record_outbound(now + Duration::seconds(5), true);
        session.mark_stopped(now + Duration::seconds(30));
        store.save(session.clone()).await.expect("save");

        assert_eq!(store.find(&session.lead_id).await.expect("find"), Some(session.clone()));

        session.step = ConversationStep::NeedsAssessment;
        session.updated_at = now + Duration::minutes(1);
        store.save(session.clone()).await.expect("update");

        let by_phone = store.find_by_phone("+12075550100").await.expect("by phone");
        assert_eq!(by_phone.map(|found| found.step), Some(ConversationStep::NeedsAssessment));
        assert_eq!(store.find_by_phone("+19995550000").await.expect("missing"), None);

        let placeholder = ConversationSession::new(
            LeadId("phone:+12075550100".into()),
            "+12075550100",
            now + Duration::minutes(2),
        );
        store.save(placeholder).await.expect("placeholder");
        let all: Vec<String> = store
            .list_by_phone("+12075550100")
            .await
            .expect("list")
            .into_iter()
            .map(|found| found.lead_id.0)
            .collect();
        assert_eq!(all, vec!["phone:+12075550100".to_string(), "lead-1".to_string()]);

        pool.close().await;
    }

    #[tokio::test]
    async fn duplicate_source_event_is_not_logged_twice() {
        let pool = setup_pool().await;
        let store = SqlConversationStore::new(pool.clone());
        let now = parse_ts("2026-03-02T09:00:00Z");

        assert!(store.append(message("m1", "lead-1", Some("evt-1"), now)).await.expect("first"));
        assert!(!store.append(message("m2", "lead-1", Some("evt-1"), now)).await.expect("replay"));
        assert!(store.append(message("m3", "lead-1", None, now)).await.expect("no source"));
        assert!(store.append(message("m4", "lead-1", None, now)).await.expect("no source again"));

        assert!(store.has_source_event("evt-1").await.expect("lookup"));
        assert!(!store.has_source_event("evt-2").await.expect("lookup"));

        pool.close().await;
    }

    #[tokio::test]
    async fn recent_returns_latest_messages_oldest_first() {
        let pool = setup_pool().await;
        let store = SqlConversationStore::new(pool.clone());
        let base = parse_ts("2026-03-02T09:00:00Z");

        for minute in 0..5 {
            let id = format!("m{minute}");
            store
                .append(message(&id, "lead-1", None, base + Duration::minutes(minute)))
                .await
                .expect("append");
        }
        store.append(message("other", "lead-2", None, base)).await.expect("append other");

        let recent = store.recent(&LeadId("lead-1".into()), 3).await.expect("recent");
        let ids: Vec<&str> = recent.iter().map(|message| message.id.0.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3", "m4"]);

        pool.close().await;
    }
}
