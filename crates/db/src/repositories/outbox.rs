use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use leadline_core::domain::outbox::{
    IdempotencyKey, OutboxItem, OutboxItemId, OutboxStatus, OutboxTransition, OutboxTransitionId,
    Priority,
};

use super::{
    encode_timestamp, parse_optional_timestamp, parse_timestamp, parse_u32, InsertOutcome,
    OutboxRepository, RepositoryError,
};
use crate::DbPool;

const ITEM_COLUMNS: &str = "
    id,
    action_type,
    payload_json,
    priority,
    status,
    attempt,
    max_attempts,
    idempotency_key,
    session_key,
    available_at,
    claimed_by,
    claimed_at,
    last_error,
    result,
    correlation_id,
    state_version,
    created_at,
    last_attempt_at,
    updated_at";

pub struct SqlOutboxRepository {
    pool: DbPool,
}

impl SqlOutboxRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_live_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<OutboxItem>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS}
             FROM outbox_item
             WHERE idempotency_key = ? AND status <> 'dead'
             ORDER BY created_at ASC
             LIMIT 1"
        ))
        .bind(&key.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(item_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl OutboxRepository for SqlOutboxRepository {
    async fn insert_if_absent(&self, item: OutboxItem) -> Result<InsertOutcome, RepositoryError> {
        // A concurrent dead-lettering can empty the live slot between the two
        // statements; one more insert attempt settles it.
        for _ in 0..2 {
            let inserted = sqlx::query(
                "INSERT INTO outbox_item (
                    id,
                    action_type,
                    payload_json,
                    priority,
                    priority_rank,
                    status,
                    attempt,
                    max_attempts,
                    idempotency_key,
                    session_key,
                    available_at,
                    claimed_by,
                    claimed_at,
                    last_error,
                    result,
                    correlation_id,
                    state_version,
                    created_at,
                    last_attempt_at,
                    updated_at
                 )
                 SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
                 WHERE NOT EXISTS (
                    SELECT 1 FROM outbox_item
                    WHERE idempotency_key = ? AND status <> 'dead'
                 )",
            )
            .bind(&item.id.0)
            .bind(&item.action_type)
            .bind(item.payload.to_string())
            .bind(item.priority.as_str())
            .bind(i64::from(item.priority.rank()))
            .bind(item.status.as_str())
            .bind(i64::from(item.attempt))
            .bind(i64::from(item.max_attempts))
            .bind(&item.idempotency_key.0)
            .bind(item.session_key.as_deref())
            .bind(encode_timestamp(item.available_at))
            .bind(item.claimed_by.as_deref())
            .bind(item.claimed_at.map(encode_timestamp))
            .bind(item.last_error.as_deref())
            .bind(item.result.as_deref())
            .bind(&item.correlation_id)
            .bind(i64::from(item.state_version))
            .bind(encode_timestamp(item.created_at))
            .bind(item.last_attempt_at.map(encode_timestamp))
            .bind(encode_timestamp(item.updated_at))
            .bind(&item.idempotency_key.0)
            .execute(&self.pool)
            .await?;

            if inserted.rows_affected() == 1 {
                return Ok(InsertOutcome::Inserted);
            }
            if let Some(existing) = self.find_live_by_key(&item.idempotency_key).await? {
                return Ok(InsertOutcome::Existing(existing));
            }
        }

        Err(RepositoryError::Decode(format!(
            "idempotency key `{}` neither inserted nor found",
            item.idempotency_key
        )))
    }

    async fn find(&self, id: &OutboxItemId) -> Result<Option<OutboxItem>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM outbox_item WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(item_from_row).transpose()
    }

    async fn find_completed_by_key(
        &self,
        key: &IdempotencyKey,
        excluding: &OutboxItemId,
    ) -> Result<Option<OutboxItem>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS}
             FROM outbox_item
             WHERE idempotency_key = ? AND status = 'completed' AND id <> ?
             ORDER BY updated_at ASC
             LIMIT 1"
        ))
        .bind(&key.0)
        .bind(&excluding.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(item_from_row).transpose()
    }

    async fn list_claimable(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OutboxItem>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS}
             FROM outbox_item AS candidate
             WHERE candidate.status IN ('pending', 'failed_transient')
               AND candidate.available_at <= ?
               AND (
                 candidate.session_key IS NULL
                 OR NOT EXISTS (
                   SELECT 1 FROM outbox_item AS busy
                   WHERE busy.session_key = candidate.session_key
                     AND busy.status = 'processing'
                 )
               )
             ORDER BY candidate.priority_rank ASC, candidate.created_at ASC, candidate.id ASC
             LIMIT ?"
        ))
        .bind(encode_timestamp(now))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(item_from_row).collect()
    }

    async fn list_by_status(
        &self,
        status: OutboxStatus,
        limit: u32,
    ) -> Result<Vec<OutboxItem>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS}
             FROM outbox_item
             WHERE status = ?
             ORDER BY updated_at DESC, id ASC
             LIMIT ?"
        ))
        .bind(status.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(item_from_row).collect()
    }

    async fn compare_and_set(
        &self,
        item: OutboxItem,
        expected_version: u32,
    ) -> Result<bool, RepositoryError> {
        let updated = sqlx::query(
            "UPDATE outbox_item SET
                status = ?,
                attempt = ?,
                max_attempts = ?,
                available_at = ?,
                claimed_by = ?,
                claimed_at = ?,
                last_error = ?,
                result = ?,
                state_version = ?,
                last_attempt_at = ?,
                updated_at = ?
             WHERE id = ?
               AND state_version = ?
               AND (
                 ? <> 'processing'
                 OR session_key IS NULL
                 OR NOT EXISTS (
                   SELECT 1 FROM outbox_item AS busy
                   WHERE busy.session_key = outbox_item.session_key
                     AND busy.status = 'processing'
                     AND busy.id <> outbox_item.id
                 )
               )",
        )
        .bind(item.status.as_str())
        .bind(i64::from(item.attempt))
        .bind(i64::from(item.max_attempts))
        .bind(encode_timestamp(item.available_at))
        .bind(item.claimed_by.as_deref())
        .bind(item.claimed_at.map(encode_timestamp))
        .bind(item.last_error.as_deref())
        .bind(item.result.as_deref())
        .bind(i64::from(item.state_version))
        .bind(item.last_attempt_at.map(encode_timestamp))
        .bind(encode_timestamp(item.updated_at))
        .bind(&item.id.0)
        .bind(i64::from(expected_version))
        .bind(item.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() == 1)
    }

    async fn append_transition(&self, transition: OutboxTransition) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO outbox_transition (
                id,
                item_id,
                from_status,
                to_status,
                reason,
                error_class,
                context_json,
                actor_id,
                idempotency_key,
                correlation_id,
                state_version,
                occurred_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&transition.id.0)
        .bind(&transition.item_id.0)
        .bind(transition.from_status.as_ref().map(OutboxStatus::as_str))
        .bind(transition.to_status.as_str())
        .bind(&transition.reason)
        .bind(transition.error_class.as_deref())
        .bind(&transition.context_json)
        .bind(&transition.actor_id)
        .bind(&transition.idempotency_key.0)
        .bind(&transition.correlation_id)
        .bind(i64::from(transition.state_version))
        .bind(encode_timestamp(transition.occurred_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_transitions(
        &self,
        item_id: &OutboxItemId,
    ) -> Result<Vec<OutboxTransition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                item_id,
                from_status,
                to_status,
                reason,
                error_class,
                context_json,
                actor_id,
                idempotency_key,
                correlation_id,
                state_version,
                occurred_at
             FROM outbox_transition
             WHERE item_id = ?
             ORDER BY state_version ASC, occurred_at ASC",
        )
        .bind(&item_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(transition_from_row).collect()
    }
}

fn parse_status(column: &str, value: &str) -> Result<OutboxStatus, RepositoryError> {
    OutboxStatus::parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown {column} `{value}`")))
}

fn item_from_row(row: SqliteRow) -> Result<OutboxItem, RepositoryError> {
    let status = parse_status("status", &row.try_get::<String, _>("status")?)?;
    let priority_raw = row.try_get::<String, _>("priority")?;
    let priority = Priority::parse(&priority_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown priority `{priority_raw}`")))?;
    let payload_raw = row.try_get::<String, _>("payload_json")?;
    let payload = serde_json::from_str(&payload_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid payload_json: {error}")))?;

    Ok(OutboxItem {
        id: OutboxItemId(row.try_get("id")?),
        action_type: row.try_get("action_type")?,
        payload,
        priority,
        status,
        attempt: parse_u32("attempt", row.try_get("attempt")?)?,
        max_attempts: parse_u32("max_attempts", row.try_get("max_attempts")?)?,
        idempotency_key: IdempotencyKey(row.try_get("idempotency_key")?),
        session_key: row.try_get("session_key")?,
        available_at: parse_timestamp("available_at", row.try_get("available_at")?)?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: parse_optional_timestamp("claimed_at", row.try_get("claimed_at")?)?,
        last_error: row.try_get("last_error")?,
        result: row.try_get("result")?,
        correlation_id: row.try_get("correlation_id")?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        last_attempt_at: parse_optional_timestamp(
            "last_attempt_at",
            row.try_get("last_attempt_at")?,
        )?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn transition_from_row(row: SqliteRow) -> Result<OutboxTransition, RepositoryError> {
    let from_status = row
        .try_get::<Option<String>, _>("from_status")?
        .map(|value| parse_status("from_status", &value))
        .transpose()?;
    let to_status = parse_status("to_status", &row.try_get::<String, _>("to_status")?)?;

    Ok(OutboxTransition {
        id: OutboxTransitionId(row.try_get("id")?),
        item_id: OutboxItemId(row.try_get("item_id")?),
        from_status,
        to_status,
        reason: row.try_get("reason")?,
        error_class: row.try_get("error_class")?,
        context_json: row.try_get("context_json")?,
        actor_id: row.try_get("actor_id")?,
        idempotency_key: IdempotencyKey(row.try_get("idempotency_key")?),
        correlation_id: row.try_get("correlation_id")?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;

    use leadline_core::domain::outbox::{OutboxItemId, OutboxStatus, Priority};
    use leadline_core::outbox_engine::{NewOutboxItem, OutboxEngine};

    use super::SqlOutboxRepository;
    use crate::migrations;
    use crate::repositories::{InsertOutcome, OutboxRepository};
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("timestamp").with_timezone(&Utc)
    }

    #[tokio::test]
    async fn insert_find_and_transition_round_trip() {
        let pool = setup_pool().await;
        let repo = SqlOutboxRepository::new(pool.clone());
        let engine = OutboxEngine::new();
        let now = parse_ts("2026-03-02T09:00:00Z");

        let created = engine.create_item(
            NewOutboxItem::new("sms.send", json!({"phone": "+12075550100", "message": "hi"}))
                .with_idempotency_key("evt-1")
                .with_session_key("lead-1")
                .with_correlation_id("req-1"),
            now,
        );

        let outcome = repo.insert_if_absent(created.item.clone()).await.expect("insert");
        assert_eq!(outcome, InsertOutcome::Inserted);
        repo.append_transition(created.transition.clone()).await.expect("transition");

        let found = repo.find(&created.item.id).await.expect("find");
        assert_eq!(found, Some(created.item.clone()));
        let transitions = repo.list_transitions(&created.item.id).await.expect("transitions");
        assert_eq!(transitions, vec![created.transition]);

        pool.close().await;
    }

    #[tokio::test]
    async fn live_key_blocks_second_insert_until_item_is_dead() {
        let pool = setup_pool().await;
        let repo = SqlOutboxRepository::new(pool.clone());
        let engine = OutboxEngine::new();
        let now = parse_ts("2026-03-02T09:00:00Z");
        let new_item = || NewOutboxItem::new("sms.send", json!({"phone": "+1", "message": "x"}));

        let first = engine.create_item(new_item().with_idempotency_key("evt-123"), now).item;
        repo.insert_if_absent(first.clone()).await.expect("first insert");

        let second = engine.create_item(new_item().with_idempotency_key("evt-123"), now).item;
        match repo.insert_if_absent(second).await.expect("second insert") {
            InsertOutcome::Existing(existing) => assert_eq!(existing.id, first.id),
            InsertOutcome::Inserted => panic!("duplicate key must not insert"),
        }

        let mut dead = first.clone();
        dead.status = OutboxStatus::Dead;
        dead.state_version += 1;
        assert!(repo.compare_and_set(dead, first.state_version).await.expect("cas"));

        let third = engine.create_item(new_item().with_idempotency_key("evt-123"), now).item;
        assert_eq!(repo.insert_if_absent(third).await.expect("third"), InsertOutcome::Inserted);

        pool.close().await;
    }

    #[tokio::test]
    async fn claimable_items_follow_priority_then_age_and_skip_busy_sessions() {
        let pool = setup_pool().await;
        let repo = SqlOutboxRepository::new(pool.clone());
        let engine = OutboxEngine::new();
        let base = parse_ts("2026-03-02T09:00:00Z");

        let low = engine
            .create_item(
                NewOutboxItem::new("a", json!({"n": 1})).with_priority(Priority::Low),
                base,
            )
            .item;
        let normal_old = engine.create_item(NewOutboxItem::new("a", json!({"n": 2})), base).item;
        let normal_new = engine
            .create_item(NewOutboxItem::new("a", json!({"n": 3})), base + Duration::seconds(1))
            .item;
        let high = engine
            .create_item(
                NewOutboxItem::new("a", json!({"n": 4}))
                    .with_priority(Priority::High)
                    .with_session_key("lead-busy"),
                base + Duration::seconds(2),
            )
            .item;
        let future = engine
            .create_item(NewOutboxItem::new("a", json!({"n": 5})), base + Duration::hours(1))
            .item;

        for item in [&low, &normal_old, &normal_new, &high, &future] {
            repo.insert_if_absent(item.clone()).await.expect("insert");
        }

        let now = base + Duration::seconds(10);
        let order: Vec<OutboxItemId> = repo
            .list_claimable(now, 10)
            .await
            .expect("claimable")
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(order, vec![high.id.clone(), normal_old.id, normal_new.id, low.id]);

        let in_flight = engine
            .create_item(
                NewOutboxItem::new("a", json!({"n": 6})).with_session_key("lead-busy"),
                base,
            )
            .item;
        repo.insert_if_absent(in_flight.clone()).await.expect("insert in flight");
        let claimed = engine.claim_item(in_flight.clone(), "worker-1", now).expect("claim").item;
        assert!(repo.compare_and_set(claimed, in_flight.state_version).await.expect("cas"));

        let ids: Vec<OutboxItemId> = repo
            .list_claimable(now, 10)
            .await
            .expect("claimable")
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert!(!ids.contains(&high.id));

        pool.close().await;
    }

    #[tokio::test]
    async fn compare_and_set_rejects_stale_versions_and_second_session_claim() {
        let pool = setup_pool().await;
        let repo = SqlOutboxRepository::new(pool.clone());
        let engine = OutboxEngine::new();
        let now = parse_ts("2026-03-02T09:00:00Z");

        let first = engine
            .create_item(
                NewOutboxItem::new("sms.send", json!({"n": 1})).with_session_key("lead-7"),
                now,
            )
            .item;
        let second = engine
            .create_item(
                NewOutboxItem::new("sms.send", json!({"n": 2})).with_session_key("lead-7"),
                now,
            )
            .item;
        repo.insert_if_absent(first.clone()).await.expect("insert first");
        repo.insert_if_absent(second.clone()).await.expect("insert second");

        let claimed = engine.claim_item(first.clone(), "worker-a", now).expect("claim").item;
        assert!(repo.compare_and_set(claimed.clone(), first.state_version).await.expect("cas"));

        let racing = engine.claim_item(first.clone(), "worker-b", now).expect("claim").item;
        assert!(!repo.compare_and_set(racing, first.state_version).await.expect("stale cas"));

        let sibling = engine.claim_item(second.clone(), "worker-b", now).expect("claim").item;
        assert!(!repo.compare_and_set(sibling, second.state_version).await.expect("session cas"));

        let done = engine.complete_item(claimed.clone(), "sent", now).expect("complete").item;
        assert!(repo.compare_and_set(done, claimed.state_version).await.expect("complete cas"));

        let completed = repo
            .find_completed_by_key(&first.idempotency_key, &second.id)
            .await
            .expect("completed lookup");
        assert_eq!(completed.map(|item| item.id), Some(first.id));

        pool.close().await;
    }
}
