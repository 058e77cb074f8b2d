//! PostgreSQL implementations of ExecutionStore and MembershipStore
//!
//! Production persistence using PostgreSQL with:
//! - Row-locked compare-and-set state transitions
//! - Execution history written in the same transaction as the state change
//! - Token digests in their own table, cascaded with the execution

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::workflow::{
    Execution, ExecutionEvent, ExecutionState, Intent, MembershipRecord, SubscriptionRequest,
    Transition,
};

/// Apply the embedded schema migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(format!("migration failed: {}", e)))
}

/// PostgreSQL implementation of ExecutionStore
///
/// # Example
///
/// ```ignore
/// use newsletter_engine::persistence::PostgresExecutionStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/newsletter").await?;
/// let store = PostgresExecutionStore::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresExecutionStore {
    pool: PgPool,
}

impl PostgresExecutionStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const EXECUTION_COLUMNS: &str =
    "id, identity, intent, callback_base, state, created_at, expires_at, updated_at";

#[async_trait]
impl ExecutionStore for PostgresExecutionStore {
    #[instrument(skip(self, execution), fields(execution_id = %execution.id))]
    async fn create_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query(
            r#"
            INSERT INTO subscription_executions
                (id, identity, intent, callback_base, state, created_at, expires_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(execution.id)
        .bind(&execution.request.identity)
        .bind(execution.request.intent.as_str())
        .bind(&execution.request.callback_base)
        .bind(execution.state.as_str())
        .bind(execution.created_at)
        .bind(execution.expires_at)
        .bind(execution.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to create execution: {}", e);
            db_error(e)
        })?;

        let created = ExecutionEvent::Created {
            request: execution.request.clone(),
        };
        insert_event(&mut tx, execution.id, &created, execution.created_at).await?;

        tx.commit().await.map_err(db_error)?;

        debug!("created execution");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_execution(&self, execution_id: Uuid) -> Result<Execution, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscription_executions WHERE id = $1",
            EXECUTION_COLUMNS
        ))
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get execution: {}", e);
            db_error(e)
        })?
        .ok_or(StoreError::ExecutionNotFound(execution_id))?;

        execution_from_row(&row)
    }

    #[instrument(skip(self, transition), fields(from = %transition.from, to = %transition.to))]
    async fn transition(
        &self,
        execution_id: Uuid,
        transition: Transition,
    ) -> Result<Execution, StoreError> {
        ensure_allowed(&transition)?;

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let row = sqlx::query("SELECT state FROM subscription_executions WHERE id = $1 FOR UPDATE")
            .bind(execution_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or(StoreError::ExecutionNotFound(execution_id))?;

        let current = parse_state(row.get("state"))?;
        if current != transition.from {
            return Err(StoreError::ConcurrencyConflict {
                expected: transition.from,
                actual: current,
            });
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE subscription_executions
            SET state = $2,
                expires_at = COALESCE($3, expires_at),
                updated_at = $4
            WHERE id = $1
            RETURNING {}
            "#,
            EXECUTION_COLUMNS
        ))
        .bind(execution_id)
        .bind(transition.to.as_str())
        .bind(transition.expires_at)
        .bind(transition.at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to update execution state: {}", e);
            db_error(e)
        })?;

        insert_event(&mut tx, execution_id, &transition.event, transition.at).await?;

        tx.commit().await.map_err(db_error)?;

        debug!(%execution_id, "transitioned execution");
        execution_from_row(&row)
    }

    #[instrument(skip(self, event))]
    async fn record_event(
        &self,
        execution_id: Uuid,
        event: ExecutionEvent,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // Lock the parent row so concurrent appends get distinct sequence numbers
        sqlx::query("SELECT id FROM subscription_executions WHERE id = $1 FOR UPDATE")
            .bind(execution_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or(StoreError::ExecutionNotFound(execution_id))?;

        insert_event(&mut tx, execution_id, &event, at).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_events(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<(i32, ExecutionEvent)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT sequence_num, event_data
            FROM subscription_execution_events
            WHERE execution_id = $1
            ORDER BY sequence_num
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load events: {}", e);
            db_error(e)
        })?;

        if rows.is_empty() {
            // Distinguish "no history" from "no such execution"
            self.get_execution(execution_id).await?;
        }

        rows.iter()
            .map(|row| {
                let sequence: i32 = row.get("sequence_num");
                let data: serde_json::Value = row.get("event_data");
                let event = serde_json::from_value(data)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok((sequence, event))
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn list_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM subscription_executions
            WHERE state IN ('suspended', 'committing') AND expires_at < $1
            ORDER BY expires_at
            LIMIT $2
            "#,
            EXECUTION_COLUMNS
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list overdue executions: {}", e);
            db_error(e)
        })?;

        rows.iter().map(execution_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn find_live_for_identity(&self, identity: &str) -> Result<Vec<Execution>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM subscription_executions
            WHERE identity = $1 AND state IN ('validating', 'suspended')
            ORDER BY created_at
            "#,
            EXECUTION_COLUMNS
        ))
        .bind(identity)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(execution_from_row).collect()
    }

    #[instrument(skip(self, record), fields(execution_id = %record.execution_id))]
    async fn insert_token(&self, record: TokenRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO subscription_tokens (token_hash, execution_id, issued_at, expires_at, consumed_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.token_hash)
        .bind(record.execution_id)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(record.consumed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to insert token: {}", e);
            db_error(e)
        })?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn find_token(&self, token_hash: &str) -> Result<Option<TokenRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT token_hash, execution_id, issued_at, expires_at, consumed_at
            FROM subscription_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(|row| TokenRecord {
            token_hash: row.get("token_hash"),
            execution_id: row.get("execution_id"),
            issued_at: row.get("issued_at"),
            expires_at: row.get("expires_at"),
            consumed_at: row.get("consumed_at"),
        }))
    }

    #[instrument(skip_all)]
    async fn consume_token(&self, token_hash: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE subscription_tokens
            SET consumed_at = $2
            WHERE token_hash = $1 AND consumed_at IS NULL
            "#,
        )
        .bind(token_hash)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn consume_tokens_for(
        &self,
        execution_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE subscription_tokens
            SET consumed_at = $2
            WHERE execution_id = $1 AND consumed_at IS NULL
            "#,
        )
        .bind(execution_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() as usize)
    }
}

/// PostgreSQL implementation of MembershipStore
#[derive(Clone)]
pub struct PostgresMembershipStore {
    pool: PgPool,
}

impl PostgresMembershipStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MembershipStore for PostgresMembershipStore {
    #[instrument(skip(self))]
    async fn get(&self, identity: &str) -> Result<Option<MembershipRecord>, StoreError> {
        let row = sqlx::query("SELECT identity, joined_at FROM newsletter_members WHERE identity = $1")
            .bind(identity)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to read membership: {}", e);
                db_error(e)
            })?;

        Ok(row.map(|row| MembershipRecord {
            identity: row.get("identity"),
            joined_at: row.get("joined_at"),
        }))
    }

    #[instrument(skip(self, record), fields(identity = %record.identity))]
    async fn put(&self, record: MembershipRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO newsletter_members (identity, joined_at)
            VALUES ($1, $2)
            ON CONFLICT (identity) DO UPDATE SET joined_at = EXCLUDED.joined_at
            "#,
        )
        .bind(&record.identity)
        .bind(record.joined_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to write membership: {}", e);
            db_error(e)
        })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, identity: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM newsletter_members WHERE identity = $1")
            .bind(identity)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to delete membership: {}", e);
                db_error(e)
            })?;
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn insert_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    execution_id: Uuid,
    event: &ExecutionEvent,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let event_data =
        serde_json::to_value(event).map_err(|e| StoreError::Serialization(e.to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO subscription_execution_events
            (execution_id, sequence_num, event_type, event_data, recorded_at)
        SELECT $1, COALESCE(MAX(sequence_num) + 1, 0), $2, $3, $4
        FROM subscription_execution_events
        WHERE execution_id = $1
        "#,
    )
    .bind(execution_id)
    .bind(event.type_name())
    .bind(&event_data)
    .bind(at)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        error!("Failed to append execution event: {}", e);
        db_error(e)
    })?;

    Ok(())
}

fn execution_from_row(row: &PgRow) -> Result<Execution, StoreError> {
    let intent: String = row.get("intent");
    let intent = Intent::parse(&intent)
        .ok_or_else(|| StoreError::Database(format!("Unknown intent: {}", intent)))?;

    Ok(Execution {
        id: row.get("id"),
        request: SubscriptionRequest {
            identity: row.get("identity"),
            intent,
            callback_base: row.get("callback_base"),
        },
        state: parse_state(row.get("state"))?,
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        updated_at: row.get("updated_at"),
    })
}

fn parse_state(state: &str) -> Result<ExecutionState, StoreError> {
    ExecutionState::parse(state)
        .ok_or_else(|| StoreError::Database(format!("Unknown execution state: {}", state)))
}

fn db_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        other => StoreError::Database(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state("expired").unwrap(), ExecutionState::Expired);
        assert!(matches!(
            parse_state("running"),
            Err(StoreError::Database(_))
        ));
    }

    #[test]
    fn test_db_error_classification() {
        assert!(matches!(
            db_error(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            db_error(sqlx::Error::RowNotFound),
            StoreError::Database(_)
        ));
    }
}
