//! Store trait definitions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::workflow::{Execution, ExecutionEvent, ExecutionState, MembershipRecord, Transition};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Execution not found
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// Compare-and-set on the execution state failed
    #[error("concurrency conflict: expected state {expected}, found {actual}")]
    ConcurrencyConflict {
        expected: ExecutionState,
        actual: ExecutionState,
    },

    /// The state machine has no such edge
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition {
        from: ExecutionState,
        to: ExecutionState,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Registry entry for one issued resumption token
///
/// Only the SHA-256 digest of the token is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub token_hash: String,
    pub execution_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }
}

/// Durable store for executions, their history and their tokens
///
/// Suspended executions live here rather than in a running task, so a resume
/// may arrive in another process or after a restart. Implementations must be
/// thread-safe and make `transition` atomic per execution.
#[async_trait]
pub trait ExecutionStore: Send + Sync + 'static {
    // =========================================================================
    // Execution Operations
    // =========================================================================

    /// Persist a new execution and its `Created` event
    async fn create_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    /// Load an execution
    async fn get_execution(&self, execution_id: Uuid) -> Result<Execution, StoreError>;

    /// Move an execution from `transition.from` to `transition.to`
    ///
    /// Fails with [`StoreError::ConcurrencyConflict`] when the current state is
    /// not `transition.from`, and with [`StoreError::IllegalTransition`] when
    /// the state machine has no `from → to` edge. The transition event is
    /// appended atomically.
    async fn transition(
        &self,
        execution_id: Uuid,
        transition: Transition,
    ) -> Result<Execution, StoreError>;

    /// Append an event that does not change state
    async fn record_event(
        &self,
        execution_id: Uuid,
        event: ExecutionEvent,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Load the execution's history in order
    async fn load_events(&self, execution_id: Uuid)
        -> Result<Vec<(i32, ExecutionEvent)>, StoreError>;

    /// Suspended or committing executions whose deadline is strictly before `now`
    async fn list_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError>;

    /// Validating or suspended executions for an identity
    async fn find_live_for_identity(&self, identity: &str) -> Result<Vec<Execution>, StoreError>;

    // =========================================================================
    // Token Operations
    // =========================================================================

    /// Register an issued token
    async fn insert_token(&self, record: TokenRecord) -> Result<(), StoreError>;

    /// Look up a token by its digest
    async fn find_token(&self, token_hash: &str) -> Result<Option<TokenRecord>, StoreError>;

    /// Mark a token consumed. Idempotent; returns true if this call consumed it.
    async fn consume_token(&self, token_hash: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Consume every outstanding token bound to an execution
    async fn consume_tokens_for(
        &self,
        execution_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError>;
}

/// Reject a transition the state machine does not allow
pub(crate) fn ensure_allowed(transition: &Transition) -> Result<(), StoreError> {
    if transition.from.can_transition_to(transition.to) {
        Ok(())
    } else {
        Err(StoreError::IllegalTransition {
            from: transition.from,
            to: transition.to,
        })
    }
}

/// Key-value membership store, keyed by subscriber identity
///
/// Each call is atomic for its single key; read-after-write must hold for a
/// key. No cross-call transactions are assumed.
#[async_trait]
pub trait MembershipStore: Send + Sync + 'static {
    /// Fetch the record for an identity, `None` if not a member
    async fn get(&self, identity: &str) -> Result<Option<MembershipRecord>, StoreError>;

    /// Insert or replace a record
    async fn put(&self, record: MembershipRecord) -> Result<(), StoreError>;

    /// Remove a record; removing an absent identity is not an error
    async fn delete(&self, identity: &str) -> Result<(), StoreError>;
}
