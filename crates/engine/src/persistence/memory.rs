//! In-memory store implementations for testing and local development

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;
use crate::workflow::{Execution, ExecutionEvent, ExecutionState, MembershipRecord, Transition};

/// Internal execution state
struct ExecutionEntry {
    execution: Execution,
    events: Vec<ExecutionEvent>,
}

/// In-memory implementation of ExecutionStore
///
/// Provides the same compare-and-set semantics as the PostgreSQL store. Data
/// is lost when the process exits.
///
/// # Example
///
/// ```
/// use newsletter_engine::persistence::InMemoryExecutionStore;
///
/// let store = InMemoryExecutionStore::new();
/// assert_eq!(store.execution_count(), 0);
/// ```
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<Uuid, ExecutionEntry>>,
    tokens: RwLock<HashMap<String, TokenRecord>>,
}

impl InMemoryExecutionStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Get the number of executions
    pub fn execution_count(&self) -> usize {
        self.executions.read().len()
    }

    /// Get the number of issued tokens, consumed or not
    pub fn token_count(&self) -> usize {
        self.tokens.read().len()
    }

    /// Get the number of tokens not yet consumed
    pub fn live_token_count(&self) -> usize {
        self.tokens
            .read()
            .values()
            .filter(|record| !record.is_consumed())
            .count()
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut executions = self.executions.write();
        executions.insert(
            execution.id,
            ExecutionEntry {
                execution: execution.clone(),
                events: vec![ExecutionEvent::Created {
                    request: execution.request.clone(),
                }],
            },
        );
        Ok(())
    }

    async fn get_execution(&self, execution_id: Uuid) -> Result<Execution, StoreError> {
        let executions = self.executions.read();
        executions
            .get(&execution_id)
            .map(|e| e.execution.clone())
            .ok_or(StoreError::ExecutionNotFound(execution_id))
    }

    async fn transition(
        &self,
        execution_id: Uuid,
        transition: Transition,
    ) -> Result<Execution, StoreError> {
        ensure_allowed(&transition)?;

        let mut executions = self.executions.write();
        let entry = executions
            .get_mut(&execution_id)
            .ok_or(StoreError::ExecutionNotFound(execution_id))?;

        if entry.execution.state != transition.from {
            return Err(StoreError::ConcurrencyConflict {
                expected: transition.from,
                actual: entry.execution.state,
            });
        }

        entry.execution.apply(&transition);
        entry.events.push(transition.event);
        Ok(entry.execution.clone())
    }

    async fn record_event(
        &self,
        execution_id: Uuid,
        event: ExecutionEvent,
        _at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut executions = self.executions.write();
        let entry = executions
            .get_mut(&execution_id)
            .ok_or(StoreError::ExecutionNotFound(execution_id))?;

        entry.events.push(event);
        Ok(())
    }

    async fn load_events(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<(i32, ExecutionEvent)>, StoreError> {
        let executions = self.executions.read();
        let entry = executions
            .get(&execution_id)
            .ok_or(StoreError::ExecutionNotFound(execution_id))?;

        Ok(entry
            .events
            .iter()
            .enumerate()
            .map(|(i, e)| (i as i32, e.clone()))
            .collect())
    }

    async fn list_overdue(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError> {
        let executions = self.executions.read();
        let mut overdue: Vec<_> = executions
            .values()
            .map(|e| &e.execution)
            .filter(|e| {
                matches!(
                    e.state,
                    ExecutionState::Suspended | ExecutionState::Committing
                ) && e.is_expired(now)
            })
            .cloned()
            .collect();

        overdue.sort_by_key(|e| e.expires_at);
        overdue.truncate(limit);
        Ok(overdue)
    }

    async fn find_live_for_identity(&self, identity: &str) -> Result<Vec<Execution>, StoreError> {
        let executions = self.executions.read();
        Ok(executions
            .values()
            .map(|e| &e.execution)
            .filter(|e| {
                e.request.identity == identity
                    && matches!(
                        e.state,
                        ExecutionState::Validating | ExecutionState::Suspended
                    )
            })
            .cloned()
            .collect())
    }

    async fn insert_token(&self, record: TokenRecord) -> Result<(), StoreError> {
        self.tokens.write().insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn find_token(&self, token_hash: &str) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.tokens.read().get(token_hash).cloned())
    }

    async fn consume_token(&self, token_hash: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tokens = self.tokens.write();
        match tokens.get_mut(token_hash) {
            Some(record) if record.consumed_at.is_none() => {
                record.consumed_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn consume_tokens_for(
        &self,
        execution_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut tokens = self.tokens.write();
        let mut consumed = 0;
        for record in tokens.values_mut() {
            if record.execution_id == execution_id && record.consumed_at.is_none() {
                record.consumed_at = Some(at);
                consumed += 1;
            }
        }
        Ok(consumed)
    }
}

/// In-memory implementation of MembershipStore
///
/// Can be switched into an unavailable mode to exercise the engine's
/// `StoreUnavailable` path.
pub struct InMemoryMembershipStore {
    members: RwLock<HashMap<String, MembershipRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryMembershipStore {
    pub fn new() -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Seed the store with existing members
    pub fn with_members(records: impl IntoIterator<Item = MembershipRecord>) -> Self {
        let store = Self::new();
        {
            let mut members = store.members.write();
            for record in records {
                members.insert(record.identity.clone(), record);
            }
        }
        store
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn member_count(&self) -> usize {
        self.members.read().len()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.members.read().contains_key(identity)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "membership store is offline".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InMemoryMembershipStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MembershipStore for InMemoryMembershipStore {
    async fn get(&self, identity: &str) -> Result<Option<MembershipRecord>, StoreError> {
        self.check_available()?;
        Ok(self.members.read().get(identity).cloned())
    }

    async fn put(&self, record: MembershipRecord) -> Result<(), StoreError> {
        self.check_available()?;
        self.members.write().insert(record.identity.clone(), record);
        Ok(())
    }

    async fn delete(&self, identity: &str) -> Result<(), StoreError> {
        self.check_available()?;
        self.members.write().remove(identity);
        Ok(())
    }
}
