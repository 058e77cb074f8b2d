//! Subscription engine
//!
//! The `SubscriptionEngine` is responsible for:
//! - Starting executions and checking admissibility against membership
//! - Suspending admissible executions behind a resumption token
//! - Resuming them on confirmation, committing the membership change once
//! - Expiring them lazily at resolution time, or through the overdue sweep
//!
//! Every step is a synchronous compare-and-set over the stored execution, so
//! nothing is held in memory between `start` and `resume`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::notify::{Notification, Notifier};
use crate::persistence::{ExecutionStore, MembershipStore, StoreError};
use crate::token::{ResumptionToken, TokenRegistry, TokenResolution};
use crate::workflow::{
    Execution, ExecutionEvent, ExecutionState, ExpiryCause, Intent, MembershipRecord,
    ResumeSignal, SubscriptionRequest, TerminalOutcome, Transition,
};

/// Configuration for the subscription engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a confirmation link stays valid
    pub confirmation_window: Duration,

    /// Maximum executions expired per sweep
    pub sweep_batch_size: usize,

    /// Treat a request as inadmissible while another execution for the same
    /// identity is validating or suspended. Off by default: concurrent
    /// requests are both admitted and the last commit wins.
    pub reject_concurrent_requests: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confirmation_window: Duration::hours(24),
            sweep_batch_size: 100,
            reject_concurrent_requests: false,
        }
    }
}

/// Errors from engine operations
///
/// Admissibility and expiry are ordinary outcomes, not errors. Only
/// infrastructure failures and misuse surface here.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Token unknown, already consumed, or its execution is not suspended
    #[error("invalid token state")]
    InvalidTokenState,

    /// A store call failed; the execution stays in its current state
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// Execution not found
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// Operation not allowed in the execution's current state
    #[error("execution {execution_id} is {actual}, expected {expected}")]
    InvalidState {
        execution_id: Uuid,
        expected: ExecutionState,
        actual: ExecutionState,
    },

    /// Request rejected before an execution was created
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Engine misconfiguration or a broken state machine invariant
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the caller may retry the same step later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ExecutionNotFound(id) => Self::ExecutionNotFound(id),
            e @ StoreError::IllegalTransition { .. } => Self::Internal(e.to_string()),
            other => Self::StoreUnavailable(other),
        }
    }
}

/// A lost compare-and-set means another caller got there first
fn conflict_as_invalid_token(e: StoreError) -> EngineError {
    match e {
        StoreError::ConcurrencyConflict { .. } => EngineError::InvalidTokenState,
        other => other.into(),
    }
}

/// What happened to the confirmation notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotificationStatus {
    /// Request was inadmissible, nothing was sent
    Skipped,

    /// Handed to the notifier
    Sent,

    /// Notifier failed; the execution will expire unless retried out of band
    Failed { error: String },
}

/// Result of `start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHandle {
    pub execution_id: Uuid,
    pub admissible: bool,
    pub state: ExecutionState,
    pub expires_at: Option<DateTime<Utc>>,
    pub notification: NotificationStatus,
}

impl ExecutionHandle {
    fn new(execution: &Execution, notification: NotificationStatus) -> Self {
        Self {
            execution_id: execution.id,
            admissible: execution.state != ExecutionState::Discarded,
            state: execution.state,
            expires_at: execution.expires_at,
            notification,
        }
    }

    /// Terminal outcome, if `start` already finished the execution
    pub fn outcome(&self) -> Option<TerminalOutcome> {
        (self.state == ExecutionState::Discarded).then_some(TerminalOutcome::Discarded)
    }
}

/// Result of `resume` or of an expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalResult {
    pub execution_id: Uuid,
    pub outcome: TerminalOutcome,
    pub intent: Intent,
}

/// Build the confirmation link: `callback_base` with `token=<token>` appended
pub fn confirmation_url(
    callback_base: &str,
    token: &ResumptionToken,
) -> Result<String, url::ParseError> {
    let mut url = url::Url::parse(callback_base)?;
    url.query_pairs_mut().append_pair("token", token.as_str());
    Ok(url.into())
}

fn validate_request(request: &SubscriptionRequest) -> Result<(), EngineError> {
    if request.identity.trim().is_empty() {
        return Err(EngineError::InvalidRequest(
            "identity must not be empty".to_string(),
        ));
    }

    let base = url::Url::parse(&request.callback_base).map_err(|e| {
        EngineError::InvalidRequest(format!("invalid callback base: {}", e))
    })?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(EngineError::InvalidRequest(format!(
            "callback base must be http(s), got {}",
            base.scheme()
        )));
    }

    Ok(())
}

/// Confirmation-gated subscription workflow engine
///
/// Collaborators are injected as capability objects so tests can swap in
/// in-memory fakes and a manual clock.
///
/// # Example
///
/// ```ignore
/// use newsletter_engine::prelude::*;
///
/// let engine = SubscriptionEngine::new(
///     Arc::new(InMemoryExecutionStore::new()),
///     Arc::new(InMemoryMembershipStore::new()),
///     Arc::new(LogNotifier),
/// );
///
/// let handle = engine
///     .start(SubscriptionRequest::join("a@x.com", "https://example.com/confirm"))
///     .await?;
///
/// // Later, from the confirmation link
/// let result = engine.resume(&token, ResumeSignal::Confirmed).await?;
/// ```
pub struct SubscriptionEngine {
    store: Arc<dyn ExecutionStore>,
    tokens: TokenRegistry,
    members: Arc<dyn MembershipStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl SubscriptionEngine {
    /// Create an engine with the default config and the system clock
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        members: Arc<dyn MembershipStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            tokens: TokenRegistry::new(store.clone()),
            store,
            members,
            notifier,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    /// Expiry predicate for an execution, sampled against the engine clock
    pub fn is_expired(&self, execution: &Execution) -> bool {
        execution.is_expired(self.clock.now())
    }

    /// Start an execution for `request`
    ///
    /// Inadmissible requests end `Discarded` immediately without a token or a
    /// notification. Admissible ones end `Suspended` with a token handed to
    /// the notifier. A failed notification does not undo the suspension.
    #[instrument(skip(self, request), fields(identity = %request.identity, intent = %request.intent))]
    pub async fn start(&self, request: SubscriptionRequest) -> Result<ExecutionHandle, EngineError> {
        validate_request(&request)?;

        let now = self.clock.now();
        let execution = Execution::new(request, now);
        self.store.create_execution(&execution).await?;

        info!(execution_id = %execution.id, "created subscription execution");

        let execution = self
            .store
            .transition(
                execution.id,
                Transition::new(
                    ExecutionState::Created,
                    ExecutionState::Validating,
                    ExecutionEvent::ValidationStarted,
                    now,
                ),
            )
            .await?;

        self.validate_and_suspend(execution).await
    }

    /// Re-run validation for an execution left in `Validating` by a store failure
    #[instrument(skip(self))]
    pub async fn retry_validation(&self, execution_id: Uuid) -> Result<ExecutionHandle, EngineError> {
        let execution = self.store.get_execution(execution_id).await?;
        if execution.state != ExecutionState::Validating {
            return Err(EngineError::InvalidState {
                execution_id,
                expected: ExecutionState::Validating,
                actual: execution.state,
            });
        }

        self.validate_and_suspend(execution).await
    }

    async fn validate_and_suspend(&self, execution: Execution) -> Result<ExecutionHandle, EngineError> {
        let execution_id = execution.id;
        let request = &execution.request;

        let is_member = self
            .members
            .get(&request.identity)
            .await
            .map_err(|e| {
                error!(%execution_id, error = %e, "membership lookup failed");
                EngineError::StoreUnavailable(e)
            })?
            .is_some();

        let mut admissible = request.intent.is_admissible(is_member);

        if admissible && self.config.reject_concurrent_requests {
            let live = self.store.find_live_for_identity(&request.identity).await?;
            if live.iter().any(|other| other.id != execution_id) {
                info!(%execution_id, "another request for this identity is in flight");
                admissible = false;
            }
        }

        let now = self.clock.now();

        if !admissible {
            let execution = self
                .store
                .transition(
                    execution_id,
                    Transition::new(
                        ExecutionState::Validating,
                        ExecutionState::Discarded,
                        ExecutionEvent::Discarded { is_member },
                        now,
                    ),
                )
                .await?;

            info!(%execution_id, is_member, "request inadmissible, discarded");
            return Ok(ExecutionHandle::new(&execution, NotificationStatus::Skipped));
        }

        let expires_at = now
            .checked_add_signed(self.config.confirmation_window)
            .ok_or_else(|| {
                error!(%execution_id, window = %self.config.confirmation_window, "confirmation deadline out of range");
                EngineError::Internal("confirmation window out of range".to_string())
            })?;
        let token = self.tokens.issue(execution_id, expires_at, now).await?;

        let suspended = match confirmation_url(&request.callback_base, &token) {
            Ok(url) => self
                .store
                .transition(
                    execution_id,
                    Transition::new(
                        ExecutionState::Validating,
                        ExecutionState::Suspended,
                        ExecutionEvent::Suspended { expires_at },
                        now,
                    )
                    .with_deadline(expires_at),
                )
                .await
                .map(|execution| (execution, url))
                .map_err(EngineError::from),
            Err(e) => Err(EngineError::InvalidRequest(format!(
                "invalid callback base: {}",
                e
            ))),
        };

        // A retry issues a fresh token, so the undelivered one must not stay live
        let (execution, confirmation_url) = match suspended {
            Ok(suspended) => suspended,
            Err(e) => {
                if let Err(invalidate_error) = self.tokens.invalidate(token.as_str(), now).await {
                    warn!(%execution_id, error = %invalidate_error, "failed to invalidate undelivered token");
                }
                return Err(e);
            }
        };

        info!(%execution_id, %expires_at, "execution suspended awaiting confirmation");

        let notification = Notification {
            identity: execution.request.identity.clone(),
            intent: execution.request.intent,
            confirmation_url,
        };

        let status = match self.notifier.notify(&notification).await {
            Ok(()) => {
                self.record(execution_id, ExecutionEvent::NotificationSent, now)
                    .await;
                NotificationStatus::Sent
            }
            Err(e) => {
                warn!(%execution_id, error = %e, "notification failed, execution stays suspended");
                let error = e.to_string();
                self.record(
                    execution_id,
                    ExecutionEvent::NotificationFailed {
                        error: error.clone(),
                    },
                    now,
                )
                .await;
                NotificationStatus::Failed { error }
            }
        };

        Ok(ExecutionHandle::new(&execution, status))
    }

    /// Resume the execution bound to `token`
    ///
    /// Expiry is judged against the clock sampled once at the start of this
    /// call: a confirmation resolved after the deadline yields `Expired`, never
    /// `Completed`. The confirmation itself is trusted, so membership is not
    /// re-checked before the write.
    ///
    /// An execution left in `Committing` by a failed store call was already
    /// confirmed in time; resuming it with its still unconsumed token finishes
    /// the commit whatever the signal or the clock say.
    #[instrument(skip(self, token))]
    pub async fn resume(&self, token: &str, signal: ResumeSignal) -> Result<TerminalResult, EngineError> {
        let now = self.clock.now();

        let resolution = self.tokens.resolve(token, now).await?;
        let Some(execution_id) = resolution.execution_id() else {
            warn!("unknown resumption token");
            return Err(EngineError::InvalidTokenState);
        };
        if let TokenResolution::Consumed { .. } = resolution {
            warn!(%execution_id, "resumption token already consumed");
            return Err(EngineError::InvalidTokenState);
        }

        let execution = self.store.get_execution(execution_id).await?;
        match execution.state {
            ExecutionState::Suspended => {}
            ExecutionState::Committing => {
                info!(%execution_id, "finishing interrupted commit");
                return self.finish_commit(&execution, false, now).await;
            }
            state if state.is_terminal() => {
                warn!(%execution_id, %state, "execution already finished");
                return Err(EngineError::InvalidTokenState);
            }
            state => {
                warn!(%execution_id, %state, "token does not match a suspended execution");
                return Err(EngineError::InvalidTokenState);
            }
        }

        let lapsed = !resolution.is_valid() || execution.is_expired(now);
        match signal {
            ResumeSignal::TimedOut => self.expire(&execution, ExpiryCause::TimedOutSignal, now).await,
            ResumeSignal::Confirmed if lapsed => {
                self.expire(&execution, ExpiryCause::LateConfirmation, now)
                    .await
            }
            ResumeSignal::Confirmed => self.commit(&execution, now).await,
        }
    }

    /// Expire every suspended execution whose deadline has passed
    ///
    /// Meant to be driven by a scheduler outside the engine. Executions
    /// resumed concurrently are skipped. Executions stuck in `Committing`
    /// past their deadline have their commit finished instead, and show up
    /// as `Completed`; one that still fails is left for the next sweep.
    #[instrument(skip(self))]
    pub async fn expire_overdue(&self) -> Result<Vec<TerminalResult>, EngineError> {
        let now = self.clock.now();
        let overdue = self
            .store
            .list_overdue(now, self.config.sweep_batch_size)
            .await?;

        let mut finished = Vec::with_capacity(overdue.len());
        for execution in &overdue {
            let result = if execution.state == ExecutionState::Committing {
                self.finish_commit(execution, false, now).await
            } else {
                self.expire(execution, ExpiryCause::Sweep, now).await
            };

            match result {
                Ok(result) => finished.push(result),
                Err(EngineError::InvalidTokenState) => {
                    debug!(execution_id = %execution.id, "execution moved on concurrently, skipping");
                }
                Err(e) if execution.state == ExecutionState::Committing && e.is_retryable() => {
                    warn!(execution_id = %execution.id, error = %e, "stalled commit still failing");
                }
                Err(e) => return Err(e),
            }
        }

        if !finished.is_empty() {
            info!(count = finished.len(), "finished overdue executions");
        }
        Ok(finished)
    }

    /// Get the current execution record
    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        Ok(self.store.get_execution(execution_id).await?)
    }

    /// Get the execution's event history
    pub async fn history(&self, execution_id: Uuid) -> Result<Vec<(i32, ExecutionEvent)>, EngineError> {
        Ok(self.store.load_events(execution_id).await?)
    }

    async fn expire(
        &self,
        execution: &Execution,
        cause: ExpiryCause,
        now: DateTime<Utc>,
    ) -> Result<TerminalResult, EngineError> {
        let execution_id = execution.id;

        self.store
            .transition(
                execution_id,
                Transition::new(
                    ExecutionState::Suspended,
                    ExecutionState::Expired,
                    ExecutionEvent::Expired { cause },
                    now,
                ),
            )
            .await
            .map_err(conflict_as_invalid_token)?;

        // The state check already blocks reuse; consuming the token is cleanup.
        if let Err(e) = self.tokens.invalidate_all(execution_id, now).await {
            warn!(%execution_id, error = %e, "failed to invalidate tokens of expired execution");
        }

        info!(%execution_id, ?cause, "execution expired");
        Ok(TerminalResult {
            execution_id,
            outcome: TerminalOutcome::Expired,
            intent: execution.request.intent,
        })
    }

    async fn commit(&self, execution: &Execution, now: DateTime<Utc>) -> Result<TerminalResult, EngineError> {
        self.store
            .transition(
                execution.id,
                Transition::new(
                    ExecutionState::Suspended,
                    ExecutionState::Committing,
                    ExecutionEvent::CommitStarted,
                    now,
                ),
            )
            .await
            .map_err(conflict_as_invalid_token)?;

        self.finish_commit(execution, true, now).await
    }

    /// Apply the membership write of a `Committing` execution and complete it
    ///
    /// The write is an upsert or a delete, so repeating it after an
    /// interrupted attempt is harmless. Of several callers finishing the same
    /// commit, only the one that wins `Committing → Completed` succeeds.
    ///
    /// A failed write on a fresh commit rolls back to `Suspended`; a commit
    /// being finished late stays in `Committing` so it is never expired.
    async fn finish_commit(
        &self,
        execution: &Execution,
        roll_back: bool,
        now: DateTime<Utc>,
    ) -> Result<TerminalResult, EngineError> {
        let execution_id = execution.id;
        let request = &execution.request;

        let write = match request.intent {
            Intent::Join => {
                self.members
                    .put(MembershipRecord::new(&request.identity, now))
                    .await
            }
            Intent::Leave => self.members.delete(&request.identity).await,
        };

        if let Err(e) = write {
            if !roll_back {
                error!(%execution_id, error = %e, "membership write failed, commit stays resumable");
                return Err(EngineError::StoreUnavailable(e));
            }

            error!(%execution_id, error = %e, "membership write failed, rolling back to suspended");
            let rollback = Transition::new(
                ExecutionState::Committing,
                ExecutionState::Suspended,
                ExecutionEvent::CommitRolledBack {
                    error: e.to_string(),
                },
                now,
            );
            if let Err(rollback_error) = self.store.transition(execution_id, rollback).await {
                error!(%execution_id, error = %rollback_error, "failed to roll back commit");
            }
            return Err(EngineError::StoreUnavailable(e));
        }

        self.store
            .transition(
                execution_id,
                Transition::new(
                    ExecutionState::Committing,
                    ExecutionState::Completed,
                    ExecutionEvent::Completed,
                    now,
                ),
            )
            .await
            .map_err(|e| {
                if !matches!(e, StoreError::ConcurrencyConflict { .. }) {
                    error!(%execution_id, error = %e, "membership written but completion failed, commit stays resumable");
                }
                conflict_as_invalid_token(e)
            })?;

        if let Err(e) = self.tokens.invalidate_all(execution_id, now).await {
            warn!(%execution_id, error = %e, "failed to invalidate consumed token");
        }

        info!(%execution_id, intent = %request.intent, "subscription change committed");
        Ok(TerminalResult {
            execution_id,
            outcome: TerminalOutcome::Completed,
            intent: request.intent,
        })
    }

    /// Append a non-transition event; history is best-effort
    async fn record(&self, execution_id: Uuid, event: ExecutionEvent, at: DateTime<Utc>) {
        if let Err(e) = self.store.record_event(execution_id, event, at).await {
            warn!(%execution_id, error = %e, "failed to record execution event");
        }
    }
}
