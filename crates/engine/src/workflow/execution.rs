//! Execution records and the subscription state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ExecutionEvent, SubscriptionRequest};

/// State of one execution
///
/// ```text
/// Created → Validating → Suspended → Committing → Completed
///                │            │
///                ▼            ▼
///            Discarded     Expired
/// ```
///
/// Only `Validating` and `Suspended` have externally observable duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Created,
    Validating,
    Suspended,
    Committing,
    Completed,
    Discarded,
    Expired,
}

impl ExecutionState {
    /// Completed, Discarded and Expired are final
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Discarded | Self::Expired)
    }

    /// Whether the state machine allows moving from `self` to `next`
    ///
    /// `Committing → Suspended` is the rollback taken when the membership
    /// write fails, so the same token can be retried.
    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (Created, Validating)
                | (Validating, Suspended)
                | (Validating, Discarded)
                | (Suspended, Committing)
                | (Suspended, Expired)
                | (Committing, Completed)
                | (Committing, Suspended)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Validating => "validating",
            Self::Suspended => "suspended",
            Self::Committing => "committing",
            Self::Completed => "completed",
            Self::Discarded => "discarded",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "validating" => Some(Self::Validating),
            "suspended" => Some(Self::Suspended),
            "committing" => Some(Self::Committing),
            "completed" => Some(Self::Completed),
            "discarded" => Some(Self::Discarded),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One workflow instance processing a single [`SubscriptionRequest`]
///
/// The resumption token is not part of the record: the registry keeps only
/// its hash, bound to `id`, for as long as the execution is suspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub request: SubscriptionRequest,
    pub state: ExecutionState,
    pub created_at: DateTime<Utc>,

    /// Confirmation deadline, set when the execution suspends
    pub expires_at: Option<DateTime<Utc>>,

    pub updated_at: DateTime<Utc>,
}

impl Execution {
    /// Create a fresh execution in the `Created` state
    pub fn new(request: SubscriptionRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            request,
            state: ExecutionState::Created,
            created_at: now,
            expires_at: None,
            updated_at: now,
        }
    }

    /// Pure expiry predicate: true iff a deadline is set and `now` is past it
    ///
    /// The instant `now == expires_at` still counts as in time.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| now > deadline)
    }

    /// Apply a transition to the in-memory copy (stores call this after the
    /// compare-and-set on `from` succeeded)
    pub fn apply(&mut self, transition: &Transition) {
        self.state = transition.to;
        if let Some(expires_at) = transition.expires_at {
            self.expires_at = Some(expires_at);
        }
        self.updated_at = transition.at;
    }
}

/// A compare-and-set state change, persisted together with its event
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// State the execution must currently be in
    pub from: ExecutionState,

    /// State to move to
    pub to: ExecutionState,

    /// Deadline to record (only when suspending)
    pub expires_at: Option<DateTime<Utc>>,

    /// History entry appended atomically with the state change
    pub event: ExecutionEvent,

    pub at: DateTime<Utc>,
}

impl Transition {
    pub fn new(
        from: ExecutionState,
        to: ExecutionState,
        event: ExecutionEvent,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            from,
            to,
            expires_at: None,
            event,
            at,
        }
    }

    pub fn with_deadline(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn execution() -> Execution {
        Execution::new(
            SubscriptionRequest::join("a@x.com", "https://example.com/confirm"),
            Utc::now(),
        )
    }

    #[test]
    fn test_new_execution_is_created() {
        let execution = execution();
        assert_eq!(execution.state, ExecutionState::Created);
        assert!(execution.expires_at.is_none());
    }

    #[test]
    fn test_is_expired_boundary() {
        let mut execution = execution();
        let deadline = execution.created_at + Duration::days(1);
        assert!(!execution.is_expired(deadline + Duration::days(5)));

        execution.expires_at = Some(deadline);
        assert!(!execution.is_expired(deadline - Duration::seconds(1)));
        assert!(!execution.is_expired(deadline));
        assert!(execution.is_expired(deadline + Duration::milliseconds(1)));
    }

    #[test]
    fn test_transition_table() {
        use ExecutionState::*;

        assert!(Created.can_transition_to(Validating));
        assert!(Validating.can_transition_to(Discarded));
        assert!(Suspended.can_transition_to(Expired));
        assert!(Committing.can_transition_to(Suspended));

        assert!(!Created.can_transition_to(Suspended));
        assert!(!Suspended.can_transition_to(Completed));
        assert!(!Expired.can_transition_to(Committing));
        assert!(!Completed.can_transition_to(Suspended));
    }

    #[test]
    fn test_terminal_states() {
        use ExecutionState::*;

        for state in [Completed, Discarded, Expired] {
            assert!(state.is_terminal());
        }
        for state in [Created, Validating, Suspended, Committing] {
            assert!(!state.is_terminal());
        }
    }

    #[test]
    fn test_state_parse_roundtrip_names() {
        assert_eq!(ExecutionState::parse("suspended"), Some(ExecutionState::Suspended));
        assert_eq!(ExecutionState::parse("running"), None);
    }

    #[test]
    fn test_apply_sets_deadline() {
        let mut execution = execution();
        let at = execution.created_at;
        let deadline = at + Duration::hours(24);

        execution.apply(
            &Transition::new(
                ExecutionState::Validating,
                ExecutionState::Suspended,
                ExecutionEvent::Suspended {
                    expires_at: deadline,
                },
                at,
            )
            .with_deadline(deadline),
        );

        assert_eq!(execution.state, ExecutionState::Suspended);
        assert_eq!(execution.expires_at, Some(deadline));
    }
}
