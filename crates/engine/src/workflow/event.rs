//! Execution events for persistence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SubscriptionRequest;

/// How an expiry was detected
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryCause {
    /// A `TimedOut` signal was supplied to resume
    TimedOutSignal,

    /// A confirmation arrived after the deadline
    LateConfirmation,

    /// The overdue sweep found the execution past its deadline
    Sweep,
}

/// Events stored in an execution's history
///
/// The history is append-only and written in the same store operation as the
/// state change it describes. It exists for auditing and debugging; the
/// current state lives on the execution record itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// Execution was created with the given request
    Created { request: SubscriptionRequest },

    /// Membership lookup started
    ValidationStarted,

    /// Request was inconsistent with current membership
    Discarded { is_member: bool },

    /// Token issued and execution parked until the deadline
    Suspended { expires_at: DateTime<Utc> },

    /// Confirmation link handed to the notifier
    NotificationSent,

    /// Notifier reported a failure; the execution stays suspended
    NotificationFailed { error: String },

    /// Confirmation accepted, membership write in progress
    CommitStarted,

    /// Membership write failed and the execution went back to suspended
    CommitRolledBack { error: String },

    /// Membership write applied
    Completed,

    /// Deadline lapsed before a confirmation was applied
    Expired { cause: ExpiryCause },
}

impl ExecutionEvent {
    /// Stable name used as the event type column
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::ValidationStarted => "validation_started",
            Self::Discarded { .. } => "discarded",
            Self::Suspended { .. } => "suspended",
            Self::NotificationSent => "notification_sent",
            Self::NotificationFailed { .. } => "notification_failed",
            Self::CommitStarted => "commit_started",
            Self::CommitRolledBack { .. } => "commit_rolled_back",
            Self::Completed => "completed",
            Self::Expired { .. } => "expired",
        }
    }
}
