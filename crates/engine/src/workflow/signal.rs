//! Resumption signals and terminal outcomes

use serde::{Deserialize, Serialize};

/// Signal delivered to a suspended execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeSignal {
    /// The subscriber completed the out-of-band step
    Confirmed,

    /// The deadline passed without a confirmation (sent by a scheduler)
    TimedOut,
}

/// Final outcome of an execution, as reported to the front door
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    /// The membership change was applied
    Completed,

    /// The request was inadmissible and dropped without notification
    Discarded,

    /// The confirmation window lapsed
    Expired,
}

impl std::fmt::Display for TerminalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Discarded => write!(f, "discarded"),
            Self::Expired => write!(f, "expired"),
        }
    }
}
