//! Mapping from terminal outcomes to landing pages
//!
//! The front door picks where to send a subscriber after a confirmation link
//! is followed. Destinations are plain data supplied by the caller.

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::workflow::{Intent, TerminalOutcome};

/// Landing pages per outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectPolicy {
    /// Join committed
    pub subscribed: String,

    /// Leave committed
    pub unsubscribed: String,

    /// Nothing to change (request was discarded)
    pub noop: String,

    /// Confirmation window lapsed
    pub expired: String,

    /// Store unavailable; the link can be tried again
    pub retry_later: String,

    /// Unknown or already used link
    pub invalid_link: String,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self {
            subscribed: "/subscribed".to_string(),
            unsubscribed: "/unsubscribed".to_string(),
            noop: "/nothing-to-do".to_string(),
            expired: "/link-expired".to_string(),
            retry_later: "/try-again-later".to_string(),
            invalid_link: "/invalid-link".to_string(),
        }
    }
}

impl RedirectPolicy {
    pub fn destination(&self, outcome: TerminalOutcome, intent: Intent) -> &str {
        match (outcome, intent) {
            (TerminalOutcome::Completed, Intent::Join) => &self.subscribed,
            (TerminalOutcome::Completed, Intent::Leave) => &self.unsubscribed,
            (TerminalOutcome::Discarded, _) => &self.noop,
            (TerminalOutcome::Expired, _) => &self.expired,
        }
    }

    pub fn destination_for_error(&self, error: &EngineError) -> &str {
        if error.is_retryable() {
            &self.retry_later
        } else {
            &self.invalid_link
        }
    }
}
