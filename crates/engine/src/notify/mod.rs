//! Confirmation notifications
//!
//! The engine hands every suspended execution's confirmation link to a
//! [`Notifier`]. Delivery is fire-and-forget from the engine's point of view:
//! a failure is recorded and logged but the execution stays suspended and
//! will simply expire if nobody confirms.

mod memory;
mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::token::hash_token;
use crate::workflow::Intent;

pub use memory::{InMemoryNotifier, LogNotifier};
pub use webhook::{WebhookConfig, WebhookNotifier};

/// Error type for notification delivery
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Could not reach the delivery endpoint
    #[error("notification transport error: {0}")]
    Transport(String),

    /// Delivery endpoint refused the message
    #[error("notification rejected: {0}")]
    Rejected(String),

    /// Notifier misconfigured
    #[error("notifier configuration error: {0}")]
    Config(String),
}

/// A confirmation request addressed to one subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub identity: String,
    pub intent: Intent,

    /// Link embedding the resumption token
    pub confirmation_url: String,
}

impl Notification {
    /// Subject line for the confirmation message
    pub fn subject(&self) -> &'static str {
        match self.intent {
            Intent::Join => "Welcome to our fancy newsletter",
            Intent::Leave => "We are sorry to see you go :(",
        }
    }

    /// Plain-text body for the confirmation message
    pub fn text_body(&self) -> String {
        format!("Please click on the link: {}", self.confirmation_url)
    }

    /// The confirmation link with its token replaced by a digest prefix, for logs
    pub fn redacted_url(&self) -> String {
        let Ok(mut url) = url::Url::parse(&self.confirmation_url) else {
            return "<unparseable confirmation url>".to_string();
        };

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| {
                let value = if key == "token" {
                    format!("{}...", &hash_token(&value)[..8])
                } else {
                    value.into_owned()
                };
                (key.into_owned(), value)
            })
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);
        url.into()
    }
}

/// Delivers confirmation links to subscribers
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}
