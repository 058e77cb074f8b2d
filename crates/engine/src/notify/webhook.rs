//! Mail-relay webhook notifier
//!
//! POSTs a JSON message to an HTTP mail relay, which does the actual email
//! delivery. Any 2xx response counts as delivered.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error, instrument};

use super::{Notification, Notifier, NotifyError};

/// Configuration for [`WebhookNotifier`]
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Relay endpoint receiving the JSON message
    pub endpoint: String,

    /// Sender address
    pub from_address: String,

    /// Optional bearer token for the relay
    pub auth_token: Option<String>,

    pub timeout: Duration,
}

impl WebhookConfig {
    pub fn new(endpoint: impl Into<String>, from_address: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            from_address: from_address.into(),
            auth_token: None,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: String,
}

/// Sends confirmation emails through an HTTP mail relay
pub struct WebhookNotifier {
    client: Client,
    config: WebhookConfig,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Result<Self, NotifyError> {
        url::Url::parse(&config.endpoint)
            .map_err(|e| NotifyError::Config(format!("invalid relay endpoint: {}", e)))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NotifyError::Config(e.to_string()))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip_all, fields(identity = %notification.identity, intent = %notification.intent))]
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let message = RelayMessage {
            from: &self.config.from_address,
            to: &notification.identity,
            subject: notification.subject(),
            text: notification.text_body(),
        };

        let mut request = self.client.post(&self.config.endpoint).json(&message);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, body = %body, "mail relay rejected message");
            return Err(NotifyError::Rejected(format!("HTTP {}: {}", status, body)));
        }

        debug!("confirmation message handed to relay");
        Ok(())
    }
}
