//! Notifiers that never leave the process

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use super::{Notification, Notifier, NotifyError};

/// Logs the notification instead of sending it (local development)
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            identity = %notification.identity,
            intent = %notification.intent,
            subject = notification.subject(),
            url = %notification.redacted_url(),
            "confirmation notification (not delivered)"
        );
        Ok(())
    }
}

/// Records notifications for inspection; can be told to fail
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent deliveries fail with [`NotifyError::Transport`]
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything delivered so far
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn last(&self) -> Option<Notification> {
        self.sent.lock().last().cloned()
    }

    /// Token carried by the most recent notification's link
    pub fn last_token(&self) -> Option<String> {
        let notification = self.last()?;
        let url = url::Url::parse(&notification.confirmation_url).ok()?;
        url.query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Transport("mail relay unreachable".to_string()));
        }
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}
