//! User notifier — surface recovery decisions to the user
//!
//! The notifier owns rendering, localization, and display policy. The
//! coordinator hands it a `Notification` and never looks at the result
//! beyond logging a failure.

use crate::error::Result;
use crate::types::Notification;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Trait for user-facing notification sinks
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification
    ///
    /// Silent notifications are informational; implementations usually
    /// skip displaying them.
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Notifier that writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        if notification.silent {
            tracing::debug!(
                code = %notification.code,
                message = %notification.message,
                "Silent notification"
            );
        } else {
            tracing::warn!(
                code = %notification.code,
                message = %notification.message,
                "User notification"
            );
        }
        Ok(())
    }
}

/// In-memory notifier for development and testing
///
/// Keeps the most recent `max_notifications` entries.
pub struct MemoryNotifier {
    notifications: Arc<RwLock<Vec<Notification>>>,
    max_notifications: usize,
}

impl MemoryNotifier {
    pub fn new(max_notifications: usize) -> Self {
        Self {
            notifications: Arc::new(RwLock::new(Vec::new())),
            max_notifications,
        }
    }

    /// All retained notifications, oldest first
    pub async fn all(&self) -> Vec<Notification> {
        self.notifications.read().await.clone()
    }

    /// Retained notifications that were not silent
    pub async fn visible(&self) -> Vec<Notification> {
        self.notifications
            .read()
            .await
            .iter()
            .filter(|n| !n.silent)
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.notifications.read().await.len()
    }

    pub async fn clear(&self) {
        self.notifications.write().await.clear();
    }
}

impl Default for MemoryNotifier {
    fn default() -> Self {
        Self::new(1_000)
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        let mut notifications = self.notifications.write().await;
        notifications.push(notification);

        if self.max_notifications > 0 && notifications.len() > self.max_notifications {
            let drain_count = notifications.len() - self.max_notifications;
            notifications.drain(..drain_count);
        }

        Ok(())
    }
}

#[async_trait]
impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    async fn notify(&self, notification: Notification) -> Result<()> {
        (**self).notify(notification).await
    }
}
