//! In-memory channel for testing and single-process use
//!
//! Records every resend and reconnect, and can be told to drop the
//! connection or fail upcoming calls.

use super::Channel;
use crate::error::{RecoveryError, Result};
use crate::types::RoomRequest;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory `Channel` implementation
///
/// Clones share state, so a test can keep one handle while the
/// coordinator owns another.
#[derive(Clone)]
pub struct MemoryChannel {
    connected: Arc<AtomicBool>,
    resent: Arc<RwLock<Vec<RoomRequest>>>,
    reconnects: Arc<AtomicUsize>,
    failing_resends: Arc<AtomicUsize>,
    failing_reconnects: Arc<AtomicUsize>,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::connected()
    }
}

impl MemoryChannel {
    /// A channel that starts connected
    pub fn connected() -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(true)),
            resent: Arc::new(RwLock::new(Vec::new())),
            reconnects: Arc::new(AtomicUsize::new(0)),
            failing_resends: Arc::new(AtomicUsize::new(0)),
            failing_reconnects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A channel that starts disconnected
    pub fn disconnected() -> Self {
        let channel = Self::connected();
        channel.set_connected(false);
        channel
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make the next `n` resends fail
    pub fn fail_next_resends(&self, n: usize) {
        self.failing_resends.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` reconnects fail
    pub fn fail_next_reconnects(&self, n: usize) {
        self.failing_reconnects.store(n, Ordering::SeqCst);
    }

    /// Requests replayed so far, oldest first
    pub async fn resent(&self) -> Vec<RoomRequest> {
        self.resent.read().await.clone()
    }

    pub async fn resend_count(&self) -> usize {
        self.resent.read().await.len()
    }

    /// Reconnects attempted so far, including failed ones
    pub fn reconnect_count(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn resend(&self, request: &RoomRequest) -> Result<()> {
        if !self.is_connected() {
            return Err(RecoveryError::Disconnected);
        }
        if Self::take_failure(&self.failing_resends) {
            return Err(RecoveryError::Channel(format!(
                "resend of {} rejected",
                request.room_key()
            )));
        }

        self.resent.write().await.push(request.clone());
        tracing::debug!(room = %request.room_key(), "Request replayed");
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.set_connected(false);

        if Self::take_failure(&self.failing_reconnects) {
            return Err(RecoveryError::Channel("reconnect refused".to_string()));
        }

        self.set_connected(true);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
