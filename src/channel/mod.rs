//! Transport channel trait — the duplex connection recovery rides on
//!
//! The real STOMP/WebSocket client lives outside this crate. The
//! coordinator only needs a liveness flag plus two actions: replay the last
//! room request, and tear down and re-establish the whole connection.

use crate::error::Result;
use crate::types::RoomRequest;
use async_trait::async_trait;

pub mod memory;

pub use memory::MemoryChannel;

/// Duplex messaging channel used by recovery
///
/// Implementations must be cheap to poll: `is_connected` is checked right
/// before every scheduled retry fires.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Whether the connection is currently live
    fn is_connected(&self) -> bool;

    /// Replay a subscribe/request description for a room
    async fn resend(&self, request: &RoomRequest) -> Result<()>;

    /// Tear down and re-establish the whole connection
    async fn reconnect(&self) -> Result<()>;

    /// Channel name (e.g., "stomp", "memory")
    fn name(&self) -> &str;
}
