//! Transport trait for raw frame movement

use crate::Result;
use crate::codec::RawFrame;

/// Moves raw frames to and from one hardware unit.
///
/// A transport is owned by exactly one device session. The session's dispatch
/// loop calls [`recv`](Transport::recv) while callers send concurrently, so
/// implementations use interior mutability and take `&self`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Acquire the unit.
    ///
    /// Fails with a connection error if the unit is unreachable or already
    /// owned by another session.
    async fn open(&self) -> Result<()>;

    /// Queue one frame for the unit.
    async fn send(&self, frame: RawFrame) -> Result<()>;

    /// Wait for the next inbound frame.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` - frame received
    /// - `Ok(None)` - transport closed (normal termination)
    /// - `Err(e)` - transient receive failure
    ///
    /// Must be cancel-safe: the dispatch loop races it against shutdown.
    async fn recv(&self) -> Result<Option<RawFrame>>;

    /// Release the unit. Idempotent; pending `recv` calls return `Ok(None)`.
    fn close(&self);
}
