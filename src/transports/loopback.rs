//! Loopback transport
//!
//! Every frame sent is received back verbatim. Used to check that the wire
//! codec and the receive path preserve message content.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::RawFrame;
use crate::transport::Transport;
use crate::{DeviceError, Result};

#[derive(Debug)]
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<RawFrame>,
    rx: Mutex<mpsc::UnboundedReceiver<RawFrame>>,
    opened: AtomicBool,
    closed: CancellationToken,
    sent: AtomicU64,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            opened: AtomicBool::new(false),
            closed: CancellationToken::new(),
            sent: AtomicU64::new(0),
        }
    }

    /// Frames accepted by `send` so far.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Transport for LoopbackTransport {
    async fn open(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(DeviceError::connection_failed("loopback transport was closed"));
        }
        self.opened.store(true, Ordering::Release);
        Ok(())
    }

    async fn send(&self, frame: RawFrame) -> Result<()> {
        if !self.opened.load(Ordering::Acquire) || self.closed.is_cancelled() {
            return Err(DeviceError::transmit_failed("loopback transport is not open"));
        }
        self.tx.send(frame).map_err(|_| DeviceError::Closed)?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn recv(&self) -> Result<Option<RawFrame>> {
        let mut rx = tokio::select! {
            _ = self.closed.cancelled() => return Ok(None),
            rx = self.rx.lock() => rx,
        };
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            frame = rx.recv() => Ok(frame),
        }
    }

    fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!(sent = self.sent_count(), "Loopback transport closed");
        }
        self.closed.cancel();
        self.opened.store(false, Ordering::Release);
    }
}
