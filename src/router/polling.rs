//! Capped polling queue

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::message::Message;
use crate::{DeviceError, Result};

/// Overflow is logged on the first drop and then once per this many drops.
const OVERFLOW_LOG_INTERVAL: u64 = 1024;

#[derive(Debug)]
struct QueueState {
    enabled: bool,
    capacity: usize,
    messages: VecDeque<Arc<Message>>,
}

/// Buffered pull-style consumption alongside callback dispatch.
///
/// Oldest messages are evicted when the queue is full; every eviction is counted.
#[derive(Debug)]
pub struct PollingQueue {
    state: Mutex<QueueState>,
    overflow: AtomicU64,
    notify: Notify,
}

impl PollingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                enabled: false,
                capacity: capacity.max(1),
                messages: VecDeque::new(),
            }),
            overflow: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enabling starts buffering; disabling discards anything buffered.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.lock();
        state.enabled = enabled;
        if !enabled {
            state.messages.clear();
        }
        debug!(enabled, "Polling queue toggled");
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn set_capacity(&self, capacity: usize) {
        let mut state = self.lock();
        state.capacity = capacity.max(1);
        while state.messages.len() > state.capacity {
            state.messages.pop_front();
            self.count_overflow();
        }
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of messages evicted because the queue was full.
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    pub(crate) fn push(&self, message: &Arc<Message>) {
        {
            let mut state = self.lock();
            if !state.enabled {
                return;
            }
            if state.messages.len() >= state.capacity {
                state.messages.pop_front();
                self.count_overflow();
            }
            state.messages.push_back(message.clone());
        }
        self.notify.notify_waiters();
    }

    fn count_overflow(&self) {
        let total = self.overflow.fetch_add(1, Ordering::Relaxed) + 1;
        if total == 1 || total % OVERFLOW_LOG_INTERVAL == 0 {
            warn!(total, "Polling queue full, dropping oldest message");
        }
    }

    /// Remove and return everything buffered, oldest first.
    pub fn drain(&self) -> Vec<Arc<Message>> {
        self.lock().messages.drain(..).collect()
    }

    /// Wait until at least one message is buffered or `timeout` elapses.
    ///
    /// Returns an empty vector on timeout and [`DeviceError::Closed`] once `cancel` fires.
    pub async fn wait(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<Message>>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let drained = self.drain();
            if !drained.is_empty() {
                return Ok(drained);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(DeviceError::Closed),
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
                _ = &mut notified => {}
            }
        }
    }

    /// Wake every waiter so it can observe cancellation.
    pub(crate) fn wake_all(&self) {
        self.notify.notify_waiters();
    }
}
