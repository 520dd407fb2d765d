use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use super::{LiveDataCommand, LiveDataHandle, LiveDataValueType};
use crate::DeviceError;
use crate::message::{LiveDataCommandMessage, LiveDataStatusMessage, MessageBody};

/// Requests awaiting a STATUS message. A unit that never answers would otherwise
/// grow the map for the life of the session.
pub const MAX_PENDING_REQUESTS: usize = 256;

#[derive(Debug, Default)]
struct TrackerState {
    /// Subscriptions whose VALUE messages are admitted, with their signal lists.
    active: HashMap<LiveDataHandle, Vec<LiveDataValueType>>,
    /// Requests awaiting a STATUS message, with the order they were sent in.
    pending: HashMap<LiveDataHandle, (LiveDataCommand, u64)>,
    sequence: u64,
}

impl TrackerState {
    fn await_status(&mut self, handle: LiveDataHandle, command: LiveDataCommand) {
        self.sequence += 1;
        self.pending.insert(handle, (command, self.sequence));
        if self.pending.len() > MAX_PENDING_REQUESTS
            && let Some(oldest) = self
                .pending
                .iter()
                .min_by_key(|(_, (_, sent))| *sent)
                .map(|(handle, _)| *handle)
        {
            self.pending.remove(&oldest);
            debug!(handle = oldest, "LiveData request never answered, dropping its status wait");
        }
    }
}

/// Per-session LiveData correlation state.
///
/// The dispatch loop asks the tracker whether each inbound LiveData message belongs
/// to a request this session made. Messages for unknown handles are dropped and
/// counted, never surfaced as errors.
#[derive(Debug, Default)]
pub struct LiveDataTracker {
    state: Mutex<TrackerState>,
    dropped: AtomicU64,
}

impl LiveDataTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an outbound command before it is transmitted.
    pub fn begin(&self, command: &LiveDataCommandMessage) {
        let mut state = self.lock();
        match command.command {
            LiveDataCommand::Subscribe => {
                state.active.insert(command.handle, command.signals());
            }
            LiveDataCommand::Unsubscribe => {
                state.active.remove(&command.handle);
            }
            LiveDataCommand::ClearAll => {
                state.active.clear();
            }
            _ => {}
        }
        state.await_status(command.handle, command.command);
    }

    /// Record an outbound SET_VALUE request.
    pub fn begin_set_value(&self, handle: LiveDataHandle) {
        self.lock().await_status(handle, LiveDataCommand::SetValue);
    }

    /// Retire a handle. Returns whether it was active.
    ///
    /// VALUE messages for the handle are rejected from the moment this returns.
    pub fn retire(&self, handle: LiveDataHandle) -> bool {
        self.lock().active.remove(&handle).is_some()
    }

    /// Undo the bookkeeping for a command that never reached the device.
    pub fn abandon(&self, handle: LiveDataHandle) {
        let mut state = self.lock();
        state.pending.remove(&handle);
        state.active.remove(&handle);
    }

    pub fn is_active(&self, handle: LiveDataHandle) -> bool {
        self.lock().active.contains_key(&handle)
    }

    pub fn active_handles(&self) -> Vec<LiveDataHandle> {
        let mut handles: Vec<_> = self.lock().active.keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    /// Requests still awaiting a STATUS message.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Signals requested for an active subscription, in request order.
    pub fn signals(&self, handle: LiveDataHandle) -> Option<Vec<LiveDataValueType>> {
        self.lock().active.get(&handle).cloned()
    }

    /// Decide whether an inbound message may be dispatched.
    ///
    /// Non-LiveData messages always pass.
    pub fn admit(&self, body: &MessageBody) -> bool {
        match body {
            MessageBody::LiveDataValue(value) => {
                if self.lock().active.contains_key(&value.handle) {
                    return true;
                }
                self.reject(value.handle, "value");
                false
            }
            MessageBody::LiveDataStatus(status) => self.admit_status(status),
            _ => true,
        }
    }

    fn admit_status(&self, status: &LiveDataStatusMessage) -> bool {
        let mut state = self.lock();
        let was_pending = state.pending.remove(&status.handle).is_some();
        let is_active = state.active.contains_key(&status.handle);
        if !was_pending && !is_active {
            drop(state);
            self.reject(status.handle, "status");
            return false;
        }

        if !status.status.is_success() && status.requested_command == LiveDataCommand::Subscribe {
            let handle = status.handle;
            debug!(handle, status = %status.status, "LiveData subscription rejected");
            state.active.remove(&status.handle);
        }
        true
    }

    fn reject(&self, handle: LiveDataHandle, kind: &str) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        let err = DeviceError::Correlation { handle };
        trace!(dropped, "Dropping LiveData {}: {}", kind, err);
    }

    /// Count of LiveData messages dropped for unknown handles.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.active.clear();
        state.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::livedata::{LiveDataStatus, LiveDataValue};
    use crate::message::LiveDataValueMessage;
    use std::time::Duration;

    fn subscribe(handle: LiveDataHandle) -> LiveDataCommandMessage {
        LiveDataCommandMessage::subscribe(
            handle,
            &[LiveDataValueType::GpsLatitude, LiveDataValueType::GpsLongitude],
            Duration::from_millis(500),
            Duration::ZERO,
        )
    }

    fn value(handle: LiveDataHandle) -> MessageBody {
        MessageBody::LiveDataValue(LiveDataValueMessage {
            handle,
            values: vec![LiveDataValue::from_raw(1), LiveDataValue::from_raw(2)],
        })
    }

    fn status(
        handle: LiveDataHandle,
        requested: LiveDataCommand,
        status: LiveDataStatus,
    ) -> MessageBody {
        let requested_command = requested;
        MessageBody::LiveDataStatus(LiveDataStatusMessage { handle, requested_command, status })
    }

    #[test]
    fn unknown_handles_are_dropped_and_counted() {
        let tracker = LiveDataTracker::new();
        assert!(!tracker.admit(&value(9)));
        assert!(!tracker.admit(&status(9, LiveDataCommand::Subscribe, LiveDataStatus::Success)));
        assert_eq!(tracker.dropped(), 2);
    }

    #[test]
    fn subscribe_admits_status_then_values() {
        let tracker = LiveDataTracker::new();
        tracker.begin(&subscribe(3));
        assert!(tracker.admit(&status(3, LiveDataCommand::Subscribe, LiveDataStatus::Success)));
        assert!(tracker.admit(&value(3)));
        assert_eq!(tracker.signals(3).map(|s| s.len()), Some(2));
        assert_eq!(tracker.dropped(), 0);
    }

    #[test]
    fn retire_gates_values_but_admits_unsubscribe_status() {
        let tracker = LiveDataTracker::new();
        tracker.begin(&subscribe(4));
        assert!(tracker.admit(&value(4)));

        tracker.begin(&LiveDataCommandMessage::unsubscribe(4));
        assert!(!tracker.admit(&value(4)));
        assert!(tracker.admit(&status(4, LiveDataCommand::Unsubscribe, LiveDataStatus::Success)));
        // A second status for the same request has nothing left to correlate with.
        assert!(!tracker.admit(&status(4, LiveDataCommand::Unsubscribe, LiveDataStatus::Success)));
    }

    #[test]
    fn rejected_subscription_is_deactivated() {
        let tracker = LiveDataTracker::new();
        tracker.begin(&subscribe(5));
        assert!(tracker.admit(&status(5, LiveDataCommand::Subscribe, LiveDataStatus::ErrFull)));
        assert!(!tracker.is_active(5));
        assert!(!tracker.admit(&value(5)));
    }

    #[test]
    fn clear_all_retires_everything() {
        let tracker = LiveDataTracker::new();
        tracker.begin(&subscribe(1));
        tracker.begin(&subscribe(2));
        assert_eq!(tracker.active_handles(), vec![1, 2]);
        tracker.begin(&LiveDataCommandMessage::clear_all(10));
        assert!(tracker.active_handles().is_empty());
        assert!(tracker.admit(&status(10, LiveDataCommand::ClearAll, LiveDataStatus::Success)));
    }

    #[test]
    fn unanswered_requests_are_bounded() {
        let tracker = LiveDataTracker::new();
        let total = MAX_PENDING_REQUESTS as u32 + 10;
        for handle in 1..=total {
            tracker.begin_set_value(handle);
        }
        assert_eq!(tracker.pending_count(), MAX_PENDING_REQUESTS);

        // The oldest requests were given up on; the newest are still correlated.
        assert!(!tracker.admit(&status(1, LiveDataCommand::SetValue, LiveDataStatus::Success)));
        assert!(tracker.admit(&status(total, LiveDataCommand::SetValue, LiveDataStatus::Success)));
        assert_eq!(tracker.pending_count(), MAX_PENDING_REQUESTS - 1);
    }

    #[test]
    fn evicting_a_pending_subscribe_keeps_it_active() {
        let tracker = LiveDataTracker::new();
        tracker.begin(&subscribe(1));
        for handle in 2..=MAX_PENDING_REQUESTS as u32 + 1 {
            tracker.begin_set_value(handle);
        }
        assert!(tracker.is_active(1));
        assert!(tracker.admit(&value(1)));
    }

    #[test]
    fn non_livedata_messages_pass() {
        let tracker = LiveDataTracker::new();
        let can = MessageBody::Can(crate::message::CanMessage::new(0x1, vec![]));
        assert!(tracker.admit(&can));
    }
}
