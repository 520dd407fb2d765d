//! Message router
//!
//! The router fans inbound messages out to subscriptions and, optionally, to a
//! capped polling queue.
//!
//! ## Dispatch contract
//!
//! - Subscriptions are matched in registration order and every match is invoked;
//!   there is no first-match short-circuit.
//! - The table lock is held only while collecting candidates. Sinks run without it,
//!   so a slow sink never blocks subscribe/unsubscribe or the polling queue.
//! - Each subscription has its own sink lock: at most one invocation of a given
//!   subscription is active at any time.
//! - [`MessageRouter::unsubscribe`] deactivates the subscription and then waits for an
//!   in-flight invocation to finish. Once it returns the sink is never called again.
//!   Calling it from inside the sink being removed does not wait.
//!
//! ## Indexing
//!
//! Network-only filters are bucketed by [`NetId`], type-only filters by
//! [`MessageType`]. Composite and network-type filters are scanned linearly, as are
//! wildcards.

mod polling;

pub use polling::PollingQueue;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::Result;
use crate::filter::MessageFilter;
use crate::message::{Message, MessageType};
use crate::network::NetId;

/// Default capacity of the polling queue.
pub const DEFAULT_POLLING_CAPACITY: usize = 20_000;

/// Receives messages for one subscription.
///
/// The router holds the sink behind its own lock, so implementations can keep
/// mutable state (counters, buffers) in `self` without extra synchronization.
pub trait MessageSink: Send {
    fn on_message(&mut self, message: &Arc<Message>);
}

impl<F> MessageSink for F
where
    F: FnMut(&Arc<Message>) + Send,
{
    fn on_message(&mut self, message: &Arc<Message>) {
        self(message)
    }
}

/// Opaque handle returned by [`MessageRouter::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

struct Subscription {
    id: SubscriptionId,
    filter: MessageFilter,
    active: AtomicBool,
    sink: Mutex<Box<dyn MessageSink>>,
    invoking: Mutex<Option<ThreadId>>,
}

impl Subscription {
    fn deliver(&self, message: &Arc<Message>) -> bool {
        let mut sink = lock(&self.sink);
        if !self.active.load(Ordering::Acquire) {
            return false;
        }
        *lock(&self.invoking) = Some(std::thread::current().id());
        sink.on_message(message);
        *lock(&self.invoking) = None;
        true
    }

    /// Deactivate and wait for any in-flight invocation on another thread.
    fn retire(&self) {
        self.active.store(false, Ordering::Release);
        let on_this_thread = *lock(&self.invoking) == Some(std::thread::current().id());
        if !on_this_thread {
            drop(lock(&self.sink));
        }
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct Table {
    subscriptions: BTreeMap<SubscriptionId, Arc<Subscription>>,
    by_network: HashMap<NetId, Vec<SubscriptionId>>,
    by_type: HashMap<MessageType, Vec<SubscriptionId>>,
    scanned: Vec<SubscriptionId>,
}

impl Table {
    fn insert(&mut self, subscription: Arc<Subscription>) {
        let id = subscription.id;
        let filter = subscription.filter;
        if let Some(network) = filter.network_only() {
            self.by_network.entry(network).or_default().push(id);
        } else if let Some(message_type) = filter.type_only() {
            self.by_type.entry(message_type).or_default().push(id);
        } else {
            self.scanned.push(id);
        }
        self.subscriptions.insert(id, subscription);
    }

    fn remove(&mut self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        let subscription = self.subscriptions.remove(&id)?;
        let filter = subscription.filter;
        if let Some(network) = filter.network_only() {
            remove_id(self.by_network.get_mut(&network), id);
        } else if let Some(message_type) = filter.type_only() {
            remove_id(self.by_type.get_mut(&message_type), id);
        } else {
            self.scanned.retain(|other| *other != id);
        }
        Some(subscription)
    }

    /// Matching subscriptions in registration order.
    fn candidates(&self, message: &Message) -> Vec<Arc<Subscription>> {
        let mut ids: Vec<SubscriptionId> = Vec::new();
        if let Some(bucket) = self.by_network.get(&message.network.kind()) {
            ids.extend_from_slice(bucket);
        }
        if let Some(bucket) = self.by_type.get(&message.message_type()) {
            ids.extend_from_slice(bucket);
        }
        ids.extend_from_slice(&self.scanned);
        ids.sort_unstable();

        ids.into_iter()
            .filter_map(|id| self.subscriptions.get(&id))
            .filter(|subscription| subscription.filter.matches(message))
            .cloned()
            .collect()
    }
}

fn remove_id(bucket: Option<&mut Vec<SubscriptionId>>, id: SubscriptionId) {
    if let Some(bucket) = bucket {
        bucket.retain(|other| *other != id);
    }
}

/// Subscription registry and dispatch engine.
pub struct MessageRouter {
    table: Mutex<Table>,
    next_id: AtomicU64,
    polling: PollingQueue,
    dispatched: AtomicU64,
}

impl fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRouter")
            .field("subscriptions", &self.subscription_count())
            .field("polling", &self.polling)
            .field("dispatched", &self.dispatched_count())
            .finish()
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new(DEFAULT_POLLING_CAPACITY)
    }
}

impl MessageRouter {
    pub fn new(polling_capacity: usize) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            next_id: AtomicU64::new(1),
            polling: PollingQueue::new(polling_capacity),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Register a sink for messages matching `filter`.
    pub fn subscribe(
        &self,
        filter: MessageFilter,
        sink: impl MessageSink + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscription = Arc::new(Subscription {
            id,
            filter,
            active: AtomicBool::new(true),
            sink: Mutex::new(Box::new(sink)),
            invoking: Mutex::new(None),
        });
        lock(&self.table).insert(subscription);
        debug!(%id, ?filter, "Subscribed");
        id
    }

    /// Closure form of [`subscribe`](Self::subscribe).
    pub fn subscribe_fn<F>(&self, filter: MessageFilter, sink: F) -> SubscriptionId
    where
        F: FnMut(&Arc<Message>) + Send + 'static,
    {
        self.subscribe(filter, sink)
    }

    /// Remove a subscription. Returns `false` for unknown ids.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = lock(&self.table).remove(id);
        match removed {
            Some(subscription) => {
                subscription.retire();
                debug!(%id, "Unsubscribed");
                true
            }
            None => false,
        }
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.table).subscriptions.len()
    }

    /// Deliver one message. Returns the number of sinks invoked.
    pub fn dispatch(&self, message: Message) -> usize {
        self.dispatch_shared(&Arc::new(message))
    }

    pub fn dispatch_shared(&self, message: &Arc<Message>) -> usize {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        if !message.is_internal() {
            self.polling.push(message);
        }

        let candidates = lock(&self.table).candidates(message);
        let delivered =
            candidates.iter().filter(|subscription| subscription.deliver(message)).count();
        trace!(network = %message.network, kind = ?message.message_type(), delivered, "Dispatched");
        delivered
    }

    pub fn dispatched_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn enable_polling(&self, enabled: bool) {
        self.polling.set_enabled(enabled);
    }

    pub fn is_polling_enabled(&self) -> bool {
        self.polling.is_enabled()
    }

    pub fn set_polling_capacity(&self, capacity: usize) {
        self.polling.set_capacity(capacity);
    }

    /// Drain the polling queue in receive order.
    pub fn get_messages(&self) -> Vec<Arc<Message>> {
        self.polling.drain()
    }

    pub async fn wait_for_messages(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<Message>>> {
        self.polling.wait(timeout, cancel).await
    }

    pub fn polling_overflow_count(&self) -> u64 {
        self.polling.overflow_count()
    }

    /// Remove every subscription and empty the polling queue.
    ///
    /// Waits for in-flight invocations, so no sink observes a message after this returns.
    pub fn clear(&self) {
        let removed: Vec<Arc<Subscription>> = {
            let mut table = lock(&self.table);
            let removed = std::mem::take(&mut table.subscriptions).into_values().collect();
            *table = Table::default();
            removed
        };
        for subscription in &removed {
            subscription.retire();
        }
        self.polling.set_enabled(false);
        self.polling.wake_all();
        if !removed.is_empty() {
            debug!(count = removed.len(), "Router cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EthernetMessage, MessageBody};
    use crate::network::NetworkType;
    use std::sync::atomic::AtomicUsize;

    fn can(network: NetId, arbid: u32) -> Message {
        Message::can(network, arbid, vec![])
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnMut(&Arc<Message>) + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move |_: &Arc<Message>| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn fan_out_to_every_match_in_registration_order() {
        let router = MessageRouter::default();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let order = order.clone();
            let filter = match tag {
                0 => MessageFilter::network(NetId::DwCan01),
                1 => MessageFilter::any(),
                _ => MessageFilter::message_type(MessageType::Can),
            };
            router.subscribe_fn(filter, move |_| order.lock().unwrap().push(tag));
        }

        assert_eq!(router.dispatch(can(NetId::DwCan01, 1)), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn network_only_subscription_sees_only_its_network() {
        let router = MessageRouter::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        router.subscribe_fn(MessageFilter::network(NetId::DwCan02), move |m| {
            sink.lock().unwrap().push(m.network.kind())
        });

        router.dispatch(can(NetId::DwCan01, 1));
        router.dispatch(can(NetId::DwCan02, 2));
        router.dispatch(Message::new(NetId::Ethernet01, EthernetMessage::new(vec![0; 14])));
        assert_eq!(*seen.lock().unwrap(), vec![NetId::DwCan02]);
    }

    #[test]
    fn type_only_subscription_spans_networks() {
        let router = MessageRouter::default();
        let (count, sink) = counter();
        router.subscribe(MessageFilter::message_type(MessageType::Can), sink);
        router.dispatch(can(NetId::DwCan01, 1));
        router.dispatch(can(NetId::DwCan04, 1));
        router.dispatch(Message::new(NetId::Ethernet01, EthernetMessage::new(vec![0; 14])));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn network_type_filters_are_scanned() {
        let router = MessageRouter::default();
        let (count, sink) = counter();
        router.subscribe(MessageFilter::network_type(NetworkType::Can), sink);
        router.dispatch(can(NetId::DwCan03, 1));
        router.dispatch(Message::new(NetId::Ethernet02, EthernetMessage::new(vec![0; 14])));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let router = MessageRouter::default();
        let (count, sink) = counter();
        let id = router.subscribe(MessageFilter::any(), sink);
        assert!(router.unsubscribe(id));
        assert!(!router.unsubscribe(id));
        router.dispatch(can(NetId::DwCan01, 1));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(router.subscription_count(), 0);
    }

    #[test]
    fn sink_can_unsubscribe_itself() {
        let router = Arc::new(MessageRouter::default());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let inner_router = router.clone();
        let inner_slot = slot.clone();
        let inner_calls = calls.clone();
        let id = router.subscribe_fn(MessageFilter::any(), move |_| {
            inner_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *inner_slot.lock().unwrap() {
                inner_router.unsubscribe(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        router.dispatch(can(NetId::DwCan01, 1));
        router.dispatch(can(NetId::DwCan01, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_waits_for_in_flight_delivery() {
        let router = Arc::new(MessageRouter::default());
        let unsubscribed = Arc::new(AtomicBool::new(false));
        let violations = Arc::new(AtomicUsize::new(0));
        let entered = Arc::new(std::sync::Barrier::new(2));

        let flag = unsubscribed.clone();
        let bad = violations.clone();
        let gate = entered.clone();
        let mut first = true;
        let id = router.subscribe_fn(MessageFilter::any(), move |_| {
            if flag.load(Ordering::SeqCst) {
                bad.fetch_add(1, Ordering::SeqCst);
            }
            if first {
                first = false;
                gate.wait();
                std::thread::sleep(Duration::from_millis(50));
            }
        });

        let dispatcher = {
            let router = router.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    router.dispatch(can(NetId::DwCan01, i));
                }
            })
        };

        entered.wait();
        assert!(router.unsubscribe(id));
        unsubscribed.store(true, Ordering::SeqCst);
        dispatcher.join().unwrap();

        assert_eq!(violations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn at_most_one_invocation_per_subscription() {
        let router = Arc::new(MessageRouter::default());
        let busy = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let (flag, bad) = (busy.clone(), overlaps.clone());
        router.subscribe_fn(MessageFilter::any(), move |_| {
            if flag.swap(true, Ordering::SeqCst) {
                bad.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::yield_now();
            flag.store(false, Ordering::SeqCst);
        });

        let threads: Vec<_> = (0..4)
            .map(|t| {
                let router = router.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        router.dispatch(can(NetId::DwCan01, t * 1000 + i));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(router.dispatched_count(), 1000);
    }

    #[test]
    fn polling_preserves_order_and_skips_internal() {
        let router = MessageRouter::new(100);
        router.enable_polling(true);
        for i in 0..5 {
            router.dispatch(can(NetId::DwCan01, i));
        }
        router.dispatch(Message::new(
            NetId::DeviceControl,
            crate::message::DeviceControlMessage::new(1, crate::message::DeviceCommand::SetOnline),
        ));
        let ids: Vec<u32> = router
            .get_messages()
            .iter()
            .filter_map(|m| match &m.body {
                MessageBody::Can(c) => Some(c.arbid),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert!(router.get_messages().is_empty());
    }

    #[test]
    fn clear_removes_everything() {
        let router = MessageRouter::default();
        let (count, sink) = counter();
        router.subscribe(MessageFilter::any(), sink);
        router.enable_polling(true);
        router.dispatch(can(NetId::DwCan01, 1));
        router.clear();
        router.dispatch(can(NetId::DwCan01, 2));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(router.get_messages().is_empty());
        assert!(!router.is_polling_enabled());
    }

    struct FrameCounter {
        frames: usize,
        last: Option<u32>,
    }

    impl MessageSink for FrameCounter {
        fn on_message(&mut self, message: &Arc<Message>) {
            self.frames += 1;
            self.last = message.as_can().map(|c| c.arbid);
        }
    }

    #[test]
    fn struct_sinks_keep_their_own_state() {
        let router = MessageRouter::default();
        let counter = FrameCounter { frames: 0, last: None };
        router.subscribe(MessageFilter::network(NetId::DwCan01), counter);
        assert_eq!(router.dispatch(can(NetId::DwCan01, 0x42)), 1);
    }
}
