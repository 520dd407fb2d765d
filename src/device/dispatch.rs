//! Receive path: one task per open session
//!
//! The loop owns nothing but shared handles. It decodes frames, completes pending
//! control requests, gates LiveData traffic through the tracker and hands
//! everything else to the router.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::codec;
use crate::livedata::LiveDataTracker;
use crate::message::{Message, MessageBody};
use crate::router::MessageRouter;
use crate::transport::Transport;

/// Control requests awaiting a response, keyed by request id.
#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    next_id: AtomicU32,
    waiting: Mutex<HashMap<u32, oneshot::Sender<Message>>>,
}

impl PendingRequests {
    fn lock(&self) -> MutexGuard<'_, HashMap<u32, oneshot::Sender<Message>>> {
        self.waiting.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn register(&self) -> (u32, oneshot::Receiver<Message>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        (id, rx)
    }

    /// Complete the request `id`. Returns `false` if nobody is waiting for it.
    pub(crate) fn resolve(&self, id: u32, message: Message) -> bool {
        match self.lock().remove(&id) {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    pub(crate) fn forget(&self, id: u32) {
        self.lock().remove(&id);
    }

    /// Drop every waiter; their receivers observe the closed channel.
    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Everything the receive task needs.
pub(crate) struct DispatchContext {
    pub transport: Arc<dyn Transport>,
    pub router: Arc<MessageRouter>,
    pub tracker: Arc<LiveDataTracker>,
    pub pending: Arc<PendingRequests>,
    pub max_errors: u32,
    pub serial: String,
}

/// Spawn the receive task. It stops when `cancel` fires or the transport ends.
pub(crate) fn spawn(
    context: DispatchContext,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { receive_loop(context, cancel).await })
}

fn response_id(message: &Message) -> Option<u32> {
    match &message.body {
        MessageBody::DeviceControl(control) if control.is_response() => Some(control.request_id),
        MessageBody::FlexRayControl(control) if control.is_response() => Some(control.request_id),
        _ => None,
    }
}

async fn receive_loop(context: DispatchContext, cancel: CancellationToken) {
    let DispatchContext { transport, router, tracker, pending, max_errors, serial } = context;
    info!(%serial, "Receive loop started");
    let mut frame_count = 0u64;
    let mut decode_errors = 0u64;
    let mut error_count = 0u32;

    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%serial, "Receive loop cancelled");
                break;
            }
            result = transport.recv() => result,
        };

        match result {
            Ok(Some(frame)) => {
                error_count = 0;
                let message = match codec::decode(&frame) {
                    Ok(message) => message,
                    Err(e) => {
                        decode_errors += 1;
                        let network = frame.network;
                        warn!(%serial, %network, decode_errors, "Dropping bad frame: {}", e);
                        continue;
                    }
                };
                frame_count += 1;

                if let Some(id) = response_id(&message) {
                    if pending.resolve(id, message.clone()) {
                        trace!(%serial, request_id = id, "Control response matched");
                    } else {
                        debug!(
                            %serial,
                            request_id = id,
                            "Control response without a waiting request"
                        );
                    }
                }
                if !tracker.admit(&message.body) {
                    continue;
                }
                if cancel.is_cancelled() {
                    break;
                }
                router.dispatch(message);
            }
            Ok(None) => {
                info!(%serial, "Transport ended");
                break;
            }
            Err(e) => {
                error_count += 1;
                error!(%serial, "Transport receive error ({}/{}): {}", error_count, max_errors, e);
                if error_count >= max_errors {
                    error!(%serial, "Too many transport errors, stopping receive loop");
                    break;
                }
                let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }

    pending.clear();
    info!(%serial, frame_count, decode_errors, "Receive loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RawFrame;
    use crate::filter::MessageFilter;
    use crate::message::{AckStatus, DeviceCommand, DeviceControlMessage};
    use crate::network::NetId;
    use crate::transports::LoopbackTransport;
    use crate::{DeviceError, Result};
    use std::sync::atomic::AtomicUsize;

    fn context(
        transport: Arc<dyn Transport>,
    ) -> (DispatchContext, Arc<MessageRouter>, Arc<PendingRequests>) {
        let router = Arc::new(MessageRouter::default());
        let pending = Arc::new(PendingRequests::default());
        let context = DispatchContext {
            transport,
            router: router.clone(),
            tracker: Arc::new(LiveDataTracker::new()),
            pending: pending.clone(),
            max_errors: 3,
            serial: "T1".into(),
        };
        (context, router, pending)
    }

    #[tokio::test]
    async fn decodes_and_dispatches_in_order() {
        let transport = Arc::new(LoopbackTransport::new());
        transport.open().await.unwrap();
        let (context, router, _) = context(transport.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        router.subscribe_fn(MessageFilter::network(NetId::DwCan01), move |m| {
            sink.lock().unwrap().push(m.as_can().map(|c| c.arbid).unwrap_or_default())
        });

        let cancel = CancellationToken::new();
        let task = spawn(context, cancel.clone());
        let can = |arbid| codec::encode(&Message::can(NetId::DwCan01, arbid, vec![])).unwrap();
        for arbid in [1, 2, 3] {
            transport.send(can(arbid)).await.unwrap();
        }
        let garbage = RawFrame { network: NetId::DwCan01, timestamp_ns: 0, payload: vec![0xEE] };
        transport.send(garbage).await.unwrap();
        transport.send(can(4)).await.unwrap();

        while seen.lock().unwrap().len() < 4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn responses_complete_pending_requests() {
        let transport = Arc::new(LoopbackTransport::new());
        transport.open().await.unwrap();
        let (context, _, pending) = context(transport.clone());
        let cancel = CancellationToken::new();
        let task = spawn(context, cancel.clone());

        let (id, rx) = pending.register();
        let control = DeviceControlMessage::new(id, DeviceCommand::Ack(AckStatus::Ok));
        let ack = Message::new(NetId::DeviceControl, control);
        transport.send(codec::encode(&ack).unwrap()).await.unwrap();
        let response = rx.await.unwrap();
        assert!(response.same_content(&ack));
        assert_eq!(pending.len(), 0);

        cancel.cancel();
        task.await.unwrap();
    }

    struct FailingTransport {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Transport for FailingTransport {
        async fn open(&self) -> Result<()> {
            Ok(())
        }
        async fn send(&self, _frame: RawFrame) -> Result<()> {
            Ok(())
        }
        async fn recv(&self) -> Result<Option<RawFrame>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DeviceError::connection_failed("unplugged"))
        }
        fn close(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_repeated_errors() {
        let transport = Arc::new(FailingTransport { calls: AtomicUsize::new(0) });
        let (context, _, pending) = context(transport.clone());
        let (_id, rx) = pending.register();
        spawn(context, CancellationToken::new()).await.unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert!(rx.await.is_err());
    }
}
