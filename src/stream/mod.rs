//! Stream adapters over router subscriptions

use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use crate::filter::MessageFilter;
use crate::message::Message;
use crate::router::{MessageRouter, SubscriptionId};

/// Unsubscribes when dropped.
#[derive(Debug)]
struct SubscriptionGuard {
    router: Weak<MessageRouter>,
    id: SubscriptionId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(router) = self.router.upgrade() {
            router.unsubscribe(self.id);
            trace!(id = %self.id, "Message stream dropped");
        }
    }
}

pin_project! {
    /// Messages matching a filter, in receive order.
    ///
    /// Ends when the device closes. Dropping the stream removes its subscription.
    pub struct MessageStream {
        #[pin]
        inner: UnboundedReceiverStream<Arc<Message>>,
        guard: SubscriptionGuard,
    }
}

impl MessageStream {
    pub(crate) fn subscribe(router: &Arc<MessageRouter>, filter: MessageFilter) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = router.subscribe_fn(filter, move |message| {
            let _ = tx.send(message.clone());
        });
        Self {
            inner: UnboundedReceiverStream::new(rx),
            guard: SubscriptionGuard { router: Arc::downgrade(router), id },
        }
    }

    pub fn subscription_id(&self) -> SubscriptionId {
        self.guard.id
    }
}

impl Stream for MessageStream {
    type Item = Arc<Message>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetId;
    use futures::StreamExt;

    #[tokio::test]
    async fn yields_matching_messages_and_unsubscribes_on_drop() {
        let router = Arc::new(MessageRouter::default());
        let mut stream = MessageStream::subscribe(&router, MessageFilter::network(NetId::DwCan02));
        router.dispatch(Message::can(NetId::DwCan01, 1, vec![]));
        router.dispatch(Message::can(NetId::DwCan02, 2, vec![]));

        let message = stream.next().await.unwrap();
        assert_eq!(message.as_can().map(|c| c.arbid), Some(2));
        assert_eq!(router.subscription_count(), 1);

        drop(stream);
        assert_eq!(router.subscription_count(), 0);
    }

    #[tokio::test]
    async fn ends_when_router_clears() {
        let router = Arc::new(MessageRouter::default());
        let mut stream = MessageStream::subscribe(&router, MessageFilter::any());
        router.clear();
        assert!(stream.next().await.is_none());
    }
}
