//! # Subscriber Transport
//!
//! The object-safe seam between the hub and a live connection. The hub only
//! ever writes through [`SubscriberSink`]; what sits behind it (an axum
//! WebSocket in production, a scripted channel in tests) is invisible to it.

use std::fmt;

use futures_util::future::BoxFuture;

use crate::error::DeliveryError;

/// Process-unique identity of a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(crate) u64);

impl SubscriberId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Write half of a live subscriber connection.
///
/// Implementations do not apply deadlines themselves; callers wrap every call
/// in a timeout.
pub trait SubscriberSink: Send + Sync + 'static {
    /// Pushes one JSON document.
    fn send_text<'a>(&'a self, payload: &'a str) -> BoxFuture<'a, Result<(), DeliveryError>>;

    /// Sends a protocol-level liveness probe.
    fn send_ping(&self) -> BoxFuture<'_, Result<(), DeliveryError>>;

    /// Releases the transport. Called by the hub at most once per registration.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// What the read loop cares about in an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundFrame {
    /// Answer to a liveness probe.
    Pong,
    /// Peer asked to close.
    Close,
    /// Anything else; subscribers have nothing to say, so it is discarded.
    Data,
}

#[cfg(feature = "server")]
pub use ws::WsSink;

#[cfg(feature = "server")]
mod ws {
    use super::*;

    use axum::body::Bytes;
    use axum::extract::ws::{Message, WebSocket};
    use futures_util::stream::{SplitSink, Stream};
    use futures_util::{SinkExt, StreamExt};
    use tokio::sync::Mutex;

    /// [`SubscriberSink`] over the write half of an axum WebSocket.
    ///
    /// The hub (deliveries) and the heartbeat (pings) share the half, so it
    /// sits behind an async mutex.
    pub struct WsSink {
        tx: Mutex<SplitSink<WebSocket, Message>>,
    }

    impl WsSink {
        /// Splits the socket into a shared sink and a stream of inbound frames.
        pub fn split(
            socket: WebSocket,
        ) -> (
            std::sync::Arc<Self>,
            impl Stream<Item = Result<InboundFrame, DeliveryError>> + Unpin + Send + 'static,
        ) {
            let (tx, rx) = socket.split();
            let inbound = rx.map(|msg| {
                msg.map(InboundFrame::from)
                    .map_err(|e| DeliveryError::Transport(e.to_string()))
            });
            (std::sync::Arc::new(Self { tx: Mutex::new(tx) }), inbound)
        }
    }

    impl From<Message> for InboundFrame {
        fn from(msg: Message) -> Self {
            match msg {
                Message::Pong(_) => InboundFrame::Pong,
                Message::Close(_) => InboundFrame::Close,
                _ => InboundFrame::Data,
            }
        }
    }

    fn transport(e: axum::Error) -> DeliveryError {
        DeliveryError::Transport(e.to_string())
    }

    impl SubscriberSink for WsSink {
        fn send_text<'a>(&'a self, payload: &'a str) -> BoxFuture<'a, Result<(), DeliveryError>> {
            Box::pin(async move {
                let mut tx = self.tx.lock().await;
                tx.send(Message::Text(payload.into())).await.map_err(transport)
            })
        }

        fn send_ping(&self) -> BoxFuture<'_, Result<(), DeliveryError>> {
            Box::pin(async move {
                let mut tx = self.tx.lock().await;
                tx.send(Message::Ping(Bytes::new())).await.map_err(transport)
            })
        }

        fn close(&self) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                let mut tx = self.tx.lock().await;
                // The peer may already be gone; closing is best effort.
                let _ = tx.send(Message::Close(None)).await;
                let _ = tx.close().await;
            })
        }
    }
}
