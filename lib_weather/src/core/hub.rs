//! # Broadcast Hub
//!
//! The actor that owns the live-subscriber registry and fans every broadcast
//! reading out to it.
//!
//! ## Shape
//! ```text
//!  BroadcastHub (cloneable handle)           HubLoop (one task)
//!  ─────────────────────────────            ───────────────────────────
//!  register ──► control inbox (unbounded) ──►┐
//!  unregister ─►                             ├─► select! ─► registry
//!  broadcast ─► pending queue (bounded) ────►┤              │
//!  shutdown ──► CancellationToken ──────────►┘              ▼
//!                                               one bounded-time write per
//!                                               subscriber (concurrent)
//! ```
//!
//! ## Rules
//! - Only the loop reads or mutates the registry. Nothing else holds it.
//! - Among events that are ready at the same time the loop picks one at
//!   random (`tokio::select!` without `biased`). No priority is implied.
//! - A failed write never removes a subscriber mid-iteration; it posts an
//!   `Unregister` to the loop's own inbox.
//! - `broadcast` never waits. A full queue drops the reading, logs a warning
//!   and bumps the `dropped` counter.
//! - After stop, `register` and `broadcast` are both rejected with
//!   [`HubError::Stopped`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::sink::{SubscriberId, SubscriberSink};
use super::stats::{HubSnapshot, HubStats};
use crate::error::{DeliveryError, HubError};
use crate::model::Reading;

/// Timing and sizing knobs for the hub and its connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Capacity of the pending-delivery queue.
    pub queue_capacity: usize,
    /// Deadline for any single write to a subscriber (data, probe or close).
    pub write_wait: Duration,
    /// How long a subscriber may stay silent before it is dropped.
    pub pong_wait: Duration,
    /// Interval between liveness probes. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Largest inbound frame accepted from a subscriber.
    pub max_message_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::with_pong_wait(Duration::from_secs(60))
    }
}

impl HubConfig {
    /// Defaults with the probe period derived as 9/10 of `pong_wait`.
    pub fn with_pong_wait(pong_wait: Duration) -> Self {
        Self {
            queue_capacity: 256,
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            max_message_size: 512,
        }
    }
}

/// # Hub
///
/// The capability the rest of the system sees. [`BroadcastHub`] is the
/// production implementation; tests substitute their own.
pub trait Hub: Clone + Send + Sync + 'static {
    /// Adds a subscriber. Resolves once the control loop has it in the registry.
    fn register(
        &self,
        sink: Arc<dyn SubscriberSink>,
    ) -> impl Future<Output = Result<SubscriberId, HubError>> + Send;

    /// Removes a subscriber and releases its transport. Unknown ids are a no-op.
    fn unregister(&self, id: SubscriberId);

    /// Queues a reading for every subscriber without waiting.
    fn broadcast(&self, reading: Reading) -> Result<(), HubError>;

    /// Stops the control loop, releasing every subscriber.
    fn shutdown(&self);
}

enum Command {
    Register {
        id: SubscriberId,
        sink: Arc<dyn SubscriberSink>,
        ack: oneshot::Sender<()>,
    },
    Unregister(SubscriberId),
}

/// Cloneable handle to the hub's control loop.
#[derive(Clone)]
pub struct BroadcastHub {
    control: mpsc::UnboundedSender<Command>,
    pending: mpsc::Sender<Reading>,
    shutdown: CancellationToken,
    stats: Arc<HubStats>,
    next_id: Arc<AtomicU64>,
    config: Arc<HubConfig>,
}

/// The control loop. Owns the registry; run it exactly once.
pub struct HubLoop {
    registry: HashMap<SubscriberId, Arc<dyn SubscriberSink>>,
    control_rx: mpsc::UnboundedReceiver<Command>,
    inbox: mpsc::WeakUnboundedSender<Command>,
    pending_rx: mpsc::Receiver<Reading>,
    shutdown: CancellationToken,
    stats: Arc<HubStats>,
    write_wait: Duration,
}

impl BroadcastHub {
    /// Creates the handle and its loop. The hub stops when `parent` is
    /// cancelled, when [`Hub::shutdown`] is called, or when every handle is dropped.
    pub fn new(config: HubConfig, parent: &CancellationToken) -> (Self, HubLoop) {
        let (control, control_rx) = mpsc::unbounded_channel();
        let (pending, pending_rx) = mpsc::channel(config.queue_capacity.max(1));
        let shutdown = parent.child_token();
        let stats = Arc::new(HubStats::default());

        let hub_loop = HubLoop {
            registry: HashMap::new(),
            control_rx,
            inbox: control.downgrade(),
            pending_rx,
            shutdown: shutdown.clone(),
            stats: Arc::clone(&stats),
            write_wait: config.write_wait,
        };
        let hub = Self {
            control,
            pending,
            shutdown,
            stats,
            next_id: Arc::new(AtomicU64::new(1)),
            config: Arc::new(config),
        };
        (hub, hub_loop)
    }

    /// Creates the hub and spawns its loop on the current runtime.
    pub fn spawn(config: HubConfig, parent: &CancellationToken) -> (Self, JoinHandle<()>) {
        let (hub, hub_loop) = Self::new(config, parent);
        (hub, tokio::spawn(hub_loop.run()))
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn stats(&self) -> HubSnapshot {
        self.stats.snapshot()
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled when the hub stops; connection adapters watch it.
    pub fn stopped(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn reject(&self) -> HubError {
        self.stats.record_rejected();
        HubError::Stopped
    }
}

impl Hub for BroadcastHub {
    async fn register(&self, sink: Arc<dyn SubscriberSink>) -> Result<SubscriberId, HubError> {
        if self.is_stopped() {
            return Err(self.reject());
        }
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (ack, acked) = oneshot::channel();
        if self.control.send(Command::Register { id, sink, ack }).is_err() {
            return Err(self.reject());
        }
        // A dropped ack means the loop stopped before it got to us.
        acked.await.map_err(|_| self.reject())?;
        Ok(id)
    }

    fn unregister(&self, id: SubscriberId) {
        // A stopped loop has already released everything.
        let _ = self.control.send(Command::Unregister(id));
    }

    fn broadcast(&self, reading: Reading) -> Result<(), HubError> {
        if self.is_stopped() {
            debug!(date = %reading.date(), "hub stopped, broadcast rejected");
            return Err(self.reject());
        }
        match self.pending.try_send(reading) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(reading)) => {
                self.stats.record_dropped();
                warn!(
                    date = %reading.date(),
                    capacity = self.config.queue_capacity,
                    "pending-delivery queue full, dropping reading"
                );
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(self.reject()),
        }
    }

    fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl HubLoop {
    /// Runs until shutdown, then releases every subscriber and returns.
    pub async fn run(mut self) {
        info!(write_wait = ?self.write_wait, "broadcast hub started");
        let mut pending_open = true;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                cmd = self.control_rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    // Every handle is gone; nobody can reach us any more.
                    None => break,
                },
                reading = self.pending_rx.recv(), if pending_open => match reading {
                    Some(reading) => self.deliver(reading).await,
                    None => pending_open = false,
                },
            }
        }

        self.stop().await;
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Register { id, sink, ack } => {
                self.registry.insert(id, sink);
                self.stats.set_subscribers(self.registry.len());
                debug!(subscriber = %id, count = self.registry.len(), "subscriber registered");
                // The registrant may have given up waiting; it unregisters on its own.
                let _ = ack.send(());
            }
            Command::Unregister(id) => {
                let Some(sink) = self.registry.remove(&id) else {
                    trace!(subscriber = %id, "unregister for absent subscriber ignored");
                    return;
                };
                self.stats.set_subscribers(self.registry.len());
                self.release(sink.as_ref()).await;
                debug!(subscriber = %id, count = self.registry.len(), "subscriber unregistered");
            }
        }
    }

    async fn deliver(&mut self, reading: Reading) {
        if self.registry.is_empty() {
            trace!(date = %reading.date(), "no subscribers, nothing to deliver");
            return;
        }
        let payload = match serde_json::to_string(&reading) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "failed to encode reading");
                return;
            }
        };

        let snapshot: Vec<(SubscriberId, Arc<dyn SubscriberSink>)> = self
            .registry
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect();

        let write_wait = self.write_wait;
        let payload = payload.as_str();
        let outcomes = join_all(snapshot.into_iter().map(|(id, sink)| async move {
            let outcome = match timeout(write_wait, sink.send_text(payload)).await {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Timeout(write_wait)),
            };
            (id, outcome)
        }))
        .await;

        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => self.stats.record_delivered(),
                Err(e) => {
                    self.stats.record_failed_write();
                    warn!(subscriber = %id, error = %e, "delivery failed, unregistering subscriber");
                    self.request_unregister(id);
                }
            }
        }
    }

    /// Posts an unregister to our own inbox so the registry is never mutated
    /// while a delivery is iterating it.
    fn request_unregister(&self, id: SubscriberId) {
        if let Some(inbox) = self.inbox.upgrade() {
            let _ = inbox.send(Command::Unregister(id));
        }
    }

    async fn release(&self, sink: &dyn SubscriberSink) {
        if timeout(self.write_wait, sink.close()).await.is_err() {
            debug!("subscriber close timed out");
        }
    }

    async fn stop(&mut self) {
        self.shutdown.cancel();
        self.control_rx.close();
        self.pending_rx.close();

        let mut sinks: Vec<Arc<dyn SubscriberSink>> =
            self.registry.drain().map(|(_, sink)| sink).collect();
        // Registrations that raced the shutdown: their ack is dropped here, so
        // the registrant sees `Stopped`, and their transport is released too.
        while let Ok(cmd) = self.control_rx.try_recv() {
            if let Command::Register { sink, .. } = cmd {
                sinks.push(sink);
            }
        }

        let released = sinks.len();
        join_all(sinks.iter().map(|sink| self.release(sink.as_ref()))).await;
        self.stats.set_subscribers(0);
        info!(released, "broadcast hub stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{eventually, reading, ScriptedSink};

    fn quick_config() -> HubConfig {
        HubConfig {
            write_wait: Duration::from_millis(200),
            ..HubConfig::default()
        }
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_a_noop() {
        let root = CancellationToken::new();
        let (hub, handle) = BroadcastHub::spawn(quick_config(), &root);

        for day in 1..=10 {
            hub.broadcast(reading(day)).unwrap();
        }
        eventually(|| hub.stats().delivered == 0 && hub.stats().dropped == 0).await;

        hub.shutdown();
        handle.await.unwrap();
        assert_eq!(hub.stats().subscribers, 0);
    }

    #[tokio::test]
    async fn test_failed_subscriber_is_dropped_and_others_keep_receiving() {
        let root = CancellationToken::new();
        let (hub, handle) = BroadcastHub::spawn(quick_config(), &root);

        let (good, mut good_rx) = ScriptedSink::new();
        let (bad, mut bad_rx) = ScriptedSink::new();
        hub.register(good.clone()).await.unwrap();
        hub.register(bad.clone()).await.unwrap();
        assert_eq!(hub.stats().subscribers, 2);

        hub.broadcast(reading(1)).unwrap();
        let expected = serde_json::to_string(&reading(1)).unwrap();
        assert_eq!(good_rx.recv().await.unwrap(), expected);
        assert_eq!(bad_rx.recv().await.unwrap(), expected);

        bad.fail_writes();
        hub.broadcast(reading(2)).unwrap();
        assert_eq!(
            good_rx.recv().await.unwrap(),
            serde_json::to_string(&reading(2)).unwrap()
        );
        eventually(|| bad.closes() == 1).await;
        assert_eq!(hub.stats().subscribers, 1);
        assert_eq!(hub.stats().failed_writes, 1);

        hub.broadcast(reading(3)).unwrap();
        assert_eq!(
            good_rx.recv().await.unwrap(),
            serde_json::to_string(&reading(3)).unwrap()
        );

        hub.shutdown();
        handle.await.unwrap();
        assert_eq!(bad.closes(), 1, "released exactly once");
    }

    #[tokio::test]
    async fn test_slow_subscriber_times_out() {
        let root = CancellationToken::new();
        let (hub, handle) = BroadcastHub::spawn(quick_config(), &root);

        let (slow, _slow_rx) = ScriptedSink::new();
        slow.hang_writes();
        hub.register(slow.clone()).await.unwrap();

        hub.broadcast(reading(1)).unwrap();
        eventually(|| hub.stats().subscribers == 0).await;
        assert_eq!(hub.stats().failed_writes, 1);

        hub.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_saturated_queue_drops_without_blocking() {
        let root = CancellationToken::new();
        let config = HubConfig {
            queue_capacity: 2,
            ..quick_config()
        };
        // Loop not running yet, so nothing drains the queue.
        let (hub, hub_loop) = BroadcastHub::new(config, &root);

        for day in 1..=5 {
            assert_eq!(hub.broadcast(reading(day)), Ok(()));
        }
        assert_eq!(hub.stats().dropped, 3);

        let handle = tokio::spawn(hub_loop.run());
        let (sink, mut rx) = ScriptedSink::new();
        hub.register(sink).await.unwrap();
        hub.broadcast(reading(9)).unwrap();

        let latest = serde_json::to_string(&reading(9)).unwrap();
        loop {
            if rx.recv().await.unwrap() == latest {
                break;
            }
        }

        hub.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let root = CancellationToken::new();
        let (hub, handle) = BroadcastHub::spawn(quick_config(), &root);

        let (sink, _rx) = ScriptedSink::new();
        let id = hub.register(sink.clone()).await.unwrap();
        hub.unregister(id);
        hub.unregister(id);
        hub.unregister(SubscriberId(999));

        eventually(|| hub.stats().subscribers == 0).await;
        hub.shutdown();
        handle.await.unwrap();
        assert_eq!(sink.closes(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_everyone_and_rejects_afterwards() {
        let root = CancellationToken::new();
        let (hub, handle) = BroadcastHub::spawn(quick_config(), &root);

        let (a, _a_rx) = ScriptedSink::new();
        let (b, _b_rx) = ScriptedSink::new();
        hub.register(a.clone()).await.unwrap();
        hub.register(b.clone()).await.unwrap();

        // Cancelling the parent token stops the hub too.
        root.cancel();
        handle.await.unwrap();

        assert_eq!(a.closes(), 1);
        assert_eq!(b.closes(), 1);
        assert!(hub.is_stopped());
        assert_eq!(hub.stats().subscribers, 0);

        let (late, _late_rx) = ScriptedSink::new();
        assert_eq!(hub.register(late.clone()).await, Err(HubError::Stopped));
        assert_eq!(hub.broadcast(reading(1)), Err(HubError::Stopped));
        assert_eq!(hub.stats().rejected, 2);
        assert_eq!(late.writes(), 0);
    }
}
