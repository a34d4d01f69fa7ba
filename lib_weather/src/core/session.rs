//! # Subscriber Session
//!
//! Binds one live connection to the hub for as long as the peer stays alive.
//!
//! - Registers the sink, and unregisters it exactly once however the session ends.
//! - A heartbeat task sends a probe every `ping_period`, each bounded by
//!   `write_wait`. A failed probe ends the heartbeat only; the silent peer is
//!   then dropped by the read loop once `pong_wait` runs out.
//! - The read loop discards payloads and ends on close, error, or when no
//!   pong arrived within `pong_wait`. Only pongs push the deadline forward.

use std::fmt;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::hub::{Hub, HubConfig};
use super::sink::{InboundFrame, SubscriberId, SubscriberSink};
use crate::error::HubError;

/// Unregisters on drop, so early returns and panics still release the slot.
struct Registration<H: Hub> {
    hub: H,
    id: SubscriberId,
}

impl<H: Hub> Drop for Registration<H> {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

/// Serves one subscriber until it goes away or `shutdown` fires.
///
/// Returns `Err(HubError::Stopped)` only when the hub refused the
/// registration; the sink is released in that case too.
pub async fn serve_subscriber<H, S, E>(
    hub: H,
    sink: Arc<dyn SubscriberSink>,
    mut inbound: S,
    config: &HubConfig,
    shutdown: &CancellationToken,
) -> Result<(), HubError>
where
    H: Hub,
    S: Stream<Item = Result<InboundFrame, E>> + Unpin + Send,
    E: fmt::Display + Send,
{
    let id = match hub.register(Arc::clone(&sink)).await {
        Ok(id) => id,
        Err(e) => {
            let _ = timeout(config.write_wait, sink.close()).await;
            return Err(e);
        }
    };
    let _registration = Registration { hub, id };
    debug!(subscriber = %id, "subscriber connected");

    // Cancelled when the hub stops or we return.
    let alive = shutdown.child_token();
    let _stop_heartbeat = alive.clone().drop_guard();
    tokio::spawn(heartbeat(
        id,
        Arc::clone(&sink),
        config.ping_period,
        config.write_wait,
        alive.clone(),
    ));

    let mut deadline = Instant::now() + config.pong_wait;
    let reason = loop {
        tokio::select! {
            _ = alive.cancelled() => break "stopped",
            next = timeout_at(deadline, inbound.next()) => match next {
                Err(_) => break "no pong within deadline",
                Ok(None) => break "connection closed",
                Ok(Some(Ok(InboundFrame::Pong))) => {
                    deadline = Instant::now() + config.pong_wait;
                }
                Ok(Some(Ok(InboundFrame::Close))) => break "closed by peer",
                Ok(Some(Ok(InboundFrame::Data))) => {
                    trace!(subscriber = %id, "discarding inbound payload");
                }
                Ok(Some(Err(e))) => {
                    debug!(subscriber = %id, error = %e, "read failed");
                    break "read error";
                }
            },
        }
    };

    debug!(subscriber = %id, reason, "subscriber disconnected");
    Ok(())
}

async fn heartbeat(
    id: SubscriberId,
    sink: Arc<dyn SubscriberSink>,
    period: std::time::Duration,
    write_wait: std::time::Duration,
    alive: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = alive.cancelled() => return,
            _ = ticker.tick() => match timeout(write_wait, sink.send_ping()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(subscriber = %id, error = %e, "ping failed, heartbeat stopped");
                    return;
                }
                Err(_) => {
                    debug!(subscriber = %id, "ping timed out, heartbeat stopped");
                    return;
                }
            },
        }
    }
}

#[cfg(feature = "server")]
impl super::hub::BroadcastHub {
    /// Runs a freshly upgraded WebSocket as a subscriber session.
    pub async fn accept_subscriber(&self, socket: axum::extract::ws::WebSocket) {
        let (sink, inbound) = super::sink::WsSink::split(socket);
        let stopped = self.stopped();
        if let Err(e) = serve_subscriber(self.clone(), sink, inbound, self.config(), &stopped).await {
            debug!(error = %e, "subscriber refused");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::stream;
    use tokio::sync::mpsc;

    use super::*;
    use crate::core::hub::BroadcastHub;
    use crate::core::testing::{eventually, reading, ScriptedSink};
    use crate::error::DeliveryError;

    type Inbound = mpsc::UnboundedSender<Result<InboundFrame, DeliveryError>>;

    fn scripted_inbound() -> (
        Inbound,
        impl Stream<Item = Result<InboundFrame, DeliveryError>> + Unpin + Send,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        (tx, stream::poll_fn(move |cx| rx.poll_recv(cx)))
    }

    fn timing() -> HubConfig {
        HubConfig {
            write_wait: Duration::from_millis(50),
            ..HubConfig::with_pong_wait(Duration::from_millis(100))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_subscriber_is_dropped_after_pong_wait() {
        let root = CancellationToken::new();
        let (hub, hub_task) = BroadcastHub::spawn(timing(), &root);
        let (sink, _texts) = ScriptedSink::new();
        let (_inbound_tx, inbound) = scripted_inbound();

        let started = Instant::now();
        let config = timing();
        serve_subscriber(hub.clone(), sink.clone(), inbound, &config, &root)
            .await
            .unwrap();

        assert!(started.elapsed() >= config.pong_wait);
        eventually(|| hub.stats().subscribers == 0).await;
        assert_eq!(sink.closes(), 1);

        hub.shutdown();
        hub_task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pongs_keep_the_session_alive() {
        let root = CancellationToken::new();
        let (hub, hub_task) = BroadcastHub::spawn(timing(), &root);
        let (sink, mut texts) = ScriptedSink::new();
        let (inbound_tx, inbound) = scripted_inbound();

        let session = {
            let hub = hub.clone();
            let sink = sink.clone();
            let root = root.clone();
            tokio::spawn(async move {
                serve_subscriber(hub, sink, inbound, &timing(), &root).await
            })
        };
        eventually(|| hub.stats().subscribers == 1).await;

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(60)).await;
            inbound_tx.send(Ok(InboundFrame::Data)).unwrap();
            inbound_tx.send(Ok(InboundFrame::Pong)).unwrap();
        }
        assert!(!session.is_finished());
        assert!(sink.pings() >= 3);

        hub.broadcast(reading(1)).unwrap();
        assert!(texts.recv().await.is_some());

        inbound_tx.send(Ok(InboundFrame::Close)).unwrap();
        session.await.unwrap().unwrap();
        eventually(|| hub.stats().subscribers == 0).await;

        hub.shutdown();
        hub_task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_frames_do_not_extend_the_deadline() {
        let root = CancellationToken::new();
        let (hub, hub_task) = BroadcastHub::spawn(timing(), &root);
        let (sink, _texts) = ScriptedSink::new();
        let (inbound_tx, inbound) = scripted_inbound();

        let chatter = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(20)).await;
                if inbound_tx.send(Ok(InboundFrame::Data)).is_err() {
                    return;
                }
            }
        });

        let started = Instant::now();
        serve_subscriber(hub.clone(), sink, inbound, &timing(), &root)
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));

        chatter.abort();
        hub.shutdown();
        hub_task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ping_stops_heartbeat_and_deadline_ends_session() {
        let root = CancellationToken::new();
        let config = HubConfig {
            write_wait: Duration::from_millis(50),
            ..HubConfig::with_pong_wait(Duration::from_secs(1))
        };
        let (hub, hub_task) = BroadcastHub::spawn(config.clone(), &root);
        let (sink, mut texts) = ScriptedSink::new();
        sink.fail_pings();
        let (_inbound_tx, inbound) = scripted_inbound();

        let session = {
            let hub = hub.clone();
            let sink = sink.clone();
            let root = root.clone();
            let config = config.clone();
            tokio::spawn(async move { serve_subscriber(hub, sink, inbound, &config, &root).await })
        };
        eventually(|| hub.stats().subscribers == 1).await;

        // Past the first failed probe, the subscriber still receives readings.
        tokio::time::sleep(config.ping_period + Duration::from_millis(1)).await;
        assert!(!session.is_finished());
        hub.broadcast(reading(1)).unwrap();
        assert!(texts.recv().await.is_some());

        let started = Instant::now();
        session.await.unwrap().unwrap();
        assert!(started.elapsed() <= config.pong_wait);
        assert_eq!(sink.pings(), 0);
        eventually(|| sink.closes() == 1).await;

        hub.shutdown();
        hub_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_hub_shutdown_ends_the_session() {
        let root = CancellationToken::new();
        let config = HubConfig::default();
        let (hub, hub_task) = BroadcastHub::spawn(config.clone(), &root);
        let (sink, _texts) = ScriptedSink::new();
        let (_inbound_tx, inbound) = scripted_inbound();

        let session = {
            let hub = hub.clone();
            let stopped = hub.stopped();
            tokio::spawn(async move { serve_subscriber(hub, sink, inbound, &config, &stopped).await })
        };
        eventually(|| hub.stats().subscribers == 1).await;

        hub.shutdown();
        session.await.unwrap().unwrap();
        hub_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_registration_releases_the_sink() {
        let root = CancellationToken::new();
        let (hub, hub_task) = BroadcastHub::spawn(HubConfig::default(), &root);
        hub.shutdown();
        hub_task.await.unwrap();

        let (sink, _texts) = ScriptedSink::new();
        let (_inbound_tx, inbound) = scripted_inbound();
        let result =
            serve_subscriber(hub.clone(), sink.clone(), inbound, &HubConfig::default(), &root).await;

        assert_eq!(result, Err(HubError::Stopped));
        assert_eq!(sink.closes(), 1);
    }
}
