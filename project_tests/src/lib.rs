//! Spins up the full HTTP + live-feed surface on an ephemeral port, backed by
//! the in-memory store, for the end-to-end tests under `tests/`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use lib_weather::api::{router, AppState};
use lib_weather::{BroadcastHub, HubConfig, MemoryStore};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    pub hub: BroadcastHub,
    pub state: Arc<AppState<MemoryStore>>,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    hub_task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        Self::start_with(HubConfig::default()).await
    }

    pub async fn start_with(config: HubConfig) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let store = Arc::new(MemoryStore::new());
        let (hub, hub_task) = BroadcastHub::spawn(config, &shutdown);
        let state = Arc::new(AppState::new(Arc::clone(&store), hub.clone()));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = router(Arc::clone(&state));
        let stop = shutdown.clone().cancelled_owned();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).with_graceful_shutdown(stop).await;
        });

        Ok(Self {
            addr,
            store,
            hub,
            state,
            shutdown,
            server,
            hub_task,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/api/v1/weather/ws", self.addr)
    }

    /// Cancels everything and waits for the hub and the server to finish.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.hub_task.await?;
        tokio::time::timeout(Duration::from_secs(5), self.server).await??;
        Ok(())
    }
}

/// Polls `check` every 10 ms for up to 3 seconds.
pub async fn wait_for(check: impl Fn() -> bool) -> bool {
    for _ in 0..300 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
