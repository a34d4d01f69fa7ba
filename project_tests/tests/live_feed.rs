use std::time::Duration;

use futures_util::StreamExt;
use lib_weather::HubConfig;
use project_tests::{wait_for, TestServer};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn subscribe(server: &TestServer) -> Client {
    let (ws, _) = connect_async(server.ws_url()).await.expect("ws connect failed");
    ws
}

/// Next JSON text frame, skipping protocol frames.
async fn next_text(client: &mut Client, within: Duration) -> Option<Value> {
    timeout(within, async {
        while let Some(msg) = client.next().await {
            match msg.ok()? {
                Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

async fn submit(server: &TestServer, body: Value) -> reqwest::StatusCode {
    reqwest::Client::new()
        .post(server.url("/api/v1/weather"))
        .json(&body)
        .send()
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_submission_reaches_every_subscriber() {
    let server = TestServer::start().await.unwrap();
    let mut first = subscribe(&server).await;
    let mut second = subscribe(&server).await;
    assert!(wait_for(|| server.hub.stats().subscribers == 2).await);

    let status = submit(
        &server,
        json!({ "date": "2023-01-01T09:00:00Z", "temperature": 22.5, "humidity": 75.5 }),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::CREATED);

    let expected = json!({ "date": "2023-01-01T00:00:00Z", "temperature": 22.5, "humidity": 75.5 });
    assert_eq!(next_text(&mut first, Duration::from_secs(3)).await, Some(expected.clone()));
    assert_eq!(next_text(&mut second, Duration::from_secs(3)).await, Some(expected));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_rejected_submission_is_not_broadcast() {
    let server = TestServer::start().await.unwrap();
    let mut client = subscribe(&server).await;
    assert!(wait_for(|| server.hub.stats().subscribers == 1).await);

    let status = submit(
        &server,
        json!({ "date": "2023-01-01", "temperature": 150.0, "humidity": 75.5 }),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(next_text(&mut client, Duration::from_millis(300)).await, None);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_departed_subscriber_is_unregistered() {
    let server = TestServer::start().await.unwrap();
    let mut leaving = subscribe(&server).await;
    let mut staying = subscribe(&server).await;
    assert!(wait_for(|| server.hub.stats().subscribers == 2).await);

    leaving.close(None).await.unwrap();
    drop(leaving);
    assert!(wait_for(|| server.hub.stats().subscribers == 1).await);

    let status = submit(
        &server,
        json!({ "date": "2023-01-02", "temperature": 1.0, "humidity": 2.0 }),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::CREATED);
    assert!(next_text(&mut staying, Duration::from_secs(3)).await.is_some());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_server_pings_and_client_pongs_keep_connection() {
    let config = HubConfig::with_pong_wait(Duration::from_millis(400));
    let server = TestServer::start_with(config).await.unwrap();
    let mut client = subscribe(&server).await;
    assert!(wait_for(|| server.hub.stats().subscribers == 1).await);

    // Reading drives tungstenite's automatic pong replies.
    let mut pings = 0;
    let _ = timeout(Duration::from_millis(1200), async {
        while let Some(Ok(msg)) = client.next().await {
            if msg.is_ping() {
                pings += 1;
            }
        }
    })
    .await;

    assert!(pings >= 2, "saw {pings} pings");
    assert_eq!(server.hub.stats().subscribers, 1);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_live_connections() {
    let server = TestServer::start().await.unwrap();
    let mut client = subscribe(&server).await;
    assert!(wait_for(|| server.hub.stats().subscribers == 1).await);

    let hub = server.hub.clone();
    server.stop().await.unwrap();

    let closed = timeout(Duration::from_secs(3), async {
        loop {
            match client.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert_eq!(closed, Ok(true));
    assert!(hub.is_stopped());
    assert_eq!(hub.stats().subscribers, 0);
}
