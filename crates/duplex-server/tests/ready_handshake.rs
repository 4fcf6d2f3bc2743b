//! Drives the real in-process router over a loopback TCP socket with
//! `tokio-tungstenite`, the way a remote client would, covering seed
//! scenario S1 — connect as session `abc`, expect exactly one
//! `signal/ready` text frame carrying that session id.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use duplex_server::app::{build_router, AppState};
use duplex_server::config::ServerConfig;

fn test_config() -> ServerConfig {
    use clap::Parser;
    ServerConfig::parse_from([
        "duplex-server",
        "--bind-addr",
        "127.0.0.1:0",
        "--llm-base-url",
        "http://127.0.0.1:1",
        "--tts-base-url",
        "http://127.0.0.1:1",
    ])
}

async fn spawn_test_server() -> String {
    let state = AppState::new(test_config());
    let router = build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("ws://{addr}/ws/abc")
}

#[tokio::test]
async fn ready_handshake_sends_exactly_one_ready_signal() {
    let url = spawn_test_server().await;
    let (mut ws, _response) = connect_async(&url).await.expect("connect to duplex-server");

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for ready signal")
        .expect("stream ended before ready signal")
        .expect("websocket error");

    let WsMessage::Text(text) = msg else {
        panic!("expected a text frame, got {msg:?}");
    };

    let wire: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(wire["type"], "signal");
    assert_eq!(wire["content"], "ready");
    assert_eq!(wire["session_id"], "abc");

    let _ = ws.close(None).await;
}

#[tokio::test]
async fn input_turn_triggers_processing_started_signal() {
    // With no reachable LLM endpoint the turn will error out quickly, but
    // the processing_started/processing_ended signal pair (§8 property 2)
    // must still be observed before that failure surfaces.
    let url = spawn_test_server().await;
    let (mut ws, _response) = connect_async(&url).await.expect("connect to duplex-server");

    // Drain the initial ready signal.
    let _ = tokio::time::timeout(Duration::from_secs(2), ws.next()).await;

    ws.send(WsMessage::Text(r#"{"type":"input","content":"hello"}"#.into()))
        .await
        .unwrap();

    let mut saw_processing_started = false;
    for _ in 0..10 {
        let Ok(Some(Ok(WsMessage::Text(text)))) = tokio::time::timeout(Duration::from_secs(2), ws.next()).await else {
            break;
        };
        let wire: serde_json::Value = serde_json::from_str(&text).unwrap();
        if wire["type"] == "signal" && wire["content"] == "processing_started" {
            saw_processing_started = true;
            break;
        }
    }

    assert!(saw_processing_started, "expected a processing_started signal for the typed turn");
    let _ = ws.close(None).await;
}
