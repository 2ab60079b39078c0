//! Integration tests for the newline-framed `tcp://` coordinator transport.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::codec::{Framed, LinesCodec};

use provider_agent::config::TransportConfig;
use provider_agent::transport;

use super::test_helpers::{test_config, MemoryStore, RunningAgent, FRAME_WAIT, TEST_PEER_ID};

async fn next_line(framed: &mut Framed<tokio::net::TcpStream, LinesCodec>) -> String {
    tokio::time::timeout(FRAME_WAIT, framed.next())
        .await
        .expect("line arrived in time")
        .expect("socket open")
        .expect("valid line")
}

/// The session protocol is identical over line framing.
#[tokio::test]
async fn session_runs_over_line_framing() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("tcp://{}", listener.local_addr().expect("addr"));
    let store = Arc::new(MemoryStore::with_pins(["bafyA"]));
    let agent = RunningAgent::start(test_config(&url), store);

    let (stream, _) = tokio::time::timeout(FRAME_WAIT, listener.accept())
        .await
        .expect("agent dialed")
        .expect("accept");
    let mut framed = Framed::new(stream, LinesCodec::new());

    assert_eq!(next_line(&mut framed).await, format!("id|{TEST_PEER_ID}"));

    framed.send("hb|7").await.expect("send");
    assert_eq!(next_line(&mut framed).await, "hb|7");

    framed.send("ping\r").await.expect("send");
    assert_eq!(next_line(&mut framed).await, "cids|bafyA");

    agent.stop().await;
}

/// An oversized line spoils one frame only; the connection keeps serving.
#[tokio::test]
async fn oversized_line_is_skipped() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("tcp://{}", listener.local_addr().expect("addr"));
    let mut config = test_config(&url);
    config.transport.max_frame_bytes = 64;
    let agent = RunningAgent::start(config, Arc::new(MemoryStore::new()));

    let (stream, _) = tokio::time::timeout(FRAME_WAIT, listener.accept())
        .await
        .expect("agent dialed")
        .expect("accept");
    let mut framed = Framed::new(stream, LinesCodec::new());
    assert_eq!(next_line(&mut framed).await, format!("id|{TEST_PEER_ID}"));

    let oversized = format!("upload|r|big.bin|{}", "A".repeat(256));
    framed.send(oversized).await.expect("send");
    framed.send("hb|ok").await.expect("send");

    assert_eq!(next_line(&mut framed).await, "hb|ok");
    assert_eq!(agent.manager.session().connection_id, 1);
    agent.stop().await;
}

/// A refused dial surfaces as a transport error.
#[tokio::test]
async fn refused_dial_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let result = transport::connect(&format!("tcp://{addr}"), &TransportConfig::default()).await;
    assert!(matches!(
        result,
        Err(provider_agent::AppError::Transport(_))
    ));
}
