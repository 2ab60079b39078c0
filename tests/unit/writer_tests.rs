//! Unit tests for the per-connection writer task.

use std::time::Duration;

use futures_util::{sink, SinkExt};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, PollSender};

use provider_agent::transport::writer::run_writer;
use provider_agent::transport::FrameSink;
use provider_agent::AppError;

/// A sink that forwards every written frame into a channel.
fn capture_sink() -> (FrameSink, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(16);
    let sink = PollSender::new(tx).sink_map_err(|err| AppError::Transport(err.to_string()));
    (Box::pin(sink), rx)
}

/// A sink whose every write fails.
fn broken_sink() -> FrameSink {
    Box::pin(sink::unfold((), |(), _frame: String| async {
        Err::<(), _>(AppError::Transport("connection reset".into()))
    }))
}

/// Frames are written one at a time in queue order.
#[tokio::test]
async fn frames_are_written_in_order() {
    let (sink, mut written) = capture_sink();
    let (outbound, frame_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let writer = tokio::spawn(run_writer(1, sink, frame_rx, cancel.clone()));

    for frame in ["hb|1", "cids|a,b", "ok|pin|a"] {
        outbound.send(frame.to_owned()).await.expect("queue open");
    }

    for expected in ["hb|1", "cids|a,b", "ok|pin|a"] {
        let frame = tokio::time::timeout(Duration::from_secs(2), written.recv())
            .await
            .expect("frame written in time")
            .expect("sink open");
        assert_eq!(frame, expected);
    }

    drop(outbound);
    writer.await.expect("writer joined").expect("clean exit");
    assert!(!cancel.is_cancelled());
}

/// Cancellation stops the writer without an error.
#[tokio::test]
async fn cancellation_stops_writer() {
    let (sink, _written) = capture_sink();
    let (_outbound, frame_rx) = mpsc::channel::<String>(8);
    let cancel = CancellationToken::new();
    let writer = tokio::spawn(run_writer(2, sink, frame_rx, cancel.clone()));

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), writer)
        .await
        .expect("writer stops promptly")
        .expect("writer joined");
    assert!(result.is_ok());
}

/// A failed write cancels the connection token so the reader notices.
#[tokio::test]
async fn write_failure_cancels_connection() {
    let (outbound, frame_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let writer = tokio::spawn(run_writer(3, broken_sink(), frame_rx, cancel.clone()));

    outbound.send("hb|1".to_owned()).await.expect("queue open");

    let result = tokio::time::timeout(Duration::from_secs(2), writer)
        .await
        .expect("writer stops promptly")
        .expect("writer joined");
    assert!(matches!(result, Err(AppError::Transport(ref msg)) if msg.contains("write failed")));
    assert!(cancel.is_cancelled());
}
