//! Coordinator transports.
//!
//! A transport turns a coordinator URL into a pair of boxed halves: a
//! [`FrameStream`] of inbound text frames and a [`FrameSink`] for outbound
//! ones. The session layer only sees these two types.
//!
//! | Scheme            | Transport                                     |
//! |-------------------|-----------------------------------------------|
//! | `ws://`, `wss://` | WebSocket text messages (`tokio-tungstenite`) |
//! | `tcp://`          | newline-delimited UTF-8 ([`codec::FrameCodec`]) |
//!
//! Submodules:
//! - `codec`: line framing for the TCP transport.
//! - `writer`: the per-connection single-writer task.

pub mod codec;
pub mod writer;

use std::pin::Pin;

use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, Request};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::debug;

use crate::config::TransportConfig;
use crate::transport::codec::FrameCodec;
use crate::{AppError, Result};

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = AppError> + Send>>;

/// Inbound half of a connection.
///
/// Items that fail with [`AppError::Protocol`] spoil a single frame only;
/// any other error means the connection is gone.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An open coordinator connection.
pub struct Connection {
    /// Outbound frames.
    pub sink: FrameSink,
    /// Inbound frames.
    pub stream: FrameStream,
}

/// Open a connection to `url` within the configured handshake budget.
///
/// # Errors
///
/// Returns `AppError::Timeout` if the handshake does not finish in time,
/// `AppError::Config` for an unusable URL or header, and
/// `AppError::Transport` for dial or upgrade failures.
pub async fn connect(url: &str, config: &TransportConfig) -> Result<Connection> {
    let dial = async {
        if let Some(addr) = url.strip_prefix("tcp://") {
            connect_lines(addr, config.max_frame_bytes).await
        } else {
            connect_websocket(url, config).await
        }
    };

    tokio::time::timeout(config.handshake_timeout(), dial)
        .await
        .map_err(|_| {
            AppError::Timeout(format!(
                "handshake with {url} exceeded {}s",
                config.handshake_seconds
            ))
        })?
}

async fn connect_lines(addr: &str, max_frame_bytes: usize) -> Result<Connection> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|err| AppError::Transport(format!("dial failed: {err}")))?;
    if let Err(err) = stream.set_nodelay(true) {
        debug!(error = %err, "could not disable nagle on coordinator socket");
    }

    let (read_half, write_half) = stream.into_split();
    Ok(Connection {
        sink: Box::pin(FramedWrite::new(write_half, FrameCodec::new(max_frame_bytes))),
        stream: Box::pin(
            FramedRead::new(read_half, FrameCodec::new(max_frame_bytes))
                .map(|item| item.and_then(|frame| frame)),
        ),
    })
}

async fn connect_websocket(url: &str, config: &TransportConfig) -> Result<Connection> {
    let request = upgrade_request(url, config)?;
    let (socket, response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|err| match err {
            WsError::Http(response) => AppError::Transport(format!(
                "upgrade rejected with status {}",
                response.status()
            )),
            other => AppError::Transport(format!("dial failed: {other}")),
        })?;
    debug!(status = %response.status(), "websocket upgrade complete");

    let (write, read) = socket.split();
    let max_frame_bytes = config.max_frame_bytes;

    let sink = write
        .sink_map_err(|err| AppError::Transport(err.to_string()))
        .with(|frame: String| future::ready(Ok::<_, AppError>(Message::text(frame))));

    let stream = read.filter_map(move |message| {
        future::ready(match message {
            Ok(Message::Text(text)) => Some(within_limit(text.as_str().to_owned(), max_frame_bytes)),
            Ok(Message::Binary(bytes)) => Some(
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| AppError::Protocol("binary frame is not valid UTF-8".into()))
                    .and_then(|text| within_limit(text, max_frame_bytes)),
            ),
            Ok(Message::Close(frame)) => Some(Err(AppError::Transport(format!(
                "closed by coordinator: {}",
                frame.map_or_else(|| "no reason".to_owned(), |f| f.reason.as_str().to_owned())
            )))),
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
            Err(err) => Some(Err(AppError::Transport(format!("read failed: {err}")))),
        })
    });

    Ok(Connection {
        sink: Box::pin(sink),
        stream: Box::pin(stream),
    })
}

/// Build the WebSocket upgrade request with tunnel and configured headers.
///
/// # Errors
///
/// Returns `AppError::Config` if the URL or a header is invalid.
pub fn upgrade_request(url: &str, config: &TransportConfig) -> Result<Request<()>> {
    let mut request = url
        .into_client_request()
        .map_err(|err| AppError::Config(format!("invalid coordinator url {url:?}: {err}")))?;

    if config.send_tunnel_headers {
        let origin = request.uri().host().map(|host| format!("https://{host}"));
        let headers = request.headers_mut();
        headers.insert(
            HeaderName::from_static("ngrok-skip-browser-warning"),
            HeaderValue::from_static("1"),
        );
        if let Some(origin) = origin {
            let value = HeaderValue::from_str(&origin)
                .map_err(|err| AppError::Config(format!("invalid origin header: {err}")))?;
            headers.insert(ORIGIN, value);
        }
    }

    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| AppError::Config(format!("invalid header name {name:?}: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| AppError::Config(format!("invalid value for header {name}: {err}")))?;
        request.headers_mut().insert(name, value);
    }

    Ok(request)
}

fn within_limit(text: String, max_frame_bytes: usize) -> Result<String> {
    if text.len() > max_frame_bytes {
        Err(AppError::Protocol(format!(
            "frame too long: {} bytes exceeds {max_frame_bytes}",
            text.len()
        )))
    } else {
        Ok(text)
    }
}
