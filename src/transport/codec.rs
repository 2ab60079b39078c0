//! Newline-delimited frame codec for the `tcp://` transport.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum frame
//! length so an unterminated or oversized frame from the coordinator cannot
//! exhaust memory.
//!
//! # Usage
//!
//! Use [`FrameCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound). Both directions use UTF-8
//! frames terminated by `\n`; a trailing `\r` is stripped on decode.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Line codec used by the `tcp://` transport.
///
/// # Decoder
///
/// Each item is one frame. An inbound line longer than the configured limit
/// is discarded and yields `Some(Err(AppError::Protocol("frame too long: …")))`
/// in its place; decoding resumes at the next newline. Only I/O failures are
/// decoder errors ([`AppError::Transport`]), since `FramedRead` ends the
/// stream after one.
///
/// # Encoder
///
/// Outbound frames are encoded as `item\n`. The length limit is a
/// decoder-side concern only.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LinesCodec,
    max_frame_bytes: usize,
}

impl FrameCodec {
    /// Create a codec that rejects inbound frames above `max_frame_bytes`.
    #[must_use]
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_frame_bytes),
            max_frame_bytes,
        }
    }

    fn frame(
        &self,
        decoded: std::result::Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Result<String>>> {
        match decoded {
            Ok(line) => Ok(line.map(Ok)),
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Ok(Some(Err(AppError::Protocol(format!(
                    "frame too long: exceeded {} bytes",
                    self.max_frame_bytes
                )))))
            }
            Err(LinesCodecError::Io(err)) => Err(AppError::Transport(err.to_string())),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Result<String>;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let decoded = self.inner.decode(src);
        self.frame(decoded)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let decoded = self.inner.decode_eof(src);
        self.frame(decoded)
    }
}

impl Encoder<String> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.inner
            .encode(item, dst)
            .map_err(|err| AppError::Transport(format!("encode failed: {err}")))
    }
}
