//! Unit tests for the newline frame codec used by the `tcp://` transport.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use provider_agent::transport::codec::FrameCodec;
use provider_agent::AppError;

/// Decode one item and unwrap the frame inside it.
fn next_frame(codec: &mut FrameCodec, buf: &mut BytesMut) -> Option<String> {
    codec
        .decode(buf)
        .expect("decode must not fail")
        .map(|frame| frame.expect("frame must be valid"))
}

/// A complete line is returned without its terminator.
#[test]
fn complete_line_is_decoded() {
    let mut codec = FrameCodec::new(1024);
    let mut buf = BytesMut::from("hb|42\n");

    assert_eq!(next_frame(&mut codec, &mut buf).as_deref(), Some("hb|42"));
}

/// Several frames in one read are yielded one at a time.
#[test]
fn batched_lines_are_split() {
    let mut codec = FrameCodec::new(1024);
    let mut buf = BytesMut::from("ping\npin|bafyA\r\n");

    assert_eq!(next_frame(&mut codec, &mut buf).as_deref(), Some("ping"));
    assert_eq!(
        next_frame(&mut codec, &mut buf).as_deref(),
        Some("pin|bafyA")
    );
    assert_eq!(next_frame(&mut codec, &mut buf), None);
}

/// A partial frame is buffered until its newline arrives.
#[test]
fn partial_line_waits_for_terminator() {
    let mut codec = FrameCodec::new(1024);
    let mut buf = BytesMut::from("download|r-1|ba");
    assert_eq!(next_frame(&mut codec, &mut buf), None);

    buf.extend_from_slice(b"fyA\n");
    assert_eq!(
        next_frame(&mut codec, &mut buf).as_deref(),
        Some("download|r-1|bafyA")
    );
}

/// An oversized frame becomes a recoverable protocol error item, not a
/// decoder error, and the following frame still decodes.
#[test]
fn oversized_line_is_reported_then_skipped() {
    let mut codec = FrameCodec::new(8);
    let mut buf = BytesMut::from("upload|r|n|AAAAAAAAAAAA\nping\n");

    let item = codec
        .decode(&mut buf)
        .expect("oversize is not a decoder error")
        .expect("an item is produced");
    let err = item.expect_err("oversized frame must be rejected");
    assert!(matches!(err, AppError::Protocol(ref msg) if msg.contains("frame too long")));
    assert!(err.is_recoverable_frame_error());

    assert_eq!(next_frame(&mut codec, &mut buf).as_deref(), Some("ping"));
}

/// A final line without a newline is flushed at end of stream.
#[test]
fn unterminated_line_is_flushed_at_eof() {
    let mut codec = FrameCodec::new(1024);
    let mut buf = BytesMut::from("hb|9");
    let frame = codec
        .decode_eof(&mut buf)
        .expect("decode must not fail")
        .expect("an item is produced")
        .expect("frame must be valid");
    assert_eq!(frame, "hb|9");
}

#[test]
fn encoder_appends_newline() {
    let mut codec = FrameCodec::new(4);
    let mut buf = BytesMut::new();
    codec
        .encode("id|12D3KooWLongerThanTheLimit".to_owned(), &mut buf)
        .expect("encode ignores the inbound limit");
    assert_eq!(&buf[..], b"id|12D3KooWLongerThanTheLimit\n");
}
