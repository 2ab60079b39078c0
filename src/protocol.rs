//! Pipe-delimited text protocol spoken with the coordinator.
//!
//! Every frame is one UTF-8 message whose fields are separated by `|`. The
//! first field is the verb; the field count of each verb is fixed.
//!
//! | Direction            | Frame                                    |
//! |----------------------|------------------------------------------|
//! | agent → coordinator  | `id\|<peerId>`                           |
//! | coordinator → agent  | `hb\|<nonce>`, `ping`, `pin\|<cid>`, `unpin\|<cid>` |
//! | coordinator → agent  | `upload\|<requestId>\|<name>\|<base64>`  |
//! | coordinator → agent  | `download\|<requestId>\|<cid>`           |
//! | agent → coordinator  | `hb\|<nonce>`, `cids\|<c1,c2>` / `cids\|error` |
//! | agent → coordinator  | `ok\|<kind>\|<cid>[\|<msg>]` / `err\|<kind>\|<cid>\|<msg>` |
//! | agent → coordinator  | `cid\|<requestId>\|<cid>`, `file\|<requestId>\|<base64>` |
//!
//! Inbound decoding is total: anything that does not match the grammar
//! becomes [`Command::Unrecognized`]. Field counts are exact, so a nonce
//! cannot contain `|`: `hb|a|b` is unrecognized and gets no echo, and a
//! bare `hb` is rejected in both directions.

use std::fmt::{Display, Formatter};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::{AppError, Result};

/// Field separator.
pub const DELIMITER: char = '|';

/// Wire marker sent in place of a pin list when listing failed.
pub const PIN_LIST_ERROR: &str = "error";

const VERB_HEARTBEAT: &str = "hb";
const VERB_PING: &str = "ping";
const VERB_PIN: &str = "pin";
const VERB_UNPIN: &str = "unpin";
const VERB_UPLOAD: &str = "upload";
const VERB_DOWNLOAD: &str = "download";

/// Expected field count for each inbound verb.
const INBOUND_ARITY: [(&str, usize); 6] = [
    (VERB_HEARTBEAT, 2),
    (VERB_PING, 1),
    (VERB_PIN, 2),
    (VERB_UNPIN, 2),
    (VERB_UPLOAD, 4),
    (VERB_DOWNLOAD, 3),
];

/// A decoded coordinator request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Liveness probe to be echoed back.
    Heartbeat {
        /// Opaque value echoed verbatim.
        nonce: String,
    },
    /// Request for the current recursive pin set.
    ListPins,
    /// Retain the identified content.
    Pin {
        /// Content identifier.
        cid: String,
    },
    /// Release the retention of the identified content.
    Unpin {
        /// Content identifier.
        cid: String,
    },
    /// Store a payload and report its identifier.
    Upload {
        /// Correlation token echoed in the reply.
        request_id: String,
        /// Caller-supplied file name (informational).
        name: String,
        /// Base64-encoded payload, decoded by the dispatcher.
        payload: String,
    },
    /// Return the full content of an identifier.
    Download {
        /// Correlation token echoed in the reply.
        request_id: String,
        /// Content identifier.
        cid: String,
    },
    /// Anything that did not match the grammar.
    Unrecognized {
        /// First field of the frame.
        verb: String,
        /// Why the frame was rejected.
        reason: String,
    },
}

impl Command {
    /// Decode one inbound frame. Never fails.
    #[must_use]
    pub fn decode(raw: &str) -> Self {
        let raw = raw.trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = raw.split(DELIMITER).collect();

        match fields.as_slice() {
            [VERB_HEARTBEAT, nonce] => Self::Heartbeat {
                nonce: (*nonce).to_owned(),
            },
            [VERB_PING] => Self::ListPins,
            [VERB_PIN, cid] if !cid.is_empty() => Self::Pin {
                cid: (*cid).to_owned(),
            },
            [VERB_UNPIN, cid] if !cid.is_empty() => Self::Unpin {
                cid: (*cid).to_owned(),
            },
            [VERB_UPLOAD, request_id, name, payload] if !request_id.is_empty() => Self::Upload {
                request_id: (*request_id).to_owned(),
                name: (*name).to_owned(),
                payload: (*payload).to_owned(),
            },
            [VERB_DOWNLOAD, request_id, cid] if !request_id.is_empty() && !cid.is_empty() => {
                Self::Download {
                    request_id: (*request_id).to_owned(),
                    cid: (*cid).to_owned(),
                }
            }
            [verb, ..] => Self::Unrecognized {
                verb: (*verb).to_owned(),
                reason: rejection_reason(verb, fields.len()),
            },
            [] => Self::Unrecognized {
                verb: String::new(),
                reason: "empty frame".into(),
            },
        }
    }

    /// Encode the command as the coordinator would send it.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Heartbeat { nonce } => format!("{VERB_HEARTBEAT}|{nonce}"),
            Self::ListPins => VERB_PING.to_owned(),
            Self::Pin { cid } => format!("{VERB_PIN}|{cid}"),
            Self::Unpin { cid } => format!("{VERB_UNPIN}|{cid}"),
            Self::Upload {
                request_id,
                name,
                payload,
            } => format!("{VERB_UPLOAD}|{request_id}|{name}|{payload}"),
            Self::Download { request_id, cid } => {
                format!("{VERB_DOWNLOAD}|{request_id}|{cid}")
            }
            Self::Unrecognized { verb, .. } => verb.clone(),
        }
    }

    /// Verb used for logging.
    #[must_use]
    pub fn verb(&self) -> &str {
        match self {
            Self::Heartbeat { .. } => VERB_HEARTBEAT,
            Self::ListPins => VERB_PING,
            Self::Pin { .. } => VERB_PIN,
            Self::Unpin { .. } => VERB_UNPIN,
            Self::Upload { .. } => VERB_UPLOAD,
            Self::Download { .. } => VERB_DOWNLOAD,
            Self::Unrecognized { verb, .. } => verb,
        }
    }

    /// Correlation token, for commands that carry one.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Upload { request_id, .. } | Self::Download { request_id, .. } => {
                Some(request_id)
            }
            _ => None,
        }
    }

    /// Whether the command is answered on the read loop without touching the
    /// content store.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Heartbeat { .. } | Self::Unrecognized { .. })
    }
}

fn rejection_reason(verb: &str, field_count: usize) -> String {
    match INBOUND_ARITY.iter().find(|(known, _)| *known == verb) {
        Some((_, expected)) if *expected != field_count => {
            format!("expected {expected} fields, got {field_count}")
        }
        Some(_) => "required field is empty".into(),
        None => "unknown verb".into(),
    }
}

/// Store operation reported through an [`Reply::OpResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Result of a `pin` command.
    Pin,
    /// Result of an `unpin` command.
    Unpin,
}

impl OpKind {
    /// Wire name of the operation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pin => VERB_PIN,
            Self::Unpin => VERB_UNPIN,
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            VERB_PIN => Some(Self::Pin),
            VERB_UNPIN => Some(Self::Unpin),
            _ => None,
        }
    }
}

impl Display for OpKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frame written by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// First frame on every connection.
    Identity {
        /// Local peer identifier.
        peer_id: String,
    },
    /// Echo of a heartbeat probe.
    HeartbeatEcho {
        /// Nonce copied from the probe.
        nonce: String,
    },
    /// Current pin set; `None` when the store could not be queried.
    PinList {
        /// Pinned identifiers.
        cids: Option<Vec<String>>,
    },
    /// Terminal outcome of a pin or unpin.
    OpResult {
        /// Which operation ran.
        kind: OpKind,
        /// Identifier the operation was about.
        subject: String,
        /// Whether the operation succeeded.
        ok: bool,
        /// Single-line detail; may be empty on success.
        message: String,
    },
    /// Identifier assigned to an uploaded payload.
    UploadResult {
        /// Token from the originating `upload`.
        request_id: String,
        /// Identifier returned by the store.
        cid: String,
    },
    /// Content returned for a download.
    DownloadResult {
        /// Token from the originating `download`.
        request_id: String,
        /// Raw content bytes; base64-encoded on the wire.
        payload: Vec<u8>,
    },
}

impl Reply {
    /// Successful pin or unpin.
    #[must_use]
    pub fn op_ok(kind: OpKind, subject: impl Into<String>) -> Self {
        Self::OpResult {
            kind,
            subject: subject.into(),
            ok: true,
            message: String::new(),
        }
    }

    /// Failed pin or unpin; the message is flattened to one line.
    #[must_use]
    pub fn op_failed(kind: OpKind, subject: impl Into<String>, message: &str) -> Self {
        Self::OpResult {
            kind,
            subject: subject.into(),
            ok: false,
            message: single_line(message),
        }
    }

    /// Encode the reply as a wire frame.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Identity { peer_id } => format!("id|{peer_id}"),
            Self::HeartbeatEcho { nonce } => format!("{VERB_HEARTBEAT}|{nonce}"),
            Self::PinList { cids: Some(cids) } => format!("cids|{}", cids.join(",")),
            Self::PinList { cids: None } => format!("cids|{PIN_LIST_ERROR}"),
            Self::OpResult {
                kind,
                subject,
                ok: true,
                message,
            } if message.is_empty() => format!("ok|{kind}|{subject}"),
            Self::OpResult {
                kind,
                subject,
                ok,
                message,
            } => {
                let status = if *ok { "ok" } else { "err" };
                format!("{status}|{kind}|{subject}|{}", single_line(message))
            }
            Self::UploadResult { request_id, cid } => format!("cid|{request_id}|{cid}"),
            Self::DownloadResult {
                request_id,
                payload,
            } => format!("file|{request_id}|{}", STANDARD.encode(payload)),
        }
    }

    /// Decode a frame produced by [`Reply::encode`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the frame is not a known agent reply.
    pub fn decode(raw: &str) -> Result<Self> {
        let (verb, rest) = raw.split_once(DELIMITER).unwrap_or((raw, ""));

        match verb {
            "id" if !rest.is_empty() => Ok(Self::Identity {
                peer_id: rest.to_owned(),
            }),
            VERB_HEARTBEAT if raw.contains(DELIMITER) => Ok(Self::HeartbeatEcho {
                nonce: rest.to_owned(),
            }),
            "cids" if raw.contains(DELIMITER) => Ok(Self::PinList {
                cids: match rest {
                    PIN_LIST_ERROR => None,
                    "" => Some(Vec::new()),
                    list => Some(list.split(',').map(str::to_owned).collect()),
                },
            }),
            "ok" | "err" => decode_op_result(verb == "ok", rest),
            "cid" => match rest.split(DELIMITER).collect::<Vec<_>>().as_slice() {
                [request_id, cid] => Ok(Self::UploadResult {
                    request_id: (*request_id).to_owned(),
                    cid: (*cid).to_owned(),
                }),
                _ => Err(malformed(raw)),
            },
            "file" => match rest.split(DELIMITER).collect::<Vec<_>>().as_slice() {
                [request_id, encoded] => {
                    let payload = STANDARD.decode(encoded).map_err(|err| {
                        AppError::Protocol(format!("invalid base64 in file reply: {err}"))
                    })?;
                    Ok(Self::DownloadResult {
                        request_id: (*request_id).to_owned(),
                        payload,
                    })
                }
                _ => Err(malformed(raw)),
            },
            _ => Err(malformed(raw)),
        }
    }
}

fn decode_op_result(ok: bool, rest: &str) -> Result<Reply> {
    let mut fields = rest.splitn(3, DELIMITER);
    let kind = fields.next().and_then(OpKind::parse);
    let subject = fields.next().filter(|subject| !subject.is_empty());
    let message = fields.next();

    match (kind, subject, message) {
        (Some(kind), Some(subject), message) if ok || message.is_some() => Ok(Reply::OpResult {
            kind,
            subject: subject.to_owned(),
            ok,
            message: message.unwrap_or_default().to_owned(),
        }),
        _ => Err(AppError::Protocol(format!(
            "malformed operation result: {rest:?}"
        ))),
    }
}

fn malformed(raw: &str) -> AppError {
    let preview: String = raw.chars().take(64).collect();
    AppError::Protocol(format!("unrecognised reply frame: {preview:?}"))
}

/// Collapse line breaks so a detail string cannot split a frame.
#[must_use]
pub fn single_line(text: &str) -> String {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
