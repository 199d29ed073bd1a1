//! Wire format of the push hub.
//!
//! The hub speaks JSON records terminated by `0x1E`. A connection opens with
//! the client's handshake record and the server's handshake reply. After that
//! only invocation frames (`type: 1`) carry events; pings (`type: 6`) are
//! ignored and a close frame ends the connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;
use crate::model::{lenient_datetime, MatchStatusChange};

pub const RECORD_SEPARATOR: u8 = 0x1e;

pub const NOTIFICATION_TARGET: &str = "ReceiveNotification";
pub const LEGACY_STATUS_TARGET: &str = "MatchStatusUpdated";

/// Largest record the decoder buffers before giving up on the connection.
pub const MAX_RECORD_LEN: usize = 1 << 20;

const INVOCATION: u8 = 1;
const PING: u8 = 6;
const CLOSE: u8 = 7;

/// Protocol selection sent right after the transport opens.
pub fn handshake_record() -> String {
    record(&serde_json::json!({ "protocol": "json", "version": 1 }))
}

/// Keep-alive the client sends so the server doesn't time it out.
pub fn ping_record() -> String {
    record(&serde_json::json!({ "type": PING }))
}

fn record(value: &Value) -> String {
    let mut text = value.to_string();
    text.push(char::from(RECORD_SEPARATOR));
    text
}

#[derive(Deserialize)]
struct HandshakeReply {
    #[serde(default)]
    error: Option<String>,
}

/// The server's first record: `{}` on success, `{"error": ...}` otherwise.
pub fn parse_handshake_reply(text: &str) -> Result<(), SyncError> {
    let reply: HandshakeReply = serde_json::from_str(text)?;
    match reply.error {
        Some(error) => Err(SyncError::Channel(format!("hub handshake rejected: {error}"))),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    MatchStatusChanged(MatchStatusChange),
    GenericNotification(NotificationPayload),
}

/// Notification body as sent by the server. `id` is the server's identity
/// when it sends one; the store always assigns its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(PushEvent),
    Ignored,
    Close(Option<String>),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<u8>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Parse one record (without its separator).
pub fn parse_frame(text: &str) -> Result<Frame, SyncError> {
    let raw: RawFrame = serde_json::from_str(text)?;
    match raw.kind {
        Some(INVOCATION) => {
            let target = raw.target.unwrap_or_default();
            parse_invocation(&target, raw.arguments)
        }
        Some(CLOSE) => Ok(Frame::Close(raw.error)),
        // Pings and frame kinds we don't use.
        _ => Ok(Frame::Ignored),
    }
}

fn parse_invocation(target: &str, mut arguments: Vec<Value>) -> Result<Frame, SyncError> {
    if target.eq_ignore_ascii_case(NOTIFICATION_TARGET) {
        let Some(payload) = arguments.first_mut().map(Value::take) else {
            return Err(SyncError::Channel(format!("{target} invoked without a payload")));
        };
        return parse_notification_payload(payload).map(Frame::Event);
    }

    if target.eq_ignore_ascii_case(LEGACY_STATUS_TARGET) {
        let single_object = matches!(arguments.as_slice(), [Value::Object(_)]);
        let change = if single_object {
            serde_json::from_value(arguments[0].take())?
        } else if arguments.len() >= 2 {
            MatchStatusChange {
                match_id: serde_json::from_value(arguments[0].take())?,
                is_live: serde_json::from_value(arguments[1].take())?,
            }
        } else {
            return Err(SyncError::Channel(format!(
                "{target} expects (matchId, isLive), got {} arguments",
                arguments.len()
            )));
        };
        return Ok(Frame::Event(PushEvent::MatchStatusChanged(change)));
    }

    Ok(Frame::Ignored)
}

// The notification target carries either a status change or a plain
// notification; the status shape is recognised by its two fields.
fn parse_notification_payload(payload: Value) -> Result<PushEvent, SyncError> {
    let is_status_change = payload
        .as_object()
        .is_some_and(|obj| obj.contains_key("matchId") && obj.contains_key("isLive"));
    if is_status_change {
        Ok(PushEvent::MatchStatusChanged(serde_json::from_value(payload)?))
    } else {
        Ok(PushEvent::GenericNotification(serde_json::from_value(payload)?))
    }
}

/// Accumulates streamed bytes and yields complete records.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    // Everything before this offset is known to hold no separator.
    scanned: usize,
    max_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_RECORD_LEN)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_len,
        }
    }

    /// Feed bytes in; complete records come out. Fails once an unterminated
    /// record grows past the limit, after which the buffer is discarded.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, SyncError> {
        self.buf.extend_from_slice(bytes);
        let mut records = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[self.scanned..]
            .iter()
            .position(|b| *b == RECORD_SEPARATOR)
        {
            let end = self.scanned + pos;
            let text = String::from_utf8_lossy(&self.buf[start..end]);
            let text = text.trim();
            if !text.is_empty() {
                records.push(text.to_owned());
            }
            start = end + 1;
            self.scanned = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();

        if self.buf.len() > self.max_len {
            let buffered = self.buf.len();
            self.buf.clear();
            self.scanned = 0;
            return Err(SyncError::Channel(format!(
                "unterminated record exceeds {} bytes ({buffered} buffered)",
                self.max_len
            )));
        }
        Ok(records)
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
