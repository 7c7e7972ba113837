//! Control frame codec
//!
//! Every inbound WebSocket message is either a terminal resize or opaque
//! keyboard input. This module decides which, without side effects.
//!
//! Two framings are supported, selected once for the whole server:
//!
//! ```text
//! sentinel  binary  [0xFF] "<columns>,<rows>"   -> Resize
//!           binary  anything else               -> Data
//!           text    anything                    -> Data
//!
//! json      text    {"type":"resize","cols":N,"rows":M}  -> Resize
//!           text    anything else                        -> Data
//!           binary  anything                             -> Data
//! ```

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// First byte of a binary resize frame
pub const RESIZE_SENTINEL: u8 = 0xFF;

/// Discriminator value for JSON resize messages
const RESIZE_TYPE: &str = "resize";

/// Terminal size in character cells. Both fields are always non-zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub columns: u16,
    pub rows: u16,
}

impl Dimensions {
    /// Build dimensions, rejecting a zero-sized axis
    pub fn new(columns: u16, rows: u16) -> Option<Self> {
        if columns == 0 || rows == 0 {
            None
        } else {
            Some(Self { columns, rows })
        }
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self { columns: 80, rows: 24 }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.columns, self.rows)
    }
}

/// How control frames are told apart from data on the wire
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Binary frames starting with `0xFF` carry `"<columns>,<rows>"`
    #[default]
    Sentinel,
    /// Text frames holding a `{"type":"resize"}` object
    Json,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Sentinel => f.write_str("sentinel"),
            Framing::Json => f.write_str("json"),
        }
    }
}

/// A message as delivered by the transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// A classified inbound message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlFrame {
    /// The client terminal changed size
    Resize(Dimensions),
    /// Keyboard input for the pseudo terminal
    Data(Bytes),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("resize payload is not valid UTF-8")]
    NotUtf8,

    #[error("resize payload {0:?} is not of the form <columns>,<rows>")]
    Syntax(String),

    #[error("invalid dimension value {0:?}")]
    InvalidNumber(String),

    #[error("resize dimensions must be non-zero, got {columns}x{rows}")]
    ZeroSize { columns: u16, rows: u16 },

    #[error("malformed resize message: {0}")]
    Json(String),
}

/// Size fields of a JSON resize message. xterm.js clients send `cols`.
#[derive(Debug, Deserialize)]
struct ResizeMessage {
    #[serde(alias = "columns")]
    cols: u16,
    rows: u16,
}

/// Classify one inbound message.
///
/// Never panics; a message that claims to be a resize but cannot be read as
/// one is an error so the caller can drop it instead of typing it into the
/// terminal.
pub fn decode(message: WireMessage, framing: Framing) -> Result<ControlFrame, FrameError> {
    match (framing, message) {
        (Framing::Sentinel, WireMessage::Binary(bytes)) => match bytes.split_first() {
            Some((&RESIZE_SENTINEL, payload)) => parse_size_payload(payload).map(ControlFrame::Resize),
            _ => Ok(ControlFrame::Data(Bytes::from(bytes))),
        },
        (Framing::Json, WireMessage::Text(text)) => decode_json(text),
        (_, WireMessage::Text(text)) => Ok(ControlFrame::Data(Bytes::from(text))),
        (_, WireMessage::Binary(bytes)) => Ok(ControlFrame::Data(Bytes::from(bytes))),
    }
}

/// Produce the wire form of a resize, as a client would send it
#[allow(dead_code)]
pub fn encode_resize(dimensions: Dimensions, framing: Framing) -> WireMessage {
    match framing {
        Framing::Sentinel => {
            let text = format!("{},{}", dimensions.columns, dimensions.rows);
            let mut bytes = Vec::with_capacity(1 + text.len());
            bytes.push(RESIZE_SENTINEL);
            bytes.extend_from_slice(text.as_bytes());
            WireMessage::Binary(bytes)
        }
        Framing::Json => WireMessage::Text(
            serde_json::json!({
                "type": RESIZE_TYPE,
                "cols": dimensions.columns,
                "rows": dimensions.rows,
            })
            .to_string(),
        ),
    }
}

fn decode_json(text: String) -> Result<ControlFrame, FrameError> {
    let value = match serde_json::from_str::<Value>(&text) {
        Ok(value) => value,
        Err(_) => return Ok(ControlFrame::Data(Bytes::from(text))),
    };

    let is_resize = value
        .as_object()
        .and_then(|object| object.get("type"))
        .and_then(Value::as_str)
        == Some(RESIZE_TYPE);
    if !is_resize {
        return Ok(ControlFrame::Data(Bytes::from(text)));
    }

    let message: ResizeMessage =
        serde_json::from_value(value).map_err(|e| FrameError::Json(e.to_string()))?;
    Dimensions::new(message.cols, message.rows)
        .map(ControlFrame::Resize)
        .ok_or(FrameError::ZeroSize {
            columns: message.cols,
            rows: message.rows,
        })
}

fn parse_size_payload(payload: &[u8]) -> Result<Dimensions, FrameError> {
    let text = std::str::from_utf8(payload).map_err(|_| FrameError::NotUtf8)?;
    let (columns, rows) = text
        .split_once(',')
        .ok_or_else(|| FrameError::Syntax(text.to_string()))?;
    let columns = parse_dimension(columns)?;
    let rows = parse_dimension(rows)?;
    Dimensions::new(columns, rows).ok_or(FrameError::ZeroSize { columns, rows })
}

fn parse_dimension(field: &str) -> Result<u16, FrameError> {
    // u16::from_str also takes a leading '+', the wire format does not
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FrameError::InvalidNumber(field.to_string()));
    }
    field
        .parse::<u16>()
        .map_err(|_| FrameError::InvalidNumber(field.to_string()))
}
