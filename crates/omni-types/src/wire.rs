//! Records pushed from the stream relay to the stream consumer.
//!
//! Each record travels as one server-sent event, `data: <payload>\n\n`.
//! The payload is a JSON object with exactly one known key, or the literal
//! [`DONE_SENTINEL`] that ends the stream.

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::chat::ChatId;

/// Payload of the record that ends a successful stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One record of a turn's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRecord {
    /// A new chat was created for this turn.  Sent at most once, always first.
    ChatCreated { chat_id: ChatId },
    /// The next fragment of assistant text, in production order.
    Token { token: String },
    /// Generation failed.  No further tokens follow.
    Error { error: String },
    /// The assistant message was persisted; the stream is complete.
    Done,
}

/// Errors raised while decoding a record payload.
#[derive(Debug, Error)]
pub enum WireError {
    /// The payload is not valid JSON for any record shape.
    #[error("malformed record JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is a JSON object but does not carry exactly one known key.
    #[error("record must carry exactly one of chatId, token or error")]
    Shape,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct RawRecord {
    #[serde(default)]
    chat_id: Option<ChatId>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl StreamRecord {
    /// Render the SSE `data:` payload for this record.
    pub fn to_data(&self) -> String {
        match self {
            StreamRecord::ChatCreated { chat_id } => json!({ "chatId": chat_id }).to_string(),
            StreamRecord::Token { token } => json!({ "token": token }).to_string(),
            StreamRecord::Error { error } => json!({ "error": error }).to_string(),
            StreamRecord::Done => DONE_SENTINEL.to_owned(),
        }
    }

    /// Decode an SSE `data:` payload.
    pub fn parse(data: &str) -> Result<Self, WireError> {
        let data = data.trim();
        if data == DONE_SENTINEL {
            return Ok(StreamRecord::Done);
        }
        let raw: RawRecord = serde_json::from_str(data)?;
        match (raw.chat_id, raw.token, raw.error) {
            (Some(chat_id), None, None) => Ok(StreamRecord::ChatCreated { chat_id }),
            (None, Some(token), None) => Ok(StreamRecord::Token { token }),
            (None, None, Some(error)) => Ok(StreamRecord::Error { error }),
            _ => Err(WireError::Shape),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
