use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

/// Ordinal identifier of a [`Chat`], assigned by the store.
pub type ChatId = i64;

/// Identifier of a [`Message`], unique within its chat.
pub type MessageId = i64;

/// Logical creation time in milliseconds.
pub type Timestamp = i64;

/// Number of characters of the first user message kept in a chat title.
pub const TITLE_MAX_CHARS: usize = 30;

/// Author of a message.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Media kind of an [`Attachment`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    File,
}

/// Reference to an uploaded file.  Resolving `url` to bytes is left to the
/// model bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
}

/// A conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    /// Derived once from the first user message, see [`derive_title`].
    pub title: String,
    pub created_at: Timestamp,
}

/// One turn's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    /// `None` only for client-side messages of a chat the server has not
    /// created yet.
    pub chat_id: Option<ChatId>,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub timestamp: Timestamp,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub message: String,
    /// `None` starts a new chat.
    #[serde(default)]
    pub chat_id: Option<ChatId>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Build a chat title from the first user message.
///
/// Keeps the first [`TITLE_MAX_CHARS`] characters and appends `"..."` when
/// anything was cut off.
pub fn derive_title(text: &str) -> String {
    if text.chars().count() > TITLE_MAX_CHARS {
        let mut title: String = text.chars().take(TITLE_MAX_CHARS).collect();
        title.push_str("...");
        title
    } else {
        text.to_owned()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
