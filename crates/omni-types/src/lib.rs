//! Shared types for omni chat.
//!
//! [`chat`] holds the persisted data model (chats, messages, attachments)
//! and the turn request body.  [`wire`] holds the closed set of records the
//! server pushes over a turn's event stream, and [`sse`] the framing that
//! carries them.

pub mod chat;
pub mod sse;
pub mod wire;

pub use chat::{
    derive_title, Attachment, AttachmentKind, Chat, ChatId, Message, MessageId, Role, Timestamp,
    TurnRequest, TITLE_MAX_CHARS,
};
pub use sse::SseDecoder;
pub use wire::{StreamRecord, WireError, DONE_SENTINEL};
