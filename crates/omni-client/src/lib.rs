//! Client side of omni chat.
//!
//! [`StateHandle`] owns the in-memory mirror of the active chat.  A
//! [`StreamConsumer`] drives one turn against the server through a
//! [`ChatBackend`] and writes every decoded record into that state, and a
//! [`HistoryNavigator`] switches between persisted chats.

pub mod backend;
pub mod consumer;
pub mod decoder;
pub mod error;
pub mod history;
pub mod state;
#[cfg(test)]
mod testing;

pub use backend::{ByteStream, ChatBackend, HttpChatApi};
pub use consumer::{StreamConsumer, TurnOutcome, GENERIC_FAILURE, MALFORMED_LIMIT};
pub use decoder::RecordDecoder;
pub use error::ClientError;
pub use history::HistoryNavigator;
pub use state::{ConversationState, PendingTurn, StateHandle};
