//! Switching between persisted chats.

use std::sync::Arc;

use omni_types::ChatId;
use tracing::{debug, warn};

use crate::backend::ChatBackend;
use crate::error::ClientError;
use crate::state::StateHandle;

/// Loads the chat list and swaps the active chat in a [`StateHandle`].
pub struct HistoryNavigator {
    backend: Arc<dyn ChatBackend>,
    state: StateHandle,
}

impl HistoryNavigator {
    pub fn new(backend: Arc<dyn ChatBackend>, state: StateHandle) -> Self {
        Self { backend, state }
    }

    /// Replace the chat list with the server's, newest first.
    pub async fn load_chats(&self) -> Result<(), ClientError> {
        let chats = self.backend.list_chats().await?;
        debug!(count = chats.len(), "chat list loaded");
        self.state.set_chats(chats);
        Ok(())
    }

    /// Make `chat_id` the active chat and load its messages.
    ///
    /// Refused with [`ClientError::Busy`] while a turn is in flight.  On a
    /// failed fetch the active id is already switched and the message list
    /// is left empty.
    pub async fn select_chat(&self, chat_id: ChatId) -> Result<(), ClientError> {
        if self.state.is_loading() {
            return Err(ClientError::Busy);
        }
        self.state.set_active_chat(Some(chat_id));
        self.state.replace_messages(Vec::new());
        self.state.set_loading(true);

        let result = self.backend.list_messages(chat_id).await;
        self.state.set_loading(false);

        match result {
            Ok(messages) => {
                debug!(chat_id, count = messages.len(), "chat loaded");
                self.state.replace_messages(messages);
                Ok(())
            }
            Err(e) => {
                warn!(chat_id, error = %e, "loading chat failed");
                Err(e)
            }
        }
    }

    /// Start a new chat; the server creates it on the first turn.
    pub fn new_chat(&self) {
        self.state.reset();
    }
}
