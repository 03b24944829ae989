//! Stream consumer: drives one chat turn and applies its records to the
//! conversation state as they arrive.
//!
//! The user message and an empty assistant placeholder are shown before the
//! request leaves.  Tokens overwrite the placeholder with the text
//! accumulated so far.  Every failure ends up as text in that placeholder,
//! and the loading and streaming flags are cleared once whichever way the
//! turn ends (including when the `send_message` future is dropped).
//!
//! A record that cannot be decoded is logged and skipped.  The
//! [`MALFORMED_LIMIT`]th one in a turn aborts it.

use std::ops::ControlFlow;
use std::sync::Arc;

use futures::StreamExt;
use omni_types::{Attachment, MessageId, StreamRecord, TurnRequest, WireError};
use tracing::{debug, info, warn};

use crate::backend::ChatBackend;
use crate::decoder::RecordDecoder;
use crate::error::ClientError;
use crate::state::StateHandle;

/// Placeholder text for transport failures.
pub const GENERIC_FAILURE: &str = "Sorry, something went wrong.";

/// Number of malformed records that aborts a turn.
pub const MALFORMED_LIMIT: usize = 3;

/// How a call to [`StreamConsumer::send_message`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The terminal marker arrived; the placeholder holds the full reply.
    Completed,
    /// The turn failed; carries the text shown in the placeholder.
    Failed(String),
    /// Another turn was in flight.  The state was not touched.
    Busy,
}

enum TurnFailure {
    /// The server explained the failure (error record or refusal).
    Reported(String),
    /// The transport broke or the stream was unreadable.
    Transport(ClientError),
}

impl TurnFailure {
    fn render(&self) -> String {
        match self {
            TurnFailure::Reported(message) => format!("Error: {message}"),
            TurnFailure::Transport(_) => GENERIC_FAILURE.to_owned(),
        }
    }
}

impl From<ClientError> for TurnFailure {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Rejected(message) => TurnFailure::Reported(message),
            other => TurnFailure::Transport(other),
        }
    }
}

/// Clears the turn flags when dropped.
struct FlagGuard<'a>(&'a StateHandle);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.finish_turn();
    }
}

/// Per-turn decoding state.
struct TurnProgress {
    assistant_id: MessageId,
    content: String,
    malformed: usize,
}

pub struct StreamConsumer {
    backend: Arc<dyn ChatBackend>,
    state: StateHandle,
}

impl StreamConsumer {
    pub fn new(backend: Arc<dyn ChatBackend>, state: StateHandle) -> Self {
        Self { backend, state }
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    /// Run one turn for `text` in the active chat (or a new chat when none
    /// is active).
    pub async fn send_message(&self, text: &str, attachments: Vec<Attachment>) -> TurnOutcome {
        let Some(turn) = self.state.begin_turn(text, attachments.clone()) else {
            warn!("turn refused: another turn is in progress");
            return TurnOutcome::Busy;
        };
        let _flags = FlagGuard(&self.state);

        let req = TurnRequest {
            message: text.to_owned(),
            chat_id: turn.chat_id,
            attachments,
        };
        let mut progress = TurnProgress {
            assistant_id: turn.assistant_id,
            content: String::new(),
            malformed: 0,
        };

        match self.run(&req, &mut progress).await {
            Ok(()) => {
                debug!(content_len = progress.content.len(), "turn completed");
                TurnOutcome::Completed
            }
            Err(failure) => {
                if let TurnFailure::Transport(e) = &failure {
                    warn!(error = %e, "turn transport failed");
                }
                let shown = failure.render();
                self.state.overwrite_content(turn.assistant_id, shown.clone());
                TurnOutcome::Failed(shown)
            }
        }
    }

    async fn run(&self, req: &TurnRequest, progress: &mut TurnProgress) -> Result<(), TurnFailure> {
        let mut body = self.backend.open_turn(req).await?;
        let mut decoder = RecordDecoder::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(TurnFailure::Transport)?;
            for record in decoder.push(&chunk) {
                if self.apply(record, progress)?.is_break() {
                    return Ok(());
                }
            }
        }
        if let Some(record) = decoder.finish() {
            if self.apply(record, progress)?.is_break() {
                return Ok(());
            }
        }
        Err(TurnFailure::Transport(ClientError::Truncated))
    }

    fn apply(
        &self,
        record: Result<StreamRecord, WireError>,
        progress: &mut TurnProgress,
    ) -> Result<ControlFlow<()>, TurnFailure> {
        match record {
            Ok(StreamRecord::ChatCreated { chat_id }) => {
                info!(chat_id, "server created chat");
                self.state.set_active_chat(Some(chat_id));
                self.refresh_chats();
            }
            Ok(StreamRecord::Token { token }) => {
                progress.content.push_str(&token);
                self.state
                    .overwrite_content(progress.assistant_id, progress.content.clone());
            }
            Ok(StreamRecord::Done) => return Ok(ControlFlow::Break(())),
            Ok(StreamRecord::Error { error }) => return Err(TurnFailure::Reported(error)),
            Err(e) => {
                progress.malformed += 1;
                warn!(error = %e, count = progress.malformed, "skipping malformed stream record");
                if progress.malformed >= MALFORMED_LIMIT {
                    return Err(TurnFailure::Transport(ClientError::Malformed(progress.malformed)));
                }
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Reload the chat list in the background.
    fn refresh_chats(&self) {
        let backend = Arc::clone(&self.backend);
        let state = self.state.clone();
        tokio::spawn(async move {
            match backend.list_chats().await {
                Ok(chats) => state.set_chats(chats),
                Err(e) => warn!(error = %e, "chat list refresh failed"),
            }
        });
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
