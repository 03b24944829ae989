//! Stream relay: runs one chat turn.
//!
//! [`begin_turn`] does everything that must happen before the event stream
//! opens (validation, chat creation, persisting the user message) and
//! reports failures synchronously.  It then hands back the receiving half of
//! the turn's record channel and spawns [`run_turn`], which owns the sending
//! half, pulls fragments from the model bridge, relays each one as soon as it
//! arrives and persists the assembled assistant message at the end.
//!
//! Dropping the receiver (the HTTP response going away) cancels the turn:
//! the task stops pulling fragments and persists nothing further.

use std::sync::Arc;

use futures::StreamExt;
use omni_types::{derive_title, ChatId, Message, Role, StreamRecord, TurnRequest};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::bridge::BridgeError;
use crate::entities::{ChatStore, MessageStore, NewMessage};
use crate::error::ServerError;
use crate::state::AppState;

/// Maximum allowed message length in bytes.
pub const MAX_MESSAGE_BYTES: usize = 128 * 1024;

/// Records buffered between the turn task and the HTTP response.
const RECORD_BUFFER: usize = 64;

/// Failures after the stream has opened.  Rendered as an error record.
#[derive(Debug, Error)]
enum TurnError {
    #[error("{0}")]
    Bridge(#[from] BridgeError),

    #[error("database error: {0}")]
    Store(#[from] sqlx::Error),
}

impl TurnError {
    /// Text placed in the error record.
    fn client_message(&self) -> String {
        match self {
            TurnError::Bridge(e) => format!("Failed to generate response: {e}"),
            TurnError::Store(_) => "Failed to generate response".to_owned(),
        }
    }
}

/// How the fragment loop ended when it did not fail.
enum TurnEnd {
    Completed(String),
    Cancelled,
}

/// Validate the request, resolve or create the chat, persist the user
/// message and start the turn task.
///
/// Every error returned here happens before any stream byte is sent.
pub async fn begin_turn(
    state: Arc<AppState>,
    req: TurnRequest,
) -> Result<mpsc::Receiver<StreamRecord>, ServerError> {
    validate(&req)?;

    let (chat_id, new_chat, user_message) = match req.chat_id {
        Some(id) => {
            let chat = state
                .store
                .get_chat(id)
                .await?
                .ok_or_else(|| ServerError::NotFound(format!("chat {id} not found")))?;
            let user_message = state
                .store
                .append_message(NewMessage {
                    chat_id: chat.id,
                    role: Role::User,
                    content: req.message,
                    attachments: req.attachments,
                    timestamp: state.clock.tick(),
                })
                .await?;
            (chat.id, false, user_message)
        }
        None => {
            let title = derive_title(&req.message);
            let created_at = state.clock.tick();
            let first = NewMessage {
                chat_id: 0,
                role: Role::User,
                content: req.message,
                attachments: req.attachments,
                timestamp: state.clock.tick(),
            };
            let (chat, user_message) = state
                .store
                .create_chat_with_message(&title, created_at, first)
                .await?;
            info!(chat_id = chat.id, title = %chat.title, "chat created");
            (chat.id, true, user_message)
        }
    };

    let (tx, rx) = mpsc::channel(RECORD_BUFFER);
    if new_chat {
        tx.try_send(StreamRecord::ChatCreated { chat_id })
            .map_err(|e| ServerError::Internal(format!("record channel rejected chat id: {e}")))?;
    }

    let span = info_span!("turn", chat_id, new_chat, user_message_id = user_message.id);
    tokio::spawn(run_turn(state, tx, chat_id, user_message).instrument(span));
    Ok(rx)
}

fn validate(req: &TurnRequest) -> Result<(), ServerError> {
    if req.message.len() > MAX_MESSAGE_BYTES {
        return Err(ServerError::BadRequest(format!(
            "message too large ({} bytes); maximum is {} bytes",
            req.message.len(),
            MAX_MESSAGE_BYTES,
        )));
    }
    if req.message.trim().is_empty() && req.attachments.is_empty() {
        return Err(ServerError::BadRequest("message is empty".into()));
    }
    Ok(())
}

/// Drive one turn after the stream has opened.
async fn run_turn(
    state: Arc<AppState>,
    tx: mpsc::Sender<StreamRecord>,
    chat_id: ChatId,
    user_message: Message,
) {
    let outcome = match relay_fragments(&state, &tx, chat_id, &user_message).await {
        Ok(TurnEnd::Completed(content)) => persist_reply(&state, chat_id, content).await,
        Ok(TurnEnd::Cancelled) => {
            info!("client went away; turn cancelled without persisting a reply");
            return;
        }
        Err(e) => Err(e),
    };

    let last = match outcome {
        Ok(()) => StreamRecord::Done,
        Err(e) => {
            warn!(error = %e, "turn failed");
            StreamRecord::Error {
                error: e.client_message(),
            }
        }
    };
    if tx.send(last).await.is_err() {
        debug!("client went away before the final record");
    }
}

/// Relay every fragment the bridge produces, in order, and return their
/// concatenation.
async fn relay_fragments(
    state: &AppState,
    tx: &mpsc::Sender<StreamRecord>,
    chat_id: ChatId,
    user_message: &Message,
) -> Result<TurnEnd, TurnError> {
    let history = context_window(state, chat_id, user_message).await?;
    debug!(history_len = history.len(), "invoking model bridge");

    let mut fragments = tokio::select! {
        biased;
        _ = tx.closed() => return Ok(TurnEnd::Cancelled),
        started = state.bridge.generate(&history, &user_message.content, &user_message.attachments) => started?,
    };

    let mut content = String::new();
    let mut count = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => return Ok(TurnEnd::Cancelled),
            next = fragments.next() => next,
        };
        match next {
            Some(Ok(fragment)) => {
                content.push_str(&fragment);
                count += 1;
                if tx.send(StreamRecord::Token { token: fragment }).await.is_err() {
                    return Ok(TurnEnd::Cancelled);
                }
            }
            Some(Err(e)) => return Err(e.into()),
            None => break,
        }
    }

    if tx.is_closed() {
        return Ok(TurnEnd::Cancelled);
    }
    debug!(fragments = count, content_len = content.len(), "model stream finished");
    Ok(TurnEnd::Completed(content))
}

/// The most recent messages before `user_message`, oldest first.
async fn context_window(
    state: &AppState,
    chat_id: ChatId,
    user_message: &Message,
) -> Result<Vec<Message>, TurnError> {
    let limit = state.config.context_window;
    let mut history = state.store.recent_messages(chat_id, limit.saturating_add(1)).await?;
    history.retain(|m| m.id != user_message.id);
    if history.len() > limit {
        history.drain(..history.len() - limit);
    }
    Ok(history)
}

async fn persist_reply(state: &AppState, chat_id: ChatId, content: String) -> Result<(), TurnError> {
    let reply = state
        .store
        .append_message(NewMessage {
            chat_id,
            role: Role::Assistant,
            content,
            attachments: Vec::new(),
            timestamp: state.clock.tick(),
        })
        .await?;
    info!(assistant_message_id = reply.id, "turn completed");
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use crate::bridge::scripted::{Script, ScriptedBridge};
    use std::time::Duration;

    async fn setup(script: Script, window: usize) -> (Arc<AppState>, Arc<ScriptedBridge>) {
        let bridge = Arc::new(ScriptedBridge::new(script));
        let state = AppState::for_tests(bridge.clone(), window).await;
        (state, bridge)
    }

    fn turn(message: &str, chat_id: Option<ChatId>) -> TurnRequest {
        TurnRequest {
            message: message.into(),
            chat_id,
            attachments: vec![],
        }
    }

    async fn collect(mut rx: mpsc::Receiver<StreamRecord>) -> Vec<StreamRecord> {
        let mut records = Vec::new();
        while let Some(r) = rx.recv().await {
            records.push(r);
        }
        records
    }

    fn token(s: &str) -> StreamRecord {
        StreamRecord::Token { token: s.into() }
    }

    #[tokio::test]
    async fn new_chat_turn_streams_and_persists_both_messages() {
        let (state, _) = setup(Script::Reply(vec!["Hel", "lo"]), 20).await;

        let records = collect(begin_turn(state.clone(), turn("hi", None)).await.unwrap()).await;

        let chats = state.store.list_chats().await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].title, "hi");
        assert_eq!(
            records,
            vec![
                StreamRecord::ChatCreated { chat_id: chats[0].id },
                token("Hel"),
                token("lo"),
                StreamRecord::Done,
            ]
        );

        let messages = state.store.list_messages(chats[0].id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!((messages[0].role, messages[0].content.as_str()), (Role::User, "hi"));
        assert_eq!((messages[1].role, messages[1].content.as_str()), (Role::Assistant, "Hello"));
        assert!(messages[0].timestamp < messages[1].timestamp);
    }

    #[tokio::test]
    async fn long_first_message_is_truncated_into_title() {
        let (state, _) = setup(Script::Reply(vec!["ok"]), 20).await;
        let text = "Explain the borrow checker to me like I am five";
        collect(begin_turn(state.clone(), turn(text, None)).await.unwrap()).await;
        let chats = state.store.list_chats().await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].title, "Explain the borrow checker to ...");
    }

    #[tokio::test]
    async fn existing_chat_turn_appends_after_prior_messages() {
        let (state, _) = setup(Script::Reply(vec!["second answer"]), 20).await;
        let first = collect(begin_turn(state.clone(), turn("first", None)).await.unwrap()).await;
        let StreamRecord::ChatCreated { chat_id } = first[0] else {
            panic!("expected chat id first, got {first:?}");
        };
        let before = state.store.list_messages(chat_id).await.unwrap();

        let records = collect(begin_turn(state.clone(), turn("second", Some(chat_id))).await.unwrap()).await;
        assert_eq!(records, vec![token("second answer"), StreamRecord::Done]);

        let after = state.store.list_messages(chat_id).await.unwrap();
        assert_eq!(after.len(), before.len() + 2);
        assert_eq!(&after[..before.len()], &before[..]);
        let new = &after[before.len()..];
        assert_eq!(new[0].role, Role::User);
        assert_eq!(new[1].role, Role::Assistant);
        assert!(before.last().unwrap().timestamp < new[0].timestamp);
        assert!(new[0].timestamp < new[1].timestamp);
        assert_eq!(state.store.list_chats().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_chat_is_rejected_without_writes() {
        let (state, bridge) = setup(Script::Reply(vec!["x"]), 20).await;
        let err = begin_turn(state.clone(), turn("hello", Some(77))).await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
        assert!(state.store.list_chats().await.unwrap().is_empty());
        assert!(bridge.calls().is_empty());
    }

    #[tokio::test]
    async fn blank_message_is_rejected() {
        let (state, _) = setup(Script::Reply(vec![]), 20).await;
        let err = begin_turn(state.clone(), turn("   ", None)).await.unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
        assert!(state.store.list_chats().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_message_is_rejected() {
        let (state, _) = setup(Script::Reply(vec![]), 20).await;
        let big = "x".repeat(MAX_MESSAGE_BYTES + 1);
        let err = begin_turn(state, turn(&big, None)).await.unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
    }

    #[tokio::test]
    async fn bridge_failure_keeps_user_message_and_writes_no_reply() {
        let (state, _) = setup(Script::FailOnCall, 20).await;
        let records = collect(begin_turn(state.clone(), turn("hi", None)).await.unwrap()).await;

        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], StreamRecord::ChatCreated { .. }));
        assert!(matches!(&records[1], StreamRecord::Error { error } if error.starts_with("Failed to generate response")));

        let chat = state.store.list_chats().await.unwrap()[0].id;
        let messages = state.store.list_messages(chat).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn mid_stream_failure_ends_with_error_and_no_partial_reply() {
        let (state, _) = setup(Script::FailAfter(vec!["par", "tial"]), 20).await;
        let records = collect(begin_turn(state.clone(), turn("hi", None)).await.unwrap()).await;

        assert_eq!(&records[1..3], &[token("par"), token("tial")]);
        assert!(matches!(records.last(), Some(StreamRecord::Error { .. })));
        assert_eq!(records.len(), 4);

        let chat = state.store.list_chats().await.unwrap()[0].id;
        let messages = state.store.list_messages(chat).await.unwrap();
        assert!(messages.iter().all(|m| m.role == Role::User));
    }

    #[tokio::test]
    async fn user_message_write_failure_is_synchronous() {
        let (state, bridge) = setup(Script::Reply(vec!["x"]), 20).await;
        sqlx::query("DROP TABLE messages")
            .execute(state.store.pool())
            .await
            .unwrap();

        let err = begin_turn(state.clone(), turn("hi", None)).await.unwrap_err();
        assert!(matches!(err, ServerError::Database(_)));
        assert!(bridge.calls().is_empty());
        assert!(state.store.list_chats().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bridge_failing_on_first_fragment_keeps_user_message() {
        let (state, bridge) = setup(Script::FailAfter(vec![]), 20).await;
        let records = collect(begin_turn(state.clone(), turn("hi", None)).await.unwrap()).await;

        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], StreamRecord::ChatCreated { .. }));
        assert!(matches!(&records[1], StreamRecord::Error { error } if error.starts_with("Failed to generate response")));
        assert_eq!(bridge.calls().len(), 1);

        let chat = state.store.list_chats().await.unwrap()[0].id;
        let messages = state.store.list_messages(chat).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!((messages[0].role, messages[0].content.as_str()), (Role::User, "hi"));
    }

    #[tokio::test]
    async fn huge_context_window_does_not_break_the_turn() {
        let (state, bridge) = setup(Script::Reply(vec!["ok"]), usize::MAX).await;
        let first = collect(begin_turn(state.clone(), turn("one", None)).await.unwrap()).await;
        let StreamRecord::ChatCreated { chat_id } = first[0] else {
            panic!("expected chat id first, got {first:?}");
        };
        assert_eq!(&first[1..], &[token("ok"), StreamRecord::Done]);

        let records = collect(begin_turn(state.clone(), turn("two", Some(chat_id))).await.unwrap()).await;
        assert_eq!(records, vec![token("ok"), StreamRecord::Done]);
        assert_eq!(bridge.calls()[1].history.len(), 2);
        assert_eq!(state.store.list_messages(chat_id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn history_window_excludes_current_message_and_is_bounded() {
        let (state, bridge) = setup(Script::Reply(vec!["r"]), 2).await;
        let first = collect(begin_turn(state.clone(), turn("one", None)).await.unwrap()).await;
        let StreamRecord::ChatCreated { chat_id } = first[0] else {
            panic!("expected chat id first");
        };
        collect(begin_turn(state.clone(), turn("two", Some(chat_id))).await.unwrap()).await;
        collect(begin_turn(state.clone(), turn("three", Some(chat_id))).await.unwrap()).await;

        let calls = bridge.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].history.is_empty());
        let last = &calls[2];
        assert_eq!(last.text, "three");
        let window: Vec<(Role, &str)> = last
            .history
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(window, vec![(Role::User, "two"), (Role::Assistant, "r")]);
    }

    #[tokio::test]
    async fn dropped_receiver_cancels_turn_without_reply() {
        let (state, bridge) = setup(Script::Hang(vec!["partial"]), 20).await;
        let mut rx = begin_turn(state.clone(), turn("hi", None)).await.unwrap();

        assert!(matches!(rx.recv().await, Some(StreamRecord::ChatCreated { .. })));
        assert_eq!(rx.recv().await, Some(token("partial")));
        drop(rx);

        tokio::time::timeout(Duration::from_secs(2), async {
            while !bridge.stream_dropped() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("turn task should release the fragment stream");

        let chat = state.store.list_chats().await.unwrap()[0].id;
        let messages = state.store.list_messages(chat).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }
}
