//! Conversation state container.
//!
//! [`ConversationState`] is the client's in-memory mirror of the active chat.
//! It is never persisted; it is filled from the server's history endpoints
//! and mutated while a turn streams in.
//!
//! [`StateHandle`] is the only way to reach it.  Handles are cheap to clone
//! and share one state.  Every mutation bumps a change counter published on a
//! `tokio::sync::watch` channel, so a front-end can re-render after each
//! fragment without polling.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use omni_types::{Attachment, Chat, ChatId, Message, MessageId, Role, Timestamp};
use tokio::sync::watch;

/// Snapshot of the client-visible conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationState {
    /// Messages of the active chat, oldest first.
    pub messages: Vec<Message>,
    /// Known chats, newest first.
    pub chats: Vec<Chat>,
    /// `None` for a new chat the server has not created yet.
    pub active_chat_id: Option<ChatId>,
    /// True from turn start until the turn ends, and while history loads.
    pub is_loading: bool,
    /// True while fragments of a turn are being applied.
    pub is_streaming: bool,
}

/// Ids of the two messages [`StateHandle::begin_turn`] appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTurn {
    pub user_id: MessageId,
    pub assistant_id: MessageId,
    /// Active chat when the turn started.
    pub chat_id: Option<ChatId>,
}

#[derive(Debug)]
struct Inner {
    state: ConversationState,
    next_id: MessageId,
}

/// Shared, observable handle to a [`ConversationState`].
#[derive(Debug, Clone)]
pub struct StateHandle {
    inner: Arc<Mutex<Inner>>,
    changes: watch::Sender<u64>,
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

impl StateHandle {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: ConversationState::default(),
                next_id: now_ms(),
            })),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let out = f(&mut self.lock());
        self.changes.send_modify(|n| *n = n.wrapping_add(1));
        out
    }

    /// Receiver that observes a new value after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    // ── Mutations ─────────────────────────────────────────────────────────────

    /// Append the user message and an empty assistant placeholder, and set
    /// both flags.
    ///
    /// Returns `None` without touching the state when a turn or history load
    /// is already in progress.
    pub fn begin_turn(&self, text: &str, attachments: Vec<Attachment>) -> Option<PendingTurn> {
        let mut guard = self.lock();
        if guard.state.is_loading {
            return None;
        }
        let inner = &mut *guard;
        let chat_id = inner.state.active_chat_id;
        let timestamp = now_ms();

        let user_id = inner.next_id;
        let assistant_id = inner.next_id + 1;
        inner.next_id += 2;

        inner.state.messages.push(Message {
            id: user_id,
            chat_id,
            role: Role::User,
            content: text.to_owned(),
            attachments,
            timestamp,
        });
        inner.state.messages.push(Message {
            id: assistant_id,
            chat_id,
            role: Role::Assistant,
            content: String::new(),
            attachments: Vec::new(),
            timestamp: timestamp + 1,
        });
        inner.state.is_loading = true;
        inner.state.is_streaming = true;
        drop(guard);

        self.changes.send_modify(|n| *n = n.wrapping_add(1));
        Some(PendingTurn {
            user_id,
            assistant_id,
            chat_id,
        })
    }

    /// Replace the content of message `id`.  Returns `false` when no such
    /// message is present (for example after the user switched chats).
    pub fn overwrite_content(&self, id: MessageId, content: impl Into<String>) -> bool {
        let content = content.into();
        self.update(|inner| {
            match inner.state.messages.iter_mut().find(|m| m.id == id) {
                Some(message) => {
                    message.content = content;
                    true
                }
                None => false,
            }
        })
    }

    /// Point the state at `chat_id`.  Messages not yet attached to a chat
    /// are attached to it.
    pub fn set_active_chat(&self, chat_id: Option<ChatId>) {
        self.update(|inner| {
            inner.state.active_chat_id = chat_id;
            if chat_id.is_some() {
                for message in inner.state.messages.iter_mut().filter(|m| m.chat_id.is_none()) {
                    message.chat_id = chat_id;
                }
            }
        })
    }

    pub fn set_chats(&self, chats: Vec<Chat>) {
        self.update(|inner| inner.state.chats = chats)
    }

    pub fn replace_messages(&self, messages: Vec<Message>) {
        self.update(|inner| inner.state.messages = messages)
    }

    pub fn set_loading(&self, loading: bool) {
        self.update(|inner| inner.state.is_loading = loading)
    }

    /// Clear both turn flags.
    pub fn finish_turn(&self) {
        self.update(|inner| {
            inner.state.is_loading = false;
            inner.state.is_streaming = false;
        })
    }

    /// Start a new, unsaved chat.  The chat list is kept.
    pub fn reset(&self) {
        self.update(|inner| {
            inner.state.active_chat_id = None;
            inner.state.messages.clear();
        })
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> ConversationState {
        self.lock().state.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().state.messages.clone()
    }

    pub fn message(&self, id: MessageId) -> Option<Message> {
        self.lock().state.messages.iter().find(|m| m.id == id).cloned()
    }

    pub fn chats(&self) -> Vec<Chat> {
        self.lock().state.chats.clone()
    }

    pub fn active_chat_id(&self) -> Option<ChatId> {
        self.lock().state.active_chat_id
    }

    pub fn is_loading(&self) -> bool {
        self.lock().state.is_loading
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().state.is_streaming
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
