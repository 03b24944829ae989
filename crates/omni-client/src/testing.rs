//! In-memory backend for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use omni_types::{Chat, ChatId, Message, TurnRequest};

use crate::backend::{ByteStream, ChatBackend};
use crate::error::ClientError;

/// What `open_turn` answers with.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Deliver these chunks, then end the body.
    Body(Vec<Vec<u8>>),
    /// Refuse the turn before streaming.
    Reject(String),
    /// Deliver these chunks, then fail the connection.
    Broken(Vec<Vec<u8>>),
    /// Deliver these chunks, then never finish.
    Hang(Vec<Vec<u8>>),
}

#[derive(Debug)]
pub struct FakeBackend {
    reply: Reply,
    chats: Vec<Chat>,
    messages: Vec<Message>,
    requests: Mutex<Vec<TurnRequest>>,
    chat_list_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply,
            chats: Vec::new(),
            messages: Vec::new(),
            requests: Mutex::new(Vec::new()),
            chat_list_calls: AtomicUsize::new(0),
        }
    }

    /// Deliver each string as its own chunk.
    pub fn chunks(chunks: &[&str]) -> Self {
        Self::new(Reply::Body(chunks.iter().map(|c| c.as_bytes().to_vec()).collect()))
    }

    pub fn with_history(mut self, chats: Vec<Chat>, messages: Vec<Message>) -> Self {
        self.chats = chats;
        self.messages = messages;
        self
    }

    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn chat_list_calls(&self) -> usize {
        self.chat_list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn open_turn(&self, req: &TurnRequest) -> Result<ByteStream, ClientError> {
        self.requests.lock().unwrap().push(req.clone());
        let items = |chunks: &Vec<Vec<u8>>| -> Vec<Result<Bytes, ClientError>> {
            chunks.iter().map(|c| Ok(Bytes::from(c.clone()))).collect()
        };
        match &self.reply {
            Reply::Reject(message) => Err(ClientError::Rejected(message.clone())),
            Reply::Body(chunks) => Ok(futures::stream::iter(items(chunks)).boxed()),
            Reply::Broken(chunks) => {
                let mut items = items(chunks);
                items.push(Err(ClientError::Truncated));
                Ok(futures::stream::iter(items).boxed())
            }
            Reply::Hang(chunks) => Ok(futures::stream::iter(items(chunks))
                .chain(futures::stream::pending())
                .boxed()),
        }
    }

    async fn list_chats(&self) -> Result<Vec<Chat>, ClientError> {
        self.chat_list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.chats.clone())
    }

    async fn list_messages(&self, chat_id: ChatId) -> Result<Vec<Message>, ClientError> {
        if !self.chats.iter().any(|c| c.id == chat_id) {
            return Err(ClientError::Rejected(format!("chat {chat_id} not found")));
        }
        Ok(self
            .messages
            .iter()
            .filter(|m| m.chat_id == Some(chat_id))
            .cloned()
            .collect())
    }
}
