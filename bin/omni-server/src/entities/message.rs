use std::future::Future;

use omni_types::{Attachment, ChatId, Message, Role, Timestamp};

use sqlx::SqliteExecutor;

use crate::entities::SqliteStore;

/// A message row before the store has assigned its id.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub role: Role,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub timestamp: Timestamp,
}

pub trait MessageStore: Send + Sync + 'static {
    /// Insert a message and return it with its assigned id.
    fn append_message(
        &self,
        msg: NewMessage,
    ) -> impl Future<Output = Result<Message, sqlx::Error>> + Send;

    /// All messages of a chat, oldest first.
    fn list_messages(
        &self,
        chat_id: ChatId,
    ) -> impl Future<Output = Result<Vec<Message>, sqlx::Error>> + Send;

    /// The `limit` most recent messages of a chat, oldest first.
    fn recent_messages(
        &self,
        chat_id: ChatId,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Message>, sqlx::Error>> + Send;
}

type MessageRow = (i64, i64, String, String, String, i64);

impl MessageStore for SqliteStore {
    async fn append_message(&self, msg: NewMessage) -> Result<Message, sqlx::Error> {
        insert_message(&self.pool, msg).await
    }

    async fn list_messages(&self, chat_id: ChatId) -> Result<Vec<Message>, sqlx::Error> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, chat_id, role, content, attachments, timestamp \
             FROM messages WHERE chat_id = ?1 ORDER BY timestamp ASC, id ASC",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_message).collect()
    }

    async fn recent_messages(
        &self,
        chat_id: ChatId,
        limit: usize,
    ) -> Result<Vec<Message>, sqlx::Error> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, chat_id, role, content, attachments, timestamp \
             FROM messages WHERE chat_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )
        .bind(chat_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        let mut messages = rows
            .into_iter()
            .map(row_to_message)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

/// Insert `msg` through any executor, so the insert can join a transaction.
pub(crate) async fn insert_message<'e, E>(executor: E, msg: NewMessage) -> Result<Message, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let attachments =
        serde_json::to_string(&msg.attachments).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    let result = sqlx::query(
        "INSERT INTO messages (chat_id, role, content, attachments, timestamp) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(msg.chat_id)
    .bind(msg.role.as_ref())
    .bind(&msg.content)
    .bind(&attachments)
    .bind(msg.timestamp)
    .execute(executor)
    .await?;
    Ok(Message {
        id: result.last_insert_rowid(),
        chat_id: Some(msg.chat_id),
        role: msg.role,
        content: msg.content,
        attachments: msg.attachments,
        timestamp: msg.timestamp,
    })
}

fn row_to_message(
    (id, chat_id, role, content, attachments, timestamp): MessageRow,
) -> Result<Message, sqlx::Error> {
    let role = role
        .parse::<Role>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let attachments =
        serde_json::from_str(&attachments).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(Message {
        id,
        chat_id: Some(chat_id),
        role,
        content,
        attachments,
        timestamp,
    })
}
