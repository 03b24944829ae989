use std::future::Future;

use omni_types::{Chat, ChatId, Message, Timestamp};

use crate::entities::message::{insert_message, NewMessage};
use crate::entities::SqliteStore;

pub trait ChatStore: Send + Sync + 'static {
    /// Insert a chat and return it with its assigned id.
    fn create_chat(
        &self,
        title: &str,
        created_at: Timestamp,
    ) -> impl Future<Output = Result<Chat, sqlx::Error>> + Send;

    /// Insert a chat together with its first message in one transaction.
    /// `first.chat_id` is replaced by the new chat's id.
    fn create_chat_with_message(
        &self,
        title: &str,
        created_at: Timestamp,
        first: NewMessage,
    ) -> impl Future<Output = Result<(Chat, Message), sqlx::Error>> + Send;

    fn get_chat(
        &self,
        id: ChatId,
    ) -> impl Future<Output = Result<Option<Chat>, sqlx::Error>> + Send;

    /// All chats, newest first.
    fn list_chats(&self) -> impl Future<Output = Result<Vec<Chat>, sqlx::Error>> + Send;
}

impl ChatStore for SqliteStore {
    async fn create_chat(&self, title: &str, created_at: Timestamp) -> Result<Chat, sqlx::Error> {
        let result = sqlx::query("INSERT INTO chats (title, created_at) VALUES (?1, ?2)")
            .bind(title)
            .bind(created_at)
            .execute(&self.pool)
            .await?;
        Ok(Chat {
            id: result.last_insert_rowid(),
            title: title.to_owned(),
            created_at,
        })
    }

    async fn create_chat_with_message(
        &self,
        title: &str,
        created_at: Timestamp,
        mut first: NewMessage,
    ) -> Result<(Chat, Message), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("INSERT INTO chats (title, created_at) VALUES (?1, ?2)")
            .bind(title)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
        let chat = Chat {
            id: result.last_insert_rowid(),
            title: title.to_owned(),
            created_at,
        };
        first.chat_id = chat.id;
        let message = insert_message(&mut *tx, first).await?;
        tx.commit().await?;
        Ok((chat, message))
    }

    async fn get_chat(&self, id: ChatId) -> Result<Option<Chat>, sqlx::Error> {
        let row: Option<(i64, String, i64)> =
            sqlx::query_as("SELECT id, title, created_at FROM chats WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, title, created_at)| Chat {
            id,
            title,
            created_at,
        }))
    }

    async fn list_chats(&self) -> Result<Vec<Chat>, sqlx::Error> {
        let rows: Vec<(i64, String, i64)> = sqlx::query_as(
            "SELECT id, title, created_at FROM chats ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, title, created_at)| Chat {
                id,
                title,
                created_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entities::MessageStore;
    use omni_types::Role;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn create_assigns_distinct_ids() {
        let store = store().await;
        let a = store.create_chat("first", 1).await.unwrap();
        let b = store.create_chat("second", 2).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.get_chat(a.id).await.unwrap(), Some(a));
    }

    #[tokio::test]
    async fn missing_chat_is_none() {
        let store = store().await;
        assert_eq!(store.get_chat(404).await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = store().await;
        store.create_chat("old", 10).await.unwrap();
        store.create_chat("new", 20).await.unwrap();
        store.create_chat("middle", 15).await.unwrap();
        let titles: Vec<String> = store
            .list_chats()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert_eq!(titles, vec!["new", "middle", "old"]);
    }

    #[tokio::test]
    async fn chat_and_first_message_are_written_together() {
        let store = store().await;
        let first = NewMessage {
            chat_id: 0,
            role: Role::User,
            content: "hello".into(),
            attachments: vec![],
            timestamp: 5,
        };
        let (chat, message) = store.create_chat_with_message("hello", 5, first).await.unwrap();
        assert_eq!(message.chat_id, Some(chat.id));
        assert_eq!(store.list_messages(chat.id).await.unwrap(), vec![message]);
    }

    #[tokio::test]
    async fn failed_first_message_leaves_no_chat_behind() {
        let store = store().await;
        sqlx::query("DROP TABLE messages")
            .execute(store.pool())
            .await
            .unwrap();
        let first = NewMessage {
            chat_id: 0,
            role: Role::User,
            content: "hello".into(),
            attachments: vec![],
            timestamp: 5,
        };
        assert!(store.create_chat_with_message("hello", 5, first).await.is_err());
        assert!(store.list_chats().await.unwrap().is_empty());
    }
}
