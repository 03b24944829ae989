//! Transport to the chat server.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use omni_types::{Chat, ChatId, Message, TurnRequest};
use tracing::debug;

use crate::error::ClientError;

/// Raw body of a turn's event stream.
pub type ByteStream = BoxStream<'static, Result<Bytes, ClientError>>;

/// Server operations the client depends on.
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    /// Submit a turn and return its event-stream body.
    ///
    /// A turn the server refuses before streaming yields
    /// [`ClientError::Rejected`] with the server's message.
    async fn open_turn(&self, req: &TurnRequest) -> Result<ByteStream, ClientError>;

    /// All chats, newest first.
    async fn list_chats(&self) -> Result<Vec<Chat>, ClientError>;

    /// Messages of one chat, oldest first.
    async fn list_messages(&self, chat_id: ChatId) -> Result<Vec<Message>, ClientError>;
}

/// [`ChatBackend`] over the server's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChatApi {
    /// `base_url` is the server root, e.g. `http://localhost:5000`.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }
}

/// Turn a non-success response into [`ClientError::Rejected`], using the
/// `error` field of its JSON body when present.
async fn rejection(resp: reqwest::Response) -> ClientError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_owned))
        .unwrap_or_else(|| format!("server returned HTTP {}", status.as_u16()));
    debug!(status = status.as_u16(), %message, "request rejected");
    ClientError::Rejected(message)
}

#[async_trait]
impl ChatBackend for HttpChatApi {
    async fn open_turn(&self, req: &TurnRequest) -> Result<ByteStream, ClientError> {
        let resp = self
            .client
            .post(self.url("/chat"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(req)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(rejection(resp).await);
        }
        Ok(resp.bytes_stream().map(|r| r.map_err(ClientError::from)).boxed())
    }

    async fn list_chats(&self) -> Result<Vec<Chat>, ClientError> {
        let resp = self.client.get(self.url("/chat")).send().await?;
        if !resp.status().is_success() {
            return Err(rejection(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn list_messages(&self, chat_id: ChatId) -> Result<Vec<Message>, ClientError> {
        let resp = self
            .client
            .get(self.url(&format!("/chat/{chat_id}")))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(rejection(resp).await);
        }
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trailing_slash_is_ignored() {
        let api = HttpChatApi::new("http://localhost:5000/").unwrap();
        assert_eq!(api.url("/chat"), "http://localhost:5000/api/chat");
    }
}
