//! Gemini `streamGenerateContent` bridge.
//!
//! Sends the history window plus the new user turn to the Gemini REST API
//! with `alt=sse` and decodes the provider's own event stream into plain
//! text fragments.  Attachments are resolved against the upload directory
//! and inlined as base64 parts.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use omni_types::{Attachment, AttachmentKind, Message, Role, SseDecoder};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{BridgeError, FragmentStream, ModelBridge};
use crate::config::Config;

#[derive(Debug, Clone)]
pub struct GeminiBridge {
    client: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    upload_dir: PathBuf,
}

// ── Provider wire types ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

// ── Bridge ────────────────────────────────────────────────────────────────────

impl GeminiBridge {
    pub fn from_config(cfg: &Config) -> Result<Self, BridgeError> {
        Self::new(
            cfg.gemini_api_key.clone(),
            cfg.gemini_model.clone(),
            cfg.gemini_base_url.clone(),
            PathBuf::from(&cfg.upload_dir),
            cfg.model_timeout,
        )
    }

    pub fn new(
        api_key: Option<String>,
        model: String,
        base_url: String,
        upload_dir: PathBuf,
        timeout: Duration,
    ) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .user_agent(concat!("omni-server/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_owned(),
            upload_dir,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }

    async fn build_request(
        &self,
        history: &[Message],
        text: &str,
        attachments: &[Attachment],
    ) -> Result<GenerateRequest, BridgeError> {
        let mut contents: Vec<Content> = history
            .iter()
            .filter(|m| !m.content.is_empty())
            .map(|m| Content {
                role: provider_role(m.role),
                parts: vec![Part::Text {
                    text: m.content.clone(),
                }],
            })
            .collect();

        let mut parts = vec![Part::Text {
            text: text.to_owned(),
        }];
        for attachment in attachments {
            if let Some(part) = self.inline_attachment(attachment).await? {
                parts.push(part);
            }
        }
        contents.push(Content {
            role: "user",
            parts,
        });

        Ok(GenerateRequest { contents })
    }

    /// Load an attachment from the upload directory.  Returns `None` when
    /// the file is not there.
    async fn inline_attachment(&self, attachment: &Attachment) -> Result<Option<Part>, BridgeError> {
        let Some(path) = resolve_upload(&self.upload_dir, &attachment.url) else {
            warn!(url = %attachment.url, "attachment URL has no usable file name; skipping");
            return Ok(None);
        };
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!(path = %path.display(), "attachment file not found; skipping");
            return Ok(None);
        }
        let bytes = tokio::fs::read(&path).await?;
        Ok(Some(Part::Inline {
            inline_data: InlineData {
                mime_type: mime_type_for(&path, attachment.kind).to_owned(),
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            },
        }))
    }
}

#[async_trait]
impl ModelBridge for GeminiBridge {
    async fn generate(
        &self,
        history: &[Message],
        text: &str,
        attachments: &[Attachment],
    ) -> Result<FragmentStream, BridgeError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BridgeError::NotConfigured("GEMINI_API_KEY is not set".into()))?;

        let body = self.build_request(history, text, attachments).await?;
        debug!(model = %self.model, contents = body.contents.len(), "calling gemini");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %detail, "gemini request rejected");
            return Err(BridgeError::Api {
                status: status.as_u16(),
            });
        }

        Ok(fragment_stream(response.bytes_stream().boxed()))
    }
}

// ── Stream decoding ───────────────────────────────────────────────────────────

struct DecodeState {
    body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, BridgeError>>,
    finished: bool,
}

impl DecodeState {
    /// Queue the fragments carried by one provider event.  Returns `false`
    /// when the event ended the stream with an error.
    fn accept(&mut self, data: &str) -> bool {
        match parse_chunk(data) {
            Ok(Some(text)) => {
                self.pending.push_back(Ok(text));
                true
            }
            Ok(None) => true,
            Err(e) => {
                self.pending.push_back(Err(e));
                false
            }
        }
    }
}

fn fragment_stream(body: BoxStream<'static, Result<Bytes, reqwest::Error>>) -> FragmentStream {
    let state = DecodeState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    for data in st.decoder.push(&chunk) {
                        if !st.accept(&data) {
                            st.finished = true;
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    st.pending.push_back(Err(BridgeError::Http(e)));
                    st.finished = true;
                }
                None => {
                    st.finished = true;
                    if let Some(data) = st.decoder.finish() {
                        st.accept(&data);
                    }
                }
            }
        }
    }))
}

/// Extract the text carried by one provider event.
fn parse_chunk(data: &str) -> Result<Option<String>, BridgeError> {
    let chunk: GenerateChunk =
        serde_json::from_str(data).map_err(|e| BridgeError::InvalidResponse(e.to_string()))?;

    if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(BridgeError::Blocked(reason));
    }

    let text: String = chunk
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    Ok((!text.is_empty()).then_some(text))
}

fn provider_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

/// Map an attachment URL such as `http://host/uploads/abc.png` onto a file in
/// `upload_dir`.  Only the last path segment is used.
fn resolve_upload(upload_dir: &Path, url: &str) -> Option<PathBuf> {
    let name = url.split(['?', '#']).next()?.rsplit('/').next()?;
    if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
        return None;
    }
    Some(upload_dir.join(name))
}

fn mime_type_for(path: &Path, kind: AttachmentKind) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => match kind {
            AttachmentKind::Image => "image/png",
            AttachmentKind::Video => "video/mp4",
            AttachmentKind::File => "application/pdf",
        },
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
