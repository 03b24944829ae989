//! Model bridge: turns conversation history plus a new user input into a
//! lazy stream of text fragments from a generative model.
//!
//! The relay only sees [`ModelBridge`]; [`gemini::GeminiBridge`] is the
//! production implementation.

pub mod gemini;
#[cfg(test)]
pub mod scripted;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use omni_types::{Attachment, Message};
use thiserror::Error;

pub use gemini::GeminiBridge;

/// Fragments in production order.  Ends when the model is done.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, BridgeError>> + Send>>;

/// Errors raised by a model bridge, either when the call starts or while
/// fragments are being produced.
///
/// Display strings are shown to end users inside error records, so they
/// never include provider response bodies.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The bridge is missing required configuration (e.g. an API key).
    #[error("model bridge not configured: {0}")]
    NotConfigured(String),

    /// The HTTP request to the model service failed or timed out.
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The model service answered with a non-success status.
    #[error("model service returned HTTP {status}")]
    Api { status: u16 },

    /// The model refused to answer the prompt.
    #[error("response blocked by model: {0}")]
    Blocked(String),

    /// The model service sent something the bridge could not decode.
    #[error("invalid model response: {0}")]
    InvalidResponse(String),

    /// Reading an attachment from the upload directory failed.
    #[error("attachment could not be read: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ModelBridge: Send + Sync + fmt::Debug + 'static {
    /// Start generating a reply to `text` given `history` (oldest first).
    async fn generate(
        &self,
        history: &[Message],
        text: &str,
        attachments: &[Attachment],
    ) -> Result<FragmentStream, BridgeError>;
}
