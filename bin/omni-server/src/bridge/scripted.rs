//! Deterministic bridge for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use omni_types::{Attachment, Message};

use super::{BridgeError, FragmentStream, ModelBridge};

/// What the next `generate` call does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Yield these fragments, then finish.
    Reply(Vec<&'static str>),
    /// Fail before producing anything.
    FailOnCall,
    /// Yield these fragments, then fail.
    FailAfter(Vec<&'static str>),
    /// Yield these fragments, then never finish.
    Hang(Vec<&'static str>),
}

/// Arguments of one `generate` call.
#[derive(Debug, Clone)]
pub struct Call {
    pub history: Vec<Message>,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug)]
pub struct ScriptedBridge {
    script: Script,
    calls: Mutex<Vec<Call>>,
    stream_dropped: Arc<AtomicBool>,
}

impl ScriptedBridge {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
            stream_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// `true` once the last returned fragment stream has been dropped.
    pub fn stream_dropped(&self) -> bool {
        self.stream_dropped.load(Ordering::SeqCst)
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn fragments(items: &[&'static str]) -> Vec<Result<String, BridgeError>> {
    items.iter().map(|s| Ok(s.to_string())).collect()
}

#[async_trait]
impl ModelBridge for ScriptedBridge {
    async fn generate(
        &self,
        history: &[Message],
        text: &str,
        attachments: &[Attachment],
    ) -> Result<FragmentStream, BridgeError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Call {
                history: history.to_vec(),
                text: text.to_owned(),
                attachments: attachments.to_vec(),
            });
        }

        let flag = DropFlag(Arc::clone(&self.stream_dropped));
        let stream: FragmentStream = match &self.script {
            Script::FailOnCall => {
                return Err(BridgeError::InvalidResponse("scripted failure".into()));
            }
            Script::Reply(items) => Box::pin(futures::stream::iter(fragments(items))),
            Script::FailAfter(items) => {
                let mut items = fragments(items);
                items.push(Err(BridgeError::Api { status: 503 }));
                Box::pin(futures::stream::iter(items))
            }
            Script::Hang(items) => Box::pin(
                futures::stream::iter(fragments(items)).chain(futures::stream::pending()),
            ),
        };
        Ok(Box::pin(stream.map(move |item| {
            let _keep = &flag;
            item
        })))
    }
}
