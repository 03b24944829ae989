//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::bridge::ModelBridge;
use crate::config::Config;
use crate::entities::{LogicalClock, SqliteStore};

/// State shared across all HTTP handlers and turn tasks.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Conversation store.
    pub store: Arc<SqliteStore>,
    /// Fragment producer for assistant replies.
    pub bridge: Arc<dyn ModelBridge>,
    /// Source of message and chat timestamps.
    pub clock: Arc<LogicalClock>,
}

#[cfg(test)]
impl AppState {
    /// In-memory state around `bridge`, with the given context window.
    pub async fn for_tests(bridge: Arc<dyn ModelBridge>, context_window: usize) -> Arc<Self> {
        let mut config = Config::from_lookup(|_| None);
        config.context_window = context_window;
        let store = SqliteStore::connect("sqlite::memory:")
            .await
            .expect("in-memory store");
        Arc::new(Self {
            config: Arc::new(config),
            store: Arc::new(store),
            bridge,
            clock: Arc::new(LogicalClock::new()),
        })
    }
}
