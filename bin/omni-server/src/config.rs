//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

/// Runtime configuration for omni-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:5000"`).
    pub bind_address: String,

    /// SQLite database URL (default: `"sqlite://omni.db"`).  The file is
    /// created when missing.
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Comma-separated list of allowed CORS origins.  `None` allows any origin.
    pub cors_allowed_origins: Option<String>,

    /// Serve the generated OpenAPI document at `/api-docs/openapi.json`.
    pub enable_docs: bool,

    /// Number of prior messages handed to the model as conversational context.
    pub context_window: usize,

    /// Directory that uploaded attachment files are resolved against.
    pub upload_dir: String,

    /// Gemini API key.  Turns fail with an error record when unset.
    pub gemini_api_key: Option<String>,

    /// Gemini model name (default: `"gemini-2.5-flash"`).
    pub gemini_model: String,

    /// Base URL of the Gemini REST API.
    pub gemini_base_url: String,

    /// Timeout for one model request, including the whole streamed body.
    pub model_timeout: Duration,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build [`Config`] from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(default)
        };

        Self {
            bind_address: env_or("OMNI_BIND", "0.0.0.0:5000"),
            database_url: env_or("OMNI_DATABASE_URL", "sqlite://omni.db"),
            log_level: env_or("OMNI_LOG", "info"),
            log_json: flag("OMNI_LOG_JSON", false),
            cors_allowed_origins: lookup("OMNI_CORS_ORIGINS").filter(|v| !v.trim().is_empty()),
            enable_docs: flag("OMNI_ENABLE_DOCS", true),
            context_window: parse_or(lookup("OMNI_CONTEXT_WINDOW"), 20),
            upload_dir: env_or("OMNI_UPLOAD_DIR", "uploads"),
            gemini_api_key: lookup("GEMINI_API_KEY").filter(|v| !v.is_empty()),
            gemini_model: env_or("OMNI_GEMINI_MODEL", "gemini-2.5-flash"),
            gemini_base_url: env_or(
                "OMNI_GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            model_timeout: Duration::from_secs(parse_or(lookup("OMNI_MODEL_TIMEOUT_SECS"), 120)),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn parse_or<T: std::str::FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
