//! Shared request/response types and HTTP helpers for the upstream client.
//!
//! The proxy has exactly one vendor upstream (no provider registry, no
//! per-skill routing) — see [`upstream::UpstreamClient`] for the client
//! that actually forwards requests and classifies outcomes for the
//! Dispatch Loop.

use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod upstream;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Conversation participant role, as seen by the Ollama-compatible translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message.
    System,
    /// Human user message.
    User,
    /// Assistant (LLM) message.
    Assistant,
}

/// A single chat message, as carried through translation between wire formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message author.
    pub role: Role,
    /// Plain-text message content.
    pub content: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the upstream HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure.
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match expected schema.
    #[error("upstream response parse error: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns [`ProviderError::Request`] on transport failure while draining the body.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let body = response.text().await?;
    Ok(body)
}

/// Redact likely API-key/token substrings and cap length before a body is
/// logged or returned verbatim in an error path.
pub fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"sk-ant-[A-Za-z0-9_\-]{10,}",
        r"sk-[A-Za-z0-9]{32,}",
        r"ghp_[A-Za-z0-9]{20,}",
        r"glpat-[A-Za-z0-9_\-]{16,}",
        r"xoxb-[A-Za-z0-9\-]{20,}",
        r"AIza[A-Za-z0-9_\-]{30,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}
