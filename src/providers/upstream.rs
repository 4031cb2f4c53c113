//! Upstream client: forwards a request body to the single vendor endpoint
//! and classifies the HTTP outcome into a [`DispatchOutcome`] the Dispatch
//! Loop can act on without knowing any wire-format details.

use regex::Regex;
use serde_json::Value;

use super::{sanitize_http_error_body, Message, ProviderError, Role};

/// Which wire format an inbound request arrived in, and therefore which
/// translation (if any) is applied before forwarding upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// `POST /v1beta/models/:model[:action]` — forwarded as-is.
    Native,
    /// `POST /v1/*` — OpenAI-compatible, model name lives in the JSON body.
    OpenAiCompatible,
    /// `POST /api/chat` — Ollama-compatible; messages are translated first.
    OllamaCompatible,
}

/// The classified result of one forwarded call, consumed by the Dispatch Loop.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// 2xx response. Carries the extracted token count and the raw body/content-type
    /// to relay back to the downstream client verbatim.
    Success {
        /// Tokens consumed by this call, for `RecordUsage`.
        tokens: u64,
        /// HTTP status code (always in the 2xx range here).
        status: u16,
        /// Response body, relayed to the downstream client unchanged.
        body: String,
        /// Response `content-type`, relayed to the downstream client.
        content_type: Option<String>,
    },
    /// HTTP 429 — rate limited. Handled by the two-strike policy, not
    /// surfaced to the client until retries exhaust.
    RateLimited,
    /// HTTP 503 — transient failure. Retried with a fixed backoff on the same key.
    Transient,
    /// Any other non-2xx status. Relayed to the downstream client verbatim.
    Other {
        /// HTTP status code.
        status: u16,
        /// Response body, sanitized of likely secrets before logging, relayed raw to the client.
        body: String,
        /// Response `content-type`, relayed to the downstream client.
        content_type: Option<String>,
    },
}

/// Forwards requests to the single configured vendor endpoint.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
}

impl UpstreamClient {
    /// Build a client targeting `base_url` (the vendor's API origin).
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    /// Forward `body` to the upstream vendor for `model` authenticated with
    /// `api_key`, after applying whatever translation `protocol` requires.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Request`] on transport failure.
    pub async fn forward(
        &self,
        protocol: Protocol,
        path_suffix: &str,
        model: &str,
        api_key: &str,
        body: Value,
    ) -> Result<DispatchOutcome, ProviderError> {
        let translated = match protocol {
            Protocol::Native | Protocol::OpenAiCompatible => body,
            Protocol::OllamaCompatible => translate_ollama_body(body),
        };

        let url = format!("{}/{model}{path_suffix}", self.base_url.trim_end_matches('/'));

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .header("content-type", "application/json")
            .json(&translated)
            .send()
            .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        let raw_body = response.text().await?;

        if status.as_u16() == 429 {
            return Ok(DispatchOutcome::RateLimited);
        }
        if status.as_u16() == 503 {
            return Ok(DispatchOutcome::Transient);
        }
        if !status.is_success() {
            return Ok(DispatchOutcome::Other {
                status: status.as_u16(),
                body: raw_body,
                content_type,
            });
        }

        let tokens = extract_total_tokens(&raw_body);
        Ok(DispatchOutcome::Success {
            tokens,
            status: status.as_u16(),
            body: raw_body,
            content_type,
        })
    }
}

/// Extract the token count from a completion response.
///
/// Tries to parse the body as JSON and read `usageMetadata.totalTokenCount`
/// (or the flatter `totalTokenCount` some streamed chunks use). Falls back
/// to scanning for the largest decimal run following any `"totalTokenCount"`
/// occurrence in the raw text, which also covers streamed newline-delimited
/// JSON chunk series where the body as a whole isn't valid JSON.
fn extract_total_tokens(raw_body: &str) -> u64 {
    if let Ok(parsed) = serde_json::from_str::<Value>(raw_body) {
        if let Some(total) = parsed
            .get("usageMetadata")
            .and_then(|m| m.get("totalTokenCount"))
            .and_then(Value::as_u64)
        {
            return total;
        }
        if let Some(total) = parsed.get("totalTokenCount").and_then(Value::as_u64) {
            return total;
        }
    }

    scan_largest_total_token_count(raw_body)
}

fn scan_largest_total_token_count(raw_body: &str) -> u64 {
    let regex = match Regex::new(r#""totalTokenCount"\s*:\s*(\d+)"#) {
        Ok(r) => r,
        Err(_) => return 0,
    };
    regex
        .captures_iter(raw_body)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().parse::<u64>().ok())
        .max()
        .unwrap_or(0)
}

/// Translate an Ollama-style `{model, messages}` body into the native format:
/// map `system -> user` and strip a leading message already carrying the
/// `model` (assistant) role, *then* join consecutive same-role messages —
/// joining has to run after role normalization, since merging `[system,
/// user]` before folding `system` into `user` would otherwise leave two
/// adjacent `user` turns instead of one.
fn translate_ollama_body(body: Value) -> Value {
    let Some(raw_messages) = body.get("messages").and_then(Value::as_array) else {
        return body;
    };

    let mut messages = Vec::new();
    for item in raw_messages {
        let role_str = item.get("role").and_then(Value::as_str).unwrap_or("user");
        let content = item
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let role = match role_str {
            "assistant" => Role::Assistant,
            "system" => Role::System,
            _ => Role::User,
        };
        messages.push(Message { role, content });
    }

    let normalized = normalize_for_native(messages);
    let joined = join_consecutive_same_role(normalized);

    let mut out = body;
    out["messages"] = Value::Array(
        joined
            .into_iter()
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        Role::Assistant => "model",
                        Role::System | Role::User => "user",
                    },
                    "content": m.content,
                })
            })
            .collect(),
    );
    out
}

fn join_consecutive_same_role(messages: Vec<Message>) -> Vec<Message> {
    let mut joined: Vec<Message> = Vec::new();
    for message in messages {
        match joined.last_mut() {
            Some(prev) if prev.role == message.role => {
                prev.content.push('\n');
                prev.content.push_str(&message.content);
            }
            _ => joined.push(message),
        }
    }
    joined
}

fn normalize_for_native(mut messages: Vec<Message>) -> Vec<Message> {
    for message in &mut messages {
        if message.role == Role::System {
            message.role = Role::User;
        }
    }
    while matches!(messages.first(), Some(m) if m.role == Role::Assistant) {
        messages.remove(0);
    }
    messages
}

/// Sanitize a response body for logging without mutating what's relayed to the client.
pub fn sanitize_for_log(body: &str) -> String {
    sanitize_http_error_body(body)
}
