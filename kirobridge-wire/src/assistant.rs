//! Assistant RPC client.
//!
//! Speaks the JSON conversational protocol of the generative-response
//! endpoint: a chat-style message history is folded into the backend's
//! nested conversation-state shape, sent as a single POST, and the reply
//! is scanned for embedded content fragments.
//!
//! The backend's event framing is undocumented; the response parser is a
//! best-effort legacy-compatibility scanner with fixed rules (see
//! [`parse_response`]), not a strict protocol decoder.

use futures::stream::Stream;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use kirobridge_core::{Credential, Settings};
use serde::Serialize;

use crate::error::WireError;

// ============================================================================
// Constants
// ============================================================================

/// Default model when the requested name is unknown.
const DEFAULT_MODEL_ID: &str = "CLAUDE_SONNET_4_20250514_V1_0";

/// Requested-name to backend-identifier lookup (from the IDE's model list).
const MODEL_MAPPING: &[(&str, &str)] = &[
    ("claude-opus-4-5", "CLAUDE_OPUS_4_5_V1_0"),
    ("claude-opus-4.5", "CLAUDE_OPUS_4_5_V1_0"),
    ("claude-4-opus", "CLAUDE_OPUS_4_5_V1_0"),
    ("opus", "CLAUDE_OPUS_4_5_V1_0"),
    ("claude-sonnet-4-5", "CLAUDE_SONNET_4_5_V1_0"),
    ("claude-sonnet-4.5", "CLAUDE_SONNET_4_5_V1_0"),
    ("claude-4-sonnet", "CLAUDE_SONNET_4_5_V1_0"),
    ("claude-sonnet-4", "CLAUDE_SONNET_4_20250514_V1_0"),
    ("claude-sonnet-4-20250514", "CLAUDE_SONNET_4_20250514_V1_0"),
    ("sonnet", "CLAUDE_SONNET_4_20250514_V1_0"),
    ("claude-haiku-4-5", "CLAUDE_HAIKU_4_5_V1_0"),
    ("claude-haiku-4.5", "CLAUDE_HAIKU_4_5_V1_0"),
    ("haiku", "CLAUDE_HAIKU_4_5_V1_0"),
    ("auto", "AUTO"),
];

/// IDE version baked into the vendor user-agent strings.
const CLIENT_VERSION: &str = "0.2.13";

/// Resolves a requested model name to its backend identifier.
pub fn resolve_model_id(name: &str) -> &'static str {
    MODEL_MAPPING
        .iter()
        .find(|(alias, _)| *alias == name)
        .map_or(DEFAULT_MODEL_ID, |(_, id)| id)
}

// ============================================================================
// Chat Messages
// ============================================================================

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instruction, folded into the first user turn on the wire.
    System,
    /// End-user message.
    User,
    /// Assistant reply.
    Assistant,
}

/// One chat-style message.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct ChatMessage {
    /// Message role.
    pub role: ChatRole,
    /// Message content.
    pub content: String,
}

impl ChatMessage {
    /// Convenience constructor.
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

// ============================================================================
// Outcome Sink
// ============================================================================

/// Narrow reporting interface back to the credential pool.
///
/// The assistant client always reports the outcome of a call through this
/// before returning, so the pool's health view never lags the wire.
#[async_trait::async_trait]
pub trait OutcomeSink: Send + Sync {
    /// A call with this credential succeeded.
    async fn report_success(&self, id: &str);
    /// A call with this credential failed; `message` feeds ban
    /// classification.
    async fn report_failure(&self, id: &str, message: &str);
    /// The backend rate-limited this credential.
    async fn report_quota_exceeded(&self, id: &str);
}

// ============================================================================
// Wire Shapes
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    conversation_state: ConversationState,
}

/// The backend's nested conversation shape.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationState {
    chat_trigger_type: &'static str,
    conversation_id: String,
    current_message: MessageEntry,
    history: Vec<MessageEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    user_input_message: Option<UserInputMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assistant_response_message: Option<AssistantResponseMessage>,
}

impl MessageEntry {
    fn user(content: String, model_id: &str) -> Self {
        Self {
            user_input_message: Some(UserInputMessage {
                content,
                model_id: model_id.to_string(),
                origin: "AI_EDITOR",
                user_input_message_context: serde_json::Map::new(),
            }),
            assistant_response_message: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserInputMessage {
    content: String,
    model_id: String,
    origin: &'static str,
    user_input_message_context: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssistantResponseMessage {
    content: String,
}

// ============================================================================
// Conversation Folding
// ============================================================================

/// Folds a chat-style message list into the backend conversation shape.
///
/// System content is prepended to the first user turn and then discarded
/// (the wire has no system field). Completed user/assistant pairs become
/// history entries; the trailing unpaired user message becomes the current
/// one. A conversation without a trailing user message falls back to its
/// last message's content.
fn fold_messages(messages: &[ChatMessage], model_id: &str) -> ConversationState {
    let mut history: Vec<MessageEntry> = Vec::new();
    let mut system_prompt = String::new();
    let mut current: Option<MessageEntry> = None;

    for message in messages {
        match message.role {
            ChatRole::System => system_prompt = message.content.clone(),
            ChatRole::User => {
                if let Some(entry) = current.take() {
                    // Unanswered user turn displaced by a newer one.
                    history.push(entry);
                }
                let content = if !system_prompt.is_empty() && history.is_empty() {
                    let folded = format!("{system_prompt}\n\n{}", message.content);
                    system_prompt.clear();
                    folded
                } else {
                    message.content.clone()
                };
                current = Some(MessageEntry::user(content, model_id));
            }
            ChatRole::Assistant => {
                if let Some(mut entry) = current.take() {
                    entry.assistant_response_message = Some(AssistantResponseMessage {
                        content: message.content.clone(),
                    });
                    history.push(entry);
                }
            }
        }
    }

    let current_message = current.unwrap_or_else(|| {
        // No trailing user turn: reuse the last message's content.
        let mut content = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        if !system_prompt.is_empty() {
            content = format!("{system_prompt}\n\n{content}");
        }
        MessageEntry::user(content, model_id)
    });

    ConversationState {
        chat_trigger_type: "MANUAL",
        conversation_id: Uuid::new_v4().to_string(),
        current_message,
        history,
    }
}

// ============================================================================
// Response Parsing
// ============================================================================

static CONTENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""content"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());

static EVENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":message-typeevent(\{[^}]+\})").unwrap());

/// Extracts assistant text from a raw response payload.
///
/// The payload embeds zero or more `"content":"…"` fragments, possibly
/// repeated inside a secondary `:message-typeevent{…}` wrapper. Every
/// occurrence of both shapes is collected, escapes are undone, exact
/// duplicates are dropped preserving first-seen order, and the remainder
/// is concatenated.
pub fn parse_response(raw: &str) -> String {
    let mut parts: Vec<String> = Vec::new();

    for capture in CONTENT_RE.captures_iter(raw) {
        if let Some(content) = capture.get(1) {
            if !content.as_str().is_empty() {
                parts.push(unescape(content.as_str()));
            }
        }
    }

    for capture in EVENT_RE.captures_iter(raw) {
        if let Some(event) = capture.get(1) {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(event.as_str()) {
                if let Some(content) = value.get("content").and_then(|c| c.as_str()) {
                    if !content.is_empty() {
                        parts.push(content.to_string());
                    }
                }
            }
        }
    }

    // Deduplicate while preserving first-seen order.
    let mut seen = HashSet::new();
    let mut out = String::new();
    for part in parts {
        if seen.insert(part.clone()) {
            out.push_str(&part);
        }
    }
    out
}

fn unescape(content: &str) -> String {
    content
        .replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\\"", "\"")
        .replace("\\\\", "\\")
}

// ============================================================================
// Generate Options
// ============================================================================

/// Options for a generation call.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Requested model name, resolved through the lookup table.
    pub model: String,
    /// Advisory output budget; the backend derives its own limit.
    pub max_tokens: u32,
    /// Advisory sampling temperature; the backend derives its own value.
    pub temperature: f64,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

// ============================================================================
// Assistant Client
// ============================================================================

/// Client for the generative-response endpoint.
#[derive(Debug)]
pub struct AssistantClient {
    http: reqwest::Client,
    region: String,
    machine_id: String,
    timeout_secs: u64,
}

impl AssistantClient {
    /// Creates a client for the given region with a 120 s budget.
    pub fn new(region: impl Into<String>) -> Self {
        Self::with_timeout(region, Duration::from_secs(120))
    }

    /// Creates a client from the settings layer.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::with_timeout(&settings.assistant_region, settings.generate_timeout())
    }

    /// Creates a client with an explicit timeout budget.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built, which only happens when
    /// the system TLS configuration is fundamentally broken.
    pub fn with_timeout(region: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| panic!("Failed to create HTTP client: {e}"));

        Self {
            http,
            region: region.into(),
            machine_id: Uuid::new_v4().simple().to_string(),
            timeout_secs: timeout.as_secs(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://codewhisperer.{}.amazonaws.com/generateAssistantResponse",
            self.region
        )
    }

    fn build_headers(&self, credential: &Credential) -> Result<HeaderMap, WireError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let bearer = format!("Bearer {}", credential.access_token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|e| WireError::InvalidRequest(format!("bad access token: {e}")))?,
        );

        let invocation_id = Uuid::new_v4().to_string();
        headers.insert(
            "amz-sdk-invocation-id",
            HeaderValue::from_str(&invocation_id)
                .map_err(|e| WireError::InvalidRequest(e.to_string()))?,
        );
        headers.insert("amz-sdk-request", HeaderValue::from_static("attempt=1; max=1"));
        headers.insert("x-amzn-kiro-agent-mode", HeaderValue::from_static("vibe"));

        let short_ua = format!("aws-sdk-js/1.0.7 KiroIDE-{CLIENT_VERSION}-{}", self.machine_id);
        let long_ua = format!(
            "aws-sdk-js/1.0.7 ua/2.1 os/{} lang/js md/nodejs#20.16.0 \
             api/codewhispererstreaming#1.0.7 m/E KiroIDE-{CLIENT_VERSION}-{}",
            std::env::consts::OS,
            self.machine_id
        );
        headers.insert(
            "x-amz-user-agent",
            HeaderValue::from_str(&short_ua).map_err(|e| WireError::InvalidRequest(e.to_string()))?,
        );
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_str(&long_ua).map_err(|e| WireError::InvalidRequest(e.to_string()))?,
        );

        Ok(headers)
    }

    /// Generates an assistant response for a message history.
    ///
    /// The outcome is reported to `sink` before this returns: success on
    /// 2xx, quota exhaustion on 429, a failure message (feeding ban
    /// classification) otherwise.
    #[instrument(skip(self, messages, options, credential, sink), fields(account = %credential.label(), model = %options.model))]
    pub async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenerateOptions,
        credential: &Credential,
        sink: &dyn OutcomeSink,
    ) -> Result<String, WireError> {
        let model_id = resolve_model_id(&options.model);
        let request = GenerateRequest {
            conversation_state: fold_messages(messages, model_id),
        };

        debug!(
            model_id,
            history = request.conversation_state.history.len(),
            "Dispatching generation request"
        );

        let headers = self.build_headers(credential)?;
        let result = self
            .http
            .post(self.endpoint())
            .headers(headers)
            .json(&request)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                sink.report_failure(&credential.id, "Request timeout").await;
                return Err(WireError::Timeout(self.timeout_secs));
            }
            Err(err) => {
                sink.report_failure(&credential.id, &format!("Network error: {err}")).await;
                return Err(err.into());
            }
        };

        let status = response.status().as_u16();
        match status {
            401 => {
                sink.report_failure(&credential.id, "Unauthorized").await;
                Err(WireError::Unauthorized)
            }
            403 => {
                let detail = truncated_body(response, 200).await;
                sink.report_failure(&credential.id, &format!("Forbidden: {detail}")).await;
                Err(WireError::Forbidden(detail))
            }
            429 => {
                sink.report_quota_exceeded(&credential.id).await;
                Err(WireError::QuotaExceeded)
            }
            200..=299 => {
                let raw = response.text().await?;
                let content = parse_response(&raw);
                if content.is_empty() {
                    warn!(bytes = raw.len(), "No content fragments in response");
                }
                sink.report_success(&credential.id).await;
                Ok(content)
            }
            _ => {
                let detail = truncated_body(response, 500).await;
                let message = format!("HTTP {status}: {detail}");
                sink.report_failure(&credential.id, &message).await;
                Err(WireError::Rpc {
                    operation: "generateAssistantResponse".to_string(),
                    status,
                    detail,
                })
            }
        }
    }

    /// Streaming surface over [`generate`](Self::generate).
    ///
    /// Granularity is whole-response: the stream yields exactly one
    /// aggregate chunk once the backend reply has been parsed, never
    /// token-by-token. Callers needing real incremental delivery cannot get
    /// it from this backend contract.
    pub fn generate_stream<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        options: &'a GenerateOptions,
        credential: &'a Credential,
        sink: &'a dyn OutcomeSink,
    ) -> impl Stream<Item = Result<String, WireError>> + 'a {
        futures::stream::once(async move { self.generate(messages, options, credential, sink).await })
    }
}

async fn truncated_body(response: reqwest::Response, limit: usize) -> String {
    let text = response.text().await.unwrap_or_default();
    let mut end = limit.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model_id() {
        assert_eq!(resolve_model_id("opus"), "CLAUDE_OPUS_4_5_V1_0");
        assert_eq!(resolve_model_id("claude-sonnet-4-20250514"), DEFAULT_MODEL_ID);
        assert_eq!(resolve_model_id("auto"), "AUTO");
        // Unknown names fall back to the default
        assert_eq!(resolve_model_id("gpt-9"), DEFAULT_MODEL_ID);
    }

    #[test]
    fn test_fold_system_into_first_user_turn() {
        let messages = [
            ChatMessage::new(ChatRole::System, "Be terse."),
            ChatMessage::new(ChatRole::User, "Hello"),
        ];
        let state = fold_messages(&messages, "MODEL");
        assert!(state.history.is_empty());
        let current = state.current_message.user_input_message.unwrap();
        assert_eq!(current.content, "Be terse.\n\nHello");
        assert_eq!(current.model_id, "MODEL");
    }

    #[test]
    fn test_fold_pairs_into_history() {
        let messages = [
            ChatMessage::new(ChatRole::User, "q1"),
            ChatMessage::new(ChatRole::Assistant, "a1"),
            ChatMessage::new(ChatRole::User, "q2"),
            ChatMessage::new(ChatRole::Assistant, "a2"),
            ChatMessage::new(ChatRole::User, "q3"),
        ];
        let state = fold_messages(&messages, "MODEL");
        assert_eq!(state.history.len(), 2);
        assert_eq!(
            state.history[0].assistant_response_message.as_ref().unwrap().content,
            "a1"
        );
        let current = state.current_message.user_input_message.unwrap();
        assert_eq!(current.content, "q3");
    }

    #[test]
    fn test_fold_without_trailing_user_falls_back_to_last_message() {
        let messages = [
            ChatMessage::new(ChatRole::User, "q1"),
            ChatMessage::new(ChatRole::Assistant, "a1"),
        ];
        let state = fold_messages(&messages, "MODEL");
        assert_eq!(state.history.len(), 1);
        let current = state.current_message.user_input_message.unwrap();
        assert_eq!(current.content, "a1");
    }

    #[test]
    fn test_fold_generates_fresh_conversation_id() {
        let messages = [ChatMessage::new(ChatRole::User, "hi")];
        let a = fold_messages(&messages, "MODEL");
        let b = fold_messages(&messages, "MODEL");
        assert_ne!(a.conversation_id, b.conversation_id);
    }

    #[test]
    fn test_request_serialization_shape() {
        let messages = [ChatMessage::new(ChatRole::User, "hi")];
        let request = GenerateRequest {
            conversation_state: fold_messages(&messages, "MODEL"),
        };
        let json = serde_json::to_value(&request).unwrap();
        let state = &json["conversationState"];
        assert_eq!(state["chatTriggerType"], "MANUAL");
        assert!(state["conversationId"].is_string());
        assert_eq!(state["currentMessage"]["userInputMessage"]["origin"], "AI_EDITOR");
        assert!(state["currentMessage"]["userInputMessage"]["userInputMessageContext"].is_object());
        // Unset assistant side is omitted, not null
        assert!(state["currentMessage"].get("assistantResponseMessage").is_none());
    }

    #[test]
    fn test_parse_response_dedup_preserves_first_seen_order() {
        let raw = r#"noise "content":"A" junk "content":"B" more "content":"A" tail "content":"A""#;
        assert_eq!(parse_response(raw), "AB");
    }

    #[test]
    fn test_parse_response_unescapes() {
        let raw = r#"{"content":"line1\nline2\t\"quoted\"\\done"}"#;
        assert_eq!(parse_response(raw), "line1\nline2\t\"quoted\"\\done");
    }

    #[test]
    fn test_parse_response_event_wrapper() {
        let raw = r#"garbage:message-typeevent{"content":"hello"}garbage"#;
        assert_eq!(parse_response(raw), "hello");
    }

    #[test]
    fn test_parse_response_wrapper_duplicates_are_dropped() {
        // The same fragment arriving both bare and event-wrapped counts once
        let raw = r#""content":"hello" :message-typeevent{"content":"hello"}"#;
        assert_eq!(parse_response(raw), "hello");
    }

    #[test]
    fn test_parse_response_empty_payload() {
        assert_eq!(parse_response("no fragments here"), "");
        assert_eq!(parse_response(r#""content":"""#), "");
    }
}
