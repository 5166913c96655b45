use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::{json, Map, Value};

/// Canonical provider identifier. Chosen once from a credential's service name;
/// every request-shape decision after that goes through the registered strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    Gemini,
    /// ElevenLabs text-to-speech.
    ElevenLabs,
    /// Any other service speaking the OpenAI chat completions format at its own base URL.
    OpenAICompatible,
}

impl ProviderKind {
    /// Maps a service name to its canonical provider by exact alias lookup on
    /// the normalised name (lowercase, alphanumerics only).
    pub fn from_service_name(service_name: &str) -> Self {
        let normalized: String = service_name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "openai" | "openaiapi" | "chatgpt" => ProviderKind::OpenAI,
            "anthropic" | "claude" | "anthropicclaude" => ProviderKind::Anthropic,
            "gemini" | "google" | "googlegemini" | "googleai" => ProviderKind::Gemini,
            "elevenlabs" | "eleven" => ProviderKind::ElevenLabs,
            _ => ProviderKind::OpenAICompatible,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
            ProviderKind::ElevenLabs => "elevenlabs",
            ProviderKind::OpenAICompatible => "openai-compatible",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and with what key a single provider call goes.
pub struct CallTarget<'a> {
    pub base_url: &'a str,
    pub api_key: &'a str,
}

/// A fully read 2xx provider response.
#[derive(Debug)]
pub struct ProviderResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Request builder and response parser for one provider API.
pub trait ProviderStrategy: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Used when the credential carries no base URL.
    fn default_base_url(&self) -> Option<&'static str>;

    fn build_request(
        &self,
        client: &reqwest::Client,
        target: &CallTarget<'_>,
        payload: &Value,
    ) -> Result<reqwest::RequestBuilder, String>;

    fn parse_response(&self, response: &ProviderResponse) -> Result<Value, String>;
}

/// Strategy table keyed by canonical provider id.
#[derive(Clone)]
pub struct ProviderRegistry {
    strategies: HashMap<ProviderKind, Arc<dyn ProviderStrategy>>,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Registry with every built-in provider.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(OpenAIStrategy::official()));
        registry.register(Arc::new(OpenAIStrategy::compatible()));
        registry.register(Arc::new(AnthropicStrategy));
        registry.register(Arc::new(GeminiStrategy));
        registry.register(Arc::new(ElevenLabsStrategy));
        registry
    }

    /// Registers a strategy, replacing any previous one for the same provider.
    pub fn register(&mut self, strategy: Arc<dyn ProviderStrategy>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderStrategy>> {
        self.strategies.get(&kind).cloned()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Builds an operator-facing message for a non-2xx provider response,
/// preferring the provider's own error text when the body carries one.
pub fn describe_http_error(status: u16, body: &[u8]) -> String {
    let detail = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| provider_error_message(&v))
        .unwrap_or_else(|| {
            let text = String::from_utf8_lossy(body);
            let text = text.trim();
            if text.is_empty() {
                "empty response body".to_string()
            } else {
                text.chars().take(200).collect()
            }
        });
    format!("HTTP {}: {}", status, detail)
}

/// Extracts the error text from the error shapes the supported providers use.
/// OpenAI/Anthropic: `{"error": {"message": ..}}`, Gemini: same with `status`,
/// ElevenLabs: `{"detail": {"message": ..}}` or `{"detail": ".."}`.
pub fn provider_error_message(body: &Value) -> Option<String> {
    // Some OpenAI-compatible servers send `"error": null` on success
    match body.get("error") {
        Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
        Some(err) if err.is_object() => {
            if let Some(message) = err.get("message").filter(|m| !m.is_null()) {
                return Some(match message {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            }
        }
        _ => {}
    }
    match body.get("detail") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(detail) => detail
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        None => None,
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    match path.strip_prefix("/v1") {
        Some(rest) if base.ends_with("/v1") => format!("{}{}", base, rest),
        _ => format!("{}{}", base, path),
    }
}

fn parse_json(response: &ProviderResponse) -> Result<Value, String> {
    let body: Value = serde_json::from_slice(&response.body)
        .map_err(|e| format!("malformed provider response: {}", e))?;
    if let Some(message) = provider_error_message(&body) {
        return Err(format!("provider returned an error: {}", message));
    }
    Ok(body)
}

/// A payload value spliced into a URL path: one plain segment only.
fn path_segment<'a>(field: &str, value: &'a str) -> Result<&'a str, String> {
    let ok = !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(value)
    } else {
        Err(format!("payload '{}' is not a valid identifier: {:?}", field, value))
    }
}

fn str_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

/// Chat messages from either an explicit `messages` array or a `prompt`
/// (plus optional `system`) string.
fn chat_messages(payload: &Value) -> Result<Vec<Value>, String> {
    if let Some(messages) = payload.get("messages").and_then(Value::as_array) {
        if messages.is_empty() {
            return Err("payload 'messages' must not be empty".to_string());
        }
        return Ok(messages.clone());
    }
    let prompt = str_field(payload, "prompt")
        .ok_or_else(|| "payload requires 'prompt' or 'messages'".to_string())?;
    let mut messages = Vec::new();
    if let Some(system) = str_field(payload, "system") {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": prompt}));
    Ok(messages)
}

fn copy_fields(from: &Value, to: &mut Map<String, Value>, keys: &[&str]) {
    for key in keys {
        if let Some(v) = from.get(*key) {
            to.insert((*key).to_string(), v.clone());
        }
    }
}

fn bearer(api_key: &str) -> Result<HeaderValue, String> {
    header_value(&format!("Bearer {}", api_key))
}

fn header_value(api_key: &str) -> Result<HeaderValue, String> {
    let mut value = HeaderValue::from_str(api_key)
        .map_err(|_| "API key contains characters not allowed in a header".to_string())?;
    value.set_sensitive(true);
    Ok(value)
}

// ═══════════════════════════════════════════════════════════════
// OpenAI (and OpenAI-compatible) chat completions + images
// ═══════════════════════════════════════════════════════════════

pub struct OpenAIStrategy {
    kind: ProviderKind,
}

impl OpenAIStrategy {
    pub fn official() -> Self {
        Self {
            kind: ProviderKind::OpenAI,
        }
    }

    pub fn compatible() -> Self {
        Self {
            kind: ProviderKind::OpenAICompatible,
        }
    }
}

impl ProviderStrategy for OpenAIStrategy {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn default_base_url(&self) -> Option<&'static str> {
        match self.kind {
            ProviderKind::OpenAI => Some("https://api.openai.com"),
            _ => None,
        }
    }

    fn build_request(
        &self,
        client: &reqwest::Client,
        target: &CallTarget<'_>,
        payload: &Value,
    ) -> Result<reqwest::RequestBuilder, String> {
        let (path, body) = if str_field(payload, "task") == Some("image") {
            let prompt = str_field(payload, "prompt")
                .ok_or_else(|| "image payload requires 'prompt'".to_string())?;
            let mut body = Map::new();
            body.insert("model".into(), json!(str_field(payload, "model").unwrap_or("dall-e-3")));
            body.insert("prompt".into(), json!(prompt));
            copy_fields(payload, &mut body, &["size", "n", "quality", "response_format"]);
            ("/v1/images/generations", Value::Object(body))
        } else {
            let mut body = Map::new();
            body.insert("model".into(), json!(str_field(payload, "model").unwrap_or("gpt-4o-mini")));
            body.insert("messages".into(), Value::Array(chat_messages(payload)?));
            copy_fields(payload, &mut body, &["temperature", "max_tokens", "top_p", "response_format"]);
            ("/v1/chat/completions", Value::Object(body))
        };

        Ok(client
            .post(join_url(target.base_url, path))
            .header(reqwest::header::AUTHORIZATION, bearer(target.api_key)?)
            .json(&body))
    }

    fn parse_response(&self, response: &ProviderResponse) -> Result<Value, String> {
        let body = parse_json(response)?;

        if let Some(images) = body.get("data").and_then(Value::as_array) {
            let images: Vec<Value> = images
                .iter()
                .filter_map(|img| img.get("url").or_else(|| img.get("b64_json")).cloned())
                .collect();
            return Ok(json!({ "images": images, "raw": body }));
        }

        let text = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| "malformed provider response: missing choices[0].message.content".to_string())?
            .to_string();
        Ok(json!({
            "text": text,
            "model": body.get("model").cloned().unwrap_or(Value::Null),
            "raw": body,
        }))
    }
}

// ═══════════════════════════════════════════════════════════════
// Anthropic Messages API
// ═══════════════════════════════════════════════════════════════

pub struct AnthropicStrategy;

const ANTHROPIC_VERSION: &str = "2023-06-01";

impl ProviderStrategy for AnthropicStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn default_base_url(&self) -> Option<&'static str> {
        Some("https://api.anthropic.com")
    }

    fn build_request(
        &self,
        client: &reqwest::Client,
        target: &CallTarget<'_>,
        payload: &Value,
    ) -> Result<reqwest::RequestBuilder, String> {
        // Anthropic takes the system prompt as a top-level field
        let mut system_parts = Vec::new();
        let mut messages = Vec::new();
        for msg in chat_messages(payload)? {
            if msg.get("role").and_then(Value::as_str) == Some("system") {
                if let Some(text) = msg.get("content").and_then(Value::as_str) {
                    system_parts.push(text.to_string());
                }
            } else {
                messages.push(msg);
            }
        }

        let mut body = Map::new();
        body.insert(
            "model".into(),
            json!(str_field(payload, "model").unwrap_or("claude-3-5-haiku-latest")),
        );
        body.insert(
            "max_tokens".into(),
            payload.get("max_tokens").cloned().unwrap_or(json!(1024)),
        );
        body.insert("messages".into(), Value::Array(messages));
        if !system_parts.is_empty() {
            body.insert("system".into(), json!(system_parts.join("\n")));
        }
        copy_fields(payload, &mut body, &["temperature", "top_p"]);

        Ok(client
            .post(join_url(target.base_url, "/v1/messages"))
            .header(HeaderName::from_static("x-api-key"), header_value(target.api_key)?)
            .header(
                HeaderName::from_static("anthropic-version"),
                HeaderValue::from_static(ANTHROPIC_VERSION),
            )
            .json(&Value::Object(body)))
    }

    fn parse_response(&self, response: &ProviderResponse) -> Result<Value, String> {
        let body = parse_json(response)?;
        let blocks = body
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| "malformed provider response: missing content".to_string())?;
        let text: String = blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");
        Ok(json!({
            "text": text,
            "model": body.get("model").cloned().unwrap_or(Value::Null),
            "raw": body,
        }))
    }
}

// ═══════════════════════════════════════════════════════════════
// Google Gemini generateContent
// ═══════════════════════════════════════════════════════════════

pub struct GeminiStrategy;

impl ProviderStrategy for GeminiStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn default_base_url(&self) -> Option<&'static str> {
        Some("https://generativelanguage.googleapis.com")
    }

    fn build_request(
        &self,
        client: &reqwest::Client,
        target: &CallTarget<'_>,
        payload: &Value,
    ) -> Result<reqwest::RequestBuilder, String> {
        let model = path_segment("model", str_field(payload, "model").unwrap_or("gemini-1.5-flash"))?;

        let mut system_parts = Vec::new();
        let mut contents = Vec::new();
        for msg in chat_messages(payload)? {
            let role = msg.get("role").and_then(Value::as_str).unwrap_or("user");
            let text = msg.get("content").and_then(Value::as_str).unwrap_or_default();
            match role {
                "system" => system_parts.push(json!({ "text": text })),
                "assistant" => contents.push(json!({ "role": "model", "parts": [{ "text": text }] })),
                _ => contents.push(json!({ "role": "user", "parts": [{ "text": text }] })),
            }
        }

        let mut body = Map::new();
        body.insert("contents".into(), Value::Array(contents));
        if !system_parts.is_empty() {
            body.insert("systemInstruction".into(), json!({ "parts": system_parts }));
        }
        let mut generation = Map::new();
        if let Some(t) = payload.get("temperature") {
            generation.insert("temperature".into(), t.clone());
        }
        if let Some(m) = payload.get("max_tokens") {
            generation.insert("maxOutputTokens".into(), m.clone());
        }
        if !generation.is_empty() {
            body.insert("generationConfig".into(), Value::Object(generation));
        }

        let path = format!("/v1beta/models/{}:generateContent", model);
        Ok(client
            .post(join_url(target.base_url, &path))
            .header(HeaderName::from_static("x-goog-api-key"), header_value(target.api_key)?)
            .json(&Value::Object(body)))
    }

    fn parse_response(&self, response: &ProviderResponse) -> Result<Value, String> {
        let body = parse_json(response)?;
        let parts = body
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .ok_or_else(|| "malformed provider response: missing candidates[0].content.parts".to_string())?;
        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");
        Ok(json!({
            "text": text,
            "model": body.get("modelVersion").cloned().unwrap_or(Value::Null),
            "raw": body,
        }))
    }
}

// ═══════════════════════════════════════════════════════════════
// ElevenLabs text-to-speech
// ═══════════════════════════════════════════════════════════════

pub struct ElevenLabsStrategy;

const ELEVENLABS_DEFAULT_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";

impl ProviderStrategy for ElevenLabsStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::ElevenLabs
    }

    fn default_base_url(&self) -> Option<&'static str> {
        Some("https://api.elevenlabs.io")
    }

    fn build_request(
        &self,
        client: &reqwest::Client,
        target: &CallTarget<'_>,
        payload: &Value,
    ) -> Result<reqwest::RequestBuilder, String> {
        let text = str_field(payload, "text")
            .or_else(|| str_field(payload, "prompt"))
            .ok_or_else(|| "voice payload requires 'text'".to_string())?;
        let voice_id = path_segment(
            "voice_id",
            str_field(payload, "voice_id").unwrap_or(ELEVENLABS_DEFAULT_VOICE),
        )?;

        let mut body = Map::new();
        body.insert("text".into(), json!(text));
        body.insert(
            "model_id".into(),
            json!(str_field(payload, "model_id").unwrap_or("eleven_multilingual_v2")),
        );
        copy_fields(payload, &mut body, &["voice_settings"]);

        let path = format!("/v1/text-to-speech/{}", voice_id);
        Ok(client
            .post(join_url(target.base_url, &path))
            .header(HeaderName::from_static("xi-api-key"), header_value(target.api_key)?)
            .header(reqwest::header::ACCEPT, HeaderValue::from_static("audio/mpeg"))
            .json(&Value::Object(body)))
    }

    fn parse_response(&self, response: &ProviderResponse) -> Result<Value, String> {
        let content_type = response
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        if content_type.starts_with("application/json") {
            // Audio endpoints only answer JSON when something went wrong
            let body = parse_json(response)?;
            return Err(format!("expected audio, got JSON: {}", body));
        }
        if response.body.is_empty() {
            return Err("provider returned empty audio".to_string());
        }
        Ok(json!({
            "audio_base64": STANDARD.encode(&response.body),
            "content_type": content_type,
            "bytes": response.body.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: Value) -> ProviderResponse {
        ProviderResponse {
            status: 200,
            content_type: Some("application/json".into()),
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn test_provider_from_service_name() {
        assert_eq!(ProviderKind::from_service_name("OpenAI"), ProviderKind::OpenAI);
        assert_eq!(ProviderKind::from_service_name("open-ai"), ProviderKind::OpenAI);
        assert_eq!(ProviderKind::from_service_name("Anthropic"), ProviderKind::Anthropic);
        assert_eq!(ProviderKind::from_service_name("Google Gemini"), ProviderKind::Gemini);
        assert_eq!(ProviderKind::from_service_name("Eleven Labs"), ProviderKind::ElevenLabs);
        // exact alias match, not substring sniffing
        assert_eq!(
            ProviderKind::from_service_name("My OpenAI Proxy"),
            ProviderKind::OpenAICompatible
        );
    }

    #[test]
    fn test_join_url_avoids_double_v1() {
        assert_eq!(
            join_url("https://api.openai.com/", "/v1/chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            join_url("https://api.groq.com/openai/v1", "/v1/chat/completions"),
            "https://api.groq.com/openai/v1/chat/completions"
        );
    }

    #[test]
    fn test_chat_messages_from_prompt() {
        let messages = chat_messages(&json!({"prompt": "hi", "system": "be brief"})).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "hi");
        assert!(chat_messages(&json!({"foo": 1})).is_err());
        assert!(chat_messages(&json!({"messages": []})).is_err());
    }

    #[test]
    fn test_openai_parse_text() {
        let parsed = OpenAIStrategy::official()
            .parse_response(&response(json!({
                "model": "gpt-4o-mini",
                "choices": [{"message": {"role": "assistant", "content": "hello"}}]
            })))
            .unwrap();
        assert_eq!(parsed["text"], "hello");
        assert_eq!(parsed["model"], "gpt-4o-mini");
    }

    #[test]
    fn test_error_payload_on_success_status_is_failure() {
        let err = OpenAIStrategy::official()
            .parse_response(&response(json!({"error": {"message": "quota exceeded"}})))
            .unwrap_err();
        assert!(err.contains("quota exceeded"));
    }

    #[test]
    fn test_null_error_field_on_success_is_not_failure() {
        let parsed = OpenAIStrategy::compatible()
            .parse_response(&response(json!({
                "model": "m",
                "error": null,
                "choices": [{"message": {"content": "hi"}}]
            })))
            .unwrap();
        assert_eq!(parsed["text"], "hi");

        assert_eq!(provider_error_message(&json!({"error": {"message": null}})), None);
        assert_eq!(provider_error_message(&json!({"detail": null})), None);
        assert_eq!(
            provider_error_message(&json!({"error": "rate limited"})).as_deref(),
            Some("rate limited")
        );
    }

    #[test]
    fn test_path_fields_must_be_single_segment() {
        let client = reqwest::Client::new();
        let target = CallTarget {
            base_url: "http://localhost",
            api_key: "AIza-test-key",
        };
        for model in ["../x", "a/b", "..", "gemini?alt=sse"] {
            let err = GeminiStrategy
                .build_request(&client, &target, &json!({"prompt": "hi", "model": model}))
                .unwrap_err();
            assert!(err.contains("model"), "{}", err);
        }
        assert!(GeminiStrategy
            .build_request(&client, &target, &json!({"prompt": "hi", "model": "gemini-1.5-pro"}))
            .is_ok());
        assert!(ElevenLabsStrategy
            .build_request(&client, &target, &json!({"text": "hi", "voice_id": "../../v1/user"}))
            .is_err());
    }

    #[test]
    fn test_anthropic_parse_joins_text_blocks() {
        let parsed = AnthropicStrategy
            .parse_response(&response(json!({
                "model": "claude-3-5-haiku-latest",
                "content": [{"type": "text", "text": "Hel"}, {"type": "text", "text": "lo"}]
            })))
            .unwrap();
        assert_eq!(parsed["text"], "Hello");
    }

    #[test]
    fn test_gemini_parse_missing_candidates() {
        let err = GeminiStrategy.parse_response(&response(json!({"candidates": []}))).unwrap_err();
        assert!(err.starts_with("malformed provider response"));
    }

    #[test]
    fn test_elevenlabs_parse_audio() {
        let parsed = ElevenLabsStrategy
            .parse_response(&ProviderResponse {
                status: 200,
                content_type: Some("audio/mpeg".into()),
                body: Bytes::from_static(b"ID3fakeaudio"),
            })
            .unwrap();
        assert_eq!(parsed["content_type"], "audio/mpeg");
        assert_eq!(parsed["bytes"], 12);
        assert_eq!(
            STANDARD.decode(parsed["audio_base64"].as_str().unwrap()).unwrap(),
            b"ID3fakeaudio"
        );
    }

    #[test]
    fn test_describe_http_error_prefers_provider_message() {
        let msg = describe_http_error(401, br#"{"error":{"message":"Incorrect API key provided"}}"#);
        assert_eq!(msg, "HTTP 401: Incorrect API key provided");
        assert_eq!(describe_http_error(500, b""), "HTTP 500: empty response body");
        assert_eq!(
            describe_http_error(422, br#"{"detail":{"status":"invalid_uid","message":"voice not found"}}"#),
            "HTTP 422: voice not found"
        );
    }

    #[test]
    fn test_registry_has_all_defaults() {
        let registry = ProviderRegistry::with_defaults();
        for kind in [
            ProviderKind::OpenAI,
            ProviderKind::OpenAICompatible,
            ProviderKind::Anthropic,
            ProviderKind::Gemini,
            ProviderKind::ElevenLabs,
        ] {
            assert_eq!(registry.get(kind).unwrap().kind(), kind);
        }
    }
}
