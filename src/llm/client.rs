//! Chat-completion client abstracting over provider dialects.
//!
//! Protocol-level differences only: an OpenAI-style chat-completions dialect,
//! the Google `generateContent` dialect, the Hugging Face router (OpenAI
//! compatible) and the legacy Hugging Face inference endpoint. Everything
//! downstream consumes a single final text blob.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{GauntletError, Result};

/// Default request timeout; model responses over large prompts are slow.
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MAX_ATTEMPTS: u32 = 3;
const TEMPERATURE: f64 = 0.5;
const MAX_OUTPUT_TOKENS: u32 = 8000;
const GEMINI_MAX_OUTPUT_TOKENS: u32 = 8192;

/// Model markers stripped from responses before parsing.
const RESPONSE_MARKERS: &[&str] = &["<s>", "</s>", "[INST]", "[/INST]", "<|im_start|>", "<|im_end|>"];

/// Fallback payload when a provider returns nothing usable.
const EMPTY_RESPONSE_FALLBACK: &str =
    r#"{"decision": "hold", "reasoning": "empty model response, staying flat"}"#;

/// The seam the agent consumes; tests script it.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProviderKind {
    OpenAiCompatible,
    Gemini,
    HuggingFaceRouter,
    HuggingFaceLegacy,
}

/// Client configuration. `detect_from_url` picks the dialect from the
/// endpoint shape the way operators actually configure these services.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub kind: LlmProviderKind,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    /// Use `base_url` verbatim instead of appending `/chat/completions`.
    pub use_full_url: bool,
}

impl LlmConfig {
    pub fn new(api_url: &str, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let (kind, base_url, use_full_url) = Self::detect_from_url(api_url);
        Self {
            kind,
            api_key: api_key.into(),
            base_url,
            model: model.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            use_full_url,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn detect_from_url(api_url: &str) -> (LlmProviderKind, String, bool) {
        if api_url.contains("generativelanguage.googleapis.com") {
            return (LlmProviderKind::Gemini, api_url.to_string(), true);
        }
        if api_url.contains("router.huggingface.co") {
            return (LlmProviderKind::HuggingFaceRouter, api_url.to_string(), true);
        }
        if api_url.contains("api-inference.huggingface.co") || api_url.contains("huggingface.co") {
            return (LlmProviderKind::HuggingFaceLegacy, api_url.to_string(), true);
        }
        // A trailing '#' opts out of the /chat/completions suffix.
        if let Some(stripped) = api_url.strip_suffix('#') {
            return (LlmProviderKind::OpenAiCompatible, stripped.to_string(), true);
        }
        (LlmProviderKind::OpenAiCompatible, api_url.to_string(), false)
    }
}

pub struct LlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }

    pub fn kind(&self) -> LlmProviderKind {
        self.config.kind
    }

    /// One call with retries on transient transport failures.
    ///
    /// Up to three attempts, waiting `2 * attempt` seconds between them.
    /// Upstream protocol errors are not retried.
    async fn call_with_retry(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let mut last_err = None;

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                warn!(attempt, max = MAX_ATTEMPTS, "retrying LLM call");
            }

            match self.call_once(system_prompt, user_prompt).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    if !e.is_transient() {
                        return Err(e);
                    }
                    last_err = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(2 * attempt as u64)).await;
                    }
                }
            }
        }

        Err(GauntletError::LlmProvider(format!(
            "still failing after {MAX_ATTEMPTS} attempts: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn call_once(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        if self.config.api_key.is_empty() {
            return Err(GauntletError::InvalidConfig(
                "LLM API key is not configured".into(),
            ));
        }

        match self.config.kind {
            LlmProviderKind::Gemini => self.call_gemini(system_prompt, user_prompt).await,
            LlmProviderKind::HuggingFaceLegacy => {
                self.call_huggingface_legacy(system_prompt, user_prompt).await
            }
            LlmProviderKind::OpenAiCompatible | LlmProviderKind::HuggingFaceRouter => {
                self.call_openai_compatible(system_prompt, user_prompt).await
            }
        }
    }

    async fn call_openai_compatible(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let url = match self.config.kind {
            LlmProviderKind::HuggingFaceRouter => {
                format!("{}/v1/chat/completions", self.config.base_url)
            }
            _ if self.config.use_full_url => self.config.base_url.clone(),
            _ => format!("{}/chat/completions", self.config.base_url),
        };

        let mut messages = Vec::new();
        if !system_prompt.is_empty() {
            messages.push(json!({"role": "system", "content": system_prompt}));
        }
        messages.push(json!({"role": "user", "content": user_prompt}));

        let body = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": TEMPERATURE,
            "max_tokens": MAX_OUTPUT_TOKENS,
        });

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(wrap_transport)?;

        let status = resp.status();
        let raw = resp.text().await.map_err(wrap_transport)?;
        if !status.is_success() {
            return Err(GauntletError::LlmProvider(format!(
                "API returned status {status}: {raw}"
            )));
        }

        let parsed: ChatCompletionsResponse = serde_json::from_str(&raw)
            .map_err(|e| GauntletError::LlmProvider(format!("malformed response: {e}")))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GauntletError::LlmProvider("empty choices in response".into()))?;

        Ok(normalize_content(
            choice.message.content,
            choice.message.reasoning,
        ))
    }

    async fn call_gemini(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url, self.config.model
        );

        // Gemini is single-turn here: system and user prompts are merged.
        let full_content = if system_prompt.is_empty() {
            user_prompt.to_string()
        } else {
            format!("{system_prompt}\n\n{user_prompt}")
        };

        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": full_content}],
            }],
            "generationConfig": {
                "temperature": TEMPERATURE,
                "maxOutputTokens": GEMINI_MAX_OUTPUT_TOKENS,
            },
        });

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(wrap_transport)?;

        let status = resp.status();
        let raw = resp.text().await.map_err(wrap_transport)?;
        if !status.is_success() {
            return Err(GauntletError::LlmProvider(format!(
                "Gemini API returned status {status}: {raw}"
            )));
        }

        let parsed: GeminiResponse = serde_json::from_str(&raw)
            .map_err(|e| GauntletError::LlmProvider(format!("malformed Gemini response: {e}")))?;
        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| GauntletError::LlmProvider("Gemini returned no candidates".into()))?;

        let text = candidate
            .content
            .parts
            .into_iter()
            .next()
            .map(|p| p.text)
            .unwrap_or_default();

        if text.is_empty() {
            return Err(GauntletError::LlmProvider(format!(
                "Gemini returned empty content (finishReason={})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }

        // MAX_TOKENS responses are possibly truncated; the downstream parser
        // is tolerant, so the text is kept rather than dropped.
        if candidate.finish_reason.as_deref() == Some("MAX_TOKENS") {
            warn!(
                chars = text.len(),
                "Gemini hit token limit; response may be truncated"
            );
        }

        Ok(normalize_content(Some(text), None))
    }

    async fn call_huggingface_legacy(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let url = if self.config.base_url.contains("/models/") {
            self.config.base_url.clone()
        } else {
            format!("{}/models/{}", self.config.base_url, self.config.model)
        };

        let full_content = if system_prompt.is_empty() {
            user_prompt.to_string()
        } else {
            format!("{system_prompt}\n\n{user_prompt}")
        };

        let body = json!({
            "inputs": full_content,
            "parameters": {
                "temperature": TEMPERATURE,
                "max_new_tokens": 2000,
                "return_full_text": false,
            },
        });

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(wrap_transport)?;

        let status = resp.status();
        let raw = resp.text().await.map_err(wrap_transport)?;
        if !status.is_success() {
            if status.as_u16() == 503 || status.as_u16() == 202 {
                // Model cold start; counts as a temporary failure for retry.
                return Err(GauntletError::LlmProvider(format!(
                    "temporary failure: model loading (status {status})"
                )));
            }
            return Err(GauntletError::LlmProvider(format!(
                "Hugging Face API returned status {status}: {raw}"
            )));
        }

        let text = extract_generated_text(&raw, &full_content).ok_or_else(|| {
            GauntletError::LlmProvider(format!("unrecognized Hugging Face response: {raw}"))
        })?;
        Ok(normalize_content(Some(text), None))
    }
}

#[async_trait]
impl ChatCompleter for LlmClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        debug!(
            kind = ?self.config.kind,
            model = %self.config.model,
            "LLM call"
        );
        self.call_with_retry(system_prompt, user_prompt).await
    }
}

fn wrap_transport(e: reqwest::Error) -> GauntletError {
    if e.is_timeout() {
        GauntletError::LlmProvider(format!("request timed out: {e}"))
    } else if e.is_connect() {
        GauntletError::LlmProvider(format!("connection refused: {e}"))
    } else {
        GauntletError::Http(e)
    }
}

/// Legacy HF responses may be an array or object with `generated_text`,
/// sometimes echoing the prompt as a prefix, or a bare string array.
fn extract_generated_text(raw: &str, prompt: &str) -> Option<String> {
    let strip_prefix = |text: String| -> String {
        text.strip_prefix(prompt).map(str::to_string).unwrap_or(text)
    };

    if let Ok(items) = serde_json::from_str::<Vec<serde_json::Value>>(raw) {
        if let Some(first) = items.first() {
            if let Some(text) = first.get("generated_text").and_then(|v| v.as_str()) {
                return Some(strip_prefix(text.to_string()));
            }
            if let Some(text) = first.as_str() {
                return Some(text.to_string());
            }
        }
    }
    if let Ok(obj) = serde_json::from_str::<serde_json::Value>(raw) {
        if let Some(text) = obj.get("generated_text").and_then(|v| v.as_str()) {
            return Some(strip_prefix(text.to_string()));
        }
    }
    None
}

/// Strip model markers, fall back to the `reasoning` field when content is
/// blank, and synthesize a hold response when nothing usable remains.
fn normalize_content(content: Option<String>, reasoning: Option<String>) -> String {
    let blank = |s: &str| s.trim().is_empty() || s.trim() == "<s>";

    let mut text = content.unwrap_or_default();
    if blank(&text) {
        if let Some(r) = reasoning {
            if !blank(&r) {
                text = r;
            }
        }
    }

    for marker in RESPONSE_MARKERS {
        text = text.replace(marker, "");
    }
    let text = text.trim().to_string();

    if text.is_empty() {
        return EMPTY_RESPONSE_FALLBACK.to_string();
    }
    text
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiContent,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_detection_picks_gemini() {
        let cfg = LlmConfig::new(
            "https://generativelanguage.googleapis.com/v1beta",
            "key",
            "gemini-pro",
        );
        assert_eq!(cfg.kind, LlmProviderKind::Gemini);
        assert!(cfg.use_full_url);
    }

    #[test]
    fn url_detection_picks_huggingface_router_before_legacy() {
        let cfg = LlmConfig::new("https://router.huggingface.co", "key", "m");
        assert_eq!(cfg.kind, LlmProviderKind::HuggingFaceRouter);

        let cfg = LlmConfig::new("https://api-inference.huggingface.co", "key", "m");
        assert_eq!(cfg.kind, LlmProviderKind::HuggingFaceLegacy);
    }

    #[test]
    fn trailing_hash_means_full_url() {
        let cfg = LlmConfig::new("https://example.com/v1/custom#", "key", "m");
        assert_eq!(cfg.kind, LlmProviderKind::OpenAiCompatible);
        assert_eq!(cfg.base_url, "https://example.com/v1/custom");
        assert!(cfg.use_full_url);

        let cfg = LlmConfig::new("https://api.example.com/v1", "key", "m");
        assert!(!cfg.use_full_url);
    }

    #[test]
    fn normalize_strips_markers_and_trims() {
        let text = normalize_content(Some("<s> analysis [INST]here[/INST] </s>".into()), None);
        assert_eq!(text, "analysis here");
    }

    #[test]
    fn normalize_falls_back_to_reasoning_then_synthetic_hold() {
        let text = normalize_content(Some("  ".into()), Some("thinking aloud".into()));
        assert_eq!(text, "thinking aloud");

        let text = normalize_content(Some("<s> ".into()), None);
        assert_eq!(text, EMPTY_RESPONSE_FALLBACK);
    }

    #[test]
    fn legacy_hf_array_response_strips_prompt_echo() {
        let raw = r#"[{"generated_text": "PROMPT plus the answer"}]"#;
        let text = extract_generated_text(raw, "PROMPT").unwrap();
        assert_eq!(text, " plus the answer");
    }

    #[test]
    fn legacy_hf_object_and_string_array_forms_parse() {
        let raw = r#"{"generated_text": "object form"}"#;
        assert_eq!(extract_generated_text(raw, "").unwrap(), "object form");

        let raw = r#"["bare string"]"#;
        assert_eq!(extract_generated_text(raw, "").unwrap(), "bare string");
    }
}
