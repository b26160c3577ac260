//! Text-completion and embedding service used by the cognitive pipeline.
//!
//! The simulation treats the model as an opaque pair of functions:
//! `complete(prompt) -> text` and `embed(text) -> vector`.  Callers are
//! responsible for catching errors and substituting their documented
//! defaults — a failed call must never bring the tick loop down.

use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use simulacra_config::LlmConfig;

/// The opaque language-model interface.
///
/// `embed` must be deterministic for identical input within a run; the
/// associative memory caches vectors by key, so the service is only asked
/// once per distinct text.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

// ── HTTP client ───────────────────────────────────────────────────────────────

/// HTTP-backed model speaking either the Ollama native API or an
/// OpenAI-compatible one, selected by `LlmConfig::provider`.
#[derive(Debug, Clone)]
pub struct HttpModel {
    client: reqwest::Client,
    config: LlmConfig,
}

impl HttpModel {
    pub fn new(config: LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    fn base_url(&self) -> String {
        self.config.base_url.trim_end_matches('/').to_string()
    }

    fn api_key(&self) -> Option<String> {
        std::env::var(&self.config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    fn is_openai(&self) -> bool {
        self.config.provider.eq_ignore_ascii_case("openai")
    }

    async fn complete_ollama(&self, prompt: &str) -> Result<String> {
        let endpoint = format!("{}/api/generate", self.base_url());
        let payload = json!({
            "model": self.config.completion_model,
            "prompt": prompt,
            "stream": false
        });

        let response = self.client.post(endpoint).json(&payload).send().await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            return Err(anyhow!("completion endpoint returned {status}: {body}"));
        }

        body.get("response")
            .and_then(|value| value.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| anyhow!("completion response missing text: {body}"))
    }

    async fn complete_openai(&self, prompt: &str) -> Result<String> {
        let endpoint = format!("{}/v1/chat/completions", self.base_url());
        let payload = json!({
            "model": self.config.completion_model,
            "messages": [{"role": "user", "content": prompt}]
        });

        let mut request = self.client.post(endpoint).json(&payload);
        if let Some(key) = self.api_key() {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            return Err(anyhow!("completion endpoint returned {status}: {body}"));
        }

        body.get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| anyhow!("completion response missing content: {body}"))
    }

    async fn embed_ollama(&self, text: &str) -> Result<Vec<f32>> {
        let endpoint = format!("{}/api/embeddings", self.base_url());
        let payload = json!({
            "model": self.config.embedding_model,
            "prompt": text
        });

        let response = self.client.post(endpoint).json(&payload).send().await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            return Err(anyhow!("embedding endpoint returned {status}: {body}"));
        }

        parse_vector(body.get("embedding"))
            .ok_or_else(|| anyhow!("embedding response missing vector: {body}"))
    }

    async fn embed_openai(&self, text: &str) -> Result<Vec<f32>> {
        let endpoint = format!("{}/v1/embeddings", self.base_url());
        let payload = json!({
            "model": self.config.embedding_model,
            "input": text
        });

        let mut request = self.client.post(endpoint).json(&payload);
        if let Some(key) = self.api_key() {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            return Err(anyhow!("embedding endpoint returned {status}: {body}"));
        }

        parse_vector(
            body.get("data")
                .and_then(|data| data.get(0))
                .and_then(|item| item.get("embedding")),
        )
        .ok_or_else(|| anyhow!("embedding response missing vector: {body}"))
    }
}

#[async_trait]
impl LanguageModel for HttpModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!(chars = prompt.len(), "completion request");
        if self.is_openai() {
            self.complete_openai(prompt).await
        } else {
            self.complete_ollama(prompt).await
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(chars = text.len(), "embedding request");
        if self.is_openai() {
            self.embed_openai(text).await
        } else {
            self.embed_ollama(text).await
        }
    }
}

fn parse_vector(value: Option<&serde_json::Value>) -> Option<Vec<f32>> {
    value?
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

// ── Structured output extraction ──────────────────────────────────────────────

/// Extract the first JSON payload from a model reply.
///
/// Replies frequently wrap the requested JSON in prose or fenced code
/// blocks, so the reply is reduced to a list of candidate spans: the body
/// of every closed ` ``` ` fence (with or without a `json` language tag),
/// then the widest `{…}` and `[…]` spans of the raw text.  The first span
/// that parses wins.  Returns `None` when nothing parses; callers fall
/// back to their documented defaults.
pub fn extract_json_output<T: serde::de::DeserializeOwned>(response: &str) -> Option<T> {
    let mut candidates: Vec<&str> = Vec::new();

    // Fence bodies, in order of appearance.  `split` alternates between
    // prose and fence interiors; an unterminated trailing fence yields no
    // closing chunk and is dropped.
    let mut chunks = response.split("```");
    chunks.next();
    while let (Some(body), Some(_prose)) = (chunks.next(), chunks.next()) {
        candidates.push(body.strip_prefix("json").unwrap_or(body));
    }

    // The widest delimiter spans of the raw reply, braces before brackets.
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (response.find(open), response.rfind(close)) {
            if start < end {
                candidates.push(&response[start..=end]);
            }
        }
    }

    candidates
        .into_iter()
        .find_map(|span| serde_json::from_str(span.trim()).ok())
}

/// Pull the first integer out of a reply, clamped to `[min, max]`.
///
/// Used for wake-up hours and poignancy scores where the model is asked
/// for a bare number but often answers in a sentence.
pub fn extract_first_int(response: &str, min: i64, max: i64) -> Option<i64> {
    let mut digits = String::new();
    for ch in response.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
        } else if !digits.is_empty() {
            break;
        }
    }
    digits.parse::<i64>().ok().map(|n| n.clamp(min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Reply {
        verdict: String,
    }

    #[test]
    fn extract_fenced_json() {
        let raw = "Sure!\n```json\n{\"verdict\":\"yes\"}\n```";
        let out = extract_json_output::<Reply>(raw).unwrap();
        assert_eq!(out.verdict, "yes");
    }

    #[test]
    fn extract_bare_json_with_surrounding_text() {
        let raw = "here you go {\"verdict\":\"no\"} done";
        let out = extract_json_output::<Reply>(raw).unwrap();
        assert_eq!(out.verdict, "no");
    }

    #[test]
    fn extract_bare_json_array() {
        let raw = "Schedule: [[\"sleeping\", 360], [\"eating\", 60]]";
        let out = extract_json_output::<Vec<(String, i64)>>(raw).unwrap();
        assert_eq!(out[0].0, "sleeping");
        assert_eq!(out[1].1, 60);
    }

    #[test]
    fn extract_returns_none_for_plain_text() {
        assert!(extract_json_output::<Reply>("no json here at all").is_none());
    }

    #[test]
    fn extract_returns_none_for_malformed_fence() {
        let raw = "```json\n{not valid}\n```";
        assert!(extract_json_output::<Reply>(raw).is_none());
    }

    #[test]
    fn first_int_from_sentence() {
        assert_eq!(extract_first_int("I would say 7 am.", 0, 23), Some(7));
        assert_eq!(extract_first_int("Rating: 10/10", 1, 10), Some(10));
        assert_eq!(extract_first_int("42", 0, 23), Some(23));
        assert_eq!(extract_first_int("none", 0, 23), None);
    }
}
