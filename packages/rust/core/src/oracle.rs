//! The language-model oracle: trait seam, reply parsing, and the OpenRouter
//! client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use pagewise_shared::{AppConfig, PagewiseError, Result, validate_api_key};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Structured reply to a decision prompt.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OracleReply {
    pub decision: String,
    pub reasoning: String,
    /// Raw candidate indices; may be negative or unknown until validated.
    pub selected_url_indices: Vec<i64>,
}

/// A text-completion model.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Return the model's completion for `prompt`.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Ask for a decision and parse the structured reply.
    async fn propose(&self, context: &str) -> Result<OracleReply> {
        let raw = self.complete(context).await?;
        parse_reply(&raw)
    }
}

/// Parse a YAML decision reply, optionally wrapped in a ```` ```yaml ```` fence.
pub fn parse_reply(raw: &str) -> Result<OracleReply> {
    let trimmed = raw.trim();
    let body = ["```yaml", "```yml"]
        .iter()
        .find_map(|fence| trimmed.find(fence).map(|pos| &trimmed[pos + fence.len()..]))
        .map(|rest| rest.split("```").next().unwrap_or_default())
        .unwrap_or(trimmed);

    serde_yaml::from_str(body)
        .map_err(|e| PagewiseError::parse(format!("invalid oracle reply: {e}")))
}

// ---------------------------------------------------------------------------
// OpenRouter
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ChatReplyMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completion client for OpenRouter.
pub struct OpenRouterOracle {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    max_retries: u32,
    retry_wait: Duration,
}

impl OpenRouterOracle {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("Pagewise/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| PagewiseError::Oracle(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            max_retries: 0,
            retry_wait: Duration::ZERO,
        })
    }

    /// Build a client from the `[openrouter]` config section and the API key env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = validate_api_key(config)?;
        let or = &config.openrouter;
        Ok(Self::new(api_key, &or.default_model, &or.base_url)?
            .with_retries(or.max_retries, Duration::from_millis(or.retry_wait_ms)))
    }

    /// Retry failed requests `max_retries` extra times, waiting `wait` between attempts.
    pub fn with_retries(mut self, max_retries: u32, wait: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_wait = wait;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn request_completion(&self, prompt: &str) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PagewiseError::Oracle(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PagewiseError::Oracle(format!("API error ({status}): {body}")));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| PagewiseError::Oracle(format!("failed to parse response: {e}")))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| PagewiseError::Oracle("empty completion".into()))
    }
}

#[async_trait]
impl Oracle for OpenRouterOracle {
    #[instrument(skip_all, fields(model = %self.model, prompt_len = prompt.len()))]
    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.request_completion(prompt).await {
                Ok(text) => {
                    debug!(attempt, reply_len = text.len(), "completion received");
                    return Ok(text);
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "completion failed, retrying");
                    tokio::time::sleep(self.retry_wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "gen-1",
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
    }

    #[test]
    fn parses_fenced_yaml() {
        let raw = "```yaml\nreasoning: |\n    Need the pricing page\ndecision: explore\nselected_url_indices:\n    # https://example.com/pricing\n    - 3\n    - 1\n```";
        let reply = parse_reply(raw).unwrap();
        assert_eq!(reply.decision, "explore");
        assert_eq!(reply.reasoning.trim(), "Need the pricing page");
        assert_eq!(reply.selected_url_indices, vec![3, 1]);
    }

    #[test]
    fn parses_bare_yaml_with_negative_index() {
        let raw = "decision: answer\nreasoning: enough\nselected_url_indices: [-1, 0]";
        let reply = parse_reply(raw).unwrap();
        assert_eq!(reply.selected_url_indices, vec![-1, 0]);
    }

    #[test]
    fn parses_fence_after_preamble() {
        let raw = "Here is my decision:\n```yaml\ndecision: answer\nreasoning: ok\nselected_url_indices: []\n```\nThanks";
        let reply = parse_reply(raw).unwrap();
        assert_eq!(reply.decision, "answer");
        assert!(reply.selected_url_indices.is_empty());
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert!(parse_reply("decision: answer\nreasoning: ok").is_err());
        assert!(parse_reply("just some prose").is_err());
    }

    #[tokio::test]
    async fn openrouter_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("hello there")))
            .expect(1)
            .mount(&server)
            .await;

        let oracle = OpenRouterOracle::new("test-key", "test/model", &server.uri()).unwrap();
        let text = oracle.complete("hi").await.unwrap();
        assert_eq!(text, "hello there");
    }

    #[tokio::test]
    async fn openrouter_propose_parses_reply() {
        let server = MockServer::start().await;
        let yaml = "```yaml\ndecision: answer\nreasoning: enough info\nselected_url_indices:\n  - 0\n```";
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(yaml)))
            .mount(&server)
            .await;

        let oracle = OpenRouterOracle::new("k", "m", &format!("{}/", server.uri())).unwrap();
        let reply = oracle.propose("context").await.unwrap();
        assert_eq!(reply.decision, "answer");
        assert_eq!(reply.selected_url_indices, vec![0]);
    }

    #[tokio::test]
    async fn openrouter_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .expect(2)
            .mount(&server)
            .await;

        let oracle = OpenRouterOracle::new("k", "m", &server.uri())
            .unwrap()
            .with_retries(1, Duration::from_millis(10));
        let err = oracle.complete("hi").await.unwrap_err();
        assert!(matches!(err, PagewiseError::Oracle(_)));
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn openrouter_rejects_empty_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .mount(&server)
            .await;

        let oracle = OpenRouterOracle::new("k", "m", &server.uri()).unwrap();
        assert!(oracle.complete("hi").await.is_err());
    }
}
