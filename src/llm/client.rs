use super::models::ProviderKind;
use crate::config::Config;
use crate::error::{CourtError, Result};
use crate::util::{truncate, MAX_ERROR_BODY_CHARS};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for one model round trip
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Output budget for an analysis call
pub const ANALYSIS_MAX_TOKENS: u32 = 1024;
/// Output budget for one intensity's messages
pub const MESSAGE_MAX_TOKENS: u32 = 300;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A text-completion endpoint.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// One live round trip: free-text prompt in, free text out.
    async fn complete(&self, prompt: &str, max_output_tokens: u32) -> Result<String>;
}

/// Turn a non-success HTTP status into an error. A rejected key is a
/// configuration problem and is not retried; everything else is transport.
fn http_failure(provider: &str, status: reqwest::StatusCode, body: &str) -> CourtError {
    let detail = match status.as_u16() {
        401 | 403 => {
            return CourtError::Config(format!(
                "{} rejected the API key ({}); check {} or run `blame-court set-key`",
                provider,
                status,
                provider
                    .parse::<ProviderKind>()
                    .map(|kind| kind.api_key_env())
                    .unwrap_or("the provider API key")
            ))
        }
        429 => format!("Rate limited by {} ({})", provider, status),
        500..=599 => format!(
            "{} server error ({}). The service may be temporarily unavailable.",
            provider, status
        ),
        _ => format!(
            "{} API error {}: {}",
            provider,
            status,
            truncate(body, MAX_ERROR_BODY_CHARS)
        ),
    };
    CourtError::Transport(detail)
}

fn request_failure(provider: &str, err: reqwest::Error) -> CourtError {
    if err.is_timeout() {
        CourtError::Transport(format!("{} request timed out", provider))
    } else {
        CourtError::Transport(format!("{} request failed: {}", provider, err))
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CourtError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// POST a JSON body and return the response text on success.
async fn post_json<B: Serialize + ?Sized>(
    provider: &str,
    request: reqwest::RequestBuilder,
    body: &B,
) -> Result<String> {
    let response = request
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| request_failure(provider, e))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| request_failure(provider, e))?;

    if !status.is_success() {
        return Err(http_failure(provider, status, &text));
    }
    Ok(text)
}

fn decode<'a, T: Deserialize<'a>>(provider: &str, text: &'a str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| {
        CourtError::Transport(format!(
            "Failed to parse {} response: {}\n{}",
            provider,
            e,
            truncate(text, MAX_ERROR_BODY_CHARS)
        ))
    })
}

fn non_empty(provider: &str, text: String) -> Result<String> {
    if text.trim().is_empty() {
        Err(CourtError::MalformedResponse(format!(
            "{} returned no text content",
            provider
        )))
    } else {
        Ok(text)
    }
}

// ============================================================================
// Anthropic
// ============================================================================

pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: ProviderKind::Anthropic.base_url().to_string(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        ProviderKind::Anthropic.name()
    }

    async fn complete(&self, prompt: &str, max_output_tokens: u32) -> Result<String> {
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: max_output_tokens,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let request = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);

        let text = post_json(self.name(), request, &body).await?;
        let parsed: AnthropicResponse = decode(self.name(), &text)?;
        let content = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");
        non_empty(self.name(), content)
    }
}

// ============================================================================
// Gemini
// ============================================================================

pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: [GeminiContent<'a>; 1],
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    role: &'a str,
    parts: [GeminiPart<'a>; 1],
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Deserialize)]
struct GeminiCandidatePart {
    text: Option<String>,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: ProviderKind::Gemini.base_url().to_string(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        ProviderKind::Gemini.name()
    }

    async fn complete(&self, prompt: &str, max_output_tokens: u32) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let body = GeminiRequest {
            contents: [GeminiContent {
                role: "user",
                parts: [GeminiPart { text: prompt }],
            }],
            generation_config: GeminiGenerationConfig { max_output_tokens },
        };
        let request = self.client.post(&url).header("x-goog-api-key", &self.api_key);

        let text = post_json(self.name(), request, &body).await?;
        let parsed: GeminiResponse = decode(self.name(), &text)?;
        let content = parsed
            .candidates
            .into_iter()
            .flat_map(|c| c.content.map(|content| content.parts).unwrap_or_default())
            .filter_map(|part| part.text)
            .collect::<Vec<_>>()
            .join("\n");
        non_empty(self.name(), content)
    }
}

// ============================================================================
// OpenRouter
// ============================================================================

pub struct OpenRouterProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

impl OpenRouterProvider {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: ProviderKind::OpenRouter.base_url().to_string(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        ProviderKind::OpenRouter.name()
    }

    async fn complete(&self, prompt: &str, max_output_tokens: u32) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: max_output_tokens,
            stream: false,
        };
        let request = self
            .client
            .post(&url)
            .header("X-Title", "blame-court")
            .bearer_auth(&self.api_key);

        let text = post_json(self.name(), request, &body).await?;
        let parsed: ChatResponse = decode(self.name(), &text)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        non_empty(self.name(), content)
    }
}

/// Build the provider named in `config`, resolving its API key.
pub fn provider_from_config(config: &Config) -> Result<Arc<dyn LlmProvider>> {
    let kind = config.provider;
    let api_key = config.api_key(kind).ok_or_else(|| {
        CourtError::Config(format!(
            "No API key configured for {}. Set {} or run 'blame-court set-key {} <KEY>'.",
            kind,
            kind.api_key_env(),
            kind
        ))
    })?;
    let model = config.model_for(kind);
    let timeout = config.request_timeout();

    let provider: Arc<dyn LlmProvider> = match kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(api_key, model, timeout)?),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(api_key, model, timeout)?),
        ProviderKind::OpenRouter => Arc::new(OpenRouterProvider::new(api_key, model, timeout)?),
    };
    Ok(provider)
}

// ============================================================================
// Gateway
// ============================================================================

/// Provider-agnostic entry point for model calls. Every call is a live round
/// trip bounded by `timeout`; an elapsed timeout is a transport failure.
#[derive(Clone)]
pub struct LlmGateway {
    provider: Arc<dyn LlmProvider>,
    timeout: Duration,
    analysis_max_tokens: u32,
    message_max_tokens: u32,
}

impl LlmGateway {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            analysis_max_tokens: ANALYSIS_MAX_TOKENS,
            message_max_tokens: MESSAGE_MAX_TOKENS,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(provider_from_config(config)?)
            .with_timeout(config.request_timeout())
            .with_token_budgets(config.analysis_max_tokens, config.message_max_tokens))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_token_budgets(mut self, analysis: u32, message: u32) -> Self {
        self.analysis_max_tokens = analysis;
        self.message_max_tokens = message;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn complete(&self, prompt: &str, max_output_tokens: u32) -> Result<String> {
        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            self.timeout,
            self.provider.complete(prompt, max_output_tokens),
        )
        .await
        .unwrap_or_else(|_| {
            Err(CourtError::Transport(format!(
                "{} did not answer within {}s",
                self.provider.name(),
                self.timeout.as_secs()
            )))
        });
        tracing::debug!(
            provider = self.provider.name(),
            max_output_tokens,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "model call finished"
        );
        result
    }

    pub async fn complete_analysis(&self, prompt: &str) -> Result<String> {
        self.complete(prompt, self.analysis_max_tokens).await
    }

    pub async fn complete_message(&self, prompt: &str) -> Result<String> {
        self.complete(prompt, self.message_max_tokens).await
    }
}
