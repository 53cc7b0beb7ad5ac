//! OpenAI-compatible chat-completions client
//!
//! Cerebras, Groq and OpenAI all accept the same request body, so one client
//! covers them; only the base URL, default model and key variable differ.

use crate::auth;
use crate::circuit_breaker::CircuitBreaker;
use crate::provider::{CompletionProvider, TextStream};
use crate::types::{
    ChatMessage, ChatRequest, ChatResponse, ChatStreamChunk, CompletionRequest,
    CompletionResponse, ProviderPreset, ResponseFormat,
};
use async_trait::async_trait;
use futures::StreamExt;
use kiln_core::config::{ProviderKind, ProviderSettings};
use kiln_core::{KilnError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

// Retry configuration for 429 / 5xx
const INITIAL_BACKOFF_SECS: u64 = 1;
const MAX_BACKOFF_SECS: u64 = 30;

/// Marker ending an SSE completion stream
const STREAM_DONE: &str = "[DONE]";

/// Client for any chat-completions endpoint
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    http: reqwest::Client,
    kind: ProviderKind,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    max_retries: u32,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl OpenAiCompatibleProvider {
    /// Build a provider from config, resolving the API key from the environment
    ///
    /// Custom endpoints may run without a key; hosted ones may not.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self> {
        let preset = ProviderPreset::for_kind(settings.kind);
        let key_env = settings
            .api_key_env
            .clone()
            .unwrap_or_else(|| preset.api_key_env.to_string());

        let api_key = match auth::resolve_api_key(&key_env) {
            Ok(key) => Some(key),
            Err(_) if settings.kind == ProviderKind::Custom => None,
            Err(e) => return Err(e),
        };

        let timeout = Duration::from_secs(settings.timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KilnError::ProviderUnreachable(format!("HTTP client setup: {}", e)))?;

        Ok(Self {
            http,
            kind: settings.kind,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| preset.base_url.to_string()),
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| preset.default_model.to_string()),
            api_key,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            timeout,
            max_retries: settings.max_retries,
            circuit_breaker: Arc::new(CircuitBreaker::default()),
        })
    }

    /// Share a breaker between providers hitting the same backend
    pub fn with_circuit_breaker(mut self, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_body(&self, request: &CompletionRequest, json: bool, stream: bool) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(&request.system_prompt),
                ChatMessage::user(&request.user_prompt),
            ],
            temperature: request.temperature.unwrap_or(self.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            response_format: json.then(ResponseFormat::json_object),
            stream,
        }
    }

    fn map_send_error(&self, error: reqwest::Error) -> KilnError {
        if error.is_timeout() {
            KilnError::ProviderTimeout(self.timeout.as_millis() as u64)
        } else {
            KilnError::ProviderUnreachable(format!("{}: {}", self.kind, error))
        }
    }

    /// POST the body, retrying rate limits and server errors with backoff
    async fn send(&self, body: &ChatRequest) -> Result<reqwest::Response> {
        if !self.circuit_breaker.can_execute() {
            return Err(KilnError::RateLimited(format!(
                "Circuit breaker is OPEN after repeated {} failures. Wait {} seconds before retry.",
                self.kind,
                self.circuit_breaker.time_until_retry() / 1000
            )));
        }

        let mut retries = 0;
        let mut backoff_secs = INITIAL_BACKOFF_SECS;

        loop {
            debug!("Sending request to {} (try {})", self.kind, retries + 1);

            let mut builder = self.http.post(self.endpoint()).json(body);
            if let Some(key) = &self.api_key {
                builder = builder.bearer_auth(key);
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    self.circuit_breaker.record_failure();
                    return Err(self.map_send_error(e));
                }
            };

            let status = response.status();
            if status.is_success() {
                self.circuit_breaker.record_success();
                return Ok(response);
            }

            let retryable = status.as_u16() == 429 || status.is_server_error();
            if retryable && retries < self.max_retries {
                retries += 1;
                let wait_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(backoff_secs)
                    .min(MAX_BACKOFF_SECS);

                warn!(
                    "{} returned {}. Waiting {} seconds before retry {}/{}",
                    self.kind, status, wait_secs, retries, self.max_retries
                );

                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                continue;
            }

            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());

            self.circuit_breaker.record_failure();
            tracing::error!(
                "Circuit breaker: recorded failure (count: {})",
                self.circuit_breaker.failure_count()
            );

            if status.as_u16() == 429 {
                return Err(KilnError::RateLimited(format!(
                    "Rate limit exceeded after {} retries. Last error: {}",
                    retries, body_text
                )));
            }
            return Err(KilnError::ProviderStatus {
                status: status.as_u16(),
                body: body_text,
            });
        }
    }

    async fn complete(&self, request: &CompletionRequest, json: bool) -> Result<CompletionResponse> {
        let started = Instant::now();
        let body = self.build_body(request, json, false);
        let response = self.send(&body).await?;

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| KilnError::MalformedResponse(format!("Failed to parse body: {}", e)))?;

        let latency_ms = started.elapsed().as_millis() as u64;
        let choice = chat
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| KilnError::MalformedResponse("No choices in response".to_string()))?;

        let content = choice.message.content.unwrap_or_default();
        let usage = chat.usage.unwrap_or_default().into();

        info!(
            "{} replied in {}ms ({} chars, finish: {:?})",
            self.kind,
            latency_ms,
            content.len(),
            choice.finish_reason
        );

        Ok(CompletionResponse {
            content,
            model: if chat.model.is_empty() {
                self.model.clone()
            } else {
                chat.model
            },
            provider: self.kind.to_string(),
            usage,
            finish_reason: choice.finish_reason,
            latency_ms,
        })
    }
}

/// Text carried by one SSE line, `None` for keep-alives, comments and the end marker
pub(crate) fn parse_sse_line(line: &str) -> Result<Option<String>> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() || data == STREAM_DONE {
        return Ok(None);
    }

    let chunk: ChatStreamChunk = serde_json::from_str(data)
        .map_err(|e| KilnError::MalformedResponse(format!("Bad stream chunk: {}", e)))?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        match self.kind {
            ProviderKind::Cerebras => "cerebras",
            ProviderKind::Groq => "groq",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Custom => "custom",
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(provider = %self.kind, model = %self.model))]
    async fn generate(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        self.complete(request, false).await
    }

    #[instrument(skip_all, fields(provider = %self.kind, model = %self.model))]
    async fn generate_json(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        self.complete(request, true).await
    }

    #[instrument(skip_all, fields(provider = %self.kind, model = %self.model))]
    async fn stream(&self, request: &CompletionRequest) -> Result<TextStream> {
        let body = self.build_body(request, false, true);
        let response = self.send(&body).await?;
        let mut bytes = response.bytes_stream();
        let timeout = self.timeout;

        let stream = async_stream::try_stream! {
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| {
                    if e.is_timeout() {
                        KilnError::ProviderTimeout(timeout.as_millis() as u64)
                    } else {
                        KilnError::ProviderUnreachable(format!("Stream interrupted: {}", e))
                    }
                })?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline).collect();
                    if let Some(text) = parse_sse_line(&line)? {
                        yield text;
                    }
                }
            }
            if let Some(text) = parse_sse_line(&buffer)? {
                yield text;
            }
        };

        Ok(stream.boxed())
    }
}
