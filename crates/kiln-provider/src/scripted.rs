//! Deterministic provider for tests and offline runs

use crate::provider::{CompletionProvider, TextStream};
use crate::types::{CompletionRequest, CompletionResponse};
use async_trait::async_trait;
use futures::StreamExt;
use kiln_core::{KilnError, Result, Usage};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// One canned provider reply
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    /// Reply with this text
    Text(String),
    /// Fail as if the endpoint could not be reached
    Unreachable,
    /// Never answer
    Hang,
}

impl ScriptedReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }
}

/// Provider that replays queued replies in order
///
/// Once the queue is empty the fallback reply is used for every call.
#[derive(Debug)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: ScriptedReply,
    prompts: Mutex<Vec<CompletionRequest>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: ScriptedReply::Text(String::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_reply(self, reply: ScriptedReply) -> Self {
        self.lock_replies().push_back(reply);
        self
    }

    pub fn with_replies(self, replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        self.lock_replies().extend(replies);
        self
    }

    pub fn with_fallback(mut self, fallback: ScriptedReply) -> Self {
        self.fallback = fallback;
        self
    }

    /// Every request received, oldest first
    pub fn prompts(&self) -> Vec<CompletionRequest> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<ScriptedReply>> {
        self.replies.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn next_text(&self, request: &CompletionRequest) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let reply = self
            .lock_replies()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match reply {
            ScriptedReply::Text(content) => Ok(content),
            ScriptedReply::Unreachable => Err(KilnError::ProviderUnreachable(
                "scripted provider is offline".to_string(),
            )),
            ScriptedReply::Hang => {
                // Parks until the caller drops the future
                loop {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
            }
        }
    }

    fn respond(&self, content: String) -> CompletionResponse {
        let completion_tokens = content.split_whitespace().count() as u32;
        CompletionResponse {
            content,
            model: "scripted".to_string(),
            provider: "scripted".to_string(),
            usage: Usage {
                prompt_tokens: 0,
                completion_tokens,
                total_tokens: completion_tokens,
            },
            finish_reason: Some("stop".to_string()),
            latency_ms: 0,
        }
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let content = self.next_text(request).await?;
        Ok(self.respond(content))
    }

    async fn generate_json(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let content = self.next_text(request).await?;
        serde_json::from_str::<serde_json::Value>(&content)
            .map_err(|e| KilnError::MalformedResponse(format!("Not a JSON object: {}", e)))?;
        Ok(self.respond(content))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<TextStream> {
        let content = self.next_text(request).await?;
        let chunks: Vec<Result<String>> = content
            .split_inclusive('\n')
            .map(|line| Ok(line.to_string()))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}
