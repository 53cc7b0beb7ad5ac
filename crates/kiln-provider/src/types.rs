//! Request, response and wire types for completion providers

use kiln_core::config::ProviderKind;
use kiln_core::Usage;
use serde::{Deserialize, Serialize};

/// One completion call: a system instruction plus a user instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// Provider default when unset
    pub temperature: Option<f32>,
    /// Provider default when unset
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// What a provider sent back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub provider: String,
    pub usage: Usage,
    pub finish_reason: Option<String>,
    pub latency_ms: u64,
}

/// Endpoint defaults for a hosted provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPreset {
    pub base_url: &'static str,
    pub default_model: &'static str,
    pub api_key_env: &'static str,
}

impl ProviderPreset {
    pub fn for_kind(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Cerebras => Self {
                base_url: "https://api.cerebras.ai/v1",
                default_model: "llama-3.3-70b",
                api_key_env: "CEREBRAS_API_KEY",
            },
            ProviderKind::Groq => Self {
                base_url: "https://api.groq.com/openai/v1",
                default_model: "llama-3.3-70b-versatile",
                api_key_env: "GROQ_API_KEY",
            },
            ProviderKind::OpenAi => Self {
                base_url: "https://api.openai.com/v1",
                default_model: "gpt-4o-mini",
                api_key_env: "OPENAI_API_KEY",
            },
            ProviderKind::Custom => Self {
                base_url: "http://localhost:8080/v1",
                default_model: "default",
                api_key_env: "KILN_API_KEY",
            },
        }
    }
}

/// Chat message in the chat-completions wire format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.to_string()),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.to_string()),
        }
    }
}

/// `response_format` field; only JSON object mode is used
#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: &'static str,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            format_type: "json_object",
        }
    }
}

/// Chat-completions request body
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// Chat-completions response body
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl From<ChatUsage> for Usage {
    fn from(usage: ChatUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

/// One SSE chunk of a streamed completion
#[derive(Debug, Clone, Deserialize)]
pub struct ChatStreamChunk {
    #[serde(default)]
    pub choices: Vec<ChatStreamChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatStreamChoice {
    #[serde(default)]
    pub delta: ChatDelta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatDelta {
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = CompletionRequest::new("sys", "user")
            .with_temperature(0.7)
            .with_max_tokens(512);
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(512));
    }

    #[test]
    fn test_presets() {
        let cerebras = ProviderPreset::for_kind(ProviderKind::Cerebras);
        assert_eq!(cerebras.default_model, "llama-3.3-70b");
        assert_eq!(cerebras.api_key_env, "CEREBRAS_API_KEY");

        let groq = ProviderPreset::for_kind(ProviderKind::Groq);
        assert!(groq.base_url.contains("groq.com"));
    }

    #[test]
    fn test_chat_request_omits_defaults() {
        let body = ChatRequest {
            model: "m".into(),
            messages: vec![ChatMessage::system("s"), ChatMessage::user("u")],
            temperature: 0.2,
            max_tokens: 100,
            response_format: None,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("response_format").is_none());
        assert!(json.get("stream").is_none());
        assert_eq!(json["messages"][0]["role"], "system");
    }

    #[test]
    fn test_chat_request_json_mode() {
        let body = ChatRequest {
            model: "m".into(),
            messages: vec![],
            temperature: 0.2,
            max_tokens: 100,
            response_format: Some(ResponseFormat::json_object()),
            stream: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_chat_response_parse() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "model": "llama-3.3-70b",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
        }"#;
        let response: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("hi"));
        let usage: Usage = response.usage.unwrap().into();
        assert_eq!(usage.total_tokens, 4);
    }
}
