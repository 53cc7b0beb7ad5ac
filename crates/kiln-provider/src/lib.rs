//! # kiln-provider
//!
//! Completion providers for Kiln.
//!
//! The attempt loop only ever talks to the [`CompletionProvider`] trait:
//! - [`OpenAiCompatibleProvider`] speaks the chat-completions wire format
//!   shared by Cerebras, Groq and OpenAI (plain, JSON mode, SSE streaming)
//! - [`ScriptedProvider`] replays canned replies for tests and offline runs
//!
//! Every call is stateless. Whatever the model needs to know about earlier
//! attempts is in the prompt.

mod auth;
mod circuit_breaker;
mod client;
mod provider;
mod scripted;
mod types;

pub use auth::resolve_api_key;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::OpenAiCompatibleProvider;
pub use provider::{CompletionProvider, TextStream};
pub use scripted::{ScriptedProvider, ScriptedReply};
pub use types::*;
