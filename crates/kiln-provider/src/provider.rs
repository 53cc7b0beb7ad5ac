//! The completion provider seam

use async_trait::async_trait;
use futures::stream::BoxStream;
use kiln_core::Result;

use crate::types::{CompletionRequest, CompletionResponse};

/// Ordered text fragments of a streamed completion
///
/// A stream cannot be resumed; to retry, issue the request again.
pub type TextStream = BoxStream<'static, Result<String>>;

/// Anything that turns a prompt into text
///
/// Implementations surface three failure modes through [`kiln_core::KilnError`]:
/// timeouts (`ProviderTimeout`), non-2xx replies (`ProviderStatus`,
/// `RateLimited`) and unusable bodies (`MalformedResponse`). Connection
/// failures are `ProviderUnreachable`.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name for logs and traces
    fn name(&self) -> &str;

    /// Model the provider sends requests to
    fn model(&self) -> &str;

    /// Generate free text
    async fn generate(&self, request: &CompletionRequest) -> Result<CompletionResponse>;

    /// Generate a JSON object as the response content
    async fn generate_json(&self, request: &CompletionRequest) -> Result<CompletionResponse>;

    /// Generate incrementally
    async fn stream(&self, request: &CompletionRequest) -> Result<TextStream>;
}
