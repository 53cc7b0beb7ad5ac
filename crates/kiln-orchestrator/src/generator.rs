//! Generator node: task in, code out

use crate::extract::{extract_block, parse_confidence};
use crate::prompt::{build_generation_prompt, system_prompt};
use kiln_core::{CriticVerdict, KilnError, Result, Task, Usage};
use kiln_memory::{format_lessons, Lesson};
use kiln_provider::{CompletionProvider, CompletionRequest};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Confidence assumed when the model does not report one
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

/// One generation's extracted payload
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub code: String,
    /// Fence language tag, if the reply had one
    pub language: Option<String>,
    pub confidence: f32,
    pub usage: Usage,
}

/// Asks the completion provider for a program
///
/// Stateless between calls; everything an attempt needs is passed in.
#[derive(Clone)]
pub struct GeneratorNode {
    provider: Arc<dyn CompletionProvider>,
    language: String,
    max_attempts: usize,
}

impl GeneratorNode {
    pub fn new(provider: Arc<dyn CompletionProvider>, language: impl Into<String>) -> Self {
        Self {
            provider,
            language: language.into(),
            max_attempts: 1,
        }
    }

    /// Attempt budget quoted back to the model
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn provider(&self) -> &Arc<dyn CompletionProvider> {
        &self.provider
    }

    /// Generate code for `task`
    ///
    /// A reply with no extractable code is `KilnError::EmptyGeneration`,
    /// which costs the attempt but does not end the run.
    #[instrument(skip_all, fields(attempt = attempt_index))]
    pub async fn generate(
        &self,
        task: &Task,
        lessons: &[Lesson],
        prior: Option<&CriticVerdict>,
        attempt_index: usize,
    ) -> Result<Generation> {
        let user_prompt = build_generation_prompt(
            task,
            &format_lessons(lessons),
            prior,
            attempt_index,
            self.max_attempts.max(attempt_index),
        );
        debug!("Prompt length: {} chars", user_prompt.len());

        let request = CompletionRequest::new(system_prompt(&self.language), user_prompt);
        let response = self.provider.generate(&request).await?;

        let block = extract_block(&response.content).ok_or(KilnError::EmptyGeneration)?;
        let confidence = parse_confidence(&response.content).unwrap_or(DEFAULT_CONFIDENCE);

        debug!(
            "Extracted {} lines (confidence {:.2})",
            block.code.lines().count(),
            confidence
        );

        Ok(Generation {
            code: block.code,
            language: block.language,
            confidence,
            usage: response.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::IssueCategory;
    use kiln_memory::MemoryRecord;
    use kiln_provider::{ScriptedProvider, ScriptedReply};

    fn node(provider: Arc<ScriptedProvider>) -> GeneratorNode {
        GeneratorNode::new(provider, "Python").with_max_attempts(3)
    }

    #[tokio::test]
    async fn test_generate_extracts_code_and_confidence() {
        let provider = Arc::new(ScriptedProvider::new().with_reply(ScriptedReply::text(
            "```python\nprint(2 + 3)\n```\nConfidence: 90%",
        )));
        let generation = node(provider.clone())
            .generate(&Task::new("add 2 and 3"), &[], None, 1)
            .await
            .unwrap();

        assert_eq!(generation.code, "print(2 + 3)");
        assert_eq!(generation.language.as_deref(), Some("python"));
        assert_eq!(generation.confidence, 0.9);

        let prompts = provider.prompts();
        assert!(prompts[0].system_prompt.contains("Python"));
        assert!(prompts[0].user_prompt.contains("attempt 1 of 3"));
    }

    #[tokio::test]
    async fn test_missing_confidence_defaults() {
        let provider = Arc::new(ScriptedProvider::new().with_reply(ScriptedReply::text("print(1)")));
        let generation = node(provider)
            .generate(&Task::new("t"), &[], None, 1)
            .await
            .unwrap();
        assert_eq!(generation.confidence, DEFAULT_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_empty_reply_is_empty_generation() {
        let provider = Arc::new(ScriptedProvider::new().with_reply(ScriptedReply::text("  \n")));
        let err = node(provider)
            .generate(&Task::new("t"), &[], None, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::EmptyGeneration));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_prompt_includes_lessons_and_hint() {
        let provider = Arc::new(ScriptedProvider::new().with_fallback(ScriptedReply::text("x = 1")));
        let lessons = vec![Lesson {
            record: MemoryRecord::new("sum a csv column", "import csv", true, 1),
            similarity: 0.6,
        }];
        let hint = CriticVerdict::fail(IssueCategory::SyntaxError, "Line 3: invalid syntax");

        node(provider.clone())
            .generate(&Task::new("sum csv rows"), &lessons, Some(&hint), 2)
            .await
            .unwrap();

        let user_prompt = &provider.prompts()[0].user_prompt;
        assert!(user_prompt.contains("sum a csv column"));
        assert!(user_prompt.contains("syntax-error"));
        assert!(user_prompt.contains("invalid syntax"));
    }

    #[tokio::test]
    async fn test_provider_failure_propagates() {
        let provider = Arc::new(ScriptedProvider::new().with_reply(ScriptedReply::Unreachable));
        let err = node(provider)
            .generate(&Task::new("t"), &[], None, 1)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
