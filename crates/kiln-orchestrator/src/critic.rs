//! Critic nodes: diagnose an attempt and suggest a fix
//!
//! [`CriticNode`] classifies sandbox results with fixed rules and never
//! fails. [`ModelCritic`] asks the completion provider for a JSON verdict and
//! falls back to the rules when the reply is unusable.

use async_trait::async_trait;
use kiln_core::{CriticVerdict, ExitStatus, IssueCategory, Result, SandboxResult, Task, Verdict};
use kiln_provider::{CompletionProvider, CompletionRequest};
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Markers that betray a failure even when the process exited cleanly
const ERROR_MARKERS: &[&str] = &["Traceback (most recent call last)", "Error:", "Exception:"];

/// Diagnoses one attempt
#[async_trait]
pub trait Critic: Send + Sync {
    async fn critique(&self, task: &Task, code: &str, result: &SandboxResult)
        -> Result<CriticVerdict>;

    fn name(&self) -> &str;
}

/// Rule-based critic
///
/// In strict mode a successful run must also print something and must not
/// print error markers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CriticNode {
    strict: bool,
}

impl CriticNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self { strict: true }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Classify `result` into one verdict
    pub fn diagnose(&self, code: &str, result: &SandboxResult) -> CriticVerdict {
        if code.trim().is_empty() {
            return CriticVerdict::fail(
                IssueCategory::EmptyGeneration,
                "The reply contained no code. Answer with one fenced code block holding the full program.",
            );
        }

        match result.exit_status {
            ExitStatus::Success => self.diagnose_success(result),
            ExitStatus::Timeout => CriticVerdict::fail(
                IssueCategory::Timeout,
                format!(
                    "Execution was killed after {}ms. Remove input() calls, network access and unbounded loops, and keep the work small.",
                    result.elapsed_ms
                ),
            ),
            ExitStatus::Crash => CriticVerdict::fail(
                IssueCategory::Crash,
                match last_meaningful_line(&result.stderr) {
                    Some(line) => format!(
                        "The process was killed before finishing ({}). Use less memory and avoid deep recursion.",
                        line
                    ),
                    None => "The process was killed before finishing. Use less memory and avoid deep recursion."
                        .to_string(),
                },
            ),
            ExitStatus::Error => classify_error(result),
        }
    }

    fn diagnose_success(&self, result: &SandboxResult) -> CriticVerdict {
        if !self.strict {
            return CriticVerdict::pass();
        }

        if result.stdout.trim().is_empty() {
            return CriticVerdict::fail(
                IssueCategory::LogicError,
                "The program ran but printed nothing. Print the final answer to stdout.",
            );
        }

        if let Some(marker) = ERROR_MARKERS.iter().find(|m| result.stdout.contains(**m)) {
            return CriticVerdict::fail(
                IssueCategory::LogicError,
                format!(
                    "The output contains '{}', so an error was swallowed. Let it surface or fix its cause.",
                    marker.trim_end_matches(':')
                ),
            );
        }

        CriticVerdict::pass()
    }
}

fn classify_error(result: &SandboxResult) -> CriticVerdict {
    let stderr = if result.stderr.trim().is_empty() {
        &result.stdout
    } else {
        &result.stderr
    };
    let detail = last_meaningful_line(stderr);

    if let Some(module) = missing_module(stderr) {
        return CriticVerdict::fail(
            IssueCategory::MissingDependency,
            format!(
                "Module '{}' is not installed in the sandbox. Use only the standard library or implement that part yourself.",
                module
            ),
        );
    }

    let lowered = stderr.to_lowercase();
    if lowered.contains("missing-dependency") || lowered.contains("missing dependency") {
        return CriticVerdict::fail(
            IssueCategory::MissingDependency,
            "A dependency is missing from the sandbox. Use only the standard library.",
        );
    }

    if lowered.contains("syntaxerror")
        || lowered.contains("indentationerror")
        || lowered.contains("syntax error")
    {
        return CriticVerdict::fail(
            IssueCategory::SyntaxError,
            with_detail("The program does not parse. Check brackets, quotes and indentation.", detail),
        );
    }

    if lowered.contains("assertionerror") || lowered.contains("assertion failed") {
        return CriticVerdict::fail(
            IssueCategory::LogicError,
            with_detail("An assertion failed, so the result is wrong. Re-check the algorithm.", detail),
        );
    }

    CriticVerdict::fail(
        IssueCategory::RuntimeError,
        with_detail("The program raised an error while running.", detail),
    )
}

fn with_detail(hint: &str, detail: Option<&str>) -> String {
    match detail {
        Some(line) => format!("{} Last error: {}", hint, line),
        None => hint.to_string(),
    }
}

fn last_meaningful_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}

/// Module name from Python or Node import errors
fn missing_module(stderr: &str) -> Option<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| {
            Regex::new(r#"(?:No module named|Cannot find module|cannot import name)\s+['"]?([A-Za-z0-9_.\-/@]+)['"]?"#).ok()
        })
        .as_ref()?;
    pattern
        .captures(stderr)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[async_trait]
impl Critic for CriticNode {
    async fn critique(
        &self,
        _task: &Task,
        code: &str,
        result: &SandboxResult,
    ) -> Result<CriticVerdict> {
        Ok(self.diagnose(code, result))
    }

    fn name(&self) -> &str {
        if self.strict {
            "rules-strict"
        } else {
            "rules"
        }
    }
}

/// JSON reply the model critic asks for
#[derive(Debug, Deserialize)]
struct ModelVerdict {
    verdict: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

const CRITIC_SYSTEM_PROMPT: &str = "You review programs that were run in a sandbox. \
Judge whether the program solved the task based on its code and output. \
Reply with a JSON object: {\"verdict\": \"pass\" | \"fail\", \"category\": one of \
\"missing-dependency\", \"syntax-error\", \"runtime-error\", \"logic-error\", \"timeout\", \
\"crash\", \"none\", \"hint\": one sentence telling the programmer what to change}.";

/// Output shown to the model critic is clipped to this many characters
const CRITIC_OUTPUT_CHARS: usize = 2000;

/// Critic that asks the model whether the output answers the task
pub struct ModelCritic {
    provider: Arc<dyn CompletionProvider>,
    fallback: CriticNode,
}

impl ModelCritic {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            fallback: CriticNode::new(),
        }
    }

    fn build_prompt(task: &Task, code: &str, result: &SandboxResult) -> String {
        format!(
            "## TASK\n\n{}\n\n## CODE\n\n```\n{}\n```\n\n## EXECUTION\n\nStatus: {}\n\nStdout:\n{}\n\nStderr:\n{}\n",
            task.description().trim(),
            code,
            result.exit_status,
            clip(&result.stdout),
            clip(&result.stderr)
        )
    }

    fn parse(reply: &str) -> Option<CriticVerdict> {
        let parsed: ModelVerdict = serde_json::from_str(reply.trim()).ok()?;
        let verdict = match parsed.verdict.trim().to_lowercase().as_str() {
            "pass" => Verdict::Pass,
            "fail" => Verdict::Fail,
            _ => return None,
        };

        if verdict == Verdict::Pass {
            return Some(CriticVerdict::pass());
        }

        let category = parsed
            .category
            .and_then(|c| c.parse::<IssueCategory>().ok())
            .filter(|c| *c != IssueCategory::None)
            .unwrap_or(IssueCategory::LogicError);
        Some(CriticVerdict::fail(category, parsed.hint.unwrap_or_default()))
    }
}

fn clip(text: &str) -> String {
    if text.chars().count() <= CRITIC_OUTPUT_CHARS {
        return text.to_string();
    }
    let kept: String = text.chars().take(CRITIC_OUTPUT_CHARS).collect();
    format!("{}...[truncated]", kept)
}

#[async_trait]
impl Critic for ModelCritic {
    async fn critique(
        &self,
        task: &Task,
        code: &str,
        result: &SandboxResult,
    ) -> Result<CriticVerdict> {
        // Rule verdicts for failed runs are already precise
        let rules = self.fallback.diagnose(code, result);
        if !rules.is_pass() {
            return Ok(rules);
        }

        let request = CompletionRequest::new(
            CRITIC_SYSTEM_PROMPT,
            Self::build_prompt(task, code, result),
        )
        .with_temperature(0.0);

        let response = match self.provider.generate_json(&request).await {
            Ok(response) => response,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Model critic reply unusable, using rules: {}", e);
                return Ok(rules);
            }
        };

        match Self::parse(&response.content) {
            Some(verdict) => {
                debug!("Model critic verdict: {} ({})", verdict.verdict, verdict.category);
                Ok(verdict)
            }
            None => {
                warn!("Model critic reply did not match the verdict schema, using rules");
                Ok(rules)
            }
        }
    }

    fn name(&self) -> &str {
        "model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_provider::{ScriptedProvider, ScriptedReply};

    fn rules() -> CriticNode {
        CriticNode::new()
    }

    #[test]
    fn test_success_passes_by_default() {
        let verdict = rules().diagnose("print(5)", &SandboxResult::success("5\n"));
        assert!(verdict.is_pass());
        assert_eq!(verdict.category, IssueCategory::None);
    }

    #[test]
    fn test_missing_module_named() {
        let result = SandboxResult::error(
            "Traceback (most recent call last):\n  File \"main.py\", line 1\nModuleNotFoundError: No module named 'numpy'\n",
        );
        let verdict = rules().diagnose("import numpy", &result);
        assert_eq!(verdict.category, IssueCategory::MissingDependency);
        assert!(verdict.hint.contains("'numpy'"));
    }

    #[test]
    fn test_literal_missing_dependency_marker() {
        let verdict = rules().diagnose("x", &SandboxResult::error("error: missing-dependency"));
        assert_eq!(verdict.category, IssueCategory::MissingDependency);
    }

    #[test]
    fn test_syntax_error() {
        let result = SandboxResult::error("  File \"main.py\", line 2\n    print(\n         ^\nSyntaxError: '(' was never closed");
        let verdict = rules().diagnose("print(", &result);
        assert_eq!(verdict.category, IssueCategory::SyntaxError);
        assert!(verdict.hint.contains("was never closed"));
    }

    #[test]
    fn test_assertion_is_logic_error() {
        let verdict = rules().diagnose("assert 1 == 2", &SandboxResult::error("AssertionError"));
        assert_eq!(verdict.category, IssueCategory::LogicError);
    }

    #[test]
    fn test_other_errors_are_runtime() {
        let verdict = rules().diagnose(
            "1/0",
            &SandboxResult::error("ZeroDivisionError: division by zero"),
        );
        assert_eq!(verdict.category, IssueCategory::RuntimeError);
        assert!(verdict.hint.contains("division by zero"));
    }

    #[test]
    fn test_timeout_and_crash_differ_only_in_category() {
        let timeout = rules().diagnose("while True: pass", &SandboxResult::timeout(30_000));
        let crash = rules().diagnose("x", &SandboxResult::crash("Killed"));
        assert_eq!(timeout.category, IssueCategory::Timeout);
        assert_eq!(crash.category, IssueCategory::Crash);
        assert!(!timeout.is_pass() && !crash.is_pass());
    }

    #[test]
    fn test_empty_code() {
        let verdict = rules().diagnose("  ", &SandboxResult::success(""));
        assert_eq!(verdict.category, IssueCategory::EmptyGeneration);
    }

    #[test]
    fn test_strict_mode() {
        let strict = CriticNode::strict();
        assert!(!strict.diagnose("pass", &SandboxResult::success("")).is_pass());
        assert!(!strict
            .diagnose("x", &SandboxResult::success("Error: file not found"))
            .is_pass());
        assert!(strict.diagnose("x", &SandboxResult::success("42")).is_pass());
    }

    #[test]
    fn test_diagnose_is_deterministic() {
        let result = SandboxResult::error("KeyError: 'name'");
        assert_eq!(rules().diagnose("d['name']", &result), rules().diagnose("d['name']", &result));
    }

    #[tokio::test]
    async fn test_model_critic_uses_model_verdict() {
        let provider = Arc::new(ScriptedProvider::new().with_reply(ScriptedReply::text(
            r#"{"verdict": "fail", "category": "logic-error", "hint": "Print 55, not 89."}"#,
        )));
        let critic = ModelCritic::new(provider.clone());
        let verdict = critic
            .critique(&Task::new("10th fibonacci"), "print(89)", &SandboxResult::success("89"))
            .await
            .unwrap();
        assert_eq!(verdict.category, IssueCategory::LogicError);
        assert_eq!(verdict.hint, "Print 55, not 89.");
        assert!(provider.prompts()[0].user_prompt.contains("89"));
    }

    #[tokio::test]
    async fn test_model_critic_falls_back_on_bad_reply() {
        let provider = Arc::new(ScriptedProvider::new().with_reply(ScriptedReply::text("LGTM")));
        let critic = ModelCritic::new(provider);
        let verdict = critic
            .critique(&Task::new("t"), "print(1)", &SandboxResult::success("1"))
            .await
            .unwrap();
        assert!(verdict.is_pass());
    }

    #[tokio::test]
    async fn test_model_critic_skips_model_for_failed_runs() {
        let provider = Arc::new(ScriptedProvider::new());
        let critic = ModelCritic::new(provider.clone());
        let verdict = critic
            .critique(&Task::new("t"), "x", &SandboxResult::timeout(100))
            .await
            .unwrap();
        assert_eq!(verdict.category, IssueCategory::Timeout);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_model_critic_propagates_fatal() {
        let provider = Arc::new(ScriptedProvider::new().with_reply(ScriptedReply::Unreachable));
        let critic = ModelCritic::new(provider);
        let err = critic
            .critique(&Task::new("t"), "x", &SandboxResult::success("1"))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
