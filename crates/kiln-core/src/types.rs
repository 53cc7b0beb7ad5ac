//! Core type definitions for Kiln runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trace identifier (UUID v4 string)
pub type TraceId = String;

/// A natural-language description of what the generated code must do
///
/// Immutable. Two tasks are the same task when their text is equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Task {
    description: String,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// First line of the description, for log lines and titles
    pub fn title(&self) -> &str {
        self.description
            .lines()
            .next()
            .unwrap_or(&self.description)
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description)
    }
}

impl From<&str> for Task {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Task {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// How a sandboxed execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Program exited cleanly
    Success,
    /// Program ran and exited with an error
    Error,
    /// Wall-clock deadline hit; the program was killed
    Timeout,
    /// Execution itself broke down (killed by signal, sandbox fault)
    Crash,
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Timeout => write!(f, "timeout"),
            Self::Crash => write!(f, "crash"),
        }
    }
}

/// Outcome of one sandbox invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxResult {
    pub exit_status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
}

impl SandboxResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_status: ExitStatus::Success,
            stdout: stdout.into(),
            stderr: String::new(),
            elapsed_ms: 0,
        }
    }

    pub fn error(stderr: impl Into<String>) -> Self {
        Self {
            exit_status: ExitStatus::Error,
            stdout: String::new(),
            stderr: stderr.into(),
            elapsed_ms: 0,
        }
    }

    pub fn timeout(elapsed_ms: u64) -> Self {
        Self {
            exit_status: ExitStatus::Timeout,
            stdout: String::new(),
            stderr: format!("Execution exceeded {}ms and was killed", elapsed_ms),
            elapsed_ms,
        }
    }

    pub fn crash(stderr: impl Into<String>) -> Self {
        Self {
            exit_status: ExitStatus::Crash,
            stdout: String::new(),
            stderr: stderr.into(),
            elapsed_ms: 0,
        }
    }

    pub fn with_elapsed(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn succeeded(&self) -> bool {
        self.exit_status == ExitStatus::Success
    }

    /// Whatever the program said, preferring stdout
    pub fn output(&self) -> &str {
        if self.stdout.trim().is_empty() {
            &self.stderr
        } else {
            &self.stdout
        }
    }
}

/// Closed set of failure categories the critic can assign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueCategory {
    MissingDependency,
    SyntaxError,
    RuntimeError,
    LogicError,
    Timeout,
    Crash,
    EmptyGeneration,
    LowConfidence,
    /// No issue found
    None,
}

impl IssueCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingDependency => "missing-dependency",
            Self::SyntaxError => "syntax-error",
            Self::RuntimeError => "runtime-error",
            Self::LogicError => "logic-error",
            Self::Timeout => "timeout",
            Self::Crash => "crash",
            Self::EmptyGeneration => "empty-generation",
            Self::LowConfidence => "low-confidence",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for IssueCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "missing-dependency" => Ok(Self::MissingDependency),
            "syntax-error" => Ok(Self::SyntaxError),
            "runtime-error" => Ok(Self::RuntimeError),
            "logic-error" => Ok(Self::LogicError),
            "timeout" => Ok(Self::Timeout),
            "crash" => Ok(Self::Crash),
            "empty-generation" => Ok(Self::EmptyGeneration),
            "low-confidence" => Ok(Self::LowConfidence),
            "none" => Ok(Self::None),
            _ => Err(format!("Invalid issue category: {}", s)),
        }
    }
}

/// Pass/fail judgment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// The critic's diagnosis of one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticVerdict {
    pub verdict: Verdict,
    pub category: IssueCategory,
    /// Actionable advice for the next generation
    pub hint: String,
}

impl CriticVerdict {
    pub fn pass() -> Self {
        Self {
            verdict: Verdict::Pass,
            category: IssueCategory::None,
            hint: String::new(),
        }
    }

    pub fn fail(category: IssueCategory, hint: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Fail,
            category,
            hint: hint.into(),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

/// One generate-execute(-critique) cycle
///
/// Built by the runtime once the attempt is over and never changed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// 1-based ordinal within the run
    pub index: usize,
    /// Extracted code (empty when the generation held none)
    pub code: String,
    /// Generator's self-reported confidence in [0, 1]
    pub confidence: f32,
    /// Sandbox outcome, absent when execution was skipped
    pub result: Option<SandboxResult>,
    /// Diagnosis carried in from the previous attempt (absent on attempt 1)
    pub feedback: Option<CriticVerdict>,
    /// Diagnosis of this attempt, absent when critique was skipped
    pub verdict: Option<CriticVerdict>,
    pub timestamp: DateTime<Utc>,
}

impl Attempt {
    /// Whether this attempt ended the run successfully
    pub fn passed(&self) -> bool {
        match &self.verdict {
            Some(verdict) => verdict.is_pass(),
            None => self.result.as_ref().is_some_and(SandboxResult::succeeded),
        }
    }
}

/// Token usage across provider calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// An attempt passed
    Success,
    /// Attempt budget spent without a pass
    Exhausted,
    /// External cancellation interrupted the run
    Cancelled,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal artifact of a run, handed back to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    /// Attempts started, between 1 and the configured maximum
    pub attempts: usize,
    /// Code from the last attempt
    pub code: String,
    /// Output from the last execution
    pub output: String,
    pub elapsed_ms: u64,
    pub outcome: RunOutcome,
    pub trace_id: Option<TraceId>,
    pub usage: Usage,
    pub history: Vec<Attempt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_identity_is_text() {
        let a = Task::new("add(2,3) returns 5");
        let b = Task::from("add(2,3) returns 5");
        assert_eq!(a, b);
        assert_ne!(a, Task::new("add(2,3) returns 6"));
    }

    #[test]
    fn test_task_title() {
        let task = Task::new("Sort a list\n\nUse quicksort.");
        assert_eq!(task.title(), "Sort a list");
    }

    #[test]
    fn test_issue_category_round_trip_names() {
        assert_eq!(IssueCategory::MissingDependency.to_string(), "missing-dependency");
        assert_eq!(
            "missing_dependency".parse::<IssueCategory>().unwrap(),
            IssueCategory::MissingDependency
        );
        assert_eq!("TIMEOUT".parse::<IssueCategory>().unwrap(), IssueCategory::Timeout);
        assert!("flaky".parse::<IssueCategory>().is_err());
    }

    #[test]
    fn test_issue_category_serde_kebab() {
        let json = serde_json::to_string(&IssueCategory::SyntaxError).unwrap();
        assert_eq!(json, "\"syntax-error\"");
    }

    #[test]
    fn test_sandbox_result_output_prefers_stdout() {
        let result = SandboxResult::success("5\n");
        assert_eq!(result.output(), "5\n");

        let result = SandboxResult::error("Traceback ...");
        assert_eq!(result.output(), "Traceback ...");
    }

    #[test]
    fn test_attempt_passed_without_verdict_uses_result() {
        let attempt = Attempt {
            index: 1,
            code: "print(5)".into(),
            confidence: 0.9,
            result: Some(SandboxResult::success("5")),
            feedback: None,
            verdict: None,
            timestamp: Utc::now(),
        };
        assert!(attempt.passed());

        let failed = Attempt {
            verdict: Some(CriticVerdict::fail(IssueCategory::LogicError, "wrong output")),
            ..attempt
        };
        assert!(!failed.passed());
    }

    #[test]
    fn test_usage_add() {
        let mut total = Usage::default();
        total.add(&Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        total.add(&Usage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
        });
        assert_eq!(total.total_tokens, 18);
        assert_eq!(total.prompt_tokens, 11);
    }
}
