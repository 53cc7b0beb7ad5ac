//! Agent runtime - the attempt loop
//!
//! Each attempt gets a fresh generation. State carried between attempts:
//! - Lessons recalled from memory once, at the start of the run
//! - The previous attempt's critic verdict
//!
//! Only provider and sandbox failures end a run with an error. A task that
//! never passes is a normal result with `success == false`.

use crate::critic::{Critic, CriticNode, ModelCritic};
use crate::generator::GeneratorNode;
use crate::prompt::language_for_extension;
use crate::state_machine::{transition, Event, LoopPolicy, State};
use chrono::Utc;
use kiln_core::config::CriticMode;
use kiln_core::fail_open::fail_open;
use kiln_core::{
    Attempt, CriticVerdict, IssueCategory, KilnConfig, KilnError, Result, RunOutcome, RunResult,
    SandboxResult, Task, TraceId, Usage,
};
use kiln_memory::{EvolvingMemory, Lesson};
use kiln_provider::CompletionProvider;
use kiln_sandbox::Sandbox;
use kiln_trace::{Trace, TraceEventType, TraceExporter, TraceOutcome, TraceRecorder};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Lines of generated code copied into the trace
const SNIPPET_LINES: usize = 8;

/// Characters of program output copied into the trace
const TRACE_OUTPUT_CHARS: usize = 1000;

/// Knobs for one runtime
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub max_attempts: usize,
    /// Generations below this confidence skip the sandbox
    pub confidence_floor: Option<f32>,
    pub critique_on_success: bool,
    /// Wall-clock limit handed to the sandbox per execution
    pub execution_timeout: Duration,
    /// Lessons recalled per run
    pub lessons: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            confidence_floor: None,
            critique_on_success: false,
            execution_timeout: Duration::from_secs(30),
            lessons: 3,
        }
    }
}

impl RuntimeSettings {
    /// Strict and model critics only add anything when successes are critiqued,
    /// so choosing one turns `critique_on_success` on.
    pub fn from_config(config: &KilnConfig) -> Self {
        Self {
            max_attempts: config.run_loop.max_attempts,
            confidence_floor: config.run_loop.confidence_floor,
            critique_on_success: config.run_loop.critique_on_success
                || config.run_loop.critic != CriticMode::Rules,
            execution_timeout: Duration::from_secs(config.sandbox.timeout_secs),
            lessons: config.memory.lessons,
        }
    }

    pub fn policy(&self) -> LoopPolicy {
        LoopPolicy {
            max_attempts: self.max_attempts.max(1),
            critique_on_success: self.critique_on_success,
        }
    }
}

/// Attempt under construction
struct Draft {
    index: usize,
    code: String,
    confidence: f32,
    result: Option<SandboxResult>,
    feedback: Option<CriticVerdict>,
    verdict: Option<CriticVerdict>,
    /// Verdict decided without asking the critic (empty or unconfident generation)
    preset_verdict: Option<CriticVerdict>,
    timestamp: chrono::DateTime<Utc>,
}

impl Draft {
    fn new(index: usize, feedback: Option<CriticVerdict>) -> Self {
        Self {
            index,
            code: String::new(),
            confidence: 0.0,
            result: None,
            feedback,
            verdict: None,
            preset_verdict: None,
            timestamp: Utc::now(),
        }
    }

    fn into_attempt(self) -> Attempt {
        Attempt {
            index: self.index,
            code: self.code,
            confidence: self.confidence,
            result: self.result,
            feedback: self.feedback,
            verdict: self.verdict,
            timestamp: self.timestamp,
        }
    }
}

/// Everything one run accumulates
struct RunContext<'a> {
    task: &'a Task,
    trace_id: TraceId,
    cancel: CancellationToken,
    lessons: Vec<Lesson>,
    feedback: Option<CriticVerdict>,
    draft: Option<Draft>,
    history: Vec<Attempt>,
    usage: Usage,
    fatal: Option<KilnError>,
}

impl RunContext<'_> {
    /// Seal the current attempt, carrying its verdict into the next one
    fn finish_draft(&mut self) {
        if let Some(draft) = self.draft.take() {
            self.feedback = draft.verdict.clone();
            self.history.push(draft.into_attempt());
        }
    }

    fn fail(&mut self, error: KilnError) -> Event {
        let message = error.to_string();
        self.fatal = Some(error);
        Event::Fatal { message }
    }
}

/// Drives tasks through generate, execute and critique
pub struct AgentRuntime {
    generator: GeneratorNode,
    critic: Arc<dyn Critic>,
    sandbox: Arc<dyn Sandbox>,
    memory: Arc<EvolvingMemory>,
    recorder: TraceRecorder,
    exporter: Option<TraceExporter>,
    settings: RuntimeSettings,
}

impl AgentRuntime {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        sandbox: Arc<dyn Sandbox>,
        memory: Arc<EvolvingMemory>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            generator: GeneratorNode::new(provider, "Python")
                .with_max_attempts(settings.max_attempts),
            critic: Arc::new(CriticNode::new()),
            sandbox,
            memory,
            recorder: TraceRecorder::new(),
            exporter: None,
            settings,
        }
    }

    /// Runtime wired the way a config file describes
    pub fn from_config(
        config: &KilnConfig,
        provider: Arc<dyn CompletionProvider>,
        sandbox: Arc<dyn Sandbox>,
        memory: Arc<EvolvingMemory>,
    ) -> Self {
        let critic: Arc<dyn Critic> = match config.run_loop.critic {
            CriticMode::Rules => Arc::new(CriticNode::new()),
            CriticMode::Strict => Arc::new(CriticNode::strict()),
            CriticMode::Model => Arc::new(ModelCritic::new(provider.clone())),
        };

        let mut runtime = Self::new(
            provider,
            sandbox,
            memory,
            RuntimeSettings::from_config(config),
        )
        .with_language(language_for_extension(&config.sandbox.extension))
        .with_critic(critic);

        if let Some(dir) = &config.trace.export_dir {
            runtime = runtime.with_exporter(TraceExporter::new(dir));
        }
        runtime
    }

    /// Language the generator is asked to write
    pub fn with_language(mut self, language: &str) -> Self {
        self.generator = GeneratorNode::new(self.generator.provider().clone(), language)
            .with_max_attempts(self.settings.max_attempts);
        self
    }

    pub fn with_critic(mut self, critic: Arc<dyn Critic>) -> Self {
        self.critic = critic;
        self
    }

    /// Share a trace registry with other runtimes or the caller
    pub fn with_recorder(mut self, recorder: TraceRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    /// Write an HTML report for every closed trace
    pub fn with_exporter(mut self, exporter: TraceExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn recorder(&self) -> &TraceRecorder {
        &self.recorder
    }

    pub fn memory(&self) -> &Arc<EvolvingMemory> {
        &self.memory
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Run `task` to completion
    pub async fn run(&self, task: &Task) -> Result<RunResult> {
        self.run_with_cancel(task, CancellationToken::new()).await
    }

    /// Run `task`, stopping early once `cancel` fires
    ///
    /// A cancelled run closes its trace as cancelled, drops any in-flight
    /// sandbox execution and writes nothing to memory.
    #[instrument(skip_all, fields(task = %task.title()))]
    pub async fn run_with_cancel(
        &self,
        task: &Task,
        cancel: CancellationToken,
    ) -> Result<RunResult> {
        let started = Instant::now();
        let policy = self.settings.policy();
        info!("Starting run (max {} attempts)", policy.max_attempts);

        let trace_id = self.recorder.start_trace(task.description()).await;
        let lessons = self
            .memory
            .get_lessons_for_task(task.description(), self.settings.lessons)
            .await;
        self.record(
            &trace_id,
            TraceEventType::MemoryRecall,
            json!({
                "matches": lessons.len(),
                "lessons": lessons
                    .iter()
                    .map(|l| json!({
                        "task": l.record.task,
                        "success": l.record.success,
                        "similarity": l.similarity,
                    }))
                    .collect::<Vec<_>>(),
            }),
        )
        .await;

        let mut ctx = RunContext {
            task,
            trace_id,
            cancel,
            lessons,
            feedback: None,
            draft: None,
            history: Vec::new(),
            usage: Usage::default(),
            fatal: None,
        };

        let first = if ctx.cancel.is_cancelled() {
            Event::Cancelled
        } else {
            Event::Started
        };
        let mut state = transition(State::Init, first, &policy);

        while !state.is_terminal() {
            let event = match state {
                State::Generate { attempt } => self.generate_step(&mut ctx, attempt).await,
                State::Execute { attempt } => self.execute_step(&mut ctx, attempt).await,
                State::Critique { attempt } => self.critique_step(&mut ctx, attempt).await,
                ref other => ctx.fail(KilnError::Orchestrator(format!(
                    "Runtime has nothing to do in state {:?}",
                    other
                ))),
            };
            debug!("{:?} + {:?}", state, event);
            state = transition(state, event, &policy);
        }
        ctx.finish_draft();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let attempts = ctx.history.len();

        let outcome = match state {
            State::Done { outcome } => outcome,
            State::Failed { error } => {
                warn!("Run failed after {} attempt(s): {}", attempts, error);
                self.close_trace(
                    &ctx.trace_id,
                    TraceOutcome::Failure,
                    json!({ "success": false, "attempts": attempts, "error": error }),
                )
                .await;
                return Err(ctx.fatal.unwrap_or(KilnError::Orchestrator(error)));
            }
            other => {
                return Err(KilnError::Orchestrator(format!(
                    "Run stopped in non-terminal state {:?}",
                    other
                )))
            }
        };

        let success = outcome == RunOutcome::Success;
        let last = ctx.history.last();
        let code = last.map(|a| a.code.clone()).unwrap_or_default();
        let output = last
            .and_then(|a| a.result.as_ref())
            .map(|r| r.output().to_string())
            .unwrap_or_default();

        let trace_outcome = match outcome {
            RunOutcome::Success => TraceOutcome::Success,
            RunOutcome::Exhausted => TraceOutcome::Failure,
            RunOutcome::Cancelled => TraceOutcome::Cancelled,
        };
        self.close_trace(
            &ctx.trace_id,
            trace_outcome,
            json!({
                "success": success,
                "outcome": outcome.to_string(),
                "attempts": attempts,
                "elapsed_ms": elapsed_ms,
                "total_tokens": ctx.usage.total_tokens,
            }),
        )
        .await;

        // Only completed runs are remembered
        if outcome != RunOutcome::Cancelled {
            fail_open("memory::remember", || {
                self.memory
                    .remember(task.description(), &code, success, attempts as u32)
            })
            .await;
        }

        info!(
            "Run {} after {} attempt(s) in {}ms ({} tokens)",
            outcome, attempts, elapsed_ms, ctx.usage.total_tokens
        );

        Ok(RunResult {
            success,
            attempts,
            code,
            output,
            elapsed_ms,
            outcome,
            trace_id: Some(ctx.trace_id),
            usage: ctx.usage,
            history: ctx.history,
        })
    }

    async fn generate_step(&self, ctx: &mut RunContext<'_>, attempt: usize) -> Event {
        ctx.finish_draft();
        info!("=== Attempt {} of {} ===", attempt, self.settings.max_attempts);

        let thought = match &ctx.feedback {
            Some(verdict) => format!("Retrying after {}: {}", verdict.category, verdict.hint),
            None if ctx.lessons.is_empty() => "Drafting a first solution".to_string(),
            None => format!("Drafting a first solution with {} lesson(s)", ctx.lessons.len()),
        };
        self.record(
            &ctx.trace_id,
            TraceEventType::Thinking,
            json!({ "attempt": attempt, "thought": thought }),
        )
        .await;

        let mut draft = Draft::new(attempt, ctx.feedback.clone());
        let generated = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => None,
            result = self.generator.generate(ctx.task, &ctx.lessons, ctx.feedback.as_ref(), attempt) => Some(result),
        };

        let event = match generated {
            None => Event::Cancelled,
            Some(Ok(generation)) => {
                ctx.usage.add(&generation.usage);
                let low_confidence = self
                    .settings
                    .confidence_floor
                    .is_some_and(|floor| generation.confidence < floor);

                self.record(
                    &ctx.trace_id,
                    TraceEventType::CodeGenerated,
                    json!({
                        "attempt": attempt,
                        "extracted": true,
                        "language": generation.language,
                        "lines": generation.code.lines().count(),
                        "length": generation.code.len(),
                        "confidence": generation.confidence,
                        "snippet": snippet(&generation.code),
                    }),
                )
                .await;

                if low_confidence {
                    draft.preset_verdict = Some(CriticVerdict::fail(
                        IssueCategory::LowConfidence,
                        format!(
                            "Self-reported confidence {:.0}% is below the floor. Write a simpler program you are sure of.",
                            generation.confidence * 100.0
                        ),
                    ));
                }
                draft.code = generation.code;
                draft.confidence = generation.confidence;
                Event::Generated { low_confidence }
            }
            Some(Err(e)) if e.is_fatal() => ctx.fail(e),
            Some(Err(e)) => {
                warn!("Attempt {} produced no usable code: {}", attempt, e);
                self.record(
                    &ctx.trace_id,
                    TraceEventType::CodeGenerated,
                    json!({
                        "attempt": attempt,
                        "extracted": false,
                        "lines": 0,
                        "length": 0,
                        "error": e.to_string(),
                    }),
                )
                .await;
                draft.preset_verdict = Some(CriticVerdict::fail(
                    IssueCategory::EmptyGeneration,
                    "The reply contained no code. Answer with one fenced code block holding the full program.",
                ));
                Event::GenerationEmpty
            }
        };

        ctx.draft = Some(draft);
        event
    }

    async fn execute_step(&self, ctx: &mut RunContext<'_>, attempt: usize) -> Event {
        let Some(draft) = ctx.draft.as_mut() else {
            return ctx.fail(KilnError::Orchestrator(format!(
                "Attempt {} reached execution without code",
                attempt
            )));
        };

        self.record(
            &ctx.trace_id,
            TraceEventType::ExecutionStart,
            json!({
                "attempt": attempt,
                "environment": self.sandbox.name(),
                "timeout_ms": self.settings.execution_timeout.as_millis() as u64,
            }),
        )
        .await;

        let executed = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => None,
            result = self.sandbox.execute(&draft.code, self.settings.execution_timeout) => Some(result),
        };

        let result = match executed {
            None => {
                warn!("Cancelled during execution of attempt {}", attempt);
                return Event::Cancelled;
            }
            Some(Ok(result)) => result,
            Some(Err(e)) if e.is_fatal() => return ctx.fail(e),
            Some(Err(e)) => SandboxResult::crash(e.to_string()),
        };

        let succeeded = result.succeeded();
        if succeeded {
            self.record(
                &ctx.trace_id,
                TraceEventType::ExecutionSuccess,
                json!({
                    "attempt": attempt,
                    "output": clip(&result.stdout),
                    "elapsed_ms": result.elapsed_ms,
                }),
            )
            .await;
        } else {
            debug!("Attempt {} ended with {}", attempt, result.exit_status);
            self.record(
                &ctx.trace_id,
                TraceEventType::ExecutionFailure,
                json!({
                    "attempt": attempt,
                    "outcome": result.exit_status.to_string(),
                    "stderr": clip(&result.stderr),
                    "elapsed_ms": result.elapsed_ms,
                }),
            )
            .await;
        }

        draft.result = Some(result);
        Event::Executed { succeeded }
    }

    async fn critique_step(&self, ctx: &mut RunContext<'_>, attempt: usize) -> Event {
        let Some(draft) = ctx.draft.as_mut() else {
            return ctx.fail(KilnError::Orchestrator(format!(
                "Attempt {} reached critique without a draft",
                attempt
            )));
        };

        self.record(
            &ctx.trace_id,
            TraceEventType::CritiqueStart,
            json!({ "attempt": attempt, "critic": self.critic.name() }),
        )
        .await;

        let judged = match (draft.preset_verdict.take(), draft.result.as_ref()) {
            (Some(verdict), _) => Some(Ok(verdict)),
            (None, Some(result)) => tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => None,
                verdict = self.critic.critique(ctx.task, &draft.code, result) => Some(verdict),
            },
            (None, None) => Some(Ok(CriticVerdict::fail(
                IssueCategory::Crash,
                "Nothing was executed, so there is nothing to judge.",
            ))),
        };

        let verdict = match judged {
            None => return Event::Cancelled,
            Some(Ok(verdict)) => verdict,
            Some(Err(e)) if e.is_fatal() => return ctx.fail(e),
            Some(Err(e)) => {
                warn!("Critic failed, falling back to rules: {}", e);
                match &draft.result {
                    Some(result) => CriticNode::new().diagnose(&draft.code, result),
                    None => CriticVerdict::fail(IssueCategory::Crash, e.to_string()),
                }
            }
        };

        self.record(
            &ctx.trace_id,
            TraceEventType::CritiqueDone,
            json!({
                "attempt": attempt,
                "verdict": verdict.verdict.to_string(),
                "category": verdict.category.as_str(),
                "hint": verdict.hint,
            }),
        )
        .await;

        let pass = verdict.is_pass();
        draft.verdict = Some(verdict);
        Event::Judged { pass }
    }

    /// Append a trace event; a rejected event is logged, never fatal
    async fn record(&self, trace_id: &str, event_type: TraceEventType, payload: Value) {
        if let Err(e) = self.recorder.event(trace_id, event_type, payload).await {
            warn!("Dropped {} trace event: {}", event_type, e);
        }
    }

    async fn close_trace(
        &self,
        trace_id: &str,
        outcome: TraceOutcome,
        summary: Value,
    ) -> Option<Trace> {
        let trace = match self.recorder.end_trace(trace_id, outcome, summary).await {
            Ok(trace) => trace,
            Err(e) => {
                warn!("Failed to close trace {}: {}", trace_id, e);
                return None;
            }
        };

        if let Some(exporter) = &self.exporter {
            exporter.export(&trace).await;
        }
        Some(trace)
    }
}

fn snippet(code: &str) -> String {
    let lines: Vec<&str> = code.lines().take(SNIPPET_LINES + 1).collect();
    if lines.len() > SNIPPET_LINES {
        format!("{}\n...", lines[..SNIPPET_LINES].join("\n"))
    } else {
        lines.join("\n")
    }
}

fn clip(text: &str) -> String {
    if text.chars().count() <= TRACE_OUTPUT_CHARS {
        return text.to_string();
    }
    let kept: String = text.chars().take(TRACE_OUTPUT_CHARS).collect();
    format!("{}...[truncated]", kept)
}
