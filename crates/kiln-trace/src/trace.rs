//! Trace data model

use chrono::{DateTime, Utc};
use kiln_core::{KilnError, Result, TraceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kinds of step a run records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraceEventType {
    MemoryRecall,
    Thinking,
    CodeGenerated,
    CritiqueStart,
    CritiqueDone,
    ExecutionStart,
    ExecutionSuccess,
    ExecutionFailure,
}

impl TraceEventType {
    pub const ALL: [TraceEventType; 8] = [
        Self::MemoryRecall,
        Self::Thinking,
        Self::CodeGenerated,
        Self::CritiqueStart,
        Self::CritiqueDone,
        Self::ExecutionStart,
        Self::ExecutionSuccess,
        Self::ExecutionFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemoryRecall => "memory-recall",
            Self::Thinking => "thinking",
            Self::CodeGenerated => "code-generated",
            Self::CritiqueStart => "critique-start",
            Self::CritiqueDone => "critique-done",
            Self::ExecutionStart => "execution-start",
            Self::ExecutionSuccess => "execution-success",
            Self::ExecutionFailure => "execution-failure",
        }
    }

    /// Glyph used by the timeline renderers
    pub fn icon(&self) -> &'static str {
        match self {
            Self::MemoryRecall => "🧠",
            Self::Thinking => "💭",
            Self::CodeGenerated => "📝",
            Self::CritiqueStart => "🔍",
            Self::CritiqueDone => "⚖️",
            Self::ExecutionStart => "▶️",
            Self::ExecutionSuccess => "✅",
            Self::ExecutionFailure => "❌",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::MemoryRecall => "Memory recall",
            Self::Thinking => "Thinking",
            Self::CodeGenerated => "Code generated",
            Self::CritiqueStart => "Critique started",
            Self::CritiqueDone => "Critique done",
            Self::ExecutionStart => "Execution started",
            Self::ExecutionSuccess => "Execution succeeded",
            Self::ExecutionFailure => "Execution failed",
        }
    }
}

impl std::fmt::Display for TraceEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub trace_id: TraceId,
    /// 1-based, contiguous within a trace
    pub sequence: u64,
    pub event_type: TraceEventType,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// How a trace ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceOutcome {
    Success,
    Failure,
    Cancelled,
}

impl std::fmt::Display for TraceOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Ordered event log of one task run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub id: TraceId,
    pub task: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub outcome: Option<TraceOutcome>,
    /// Free-form summary attached on close
    pub summary: Value,
    events: Vec<TraceEvent>,
}

impl Trace {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task: task.into(),
            start_time: Utc::now(),
            end_time: None,
            outcome: None,
            summary: Value::Null,
            events: Vec::new(),
        }
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn events_of(&self, event_type: TraceEventType) -> impl Iterator<Item = &TraceEvent> {
        self.events
            .iter()
            .filter(move |event| event.event_type == event_type)
    }

    pub fn is_closed(&self) -> bool {
        self.outcome.is_some()
    }

    /// Wall-clock span, up to now for an open trace
    pub fn duration_ms(&self) -> i64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).num_milliseconds().max(0)
    }

    /// Append an event stamped now, never earlier than the previous one
    pub fn record(&mut self, event_type: TraceEventType, payload: Value) -> Result<TraceEvent> {
        if self.is_closed() {
            return Err(KilnError::TraceClosed(self.id.clone()));
        }

        let floor = self
            .events
            .last()
            .map(|event| event.timestamp)
            .unwrap_or(self.start_time);

        let event = TraceEvent {
            trace_id: self.id.clone(),
            sequence: self.events.len() as u64 + 1,
            event_type,
            timestamp: Utc::now().max(floor),
            payload,
        };
        self.events.push(event.clone());
        Ok(event)
    }

    /// Close with a terminal outcome; a trace closes once
    pub fn close(&mut self, outcome: TraceOutcome, summary: Value) -> Result<()> {
        if self.is_closed() {
            return Err(KilnError::TraceClosed(self.id.clone()));
        }

        let floor = self
            .events
            .last()
            .map(|event| event.timestamp)
            .unwrap_or(self.start_time);

        self.end_time = Some(Utc::now().max(floor));
        self.outcome = Some(outcome);
        self.summary = summary;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sequence_is_contiguous_and_ordered() {
        let mut trace = Trace::new("print hello");
        for event_type in TraceEventType::ALL {
            trace.record(event_type, Value::Null).unwrap();
        }

        let events = trace.events();
        assert_eq!(events.len(), 8);
        for (i, pair) in events.windows(2).enumerate() {
            assert_eq!(pair[0].sequence, i as u64 + 1);
            assert_eq!(pair[1].sequence, pair[0].sequence + 1);
            assert!(pair[1].timestamp >= pair[0].timestamp);
        }
        assert!(events.iter().all(|e| e.trace_id == trace.id));
    }

    #[test]
    fn test_no_events_after_close() {
        let mut trace = Trace::new("t");
        trace.record(TraceEventType::Thinking, json!({"thought": "hm"})).unwrap();
        trace.close(TraceOutcome::Success, json!({"success": true})).unwrap();

        let err = trace.record(TraceEventType::Thinking, Value::Null).unwrap_err();
        assert!(matches!(err, KilnError::TraceClosed(_)));
        assert_eq!(trace.events().len(), 1);
    }

    #[test]
    fn test_double_close_rejected() {
        let mut trace = Trace::new("t");
        trace.close(TraceOutcome::Cancelled, Value::Null).unwrap();
        assert!(trace.close(TraceOutcome::Success, Value::Null).is_err());
        assert_eq!(trace.outcome, Some(TraceOutcome::Cancelled));
    }

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&TraceEventType::ExecutionFailure).unwrap(),
            "\"execution-failure\""
        );
        for event_type in TraceEventType::ALL {
            let wire = serde_json::to_value(event_type).unwrap();
            assert_eq!(wire, json!(event_type.as_str()));
        }
    }

    #[test]
    fn test_events_of_filters() {
        let mut trace = Trace::new("t");
        trace.record(TraceEventType::ExecutionStart, Value::Null).unwrap();
        trace.record(TraceEventType::ExecutionFailure, json!({"outcome": "timeout"})).unwrap();
        trace.record(TraceEventType::ExecutionStart, Value::Null).unwrap();
        assert_eq!(trace.events_of(TraceEventType::ExecutionStart).count(), 2);
        assert_eq!(trace.events_of(TraceEventType::ExecutionFailure).count(), 1);
    }
}
