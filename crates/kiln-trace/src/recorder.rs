//! Process-wide trace registry

use crate::trace::{Trace, TraceEvent, TraceEventType, TraceOutcome};
use kiln_core::{KilnError, Result, TraceId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Holds every trace until it is discarded
///
/// Cloning shares the same registry.
#[derive(Debug, Clone, Default)]
pub struct TraceRecorder {
    traces: Arc<RwLock<HashMap<TraceId, Trace>>>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a trace for a new run
    #[instrument(skip(self, task))]
    pub async fn start_trace(&self, task: &str) -> TraceId {
        let trace = Trace::new(task);
        let id = trace.id.clone();
        self.traces.write().await.insert(id.clone(), trace);
        debug!("Opened trace {}", id);
        id
    }

    /// Append one event; closed or unknown traces are rejected
    pub async fn event(
        &self,
        trace_id: &str,
        event_type: TraceEventType,
        payload: Value,
    ) -> Result<TraceEvent> {
        let mut traces = self.traces.write().await;
        let trace = traces
            .get_mut(trace_id)
            .ok_or_else(|| KilnError::TraceNotFound(trace_id.to_string()))?;
        let event = trace.record(event_type, payload)?;
        debug!("Trace {} #{} {}", trace_id, event.sequence, event_type);
        Ok(event)
    }

    /// Close a trace and return a snapshot of it
    pub async fn end_trace(
        &self,
        trace_id: &str,
        outcome: TraceOutcome,
        summary: Value,
    ) -> Result<Trace> {
        let mut traces = self.traces.write().await;
        let trace = traces
            .get_mut(trace_id)
            .ok_or_else(|| KilnError::TraceNotFound(trace_id.to_string()))?;
        trace.close(outcome, summary)?;
        debug!(
            "Closed trace {} as {} after {} events",
            trace_id,
            outcome,
            trace.events().len()
        );
        Ok(trace.clone())
    }

    pub async fn get(&self, trace_id: &str) -> Option<Trace> {
        self.traces.read().await.get(trace_id).cloned()
    }

    /// Forget a trace, returning it if it existed
    pub async fn discard(&self, trace_id: &str) -> Option<Trace> {
        self.traces.write().await.remove(trace_id)
    }

    /// Snapshot of every retained trace, oldest first
    pub async fn traces(&self) -> Vec<Trace> {
        let mut all: Vec<Trace> = self.traces.read().await.values().cloned().collect();
        all.sort_by_key(|trace| trace.start_time);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_lifecycle() {
        let recorder = TraceRecorder::new();
        let id = recorder.start_trace("add two numbers").await;

        let first = recorder
            .event(&id, TraceEventType::MemoryRecall, json!({"matches": 0}))
            .await
            .unwrap();
        let second = recorder
            .event(&id, TraceEventType::Thinking, json!({"thought": "use +"}))
            .await
            .unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);

        let trace = recorder
            .end_trace(&id, TraceOutcome::Success, json!({"success": true}))
            .await
            .unwrap();
        assert!(trace.is_closed());
        assert_eq!(trace.events().len(), 2);
        assert!(trace.end_time.unwrap() >= second.timestamp);
    }

    #[tokio::test]
    async fn test_event_after_end_is_rejected() {
        let recorder = TraceRecorder::new();
        let id = recorder.start_trace("t").await;
        recorder
            .end_trace(&id, TraceOutcome::Failure, Value::Null)
            .await
            .unwrap();

        let err = recorder
            .event(&id, TraceEventType::Thinking, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::TraceClosed(_)));

        let err = recorder
            .end_trace(&id, TraceOutcome::Success, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::TraceClosed(_)));
    }

    #[tokio::test]
    async fn test_unknown_trace() {
        let recorder = TraceRecorder::new();
        let err = recorder
            .event("missing", TraceEventType::Thinking, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::TraceNotFound(_)));
        assert!(recorder.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_traces_are_independent() {
        let recorder = TraceRecorder::new();
        let a = recorder.start_trace("a").await;
        let b = recorder.start_trace("b").await;

        let writers = [a.clone(), b.clone()].map(|id| {
            let recorder = recorder.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    recorder
                        .event(&id, TraceEventType::Thinking, Value::Null)
                        .await
                        .unwrap();
                }
            })
        });
        for writer in writers {
            writer.await.unwrap();
        }

        for id in [&a, &b] {
            let trace = recorder.get(id).await.unwrap();
            let sequences: Vec<u64> = trace.events().iter().map(|e| e.sequence).collect();
            assert_eq!(sequences, (1..=20).collect::<Vec<u64>>());
        }
    }

    #[tokio::test]
    async fn test_discard() {
        let recorder = TraceRecorder::new();
        let id = recorder.start_trace("t").await;
        assert_eq!(recorder.traces().await.len(), 1);
        assert!(recorder.discard(&id).await.is_some());
        assert!(recorder.traces().await.is_empty());
    }
}
