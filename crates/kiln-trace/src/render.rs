//! Human-readable views of a trace

use crate::trace::{Trace, TraceEvent};
use serde_json::Value;

/// Longest payload value shown inline in the text timeline
const INLINE_VALUE_CHARS: usize = 60;

/// Plain-text timeline in sequence order
pub fn visualize(trace: &Trace) -> String {
    let mut output = String::new();

    output.push_str(&format!("Trace {}\n", trace.id));
    output.push_str(&format!("Task: {}\n", first_line(&trace.task)));
    match trace.outcome {
        Some(outcome) => output.push_str(&format!(
            "Outcome: {} ({}ms)\n",
            outcome,
            trace.duration_ms()
        )),
        None => output.push_str("Outcome: in progress\n"),
    }
    output.push_str(&"-".repeat(60));
    output.push('\n');

    for event in trace.events() {
        let summary = summarize_payload(&event.payload);
        output.push_str(&format!(
            "{:>3}. +{:<7} {} {:<20}{}{}\n",
            event.sequence,
            format!("{}ms", offset_ms(trace, event)),
            event.event_type.icon(),
            event.event_type.label(),
            if summary.is_empty() { "" } else { " " },
            summary
        ));
    }

    if trace.events().is_empty() {
        output.push_str("  (no events)\n");
    }

    output
}

/// Standalone HTML page with every payload in full
pub fn to_html(trace: &Trace) -> String {
    let outcome = trace
        .outcome
        .map(|o| o.to_string())
        .unwrap_or_else(|| "in progress".to_string());

    let mut rows = String::new();
    for event in trace.events() {
        let payload = match &event.payload {
            Value::Null => String::new(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };
        rows.push_str(&format!(
            "      <li class=\"event {kind}\">\n        <span class=\"seq\">#{seq}</span>\n        <span class=\"offset\">+{offset}ms</span>\n        <span class=\"label\">{icon} {label}</span>\n        <pre>{payload}</pre>\n      </li>\n",
            kind = event.event_type.as_str(),
            seq = event.sequence,
            offset = offset_ms(trace, event),
            icon = event.event_type.icon(),
            label = escape_html(event.event_type.label()),
            payload = escape_html(&payload),
        ));
    }

    let summary = match &trace.summary {
        Value::Null => String::new(),
        other => format!(
            "    <h2>Summary</h2>\n    <pre>{}</pre>\n",
            escape_html(&serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()))
        ),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Trace {id}</title>
  <style>
    body {{ font-family: system-ui, sans-serif; max-width: 960px; margin: 2rem auto; color: #1f2328; }}
    .outcome {{ font-weight: 600; }}
    .outcome.success {{ color: #1a7f37; }}
    .outcome.failure {{ color: #cf222e; }}
    .outcome.cancelled {{ color: #9a6700; }}
    ol {{ list-style: none; padding: 0; }}
    .event {{ border-left: 3px solid #d0d7de; padding: 0.25rem 0.75rem; margin-bottom: 0.5rem; }}
    .event.execution-success {{ border-color: #1a7f37; }}
    .event.execution-failure {{ border-color: #cf222e; }}
    .seq, .offset {{ color: #656d76; font-size: 0.85rem; margin-right: 0.5rem; }}
    pre {{ background: #f6f8fa; padding: 0.5rem; overflow-x: auto; }}
    pre:empty {{ display: none; }}
  </style>
</head>
<body>
  <h1>{task}</h1>
  <p>Trace <code>{id}</code> &middot; <span class="outcome {outcome_class}">{outcome}</span> &middot; {duration}ms &middot; {count} events</p>
  <ol>
{rows}  </ol>
{summary}</body>
</html>
"#,
        id = escape_html(&trace.id),
        task = escape_html(first_line(&trace.task)),
        outcome_class = escape_html(&outcome.replace(' ', "-")),
        outcome = escape_html(&outcome),
        duration = trace.duration_ms(),
        count = trace.events().len(),
        rows = rows,
        summary = summary,
    )
}

fn offset_ms(trace: &Trace, event: &TraceEvent) -> i64 {
    (event.timestamp - trace.start_time).num_milliseconds().max(0)
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

/// `key=value` pairs for an object payload, the value itself otherwise
fn summarize_payload(payload: &Value) -> String {
    match payload {
        Value::Null => String::new(),
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| format!("{}={}", key, inline_value(value)))
            .collect::<Vec<_>>()
            .join(" "),
        other => inline_value(other),
    }
}

fn inline_value(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > INLINE_VALUE_CHARS {
        let cut: String = flat.chars().take(INLINE_VALUE_CHARS).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
