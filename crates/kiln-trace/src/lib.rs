//! Execution traces for task runs
//!
//! A [`Trace`] is opened when a run starts, collects one [`TraceEvent`] per
//! step, and is closed exactly once with a [`TraceOutcome`]. Closed traces
//! can be rendered as a text timeline or a standalone HTML page.

mod export;
mod recorder;
mod render;
mod trace;

pub use export::TraceExporter;
pub use recorder::TraceRecorder;
pub use render::{to_html, visualize};
pub use trace::{Trace, TraceEvent, TraceEventType, TraceOutcome};
