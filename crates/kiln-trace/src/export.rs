//! Writes closed traces to disk as HTML reports

use crate::render::to_html;
use crate::trace::Trace;
use kiln_core::fail_open::fail_open;
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

/// Saves `<dir>/<trace-id>.html`
///
/// Export failures are logged and swallowed.
#[derive(Debug, Clone)]
pub struct TraceExporter {
    dir: PathBuf,
}

impl TraceExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, trace: &Trace) -> PathBuf {
        self.dir.join(format!("{}.html", trace.id))
    }

    /// Returns the written path, `None` if the write failed
    pub async fn export(&self, trace: &Trace) -> Option<PathBuf> {
        let path = self.path_for(trace);
        fail_open("trace_exporter::export", || async {
            fs::create_dir_all(&self.dir).await?;
            fs::write(&path, to_html(trace)).await?;
            Ok::<(), kiln_core::KilnError>(())
        })
        .await?;

        info!("Trace report written to {}", path.display());
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceOutcome;
    use serde_json::Value;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_export_writes_html() {
        let dir = TempDir::new().unwrap();
        let exporter = TraceExporter::new(dir.path().join("traces"));

        let mut trace = Trace::new("print hello");
        trace.close(TraceOutcome::Success, Value::Null).unwrap();

        let path = exporter.export(&trace).await.unwrap();
        assert_eq!(path, exporter.path_for(&trace));
        let html = std::fs::read_to_string(path).unwrap();
        assert!(html.contains("print hello"));
    }

    #[tokio::test]
    async fn test_export_failure_is_swallowed() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();

        let exporter = TraceExporter::new(blocker.join("traces"));
        assert!(exporter.export(&Trace::new("t")).await.is_none());
    }
}
