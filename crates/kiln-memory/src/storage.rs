//! Append-only JSONL persistence for memory records

use crate::record::MemoryRecord;
use kiln_core::{KilnError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// One JSON record per line, only ever appended to
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    path: PathBuf,
}

impl MemoryStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &MemoryRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.storage_error("create directory", e))?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.storage_error("open", e))?;

        // Single write so a line is never interleaved with another
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| self.storage_error("append", e))?;
        file.flush().await.map_err(|e| self.storage_error("flush", e))?;

        debug!("Stored memory record {} to {:?}", record.id, self.path);
        Ok(())
    }

    /// Every readable record in file order
    ///
    /// A missing file is an empty memory. Lines that do not parse are skipped.
    pub async fn load(&self) -> Result<Vec<MemoryRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.storage_error("read", e))?;

        let mut records = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MemoryRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => debug!("Skipping corrupt memory line {}: {}", number + 1, e),
            }
        }

        Ok(records)
    }

    fn storage_error(&self, action: &str, error: std::io::Error) -> KilnError {
        KilnError::MemoryStorage(format!(
            "Failed to {} {}: {}",
            action,
            self.path.display(),
            error
        ))
    }
}
