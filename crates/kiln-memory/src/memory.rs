//! Shared, append-only memory of task runs

use crate::record::{Lesson, MemoryRecord};
use crate::similarity::similarity;
use crate::storage::MemoryStorage;
use kiln_core::Result;
use serde::Serialize;
use std::cmp::Ordering;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

/// Totals over everything remembered
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub success_rate: f64,
    pub average_attempts: f64,
}

/// Process-wide memory shared by concurrent runs
///
/// Writers are serialized behind one lock that also covers the file append,
/// so the file and the in-memory log hold records in the same order.
#[derive(Debug, Default)]
pub struct EvolvingMemory {
    records: RwLock<Vec<MemoryRecord>>,
    storage: Option<MemoryStorage>,
}

impl EvolvingMemory {
    /// Memory that lives only as long as the process
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Memory backed by a JSONL file, replaying whatever it already holds
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let storage = MemoryStorage::new(path);
        let records = storage.load().await?;
        info!(
            "Loaded {} memory records from {:?}",
            records.len(),
            storage.path()
        );
        Ok(Self {
            records: RwLock::new(records),
            storage: Some(storage),
        })
    }

    /// Append one record for a completed run
    ///
    /// If persisting fails the record is still kept in memory and the
    /// storage error is returned.
    #[instrument(skip(self, code))]
    pub async fn remember(
        &self,
        task: &str,
        code: &str,
        success: bool,
        attempts: u32,
    ) -> Result<MemoryRecord> {
        let record = MemoryRecord::new(task, code, success, attempts);
        self.insert(record.clone()).await?;
        Ok(record)
    }

    /// Append an already built record
    pub async fn insert(&self, record: MemoryRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.push(record);
        debug!("Memory now holds {} records", records.len());

        if let Some(storage) = &self.storage {
            if let Some(last) = records.last() {
                storage.append(last).await?;
            }
        }
        Ok(())
    }

    /// Up to `k` past records most similar to `task`
    ///
    /// Records sharing no salient term are never returned. Ties go to the
    /// newer record, then to the later insertion.
    pub async fn get_lessons_for_task(&self, task: &str, k: usize) -> Vec<Lesson> {
        if k == 0 {
            return Vec::new();
        }

        let records = self.records.read().await;
        let mut scored: Vec<(usize, f64)> = records
            .iter()
            .enumerate()
            .map(|(index, record)| (index, similarity(task, &record.task)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|(ia, sa), (ib, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| records[*ib].timestamp.cmp(&records[*ia].timestamp))
                .then_with(|| ib.cmp(ia))
        });

        scored
            .into_iter()
            .take(k)
            .map(|(index, score)| Lesson {
                record: records[index].clone(),
                similarity: score,
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Snapshot of every record in insertion order
    pub async fn records(&self) -> Vec<MemoryRecord> {
        self.records.read().await.clone()
    }

    pub async fn stats(&self) -> MemoryStats {
        let records = self.records.read().await;
        let total = records.len();
        if total == 0 {
            return MemoryStats::default();
        }

        let successes = records.iter().filter(|r| r.success).count();
        let attempts: u64 = records.iter().map(|r| u64::from(r.attempts)).sum();

        MemoryStats {
            total,
            successes,
            failures: total - successes,
            success_rate: successes as f64 / total as f64,
            average_attempts: attempts as f64 / total as f64,
        }
    }
}
