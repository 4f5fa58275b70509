//! # metrics
//!
//! why: make drops and throughput of the pipeline observable
//! relations: updated by pipeline/mod.rs's stage runner and stages.rs's LogWriter
//! what: Stage names, PipelineMetrics atomic counters, PipelineMetricsSnapshot

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// The four pipeline stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StageKind {
    Validate,
    Encode,
    Replicate,
    Write,
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Validate => "validate",
            StageKind::Encode => "encode",
            StageKind::Replicate => "replicate",
            StageKind::Write => "write",
        }
    }
}

/// Counters shared by every stage. Relaxed ordering; values are advisory.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    scheduled: AtomicU64,
    committed: AtomicU64,
    applied: AtomicU64,
    execution_failures: AtomicU64,
    dropped_validate: AtomicU64,
    dropped_encode: AtomicU64,
    dropped_replicate: AtomicU64,
    dropped_write: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineMetricsSnapshot {
    pub scheduled: u64,
    pub committed: u64,
    pub applied: u64,
    pub execution_failures: u64,
    pub dropped_validate: u64,
    pub dropped_encode: u64,
    pub dropped_replicate: u64,
    pub dropped_write: u64,
}

impl PipelineMetricsSnapshot {
    pub fn dropped(&self) -> u64 {
        self.dropped_validate + self.dropped_encode + self.dropped_replicate + self.dropped_write
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_execution_failure(&self) {
        self.execution_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self, stage: StageKind) {
        let counter = match stage {
            StageKind::Validate => &self.dropped_validate,
            StageKind::Encode => &self.dropped_encode,
            StageKind::Replicate => &self.dropped_replicate,
            StageKind::Write => &self.dropped_write,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        PipelineMetricsSnapshot {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            execution_failures: self.execution_failures.load(Ordering::Relaxed),
            dropped_validate: self.dropped_validate.load(Ordering::Relaxed),
            dropped_encode: self.dropped_encode.load(Ordering::Relaxed),
            dropped_replicate: self.dropped_replicate.load(Ordering::Relaxed),
            dropped_write: self.dropped_write.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_are_counted_per_stage() {
        let metrics = PipelineMetrics::new();
        metrics.record_drop(StageKind::Validate);
        metrics.record_drop(StageKind::Write);
        metrics.record_drop(StageKind::Write);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.dropped_validate, 1);
        assert_eq!(snapshot.dropped_write, 2);
        assert_eq!(snapshot.dropped(), 3);
    }
}
