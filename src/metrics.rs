//! The external metrics-sink collaborator (spec.md §4.7 "MetricsSink").
//!
//! Kept as a trait for the same reason the teacher keeps its own `Metrics` registration behind a
//! thin wrapper (`metrics.rs`/`IncCounter`/`Histogram` macros): so that the synchronizer and
//! pipeline can unconditionally report observations without caring whether anything is actually
//! listening in a given binary (tests, local dev) or a full metrics exporter is wired up.

use std::time::Instant;

use async_trait::async_trait;

use crate::relational_store::RollupDao;

/// Observations the synchronizer and pipeline report as they run (spec.md §4.7).
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Starts timing one `update_dbs` invocation; the returned guard reports its own duration on
    /// drop.
    fn process_block_timer(&self) -> ProcessBlockTimer<'_>;

    fn record_process_block_duration(&self, millis: u64);

    fn tx_settlement_duration(&self, millis: u64);

    fn rollup_received(&self, rollup: &RollupDao);
}

/// RAII timer returned by [`MetricsSink::process_block_timer`]; reports elapsed time to the
/// owning sink when dropped, mirroring the teacher's scoped-histogram-guard pattern.
pub struct ProcessBlockTimer<'a> {
    sink: &'a dyn MetricsSink,
    started: Instant,
}

impl Drop for ProcessBlockTimer<'_> {
    fn drop(&mut self) {
        let millis = self.started.elapsed().as_millis() as u64;
        self.sink.record_process_block_duration(millis);
    }
}

/// Discards every observation. The default for binaries and tests that have no metrics exporter
/// wired up.
#[derive(Debug, Default)]
pub struct NoopMetricsSink;

#[async_trait]
impl MetricsSink for NoopMetricsSink {
    fn process_block_timer(&self) -> ProcessBlockTimer<'_> {
        ProcessBlockTimer {
            sink: self,
            started: Instant::now(),
        }
    }

    fn record_process_block_duration(&self, _millis: u64) {}

    fn tx_settlement_duration(&self, _millis: u64) {}

    fn rollup_received(&self, _rollup: &RollupDao) {}
}

/// In-memory counters, used by tests asserting that a given code path actually reported
/// something.
#[derive(Debug, Default)]
pub struct CountingMetricsSink {
    pub process_block_count: std::sync::atomic::AtomicU64,
    pub rollups_received: std::sync::atomic::AtomicU64,
}

#[async_trait]
impl MetricsSink for CountingMetricsSink {
    fn process_block_timer(&self) -> ProcessBlockTimer<'_> {
        ProcessBlockTimer {
            sink: self,
            started: Instant::now(),
        }
    }

    fn record_process_block_duration(&self, _millis: u64) {
        self.process_block_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn tx_settlement_duration(&self, _millis: u64) {}

    fn rollup_received(&self, _rollup: &RollupDao) {
        self.rollups_received
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_guard_records_on_drop() {
        let sink = CountingMetricsSink::default();
        {
            let _timer = sink.process_block_timer();
        }
        assert_eq!(
            sink.process_block_count.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }
}
