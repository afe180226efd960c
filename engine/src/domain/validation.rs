//! Validation strategy (C2): threshold-routed batch validation.
//!
//! Small batches normalize on the calling task. Medium batches hand off to
//! a single blocking-pool task. Large batches split into
//! `min(ceil(N/MEDIUM), maxWorkers)` chunks validated in parallel on the
//! blocking pool, concatenated back in chunk order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::core::constants::{
    DEFAULT_MAX_VALIDATION_WORKERS, DEFAULT_MEDIUM_BATCH_THRESHOLD, DEFAULT_SMALL_BATCH_THRESHOLD,
};
use crate::data::types::{NormalizedLogRecord, RawLogRecord, ValidationError};
use crate::domain::normalizer::{TraceIdPolicy, normalize_one};

/// Which code path produced a [`ValidationOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyTag {
    SameThread,
    Background,
    Parallel,
}

impl StrategyTag {
    fn as_str(self) -> &'static str {
        match self {
            StrategyTag::SameThread => "same_thread",
            StrategyTag::Background => "background",
            StrategyTag::Parallel => "parallel",
        }
    }
}

/// Result of `validateBatch`.
#[derive(Debug)]
pub struct ValidationOutcome {
    pub valid: Vec<NormalizedLogRecord>,
    pub errors: Vec<ValidationError>,
    pub processing_time_ms: u64,
    pub throughput: f64,
    pub strategy_tag: &'static str,
}

/// Counters by strategy, for `getStats()`.
#[derive(Debug, Default)]
pub struct ValidationStats {
    pub same_thread: u64,
    pub background: u64,
    pub parallel: u64,
    pub background_fallbacks: u64,
}

#[derive(Debug, Default)]
struct Counters {
    same_thread: AtomicU64,
    background: AtomicU64,
    parallel: AtomicU64,
    background_fallbacks: AtomicU64,
}

/// Threshold-based validation router.
pub struct ValidationStrategy {
    small_threshold: usize,
    medium_threshold: usize,
    max_workers: usize,
    trace_id_policy: TraceIdPolicy,
    counters: Counters,
}

impl Default for ValidationStrategy {
    fn default() -> Self {
        Self {
            small_threshold: DEFAULT_SMALL_BATCH_THRESHOLD,
            medium_threshold: DEFAULT_MEDIUM_BATCH_THRESHOLD,
            max_workers: DEFAULT_MAX_VALIDATION_WORKERS,
            trace_id_policy: TraceIdPolicy::default(),
            counters: Counters::default(),
        }
    }
}

/// Normalize a contiguous chunk synchronously, without yielding — intended
/// to run on the blocking pool where it already owns a dedicated thread.
fn normalize_chunk_sync(
    raws: &[RawLogRecord],
    offset: usize,
    policy: TraceIdPolicy,
) -> (Vec<NormalizedLogRecord>, Vec<ValidationError>) {
    let mut valid = Vec::with_capacity(raws.len());
    let mut errors = Vec::new();
    for (i, raw) in raws.iter().enumerate() {
        match normalize_one(raw, offset + i, policy) {
            Ok(record) => valid.push(record),
            Err(err) => errors.push(err),
        }
    }
    (valid, errors)
}

impl ValidationStrategy {
    pub fn new(
        small_threshold: usize,
        medium_threshold: usize,
        max_workers: usize,
        trace_id_policy: TraceIdPolicy,
    ) -> Self {
        Self {
            small_threshold,
            medium_threshold,
            max_workers: max_workers.max(1),
            trace_id_policy,
            counters: Counters::default(),
        }
    }

    pub async fn validate_batch(&self, raw: Vec<RawLogRecord>) -> ValidationOutcome {
        let start = Instant::now();
        let n = raw.len();

        let (valid, errors, strategy_tag) = if n <= self.small_threshold {
            self.counters.same_thread.fetch_add(1, Ordering::Relaxed);
            let (valid, errors) = crate::domain::normalizer::normalize_batch(raw, self.trace_id_policy).await;
            (valid, errors, StrategyTag::SameThread)
        } else if n <= self.medium_threshold {
            match self.validate_background(raw.clone()).await {
                Some((valid, errors)) => {
                    self.counters.background.fetch_add(1, Ordering::Relaxed);
                    (valid, errors, StrategyTag::Background)
                }
                None => {
                    self.counters
                        .background_fallbacks
                        .fetch_add(1, Ordering::Relaxed);
                    self.counters.same_thread.fetch_add(1, Ordering::Relaxed);
                    let (valid, errors) =
                        crate::domain::normalizer::normalize_batch(raw, self.trace_id_policy).await;
                    (valid, errors, StrategyTag::SameThread)
                }
            }
        } else {
            match self.validate_parallel(raw.clone()).await {
                Some((valid, errors)) => {
                    self.counters.parallel.fetch_add(1, Ordering::Relaxed);
                    (valid, errors, StrategyTag::Parallel)
                }
                None => {
                    self.counters
                        .background_fallbacks
                        .fetch_add(1, Ordering::Relaxed);
                    self.counters.same_thread.fetch_add(1, Ordering::Relaxed);
                    let (valid, errors) =
                        crate::domain::normalizer::normalize_batch(raw, self.trace_id_policy).await;
                    (valid, errors, StrategyTag::SameThread)
                }
            }
        };

        let elapsed = start.elapsed();
        let processing_time_ms = elapsed.as_millis() as u64;
        let throughput = if elapsed.as_secs_f64() > 0.0 {
            n as f64 / elapsed.as_secs_f64()
        } else {
            n as f64
        };

        ValidationOutcome {
            valid,
            errors,
            processing_time_ms,
            throughput,
            strategy_tag: strategy_tag.as_str(),
        }
    }

    /// Single blocking-pool task. Returns `None` on join failure so the
    /// caller can fall back to same-thread validation.
    async fn validate_background(
        &self,
        raw: Vec<RawLogRecord>,
    ) -> Option<(Vec<NormalizedLogRecord>, Vec<ValidationError>)> {
        let policy = self.trace_id_policy;
        tokio::task::spawn_blocking(move || normalize_chunk_sync(&raw, 0, policy))
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "background validator task failed, falling back"))
            .ok()
    }

    /// Fan out to `min(ceil(N/MEDIUM), maxWorkers)` blocking-pool tasks,
    /// preserving chunk order in the concatenated result.
    async fn validate_parallel(
        &self,
        raw: Vec<RawLogRecord>,
    ) -> Option<(Vec<NormalizedLogRecord>, Vec<ValidationError>)> {
        let n = raw.len();
        let worker_count = n.div_ceil(self.medium_threshold).min(self.max_workers).max(1);
        let chunk_size = n.div_ceil(worker_count);
        let policy = self.trace_id_policy;

        let mut handles = Vec::with_capacity(worker_count);
        let mut offset = 0;
        for chunk in raw.chunks(chunk_size) {
            let chunk = chunk.to_vec();
            let chunk_offset = offset;
            offset += chunk.len();
            handles.push(tokio::task::spawn_blocking(move || {
                normalize_chunk_sync(&chunk, chunk_offset, policy)
            }));
        }

        let mut valid = Vec::with_capacity(n);
        let mut errors = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((chunk_valid, chunk_errors)) => {
                    valid.extend(chunk_valid);
                    errors.extend(chunk_errors);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "parallel validation chunk failed, falling back");
                    return None;
                }
            }
        }
        errors.sort_by_key(|e| e.index);
        Some((valid, errors))
    }

    pub fn get_stats(&self) -> ValidationStats {
        ValidationStats {
            same_thread: self.counters.same_thread.load(Ordering::Relaxed),
            background: self.counters.background.load(Ordering::Relaxed),
            parallel: self.counters.parallel.load(Ordering::Relaxed),
            background_fallbacks: self.counters.background_fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Confirms the blocking pool can still accept work.
    pub async fn health_check(&self) -> bool {
        tokio::task::spawn_blocking(|| true).await.unwrap_or(false)
    }
}
