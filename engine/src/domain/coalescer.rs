//! Request coalescer (C9): merges concurrent single-item `add` calls into
//! batched processor invocations within a size/time window.
//!
//! The pending-items buffer is swapped out wholesale on flush (`mem::take`)
//! rather than grown in place — the "ping-pong" double buffer the source
//! used to avoid per-call allocation; a `Mutex` already serializes access
//! here so a literal pair of preallocated arrays wouldn't buy additional
//! concurrency, only the same swap-without-copy property this gives.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, oneshot};

use crate::core::config::CoalescerConfig;

#[derive(Error, Debug, Clone)]
pub enum CoalescerError {
    #[error("processor failed: {0}")]
    Processor(String),

    #[error("processor returned {got} results for a batch of {expected}")]
    Mismatch { got: usize, expected: usize },

    #[error("coalescer waiter dropped before a result was delivered")]
    Dropped,
}

/// The batched unit of work a coalescer wraps. Implementations must
/// preserve input order in the returned vector.
#[async_trait]
pub trait CoalesceProcessor<In, Out>: Send + Sync {
    async fn process(&self, batch: Vec<In>) -> Result<Vec<Out>, String>;
}

struct Waiter<In, Out> {
    item: In,
    reply: oneshot::Sender<Result<Out, CoalescerError>>,
}

struct PendingWindow<In, Out> {
    items: Vec<Waiter<In, Out>>,
    generation: u64,
}

impl<In, Out> Default for PendingWindow<In, Out> {
    fn default() -> Self {
        Self { items: Vec::new(), generation: 0 }
    }
}

/// Generic coalescer: wraps a processor `f(batch[]) -> result[]`.
pub struct Coalescer<In, Out> {
    processor: Arc<dyn CoalesceProcessor<In, Out>>,
    config: RwLock<CoalescerConfig>,
    pending: Mutex<PendingWindow<In, Out>>,
    is_flushing: AtomicBool,
    shutting_down: AtomicBool,
    timer_seq: AtomicU64,
}

impl<In, Out> Coalescer<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    pub fn new(config: CoalescerConfig, processor: Arc<dyn CoalesceProcessor<In, Out>>) -> Arc<Self> {
        Arc::new(Self {
            processor,
            config: RwLock::new(config),
            pending: Mutex::new(PendingWindow::default()),
            is_flushing: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            timer_seq: AtomicU64::new(0),
        })
    }

    /// Add one item. Passthrough (direct `f([item])` call) when disabled;
    /// otherwise enqueues and resolves once this window flushes.
    pub async fn add(self: &Arc<Self>, item: In) -> Result<Out, CoalescerError> {
        let enabled = self.config.read().await.enabled;
        if !enabled {
            return self.process_one(item).await;
        }

        let (tx, rx) = oneshot::channel();
        let (should_flush_now, schedule_timer, window_generation, max_wait_ms) = {
            let mut pending = self.pending.lock().await;
            pending.items.push(Waiter { item, reply: tx });
            let max_batch_size = self.config.read().await.max_batch_size;
            let is_first = pending.items.len() == 1;
            let should_flush_now = pending.items.len() >= max_batch_size;
            (should_flush_now, is_first && !should_flush_now, pending.generation, self.config.read().await.max_wait_time_ms)
        };

        if should_flush_now {
            self.flush().await;
        } else if schedule_timer {
            self.arm_timer(window_generation, max_wait_ms);
        }

        rx.await.unwrap_or(Err(CoalescerError::Dropped))
    }

    async fn process_one(&self, item: In) -> Result<Out, CoalescerError> {
        match self.processor.process(vec![item]).await {
            Ok(mut results) if results.len() == 1 => Ok(results.pop().expect("len checked")),
            Ok(results) => Err(CoalescerError::Mismatch { got: results.len(), expected: 1 }),
            Err(e) => Err(CoalescerError::Processor(e)),
        }
    }

    fn arm_timer(self: &Arc<Self>, generation: u64, max_wait_ms: u64) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(max_wait_ms)).await;
            let still_current = this.pending.lock().await.generation == generation;
            if still_current {
                this.flush().await;
            }
        });
    }

    /// Swap out the pending window and process it as one batch, resolving
    /// every waiter with its positionally-matching result. All waiters
    /// share the same error if the processor fails.
    pub async fn flush(&self) {
        if self
            .is_flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.flush_inner().await;
        self.is_flushing.store(false, Ordering::SeqCst);
    }

    async fn flush_inner(&self) {
        let waiters = {
            let mut pending = self.pending.lock().await;
            pending.generation += 1;
            std::mem::take(&mut pending.items)
        };
        if waiters.is_empty() {
            return;
        }

        let batch_size = waiters.len();
        let (items, replies): (Vec<In>, Vec<_>) =
            waiters.into_iter().map(|w| (w.item, w.reply)).unzip();

        match self.processor.process(items).await {
            Ok(results) if results.len() == batch_size => {
                for (reply, result) in replies.into_iter().zip(results) {
                    let _ = reply.send(Ok(result));
                }
            }
            Ok(results) => {
                let err = CoalescerError::Mismatch { got: results.len(), expected: batch_size };
                for reply in replies {
                    let _ = reply.send(Err(err.clone()));
                }
            }
            Err(e) => {
                let err = CoalescerError::Processor(e);
                for reply in replies {
                    let _ = reply.send(Err(err.clone()));
                }
            }
        }
    }

    /// Flush unconditionally, bypassing the "is a flush already running"
    /// early-return by waiting for it instead of skipping.
    pub async fn force_flush(&self) {
        while self.is_flushing.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        self.flush().await;
    }

    pub async fn set_enabled(&self, enabled: bool) {
        self.config.write().await.enabled = enabled;
    }

    pub async fn update_config(&self, config: CoalescerConfig) {
        *self.config.write().await = config;
    }

    /// Disable, flush, then wait for any active flush up to the timeout.
    pub async fn shutdown(&self, timeout_ms: u64) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.set_enabled(false).await;
        self.flush().await;
        let _ = tokio::time::timeout(Duration::from_millis(timeout_ms), async {
            while self.is_flushing.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Double;
    #[async_trait]
    impl CoalesceProcessor<i32, i32> for Double {
        async fn process(&self, batch: Vec<i32>) -> Result<Vec<i32>, String> {
            Ok(batch.into_iter().map(|x| x * 2).collect())
        }
    }

    struct AlwaysFails;
    #[async_trait]
    impl CoalesceProcessor<i32, i32> for AlwaysFails {
        async fn process(&self, _batch: Vec<i32>) -> Result<Vec<i32>, String> {
            Err("boom".to_string())
        }
    }

    fn config(enabled: bool, max_batch_size: usize, max_wait_time_ms: u64) -> CoalescerConfig {
        CoalescerConfig { enabled, max_batch_size, max_wait_time_ms, shutdown_timeout_ms: 5_000 }
    }

    #[tokio::test]
    async fn disabled_coalescer_is_direct_passthrough() {
        let coalescer = Coalescer::new(config(false, 100, 10), Arc::new(Double));
        assert_eq!(coalescer.add(21).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn flush_resolves_waiters_in_input_order() {
        let coalescer = Coalescer::new(config(true, 100, 50), Arc::new(Double));
        let c1 = Arc::clone(&coalescer);
        let c2 = Arc::clone(&coalescer);
        let c3 = Arc::clone(&coalescer);
        let (f1, f2, f3) = tokio::join!(c1.add(1), c2.add(2), c3.add(3));
        assert_eq!(f1.unwrap(), 2);
        assert_eq!(f2.unwrap(), 4);
        assert_eq!(f3.unwrap(), 6);
    }

    #[tokio::test]
    async fn reaching_max_batch_size_flushes_immediately() {
        let coalescer = Coalescer::new(config(true, 2, 10_000), Arc::new(Double));
        let c1 = Arc::clone(&coalescer);
        let c2 = Arc::clone(&coalescer);
        let (r1, r2) = tokio::time::timeout(Duration::from_millis(200), async {
            tokio::join!(c1.add(10), c2.add(20))
        })
        .await
        .expect("should flush immediately without waiting for the timer");
        assert_eq!(r1.unwrap(), 20);
        assert_eq!(r2.unwrap(), 40);
    }

    #[tokio::test]
    async fn processor_failure_rejects_every_waiter_with_same_error() {
        let coalescer = Coalescer::new(config(true, 2, 10), Arc::new(AlwaysFails));
        let c1 = Arc::clone(&coalescer);
        let c2 = Arc::clone(&coalescer);
        let (r1, r2) = tokio::join!(c1.add(1), c2.add(2));
        assert!(matches!(r1.unwrap_err(), CoalescerError::Processor(ref s) if s == "boom"));
        assert!(matches!(r2.unwrap_err(), CoalescerError::Processor(ref s) if s == "boom"));
    }

    #[tokio::test]
    async fn shutdown_flushes_remaining_items() {
        let coalescer = Coalescer::new(config(true, 100, 10_000), Arc::new(Double));
        let add_fut = coalescer.add(5);
        tokio::pin!(add_fut);
        tokio::select! {
            _ = &mut add_fut => panic!("should not resolve before shutdown flush"),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }
        coalescer.shutdown(1_000).await;
        assert_eq!(add_fut.await.unwrap(), 10);
    }
}
