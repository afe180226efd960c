//! Core ingestion pipeline: value objects, validation, buffering, retry,
//! persistence, workers, the thread manager, the request coalescer, and the
//! idempotency store contract.

pub mod buffer;
pub mod coalescer;
pub mod idempotency;
pub mod manager;
pub mod normalizer;
pub mod persistence;
pub mod retry;
pub mod stream;
pub mod validation;
pub mod worker;

pub use buffer::{BatchBuffer, BufferError, BufferHealth};
pub use coalescer::{CoalesceProcessor, Coalescer, CoalescerError};
pub use idempotency::{CachedResponse, IdempotencyDecision, IdempotencyError, IdempotencyStore};
pub use manager::WorkerPoolManager;
pub use normalizer::normalize_batch;
pub use persistence::{PersistError, PersistenceAdapter};
pub use retry::{DeadLetterEntry, RetryError, RetryStrategy};
pub use stream::{StreamQueueAdapter, StreamRecord};
pub use validation::{ValidationOutcome, ValidationStrategy};
pub use worker::{Worker, WorkerHealth, WorkerRole, WorkerTuning};
