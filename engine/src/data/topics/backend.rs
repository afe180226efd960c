//! Stream queue backend trait definition.
//!
//! Defines the consumer-group read/ack contract used by the stream queue
//! adapter (C3). Both backends give at-least-once delivery: entries remain
//! in a per-consumer pending-entry list until acknowledged, and idle
//! entries can be reclaimed by another consumer via claim_stale.

use async_trait::async_trait;

use super::error::TopicError;

/// A single entry read from a stream, with its id for acknowledgment.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    /// Unique entry id (Redis stream id or memory sequence id).
    pub id: String,
    pub payload: Vec<u8>,
}

/// Snapshot of a consumer group's pending-entry list, for observability.
#[derive(Debug, Clone, Default)]
pub struct PendingInfo {
    pub count: u64,
    pub consumers: Vec<PendingConsumer>,
}

#[derive(Debug, Clone)]
pub struct PendingConsumer {
    pub name: String,
    pub pending: u64,
}

/// Stream queue backend trait.
///
/// Implementations provide Redis-Streams-like consumer-group semantics:
/// entries are durable until acknowledged, and multiple consumers in the
/// same group divide new entries among themselves.
#[async_trait]
pub trait TopicBackend: Send + Sync {
    /// Ensure a consumer group exists on the stream. Idempotent: tolerates
    /// the group already existing.
    async fn ensure_group(&self, topic: &str, group: &str) -> Result<(), TopicError>;

    /// Append an entry to the stream. Returns the assigned entry id.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<String, TopicError>;

    /// Read up to `count` new entries for `consumer`, blocking up to
    /// `block_ms` when the stream is empty. Returns immediately once any
    /// entries are available.
    async fn read(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamMessage>, TopicError>;

    /// Read entries already owned by `consumer` (its own pending-entry
    /// list) starting after `start_id`. Used once at worker startup to
    /// recover from a graceful restart.
    async fn read_pending(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
        start_id: &str,
    ) -> Result<Vec<StreamMessage>, TopicError>;

    /// Claim entries pending to any consumer whose idle time exceeds
    /// `min_idle_ms`, transferring ownership to `consumer`. Does not
    /// duplicate entries.
    async fn claim_stale(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamMessage>, TopicError>;

    /// Acknowledge entries, removing them from the group's pending-entry
    /// list.
    async fn ack(&self, topic: &str, group: &str, ids: &[String]) -> Result<(), TopicError>;

    /// Snapshot of the group's pending-entry list.
    async fn pending_info(&self, topic: &str, group: &str) -> Result<PendingInfo, TopicError>;

    async fn health_check(&self) -> Result<(), TopicError>;

    fn backend_name(&self) -> &'static str;
}
