//! In-memory stream topic backend.
//!
//! Simulates Redis Streams consumer-group semantics with a `VecDeque` plus
//! per-group delivery bookkeeping: entries are pending until acknowledged,
//! and `claim_stale` can transfer idle entries to another consumer.
//!
//! Suitable for local development and single-process deployments. A
//! process crash loses all state; use the Redis backend for durability and
//! multi-process coordination.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Notify;

use super::backend::{PendingConsumer, PendingInfo, StreamMessage, TopicBackend};
use super::error::TopicError;

const DEFAULT_STREAM_MAX_LEN: usize = 1_000_000;

#[derive(Clone)]
struct StreamEntry {
    id: u64,
    payload: Vec<u8>,
}

#[derive(Default)]
struct ConsumerGroup {
    /// Highest entry id any consumer in the group has been handed, shared
    /// across the group the way a real stream's group cursor is.
    cursor: u64,
    /// entry id -> (owning consumer, delivery time)
    pending: HashMap<u64, (String, Instant)>,
}

#[derive(Default)]
struct StreamState {
    messages: VecDeque<StreamEntry>,
    groups: HashMap<String, ConsumerGroup>,
    next_id: u64,
}

struct SharedState {
    streams: RwLock<HashMap<String, StreamState>>,
    notifiers: RwLock<HashMap<String, Arc<Notify>>>,
}

/// In-memory stream topic backend.
pub struct MemoryTopicBackend {
    state: Arc<SharedState>,
}

impl Clone for MemoryTopicBackend {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MemoryTopicBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTopicBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SharedState {
                streams: RwLock::new(HashMap::new()),
                notifiers: RwLock::new(HashMap::new()),
            }),
        }
    }

    fn notifier_for(&self, topic: &str) -> Arc<Notify> {
        {
            let notifiers = self.state.notifiers.read();
            if let Some(n) = notifiers.get(topic) {
                return Arc::clone(n);
            }
        }
        let mut notifiers = self.state.notifiers.write();
        if let Some(n) = notifiers.get(topic) {
            return Arc::clone(n);
        }
        let n = Arc::new(Notify::new());
        notifiers.insert(topic.to_string(), Arc::clone(&n));
        n
    }

    fn trim(stream: &mut StreamState) {
        while stream.messages.len() > DEFAULT_STREAM_MAX_LEN {
            if let Some(entry) = stream.messages.pop_front() {
                for group in stream.groups.values_mut() {
                    group.pending.remove(&entry.id);
                }
            }
        }
    }

    /// Try to deliver up to `count` new entries to `consumer` in `group`,
    /// advancing the group's cursor. Returns an empty vec if none are
    /// available right now.
    fn try_read(&self, topic: &str, group: &str, consumer: &str, count: usize) -> Vec<StreamMessage> {
        let mut streams = self.state.streams.write();
        let Some(stream) = streams.get_mut(topic) else {
            return vec![];
        };
        let cg = stream.groups.entry(group.to_string()).or_default();

        let mut out = Vec::new();
        for entry in stream.messages.iter() {
            if out.len() >= count {
                break;
            }
            if entry.id > cg.cursor && !cg.pending.contains_key(&entry.id) {
                cg.pending
                    .insert(entry.id, (consumer.to_string(), Instant::now()));
                out.push(StreamMessage {
                    id: entry.id.to_string(),
                    payload: entry.payload.clone(),
                });
            }
        }
        if let Some(last) = out.last() {
            let last_id: u64 = last.id.parse().unwrap_or(cg.cursor);
            cg.cursor = cg.cursor.max(last_id);
        }
        out
    }
}

#[async_trait]
impl TopicBackend for MemoryTopicBackend {
    async fn ensure_group(&self, topic: &str, group: &str) -> Result<(), TopicError> {
        let mut streams = self.state.streams.write();
        let stream = streams.entry(topic.to_string()).or_default();
        stream.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<String, TopicError> {
        let id = {
            let mut streams = self.state.streams.write();
            let stream = streams.entry(topic.to_string()).or_default();
            let id = stream.next_id;
            stream.next_id += 1;
            stream.messages.push_back(StreamEntry {
                id,
                payload: payload.to_vec(),
            });
            Self::trim(stream);
            id
        };

        self.notifier_for(topic).notify_waiters();
        Ok(id.to_string())
    }

    async fn read(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamMessage>, TopicError> {
        let deadline = Instant::now() + Duration::from_millis(block_ms);
        let notifier = self.notifier_for(topic);

        loop {
            let messages = self.try_read(topic, group, consumer, count);
            if !messages.is_empty() {
                return Ok(messages);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(vec![]);
            }
            let remaining = deadline - now;
            let _ = tokio::time::timeout(remaining, notifier.notified()).await;
        }
    }

    async fn read_pending(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
        start_id: &str,
    ) -> Result<Vec<StreamMessage>, TopicError> {
        let start: u64 = if start_id == "0-0" || start_id == "0" {
            0
        } else {
            start_id
                .parse()
                .map_err(|_| TopicError::Stream(format!("invalid start id: {start_id}")))?
        };

        let streams = self.state.streams.read();
        let Some(stream) = streams.get(topic) else {
            return Ok(vec![]);
        };
        let Some(cg) = stream.groups.get(group) else {
            return Ok(vec![]);
        };

        let mut ids: Vec<u64> = cg
            .pending
            .iter()
            .filter(|(id, (owner, _))| **id > start && owner == consumer)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids.truncate(count);

        let out = ids
            .into_iter()
            .filter_map(|id| {
                stream
                    .messages
                    .iter()
                    .find(|e| e.id == id)
                    .map(|e| StreamMessage {
                        id: id.to_string(),
                        payload: e.payload.clone(),
                    })
            })
            .collect();

        Ok(out)
    }

    async fn claim_stale(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamMessage>, TopicError> {
        let mut streams = self.state.streams.write();
        let Some(stream) = streams.get_mut(topic) else {
            return Ok(vec![]);
        };
        let Some(cg) = stream.groups.get_mut(group) else {
            return Ok(vec![]);
        };

        let now = Instant::now();
        let min_idle = Duration::from_millis(min_idle_ms);
        let idle_ids: Vec<u64> = cg
            .pending
            .iter()
            .filter(|(_, (_, delivered_at))| now.duration_since(*delivered_at) >= min_idle)
            .map(|(id, _)| *id)
            .take(count)
            .collect();

        let mut claimed = Vec::new();
        for id in idle_ids {
            if let Some(entry) = stream.messages.iter().find(|e| e.id == id) {
                cg.pending.insert(id, (consumer.to_string(), Instant::now()));
                claimed.push(StreamMessage {
                    id: id.to_string(),
                    payload: entry.payload.clone(),
                });
            }
        }

        Ok(claimed)
    }

    async fn ack(&self, topic: &str, group: &str, ids: &[String]) -> Result<(), TopicError> {
        let mut streams = self.state.streams.write();
        let Some(stream) = streams.get_mut(topic) else {
            return Ok(());
        };
        let Some(cg) = stream.groups.get_mut(group) else {
            return Ok(());
        };

        for id in ids {
            if let Ok(id) = id.parse::<u64>() {
                cg.pending.remove(&id);
            }
        }
        Ok(())
    }

    async fn pending_info(&self, topic: &str, group: &str) -> Result<PendingInfo, TopicError> {
        let streams = self.state.streams.read();
        let Some(stream) = streams.get(topic) else {
            return Ok(PendingInfo::default());
        };
        let Some(cg) = stream.groups.get(group) else {
            return Ok(PendingInfo::default());
        };

        let mut per_consumer: HashMap<String, u64> = HashMap::new();
        for (owner, _) in cg.pending.values() {
            *per_consumer.entry(owner.clone()).or_insert(0) += 1;
        }

        Ok(PendingInfo {
            count: cg.pending.len() as u64,
            consumers: per_consumer
                .into_iter()
                .map(|(name, pending)| PendingConsumer { name, pending })
                .collect(),
        })
    }

    async fn health_check(&self) -> Result<(), TopicError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
