//! Idempotency store contract (C10): a key-value lock/replay protocol
//! layered on the shared [`CacheService`], used as a request pre-handler
//! hook (§4.10, §5).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::constants::{IDEMPOTENCY_KEY_HEADER, IDEMPOTENCY_KEY_MAX_LEN};
use crate::data::cache::{CacheError, CacheService};

#[derive(Error, Debug)]
pub enum IdempotencyError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Cached terminal response, replayed on a duplicate request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status_code: u16,
    pub payload: serde_json::Value,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state")]
enum Slot {
    Processing,
    Done(CachedResponse),
}

/// What the pre-handler hook should do with an incoming request.
#[derive(Debug, Clone)]
pub enum IdempotencyDecision {
    /// No key required, or the store is failing open: proceed to the handler.
    Proceed,
    /// Won the lock: proceed to the handler, then call
    /// [`IdempotencyStore::complete`] with the key once a response exists.
    ProceedAndRecord { key: String },
    /// A prior request with this key already finished: replay its response.
    Replay(CachedResponse),
    /// A prior request with this key is still in flight.
    Conflict { retry_after_secs: u64 },
    /// Missing or malformed `Idempotency-Key` while enforcement is on.
    Rejected { reason: &'static str },
}

pub struct IdempotencyStore {
    cache: CacheService,
    enforce: bool,
    lock_ttl_secs: u64,
    response_ttl_secs: u64,
}

impl IdempotencyStore {
    pub fn new(cache: CacheService, enforce: bool, lock_ttl_secs: u64, response_ttl_secs: u64) -> Self {
        Self { cache, enforce, lock_ttl_secs, response_ttl_secs }
    }

    pub fn header_name(&self) -> &'static str {
        IDEMPOTENCY_KEY_HEADER
    }

    pub fn is_enforced(&self) -> bool {
        self.enforce
    }

    pub async fn cache_health_check(&self) -> Result<(), IdempotencyError> {
        self.cache.health_check().await?;
        Ok(())
    }

    /// Evaluate an incoming request's idempotency key. Fails open on any
    /// store error: proceed rather than block traffic on a cache outage.
    pub async fn evaluate(&self, key: Option<&str>) -> IdempotencyDecision {
        let key = match key {
            Some(k) if !k.is_empty() => k,
            Some(_) | None => {
                if self.enforce {
                    return IdempotencyDecision::Rejected { reason: "missing Idempotency-Key header" };
                }
                return IdempotencyDecision::Proceed;
            }
        };

        if key.len() > IDEMPOTENCY_KEY_MAX_LEN {
            return IdempotencyDecision::Rejected { reason: "Idempotency-Key exceeds 128 characters" };
        }

        let cache_key = format!("idem:{key}");
        let lock_ttl = std::time::Duration::from_secs(self.lock_ttl_secs);

        match self.cache.set_if_absent(&cache_key, &Slot::Processing, Some(lock_ttl)).await {
            Ok(true) => IdempotencyDecision::ProceedAndRecord { key: cache_key },
            Ok(false) => match self.cache.get::<Slot>(&cache_key).await {
                Ok(Some(Slot::Done(response))) => IdempotencyDecision::Replay(response),
                Ok(Some(Slot::Processing)) | Ok(None) => {
                    IdempotencyDecision::Conflict { retry_after_secs: self.lock_ttl_secs }
                }
                Err(_) => IdempotencyDecision::Proceed,
            },
            Err(_) => IdempotencyDecision::Proceed,
        }
    }

    /// Force-overwrite the lock slot with the terminal response once the
    /// handler completes, extending its TTL to the longer replay window.
    pub async fn complete(&self, cache_key: &str, response: CachedResponse) -> Result<(), IdempotencyError> {
        let ttl = std::time::Duration::from_secs(self.response_ttl_secs);
        self.cache.set(cache_key, &Slot::Done(response), Some(ttl)).await?;
        Ok(())
    }
}
