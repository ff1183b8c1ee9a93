//! Per-key rate limiting with timer-driven expiry.
//!
//! Every key owns a fixed number of slots. A claim stores `now + window`
//! in the slot under the cursor and schedules a task that clears exactly
//! that slot once the window has elapsed. A full limiter never blocks: it
//! reports the expiry stored under the cursor, which is the next slot to be
//! reclaimed, and the caller answers 429 with that time as `Retry-After`.
//!
//! Limiters are created lazily per key and evicted once a key has been
//! idle for twice the window.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::config::RateLimitConfig;
use crate::http::headers::format_http_date;
use crate::http::problem::{ProblemDetail, ResponseError};
use crate::observability::metrics;

/// Outcome of [`RateLimiter::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    /// Expiry of the claimed slot, or of the next slot to free up when full.
    pub expires_at: SystemTime,
    pub full: bool,
}

#[derive(Debug)]
struct Slots {
    slots: Vec<Option<SystemTime>>,
    cursor: usize,
    occupied: usize,
}

/// Fixed-capacity FIFO slot set for one key.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    state: Mutex<Slots>,
    /// Mirror of `Slots::occupied`, written only under `state`, so the
    /// lookup can read it without taking the slot lock.
    in_use: AtomicUsize,
}

impl RateLimiter {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(Slots {
                slots: vec![None; capacity.max(1)],
                cursor: 0,
                occupied: 0,
            }),
            in_use: AtomicUsize::new(0),
        }
    }

    /// Claim a slot. Spawns the slot's expiry task, so it must run inside a
    /// tokio runtime.
    pub fn claim(self: &Arc<Self>) -> Claim {
        let mut state = self.state.lock();
        let capacity = state.slots.len();

        if state.occupied == capacity {
            let expires_at = state.slots[state.cursor]
                .unwrap_or_else(|| SystemTime::now() + self.window);
            return Claim {
                expires_at,
                full: true,
            };
        }

        let slot = state.cursor;
        let expires_at = SystemTime::now() + self.window;
        state.slots[slot] = Some(expires_at);
        state.cursor = (slot + 1) % capacity;
        state.occupied += 1;
        self.in_use.store(state.occupied, Ordering::Release);
        drop(state);

        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(limiter.window).await;
            limiter.release(slot, expires_at);
        });

        Claim {
            expires_at,
            full: false,
        }
    }

    fn release(&self, slot: usize, expires_at: SystemTime) {
        let mut state = self.state.lock();
        if state.slots[slot] == Some(expires_at) {
            state.slots[slot] = None;
            state.occupied -= 1;
            self.in_use.store(state.occupied, Ordering::Release);
        }
    }

    pub fn occupied(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

struct Tracked {
    limiter: Arc<RateLimiter>,
    /// Bumped on every claim; only the eviction task armed by the latest
    /// claim may remove the entry.
    generation: AtomicU64,
}

/// Key → limiter map owned by one policy.
pub struct RateLimitingLookup {
    capacity: usize,
    window: Duration,
    entries: DashMap<String, Arc<Tracked>>,
}

impl RateLimitingLookup {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            entries: DashMap::new(),
        }
    }

    /// Claim a slot for `key`, creating its limiter on first use and
    /// re-arming its idle eviction.
    pub fn claim(self: &Arc<Self>, key: &str) -> Claim {
        let (tracked, generation) = {
            let entry = self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| {
                    Arc::new(Tracked {
                        limiter: Arc::new(RateLimiter::new(self.capacity, self.window)),
                        generation: AtomicU64::new(0),
                    })
                });
            let generation = entry.generation.fetch_add(1, Ordering::AcqRel) + 1;
            (Arc::clone(entry.value()), generation)
        };

        let claim = tracked.limiter.claim();

        let lookup = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(lookup.window * 2).await;
            lookup.evict(&key, generation);
        });

        claim
    }

    fn evict(&self, key: &str, generation: u64) {
        let removed = self.entries.remove_if(key, |_, tracked| {
            tracked.generation.load(Ordering::Acquire) == generation
                && tracked.limiter.occupied() == 0
        });
        if removed.is_some() {
            tracing::trace!(key = %key, "Evicted idle rate limiter");
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for RateLimitingLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitingLookup")
            .field("capacity", &self.capacity)
            .field("window", &self.window)
            .field("keys", &self.entries.len())
            .finish()
    }
}

/// Custom key extractor.
pub type KeyFn = dyn Fn(&HeaderMap, SocketAddr) -> String + Send + Sync;

/// How a request is mapped to a rate-limit key.
#[derive(Clone, Default)]
pub enum RateLimitKey {
    /// The client's IP address.
    #[default]
    RemoteIp,
    /// A request header, falling back to the client IP when absent.
    Header(HeaderName),
    Custom(Arc<KeyFn>),
}

impl RateLimitKey {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&HeaderMap, SocketAddr) -> String + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn key_for(&self, headers: &HeaderMap, remote: SocketAddr) -> String {
        match self {
            Self::RemoteIp => remote.ip().to_string(),
            Self::Header(name) => headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .unwrap_or_else(|| remote.ip().to_string()),
            Self::Custom(f) => f(headers, remote),
        }
    }
}

impl fmt::Debug for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteIp => f.write_str("RemoteIp"),
            Self::Header(name) => f.debug_tuple("Header").field(name).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A named rate-limit policy attached to one or more endpoints.
///
/// Clones share the same lookup, so endpoints registered with clones of one
/// policy share their budget.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    name: String,
    key: RateLimitKey,
    lookup: Arc<RateLimitingLookup>,
}

impl RateLimitPolicy {
    pub fn new(name: impl Into<String>, capacity: usize, window: Duration) -> Self {
        Self {
            name: name.into(),
            key: RateLimitKey::RemoteIp,
            lookup: Arc::new(RateLimitingLookup::new(capacity, window)),
        }
    }

    /// Build the policy described by the `[rate_limit]` config section.
    pub fn from_config(name: impl Into<String>, config: &RateLimitConfig) -> Self {
        let policy = Self::new(name, config.capacity, Duration::from_millis(config.window_ms));
        match config.key_header.as_deref().map(str::as_bytes).map(HeaderName::from_bytes) {
            Some(Ok(header)) => policy.with_key(RateLimitKey::Header(header)),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Invalid rate-limit key header; using remote IP");
                policy
            }
            None => policy,
        }
    }

    pub fn with_key(mut self, key: RateLimitKey) -> Self {
        self.key = key;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_for(&self, headers: &HeaderMap, remote: SocketAddr) -> String {
        self.key.key_for(headers, remote)
    }

    pub fn claim(&self, key: &str) -> Claim {
        let claim = self.lookup.claim(key);
        metrics::record_tracked_keys(&self.name, self.lookup.len());
        if claim.full {
            metrics::record_rate_limited(&self.name);
        }
        claim
    }

    /// Claim a slot for the request, or fail with a 429.
    pub fn check(&self, headers: &HeaderMap, remote: SocketAddr) -> Result<(), ResponseError> {
        let key = self.key_for(headers, remote);
        let claim = self.claim(&key);
        if claim.full {
            tracing::warn!(policy = %self.name, key = %key, "Rate limit exceeded");
            return Err(too_many_requests(claim.expires_at));
        }
        Ok(())
    }

    pub fn tracked_keys(&self) -> usize {
        self.lookup.len()
    }
}

/// A 429 telling the client when to retry.
pub fn too_many_requests(retry_at: SystemTime) -> ResponseError {
    let date = format_http_date(retry_at);
    let error = ResponseError::client(
        ProblemDetail::new(StatusCode::TOO_MANY_REQUESTS)
            .with_detail(format!("Rate limit exceeded; retry after {date}")),
        "rate limit exceeded",
    );
    match HeaderValue::from_str(&date) {
        Ok(value) => error.with_header(header::RETRY_AFTER, value),
        Err(_) => error,
    }
}
