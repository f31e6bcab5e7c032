//! Time-windowed cache around a single remote status call.
//!
//! A [`CachedEndpoint`] only re-invokes its [`Endpoint`] once the refresh
//! interval has elapsed since the last *successful* fetch. A failed fetch
//! records the error but never discards the last good value and never moves
//! the refresh clock forward, so the endpoint is retried on the next call.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::normalize::NormalizeError;

// ---------------------------------------------------------------------------
// Fetch errors
// ---------------------------------------------------------------------------

/// Why a single remote call failed. Always recoverable: the caller keeps its
/// cached value and tries again on a later poll.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection refused, DNS failure, timeout, ...
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The device answered with a non-2xx status code.
    #[error("device returned HTTP {0}")]
    HttpStatus(u16),

    /// The body was not valid JSON.
    #[error("invalid JSON body: {0}")]
    Decode(String),

    /// The body was JSON but a field had the wrong shape.
    #[error("malformed payload: {0}")]
    Payload(#[from] NormalizeError),
}

// ---------------------------------------------------------------------------
// Seams: endpoint + clock
// ---------------------------------------------------------------------------

/// One remote round trip producing a typed value.
pub trait Endpoint: Send + Sync {
    type Output: Send + Sync;

    /// Short human-readable label used in logs and error messages.
    fn describe(&self) -> String;

    fn fetch(&self) -> impl Future<Output = Result<Self::Output, FetchError>> + Send;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by the monotonic system timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub type SharedClock = Arc<dyn Clock>;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// A failed endpoint is retried on every call until it succeeds.
    #[default]
    EveryCycle,
    /// A failed attempt also opens a retry window of one interval, so an
    /// unreachable device is contacted at most once per interval.
    Throttled,
}

impl FromStr for RetryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "every-cycle" | "every_cycle" => Ok(Self::EveryCycle),
            "throttled" => Ok(Self::Throttled),
            other => Err(format!(
                "unknown retry policy '{other}' (expected every-cycle or throttled)"
            )),
        }
    }
}

impl fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EveryCycle => write!(f, "every-cycle"),
            Self::Throttled => write!(f, "throttled"),
        }
    }
}

// ---------------------------------------------------------------------------
// Cache entry
// ---------------------------------------------------------------------------

/// Latest known value of one endpoint plus the outcome of the last attempt.
#[derive(Debug)]
pub struct CachedValue<T> {
    pub value: Option<T>,
    pub last_fetch: Option<Instant>,
    pub has_error: bool,
    pub last_error: Option<String>,
}

impl<T> Default for CachedValue<T> {
    fn default() -> Self {
        Self {
            value: None,
            last_fetch: None,
            has_error: false,
            last_error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// CachedEndpoint
// ---------------------------------------------------------------------------

pub struct CachedEndpoint<E: Endpoint> {
    endpoint: E,
    interval: Duration,
    policy: RetryPolicy,
    clock: SharedClock,
    cache: CachedValue<E::Output>,
    /// Time of the last failed attempt; only consulted under `Throttled`.
    failed_at: Option<Instant>,
    /// Set by [`CachedEndpoint::invalidate`]; cleared by the next success.
    invalidated: bool,
}

impl<E: Endpoint> CachedEndpoint<E> {
    pub fn new(endpoint: E, interval: Duration, policy: RetryPolicy, clock: SharedClock) -> Self {
        Self {
            endpoint,
            interval,
            policy,
            clock,
            cache: CachedValue::default(),
            failed_at: None,
            invalidated: false,
        }
    }

    /// Return the cached value, refreshing it first if the interval has
    /// elapsed. At most one remote call is made.
    pub async fn get(&mut self) -> Option<&E::Output> {
        if self.is_due() {
            self.refresh().await;
        }
        self.cache.value.as_ref()
    }

    /// The cached value without touching the network.
    pub fn peek(&self) -> Option<&E::Output> {
        self.cache.value.as_ref()
    }

    /// Force the next `get()` to fetch regardless of the interval. The cached
    /// value stays readable until then.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    pub fn has_error(&self) -> bool {
        self.cache.has_error
    }

    pub fn last_error(&self) -> Option<&str> {
        self.cache.last_error.as_deref()
    }

    fn is_due(&self) -> bool {
        if self.interval.is_zero() || self.invalidated {
            return true;
        }
        let now = self.clock.now();
        let elapsed = |since: Instant| now.saturating_duration_since(since) > self.interval;

        let stale = self.cache.last_fetch.map_or(true, elapsed);
        match (self.policy, self.failed_at) {
            (RetryPolicy::Throttled, Some(failed_at)) => stale && elapsed(failed_at),
            _ => stale,
        }
    }

    async fn refresh(&mut self) {
        match self.endpoint.fetch().await {
            Ok(value) => {
                self.cache.value = Some(value);
                self.cache.last_fetch = Some(self.clock.now());
                self.cache.has_error = false;
                self.cache.last_error = None;
                self.failed_at = None;
                self.invalidated = false;
            }
            Err(e) => {
                debug!(endpoint = %self.endpoint.describe(), error = %e, "fetch failed");
                self.cache.has_error = true;
                self.cache.last_error = Some(format!("{}: {e}", self.endpoint.describe()));
                if self.policy == RetryPolicy::Throttled {
                    self.failed_at = Some(self.clock.now());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================
