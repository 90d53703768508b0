// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failure containment for the persistence layer: a bounded exponential
//! backoff for SQLite writer contention, and a three-state circuit breaker
//! that fails fast when the backing store is wedged.
//!
//! The two are deliberately separate layers. The resilient adapter composes
//! them as `breaker.execute(|| with_retry(|| inner))`, so the retry never
//! sees `CircuitOpen` and the breaker counts one failure per exhausted retry
//! sequence, not per attempt.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

// -- Retry ---------------------------------------------------------------------

/// Backoff policy for transient `database is locked` errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// First-retry delay; doubles each attempt.
    pub base: Duration,
    /// Number of retries after the initial call (total calls = retries + 1).
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base: Duration::from_millis(50), max_retries: 7 }
    }
}

/// Run `f`, retrying on transient lock errors with `base · 2^(n-1)` plus up
/// to 25% uniform jitter. Any other error propagates immediately. The sleep
/// is an ordinary tokio timer, so dropping the future (request cancelled)
/// cancels the backoff too.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient_lock() && attempt < policy.max_retries => {
                attempt += 1;
                let exp = policy.base.saturating_mul(1u32 << (attempt - 1));
                let jitter = exp.mul_f64(rand::random::<f64>() * 0.25);
                tracing::debug!(attempt, delay_ms = %(exp + jitter).as_millis(), "store locked, backing off");
                tokio::time::sleep(exp + jitter).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// -- Circuit breaker -----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum Inner {
    Closed { failures: u32 },
    Open { since: Instant },
    /// A single probe call is in flight; everyone else fails fast.
    HalfOpen,
}

/// Three-state circuit breaker. CLOSED passes calls through and counts
/// consecutive failures; OPEN fails fast until the reset timeout elapses;
/// HALF_OPEN admits exactly one probe whose outcome decides the next state.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub const DEFAULT_THRESHOLD: u32 = 5;
    pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(threshold: u32, reset_timeout: Duration) -> Self {
        Self { inner: Mutex::new(Inner::Closed { failures: 0 }), threshold, reset_timeout }
    }

    pub fn state(&self) -> BreakerState {
        match *self.lock() {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { .. } => BreakerState::Open,
            Inner::HalfOpen => BreakerState::HalfOpen,
        }
    }

    /// Run `fn` under the breaker. The lock is never held across the call.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let probing = {
            let mut inner = self.lock();
            match *inner {
                Inner::Closed { .. } => false,
                Inner::Open { since } => {
                    if since.elapsed() >= self.reset_timeout {
                        // This call becomes the half-open probe.
                        *inner = Inner::HalfOpen;
                        true
                    } else {
                        return Err(Error::CircuitOpen);
                    }
                }
                Inner::HalfOpen => return Err(Error::CircuitOpen),
            }
        };

        let result = f().await;

        let mut inner = self.lock();
        match &result {
            Ok(_) => {
                *inner = Inner::Closed { failures: 0 };
            }
            Err(_) if probing => {
                *inner = Inner::Open { since: Instant::now() };
            }
            Err(_) => {
                let failures = match *inner {
                    Inner::Closed { failures } => failures + 1,
                    // Probe outcomes are handled above; any other state here
                    // means a concurrent probe resolved while we ran.
                    _ => 1,
                };
                if failures >= self.threshold {
                    tracing::warn!(failures, "circuit breaker opened");
                    *inner = Inner::Open { since: Instant::now() };
                } else {
                    *inner = Inner::Closed { failures };
                }
            }
        }
        result
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning cannot leave inconsistent state: every transition
        // writes a whole variant.
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD, Self::DEFAULT_RESET_TIMEOUT)
    }
}

#[cfg(test)]
#[path = "breaker_tests.rs"]
mod tests;
