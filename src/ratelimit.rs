//! Per-endpoint, per-client rate limiting
//!
//! A coarse token-counting limiter keyed by `(endpoint, client IP)`. Each
//! limited endpoint owns a fixed counting window; the window is replaced
//! lazily on the first hit after its deadline passes, so no background
//! sweeper is needed. Counters live in memory and are process-local.
//!
//! The limiter deliberately soft-pedals the first trips past the limit: a
//! client that redeems an interactive human-verification challenge gets its
//! counter [`reset`](RateLimiter::reset) and continues inside the same
//! window. Only sustained over-limit traffic pays the configured delay
//! penalty, and the penalty is slept off *after* the state lock is released
//! so one abusive client cannot stall other admissions.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::policy::{GatewayPolicy, RateLimitSpec};

/// Over-limit requests that stay penalty-free, leaving the client room to
/// present a human-verification proof and reset before delays kick in
const PENALTY_GRACE: u32 = 2;

/// Per-endpoint counting window
struct Window {
    /// Instant at which this window expires
    period_end: Instant,
    /// Request counts per client IP within the window
    hits: HashMap<String, u32>,
}

/// In-memory rate limiter over the policy's method-level limits
pub struct RateLimiter {
    limits: HashMap<String, RateLimitSpec>,
    progress: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    /// Builds a limiter from the method-level rate limits declared in the
    /// policy; endpoints without a declared limit are never throttled
    pub fn new(policy: &GatewayPolicy) -> Self {
        let limits = policy.rate_limits();
        for (endpoint, limit) in &limits {
            info!(endpoint, ?limit, "add rate limit config");
        }
        Self::with_limits(limits)
    }

    /// Builds a limiter directly from a limit table
    pub fn with_limits(limits: HashMap<String, RateLimitSpec>) -> Self {
        Self {
            limits,
            progress: Mutex::new(HashMap::new()),
        }
    }

    /// Counts one request from `client_ip` against `endpoint` and reports
    /// whether it is admitted
    ///
    /// Endpoints without a configured limit are always admitted. Once a
    /// client runs `PENALTY_GRACE` requests past the limit inside one
    /// window, each further call sleeps the configured delay before
    /// returning.
    pub async fn check(&self, client_ip: &str, endpoint: &str) -> bool {
        let Some(limit) = self.limits.get(endpoint) else {
            return true;
        };

        debug!(endpoint, client_ip, "checking rate limit");

        let penalty = {
            let mut progress = self.progress.lock().await;
            let now = Instant::now();

            let window = progress
                .entry(endpoint.to_string())
                .and_modify(|window| {
                    if now >= window.period_end {
                        debug!(endpoint, "rate limit window expired, opening a fresh one");
                        window.period_end = now + limit.period;
                        window.hits.clear();
                    }
                })
                .or_insert_with(|| Window {
                    period_end: now + limit.period,
                    hits: HashMap::new(),
                });

            let hits = window.hits.entry(client_ip.to_string()).or_insert(0);
            *hits += 1;

            if *hits <= limit.count {
                return true;
            }

            warn!(endpoint, client_ip, hits = *hits, "rate limit reached");

            (!limit.delay.is_zero() && *hits > limit.count + PENALTY_GRACE)
                .then_some(limit.delay)
        };

        if let Some(delay) = penalty {
            // The lock is already released here; only the abusive caller waits.
            tokio::time::sleep(delay).await;
        }

        false
    }

    /// Forgets `client_ip`'s counter for `endpoint` in the current window
    ///
    /// This refunds the request that tripped the limit after a successful
    /// human-verification challenge. The window deadline is left untouched:
    /// the client gets a single refund within the remaining window, not a
    /// fresh window.
    pub async fn reset(&self, client_ip: &str, endpoint: &str) {
        let mut progress = self.progress.lock().await;
        if let Some(window) = progress.get_mut(endpoint) {
            debug!(endpoint, client_ip, "resetting rate limit counter");
            window.hits.remove(client_ip);
        }
    }
}
