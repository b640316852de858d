//! crates/crms_ussd_core/src/rate_limit.rs
//!
//! Bounds the number of lookups an officer can run per window, on top of an
//! expiring counter in a `CounterStore` shared by every gateway process.
//!
//! The default `CheckThenIncrement` strategy reads the counter and increments
//! it as two separate store calls. Two sessions of the same officer racing
//! between those calls can both be admitted at `limit - 1`. USSD is serial per
//! session so this needs one officer on two handsets at once; deployments that
//! cannot accept it select `IncrementThenCompare`, which increments first and
//! treats any count past the limit as the rejection.
//!
//! A failing counter store never blocks a lookup: the decision comes back
//! allowed with `degraded` set.

use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::domain::RateLimitDecision;
use crate::ports::CounterStore;

/// Operation component of the counter key.
pub const LOOKUP_OPERATION: &str = "ussd_lookup";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitStrategy {
    #[default]
    CheckThenIncrement,
    IncrementThenCompare,
}

impl RateLimitStrategy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "check_then_increment" => Some(RateLimitStrategy::CheckThenIncrement),
            "increment_then_compare" => Some(RateLimitStrategy::IncrementThenCompare),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    counters: Arc<dyn CounterStore>,
    window: Duration,
    strategy: RateLimitStrategy,
}

impl RateLimiter {
    pub fn new(counters: Arc<dyn CounterStore>, window: Duration, strategy: RateLimitStrategy) -> Self {
        Self {
            counters,
            window,
            strategy,
        }
    }

    pub fn counter_key(officer_id: Uuid) -> String {
        format!("{}:{}", LOOKUP_OPERATION, officer_id)
    }

    /// Checks the officer's quota and, when admitted, consumes one unit of it.
    pub async fn check_and_consume(&self, officer_id: Uuid, limit: u32) -> RateLimitDecision {
        let key = Self::counter_key(officer_id);
        let decision = match self.strategy {
            RateLimitStrategy::CheckThenIncrement => self.check_then_increment(&key, limit).await,
            RateLimitStrategy::IncrementThenCompare => {
                self.increment_then_compare(&key, limit).await
            }
        };
        if decision.allowed {
            debug!(
                "Officer {} admitted: {}/{} remaining",
                officer_id, decision.remaining, decision.limit
            );
        } else {
            info!(
                "Officer {} hit the lookup limit of {}",
                officer_id, decision.limit
            );
        }
        decision
    }

    async fn check_then_increment(&self, key: &str, limit: u32) -> RateLimitDecision {
        match self.counters.get(key).await {
            Ok(Some(state)) if state.count >= u64::from(limit) => {
                return rejected(limit, state.ttl_seconds);
            }
            Ok(_) => {}
            Err(e) => return fail_open(limit, &e),
        }

        match self.counters.increment(key, self.window).await {
            Ok(state) => allowed(limit, state.count),
            Err(e) => fail_open(limit, &e),
        }
    }

    async fn increment_then_compare(&self, key: &str, limit: u32) -> RateLimitDecision {
        match self.counters.increment(key, self.window).await {
            Ok(state) if state.count > u64::from(limit) => rejected(limit, state.ttl_seconds),
            Ok(state) => allowed(limit, state.count),
            Err(e) => fail_open(limit, &e),
        }
    }
}

fn allowed(limit: u32, count: u64) -> RateLimitDecision {
    let used = count.min(u64::from(limit)) as u32;
    RateLimitDecision {
        allowed: true,
        limit,
        remaining: limit - used,
        retry_after_seconds: None,
        degraded: false,
    }
}

fn rejected(limit: u32, ttl_seconds: u64) -> RateLimitDecision {
    RateLimitDecision {
        allowed: false,
        limit,
        remaining: 0,
        retry_after_seconds: Some(ttl_seconds.max(1)),
        degraded: false,
    }
}

fn fail_open(limit: u32, cause: &dyn std::error::Error) -> RateLimitDecision {
    error!("Rate limit counter store failed, allowing request: {}", cause);
    RateLimitDecision {
        allowed: true,
        limit,
        remaining: limit,
        retry_after_seconds: None,
        degraded: true,
    }
}
