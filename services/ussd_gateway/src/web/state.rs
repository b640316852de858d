//! services/ussd_gateway/src/web/state.rs
//!
//! Defines the application's shared state and how it is assembled from the
//! configured storage backend.

use crate::adapters::DbAdapter;
use crate::config::Config;
use crate::error::GatewayError;
use crms_ussd_core::memory::{InMemoryCounterStore, InMemorySessionStore};
use crms_ussd_core::ports::{
    CounterStore, OfficerDirectory, QueryLogSink, RecordsLookup, SessionStore,
};
use crms_ussd_core::{QueryExecutor, QuickPinAuthenticator, RateLimiter, UssdEngine};
use std::sync::Arc;

//=========================================================================================
// Backends (one implementation per port)
//=========================================================================================

/// The port implementations the engine is wired with.
#[derive(Clone)]
pub struct Backends {
    pub sessions: Arc<dyn SessionStore>,
    pub counters: Arc<dyn CounterStore>,
    pub directory: Arc<dyn OfficerDirectory>,
    pub records: Arc<dyn RecordsLookup>,
    pub query_log: Arc<dyn QueryLogSink>,
}

impl Backends {
    /// Every port backed by the shared PostgreSQL database.
    pub fn postgres(db: Arc<DbAdapter>) -> Self {
        Self {
            sessions: db.clone(),
            counters: db.clone(),
            directory: db.clone(),
            records: db.clone(),
            query_log: db,
        }
    }

    /// Sessions and counters in this process; bindings, records and the query
    /// log still on PostgreSQL. Only valid for a single worker.
    pub fn with_memory_sessions(db: Arc<DbAdapter>, memory: &MemoryStores) -> Self {
        Self {
            sessions: memory.sessions.clone(),
            counters: memory.counters.clone(),
            ..Self::postgres(db)
        }
    }
}

/// The in-process session and counter stores of the `memory` backend, kept
/// concretely typed so they can be swept.
#[derive(Clone)]
pub struct MemoryStores {
    pub sessions: Arc<InMemorySessionStore>,
    pub counters: Arc<InMemoryCounterStore>,
}

impl MemoryStores {
    pub fn new(config: &Config) -> Result<Self, GatewayError> {
        Ok(Self {
            sessions: Arc::new(InMemorySessionStore::new(to_chrono(
                config.session_idle_timeout,
            )?)),
            counters: Arc::new(InMemoryCounterStore::new()),
        })
    }

    /// Drops idle sessions and lapsed counters. Returns how many entries went.
    pub async fn purge_expired(&self) -> usize {
        self.sessions.purge_expired().await + self.counters.purge_expired().await
    }
}

pub fn to_chrono(duration: std::time::Duration) -> Result<chrono::Duration, GatewayError> {
    chrono::Duration::from_std(duration)
        .map_err(|e| GatewayError::Duration(e.to_string()))
}

//=========================================================================================
// AppState (Shared Across All Callbacks)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: UssdEngine,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires the USSD engine on top of `backends` using the configured policies.
    pub fn new(config: Arc<Config>, backends: Backends) -> Result<Self, GatewayError> {
        let rate_limiter = RateLimiter::new(
            backends.counters,
            to_chrono(config.rate_window)?,
            config.rate_limit_strategy,
        );
        let authenticator =
            QuickPinAuthenticator::new(backends.directory, config.default_daily_limit);
        let executor = QueryExecutor::new(backends.records, backends.query_log);
        let engine = UssdEngine::new(backends.sessions, authenticator, rate_limiter, executor);

        Ok(Self { engine, config })
    }
}
