//! crates/crms_ussd_core/src/ports.rs
//!
//! Defines the service contracts (traits) the USSD engine consumes.
//! These traits form the boundary of the hexagonal architecture, so the engine
//! stays independent of the concrete session store, counter store and records
//! databases a deployment wires in.

use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use crate::domain::{
    CaseSummary, CounterState, MissingReport, OfficerQueryStats, Person, QueryLogEntry,
    QuickPinBinding, SessionUpdate, UssdSession, Vehicle, WantedRecord,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Keyed, idle-expiring storage for interaction sessions.
///
/// Implementations must be safe for concurrent access to different keys, and
/// must be shared by every gateway-facing process of a deployment. A session
/// whose `last_activity` is older than the store's idle timeout is treated as
/// absent by every operation and evicted when encountered.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns `None` if the session was never created or has idled out.
    async fn load(&self, session_id: &str) -> PortResult<Option<UssdSession>>;

    /// Creates (or replaces) the session in the `main` menu with empty data.
    async fn create(&self, session_id: &str, phone_number: &str) -> PortResult<UssdSession>;

    /// Merges `update` and refreshes `last_activity`. `NotFound` if absent.
    async fn update(&self, session_id: &str, update: SessionUpdate) -> PortResult<UssdSession>;

    /// Deletes unconditionally; clearing an absent session is not an error.
    async fn clear(&self, session_id: &str) -> PortResult<()>;

    async fn set_data(&self, session_id: &str, key: &str, value: &str) -> PortResult<()> {
        self.update(session_id, SessionUpdate::default().with_data(key, value))
            .await
            .map(|_| ())
    }

    async fn get_data(&self, session_id: &str, key: &str) -> PortResult<Option<String>> {
        let session = self
            .load(session_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))?;
        Ok(session.data.get(key).cloned())
    }
}

/// An atomic counter store with per-key expiry.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current state of a live counter; `None` when absent or expired.
    async fn get(&self, key: &str) -> PortResult<Option<CounterState>>;

    /// Atomically increments the counter. The expiry is set to `window` only
    /// when the counter goes from absent (or expired) to 1.
    async fn increment(&self, key: &str, window: Duration) -> PortResult<CounterState>;
}

#[async_trait]
pub trait OfficerDirectory: Send + Sync {
    /// Finds the active Quick-PIN binding for a phone number.
    async fn find_officer_binding(&self, phone_number: &str) -> PortResult<Option<QuickPinBinding>>;
}

/// Domain lookups owned by the records-management system.
/// Absent records are `Ok(None)`; `Err` always means an infrastructure fault.
#[async_trait]
pub trait RecordsLookup: Send + Sync {
    async fn find_person_by_identifier(&self, national_id: &str) -> PortResult<Option<Person>>;

    async fn find_wanted_status(&self, person_id: Uuid) -> PortResult<Option<WantedRecord>>;

    async fn find_missing_report(&self, person_id: Uuid) -> PortResult<Option<MissingReport>>;

    async fn find_cases_for_person(&self, person_id: Uuid) -> PortResult<Vec<CaseSummary>>;

    async fn find_vehicle_by_plate(&self, plate: &str) -> PortResult<Option<Vehicle>>;

    async fn officer_query_stats(&self, officer_id: Uuid) -> PortResult<OfficerQueryStats>;
}

#[async_trait]
pub trait QueryLogSink: Send + Sync {
    /// Appends one query log entry.
    async fn record(&self, entry: QueryLogEntry) -> PortResult<()>;
}
