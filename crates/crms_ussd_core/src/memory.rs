//! crates/crms_ussd_core/src/memory.rs
//!
//! In-process implementations of every port. The session and counter stores
//! back the gateway's single-process `memory` mode and sweep their own expired
//! entries; the directory and records maps are for tests. State lives in this
//! process only, so none of them may be used with more than one gateway worker.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::domain::{
    CaseSummary, CounterState, MissingReport, OfficerQueryStats, Person, QueryLogEntry,
    QuickPinBinding, SessionUpdate, UssdSession, Vehicle, WantedRecord,
};
use crate::ports::{
    CounterStore, OfficerDirectory, PortError, PortResult, QueryLogSink, RecordsLookup,
    SessionStore,
};

//=========================================================================================
// Session Store
//=========================================================================================

pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, UssdSession>>,
    idle_timeout: Duration,
}

impl InMemorySessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Number of sessions physically held, expired ones included.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops every session idle past the timeout. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_idle_expired(now, self.idle_timeout));
        before - sessions.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> PortResult<Option<UssdSession>> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let session = sessions.get(session_id).cloned();
        match session {
            Some(session) if session.is_idle_expired(now, self.idle_timeout) => {
                sessions.remove(session_id);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn create(&self, session_id: &str, phone_number: &str) -> PortResult<UssdSession> {
        let now = Utc::now();
        let session = UssdSession::new(session_id, phone_number, now);
        let mut sessions = self.sessions.write().await;
        // Gateway ids are never reused; abandoned sessions are never read again.
        sessions.retain(|_, existing| !existing.is_idle_expired(now, self.idle_timeout));
        sessions.insert(session_id.to_string(), session.clone());
        Ok(session)
    }

    async fn update(&self, session_id: &str, update: SessionUpdate) -> PortResult<UssdSession> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let expired = match sessions.get(session_id) {
            Some(session) => session.is_idle_expired(now, self.idle_timeout),
            None => true,
        };
        if expired {
            sessions.remove(session_id);
            return Err(PortError::NotFound(format!("Session {} not found", session_id)));
        }
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))?;
        session.apply(update, now);
        Ok(session.clone())
    }

    async fn clear(&self, session_id: &str) -> PortResult<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}

//=========================================================================================
// Counter Store
//=========================================================================================

#[derive(Default)]
pub struct InMemoryCounterStore {
    counters: Mutex<HashMap<String, (u64, DateTime<Utc>)>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of counters physically held, lapsed ones included.
    pub async fn len(&self) -> usize {
        self.counters.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops every counter whose window has closed. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut counters = self.counters.lock().await;
        let before = counters.len();
        counters.retain(|_, (_, expires_at)| *expires_at > now);
        before - counters.len()
    }
}

fn remaining_seconds(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (expires_at - now).num_seconds().max(0) as u64
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self, key: &str) -> PortResult<Option<CounterState>> {
        let now = Utc::now();
        let counters = self.counters.lock().await;
        Ok(counters
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(count, expires_at)| CounterState {
                count: *count,
                ttl_seconds: remaining_seconds(*expires_at, now),
            }))
    }

    async fn increment(&self, key: &str, window: Duration) -> PortResult<CounterState> {
        let now = Utc::now();
        let mut counters = self.counters.lock().await;
        if !counters.contains_key(key) {
            counters.retain(|_, (_, expires_at)| *expires_at > now);
        }
        let entry = counters
            .entry(key.to_string())
            .or_insert((0, now + window));
        if entry.1 <= now {
            *entry = (0, now + window);
        }
        entry.0 += 1;
        Ok(CounterState {
            count: entry.0,
            ttl_seconds: remaining_seconds(entry.1, now),
        })
    }
}

//=========================================================================================
// Officer Directory
//=========================================================================================

#[derive(Default)]
pub struct InMemoryOfficerDirectory {
    bindings: RwLock<HashMap<String, QuickPinBinding>>,
}

impl InMemoryOfficerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a binding, replacing any earlier one for the same phone.
    pub async fn insert(&self, binding: QuickPinBinding) {
        self.bindings
            .write()
            .await
            .insert(binding.phone_number.clone(), binding);
    }
}

#[async_trait]
impl OfficerDirectory for InMemoryOfficerDirectory {
    async fn find_officer_binding(&self, phone_number: &str) -> PortResult<Option<QuickPinBinding>> {
        Ok(self.bindings.read().await.get(phone_number).cloned())
    }
}

//=========================================================================================
// Records & Query Log
//=========================================================================================

/// Records lookups plus the query log, held together so stats can be derived
/// from the logged queries the same way the database adapter does.
#[derive(Default)]
pub struct InMemoryRecords {
    persons: RwLock<HashMap<String, Person>>,
    wanted: RwLock<HashMap<Uuid, WantedRecord>>,
    missing: RwLock<HashMap<Uuid, MissingReport>>,
    cases: RwLock<HashMap<Uuid, Vec<CaseSummary>>>,
    vehicles: RwLock<HashMap<String, Vehicle>>,
    query_log: RwLock<Vec<QueryLogEntry>>,
}

impl InMemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_person(&self, person: Person) {
        self.persons
            .write()
            .await
            .insert(person.national_id.clone(), person);
    }

    pub async fn add_wanted(&self, record: WantedRecord) {
        self.wanted.write().await.insert(record.person_id, record);
    }

    pub async fn add_missing(&self, report: MissingReport) {
        self.missing.write().await.insert(report.person_id, report);
    }

    pub async fn add_case(&self, person_id: Uuid, case: CaseSummary) {
        self.cases
            .write()
            .await
            .entry(person_id)
            .or_default()
            .push(case);
    }

    pub async fn add_vehicle(&self, vehicle: Vehicle) {
        self.vehicles
            .write()
            .await
            .insert(vehicle.plate.clone(), vehicle);
    }

    /// A snapshot of every query log entry recorded so far.
    pub async fn query_log(&self) -> Vec<QueryLogEntry> {
        self.query_log.read().await.clone()
    }
}

#[async_trait]
impl RecordsLookup for InMemoryRecords {
    async fn find_person_by_identifier(&self, national_id: &str) -> PortResult<Option<Person>> {
        Ok(self.persons.read().await.get(national_id).cloned())
    }

    async fn find_wanted_status(&self, person_id: Uuid) -> PortResult<Option<WantedRecord>> {
        Ok(self.wanted.read().await.get(&person_id).cloned())
    }

    async fn find_missing_report(&self, person_id: Uuid) -> PortResult<Option<MissingReport>> {
        Ok(self.missing.read().await.get(&person_id).cloned())
    }

    async fn find_cases_for_person(&self, person_id: Uuid) -> PortResult<Vec<CaseSummary>> {
        Ok(self
            .cases
            .read()
            .await
            .get(&person_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_vehicle_by_plate(&self, plate: &str) -> PortResult<Option<Vehicle>> {
        Ok(self.vehicles.read().await.get(plate).cloned())
    }

    async fn officer_query_stats(&self, officer_id: Uuid) -> PortResult<OfficerQueryStats> {
        let now = Utc::now();
        let start_of_day = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or(now);
        let week_ago = now - Duration::days(7);

        let log = self.query_log.read().await;
        let mut stats = OfficerQueryStats::default();
        for entry in log.iter().filter(|e| e.officer_id == officer_id) {
            stats.total += 1;
            if entry.timestamp >= week_ago {
                stats.this_week += 1;
            }
            if entry.timestamp >= start_of_day {
                stats.today += 1;
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl QueryLogSink for InMemoryRecords {
    async fn record(&self, entry: QueryLogEntry) -> PortResult<()> {
        self.query_log.write().await.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MenuState;

    #[tokio::test]
    async fn idle_session_is_unreadable_and_evicted() {
        let store = InMemorySessionStore::new(Duration::milliseconds(20));
        store.create("ATUid_1", "+254700000001").await.unwrap();
        assert!(store.load("ATUid_1").await.unwrap().is_some());

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;

        assert!(store.load("ATUid_1").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn abandoned_sessions_are_reclaimed_on_create() {
        let store = InMemorySessionStore::new(Duration::milliseconds(10));
        for n in 0..100 {
            store.create(&format!("ATUid_{}", n), "+254700000001").await.unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        store.create("ATUid_fresh", "+254700000001").await.unwrap();
        assert_eq!(store.len().await, 1);
        assert!(store.load("ATUid_fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_removes_only_idle_sessions() {
        let store = InMemorySessionStore::new(Duration::milliseconds(40));
        store.create("old", "+254700000001").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        store.sessions.write().await.insert(
            "young".to_string(),
            UssdSession::new("young", "+254700000002", Utc::now()),
        );

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 1);
        assert!(store.load("young").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_merges_data_and_refreshes_activity() {
        let store = InMemorySessionStore::new(Duration::minutes(3));
        let created = store.create("s1", "+254700000001").await.unwrap();

        let updated = store
            .update(
                "s1",
                SessionUpdate::menu(MenuState::AwaitingPin).with_data("feature", "wanted"),
            )
            .await
            .unwrap();
        assert_eq!(updated.current_menu, MenuState::AwaitingPin);
        assert!(updated.last_activity >= created.last_activity);

        store.set_data("s1", "attempt", "1").await.unwrap();
        assert_eq!(
            store.get_data("s1", "feature").await.unwrap().as_deref(),
            Some("wanted")
        );
        assert_eq!(
            store.get_data("s1", "attempt").await.unwrap().as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn mutating_an_absent_session_is_not_found() {
        let store = InMemorySessionStore::new(Duration::minutes(3));
        let err = store
            .update("missing", SessionUpdate::menu(MenuState::Main))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
        assert!(matches!(
            store.set_data("missing", "k", "v").await,
            Err(PortError::NotFound(_))
        ));
        store.clear("missing").await.unwrap();
    }

    #[tokio::test]
    async fn counter_expiry_is_set_once_per_window() {
        let counters = InMemoryCounterStore::new();
        let first = counters
            .increment("ussd:o1", Duration::seconds(100))
            .await
            .unwrap();
        let second = counters
            .increment("ussd:o1", Duration::seconds(5000))
            .await
            .unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert!(second.ttl_seconds <= 100);
    }

    #[tokio::test]
    async fn expired_counter_starts_a_fresh_window() {
        let counters = InMemoryCounterStore::new();
        counters
            .increment("ussd:o1", Duration::milliseconds(10))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        assert!(counters.get("ussd:o1").await.unwrap().is_none());
        let fresh = counters
            .increment("ussd:o1", Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(fresh.count, 1);
    }

    #[tokio::test]
    async fn lapsed_counters_are_purged() {
        let counters = InMemoryCounterStore::new();
        counters
            .increment("ussd:o1", Duration::milliseconds(10))
            .await
            .unwrap();
        counters
            .increment("ussd:o2", Duration::milliseconds(10))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        counters
            .increment("ussd:o3", Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(counters.len().await, 1);
        assert_eq!(counters.purge_expired().await, 0);
    }
}
