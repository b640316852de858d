//! services/ussd_gateway/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of
//! every port the USSD engine consumes. It handles all interactions with the
//! PostgreSQL database using `sqlx`, which makes session and counter state
//! visible to every gateway process sharing the database.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use crms_ussd_core::domain::{
    CaseSummary, CounterState, MenuState, MissingReport, OfficerQueryStats, Person, QueryLogEntry,
    QuickPinBinding, SessionUpdate, UssdSession, Vehicle, WantedRecord,
};
use crms_ussd_core::ports::{
    CounterStore, OfficerDirectory, PortError, PortResult, QueryLogSink, RecordsLookup,
    SessionStore,
};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements all of the engine's ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
    session_idle_timeout: Duration,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool, session_idle_timeout: Duration) -> Self {
        Self {
            pool,
            session_idle_timeout,
        }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Deletes idle sessions and lapsed counters. Returns the number of rows removed.
    pub async fn purge_expired(&self) -> PortResult<u64> {
        let sessions = sqlx::query(
            "DELETE FROM ussd_sessions WHERE last_activity < now() - ($1::float8 * interval '1 second')",
        )
        .bind(self.idle_secs())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        let counters = sqlx::query("DELETE FROM rate_limit_counters WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        Ok(sessions.rows_affected() + counters.rows_affected())
    }

    fn idle_secs(&self) -> f64 {
        seconds(self.session_idle_timeout)
    }
}

fn seconds(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct SessionRecord {
    session_id: String,
    phone_number: String,
    officer_id: Option<Uuid>,
    current_menu: String,
    data: Json<HashMap<String, String>>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}
impl SessionRecord {
    fn to_domain(self) -> UssdSession {
        UssdSession {
            session_id: self.session_id,
            phone_number: self.phone_number,
            officer_id: self.officer_id,
            current_menu: MenuState::parse(&self.current_menu).unwrap_or(MenuState::Main),
            data: self.data.0,
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }
}

const SESSION_COLUMNS: &str =
    "session_id, phone_number, officer_id, current_menu, data, created_at, last_activity";

#[derive(FromRow)]
struct CounterRecord {
    count: i64,
    ttl_seconds: i64,
}
impl CounterRecord {
    fn to_domain(self) -> CounterState {
        CounterState {
            count: self.count.max(0) as u64,
            ttl_seconds: self.ttl_seconds.max(0) as u64,
        }
    }
}

#[derive(FromRow)]
struct BindingRecord {
    phone_number: String,
    officer_id: Uuid,
    officer_name: String,
    badge_number: String,
    pin_hash: String,
    enabled: bool,
    daily_limit: i32,
}
impl BindingRecord {
    fn to_domain(self) -> QuickPinBinding {
        QuickPinBinding {
            phone_number: self.phone_number,
            officer_id: self.officer_id,
            officer_name: self.officer_name,
            badge_number: self.badge_number,
            pin_hash: self.pin_hash,
            enabled: self.enabled,
            daily_limit: self.daily_limit,
        }
    }
}

#[derive(FromRow)]
struct PersonRecord {
    id: Uuid,
    national_id: String,
    full_name: String,
    date_of_birth: Option<NaiveDate>,
}
impl PersonRecord {
    fn to_domain(self) -> Person {
        Person {
            id: self.id,
            national_id: self.national_id,
            full_name: self.full_name,
            date_of_birth: self.date_of_birth,
        }
    }
}

#[derive(FromRow)]
struct WantedRecordRow {
    person_id: Uuid,
    charges: String,
    danger_level: String,
    issued_at: DateTime<Utc>,
}
impl WantedRecordRow {
    fn to_domain(self) -> WantedRecord {
        WantedRecord {
            person_id: self.person_id,
            charges: self.charges,
            danger_level: self.danger_level,
            issued_at: self.issued_at,
        }
    }
}

#[derive(FromRow)]
struct MissingRecord {
    person_id: Uuid,
    reported_at: DateTime<Utc>,
    last_seen_location: Option<String>,
    contact_phone: Option<String>,
}
impl MissingRecord {
    fn to_domain(self) -> MissingReport {
        MissingReport {
            person_id: self.person_id,
            reported_at: self.reported_at,
            last_seen_location: self.last_seen_location,
            contact_phone: self.contact_phone,
        }
    }
}

#[derive(FromRow)]
struct CaseRecord {
    case_number: String,
    offence: String,
    status: String,
}
impl CaseRecord {
    fn to_domain(self) -> CaseSummary {
        CaseSummary {
            case_number: self.case_number,
            offence: self.offence,
            status: self.status,
        }
    }
}

#[derive(FromRow)]
struct VehicleRecord {
    plate: String,
    make: String,
    model: String,
    color: String,
    owner_name: Option<String>,
    stolen: bool,
}
impl VehicleRecord {
    fn to_domain(self) -> Vehicle {
        Vehicle {
            plate: self.plate,
            make: self.make,
            model: self.model,
            color: self.color,
            owner_name: self.owner_name,
            stolen: self.stolen,
        }
    }
}

#[derive(FromRow)]
struct StatsRecord {
    today: i64,
    this_week: i64,
    total: i64,
}

//=========================================================================================
// `SessionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl SessionStore for DbAdapter {
    async fn load(&self, session_id: &str) -> PortResult<Option<UssdSession>> {
        // Evict first so an idle row is never handed back.
        sqlx::query(
            "DELETE FROM ussd_sessions WHERE session_id = $1 AND last_activity < now() - ($2::float8 * interval '1 second')",
        )
        .bind(session_id)
        .bind(self.idle_secs())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM ussd_sessions WHERE session_id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(SessionRecord::to_domain))
    }

    async fn create(&self, session_id: &str, phone_number: &str) -> PortResult<UssdSession> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "INSERT INTO ussd_sessions (session_id, phone_number) VALUES ($1, $2) \
             ON CONFLICT (session_id) DO UPDATE SET phone_number = EXCLUDED.phone_number, \
             officer_id = NULL, current_menu = 'main', data = '{{}}'::jsonb, \
             created_at = now(), last_activity = now() \
             RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .bind(phone_number)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn update(&self, session_id: &str, update: SessionUpdate) -> PortResult<UssdSession> {
        // The merge and the idle check happen in one statement, so a session
        // that expired between load and update is never revived.
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "UPDATE ussd_sessions SET officer_id = COALESCE($2, officer_id), \
             current_menu = COALESCE($3, current_menu), data = data || $4, last_activity = now() \
             WHERE session_id = $1 AND last_activity >= now() - ($5::float8 * interval '1 second') \
             RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .bind(update.officer_id)
        .bind(update.current_menu.map(|menu| menu.as_str()))
        .bind(Json(update.data))
        .bind(self.idle_secs())
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        match record {
            Some(record) => Ok(record.to_domain()),
            None => {
                self.clear(session_id).await?;
                Err(PortError::NotFound(format!("Session {} not found", session_id)))
            }
        }
    }

    async fn clear(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM ussd_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}

//=========================================================================================
// `CounterStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl CounterStore for DbAdapter {
    async fn get(&self, key: &str) -> PortResult<Option<CounterState>> {
        let record = sqlx::query_as::<_, CounterRecord>(
            "SELECT count, CEIL(EXTRACT(EPOCH FROM (expires_at - now())))::BIGINT AS ttl_seconds \
             FROM rate_limit_counters WHERE counter_key = $1 AND expires_at > now()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(CounterRecord::to_domain))
    }

    async fn increment(&self, key: &str, window: Duration) -> PortResult<CounterState> {
        // A single upsert: the expiry is only written when the window (re)starts.
        let record = sqlx::query_as::<_, CounterRecord>(
            "INSERT INTO rate_limit_counters AS c (counter_key, count, expires_at) \
             VALUES ($1, 1, now() + ($2::float8 * interval '1 second')) \
             ON CONFLICT (counter_key) DO UPDATE SET \
               count = CASE WHEN c.expires_at <= now() THEN 1 ELSE c.count + 1 END, \
               expires_at = CASE WHEN c.expires_at <= now() THEN EXCLUDED.expires_at ELSE c.expires_at END \
             RETURNING count, CEIL(EXTRACT(EPOCH FROM (expires_at - now())))::BIGINT AS ttl_seconds",
        )
        .bind(key)
        .bind(seconds(window))
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }
}

//=========================================================================================
// `OfficerDirectory` Trait Implementation
//=========================================================================================

#[async_trait]
impl OfficerDirectory for DbAdapter {
    async fn find_officer_binding(&self, phone_number: &str) -> PortResult<Option<QuickPinBinding>> {
        let record = sqlx::query_as::<_, BindingRecord>(
            "SELECT phone_number, officer_id, officer_name, badge_number, pin_hash, enabled, daily_limit \
             FROM quick_pin_bindings WHERE phone_number = $1",
        )
        .bind(phone_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(BindingRecord::to_domain))
    }
}

//=========================================================================================
// `RecordsLookup` Trait Implementation
//=========================================================================================

#[async_trait]
impl RecordsLookup for DbAdapter {
    async fn find_person_by_identifier(&self, national_id: &str) -> PortResult<Option<Person>> {
        let record = sqlx::query_as::<_, PersonRecord>(
            "SELECT id, national_id, full_name, date_of_birth FROM persons WHERE national_id = $1",
        )
        .bind(national_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(PersonRecord::to_domain))
    }

    async fn find_wanted_status(&self, person_id: Uuid) -> PortResult<Option<WantedRecord>> {
        let record = sqlx::query_as::<_, WantedRecordRow>(
            "SELECT person_id, charges, danger_level, issued_at FROM wanted_persons \
             WHERE person_id = $1 AND status = 'active' ORDER BY issued_at DESC LIMIT 1",
        )
        .bind(person_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(WantedRecordRow::to_domain))
    }

    async fn find_missing_report(&self, person_id: Uuid) -> PortResult<Option<MissingReport>> {
        let record = sqlx::query_as::<_, MissingRecord>(
            "SELECT person_id, reported_at, last_seen_location, contact_phone FROM missing_persons \
             WHERE person_id = $1 AND status = 'open' ORDER BY reported_at DESC LIMIT 1",
        )
        .bind(person_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(MissingRecord::to_domain))
    }

    async fn find_cases_for_person(&self, person_id: Uuid) -> PortResult<Vec<CaseSummary>> {
        let records = sqlx::query_as::<_, CaseRecord>(
            "SELECT case_number, offence, status FROM cases WHERE person_id = $1 ORDER BY created_at DESC",
        )
        .bind(person_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let cases = records.into_iter().map(|r| r.to_domain()).collect();
        Ok(cases)
    }

    async fn find_vehicle_by_plate(&self, plate: &str) -> PortResult<Option<Vehicle>> {
        let record = sqlx::query_as::<_, VehicleRecord>(
            "SELECT plate, make, model, color, owner_name, stolen FROM vehicles WHERE plate = $1",
        )
        .bind(plate)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(VehicleRecord::to_domain))
    }

    async fn officer_query_stats(&self, officer_id: Uuid) -> PortResult<OfficerQueryStats> {
        let record = sqlx::query_as::<_, StatsRecord>(
            "SELECT \
               COUNT(*) FILTER (WHERE created_at >= date_trunc('day', now())) AS today, \
               COUNT(*) FILTER (WHERE created_at >= now() - interval '7 days') AS this_week, \
               COUNT(*) AS total \
             FROM ussd_query_logs WHERE officer_id = $1",
        )
        .bind(officer_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(OfficerQueryStats {
            today: record.today.max(0) as u64,
            this_week: record.this_week.max(0) as u64,
            total: record.total.max(0) as u64,
        })
    }
}

//=========================================================================================
// `QueryLogSink` Trait Implementation
//=========================================================================================

#[async_trait]
impl QueryLogSink for DbAdapter {
    async fn record(&self, entry: QueryLogEntry) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO ussd_query_logs \
             (id, officer_id, phone_number, query_type, search_term, result_summary, success, session_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(entry.id)
        .bind(entry.officer_id)
        .bind(&entry.phone_number)
        .bind(entry.query_type.as_str())
        .bind(entry.search_term.as_deref())
        .bind(&entry.result_summary)
        .bind(entry.success)
        .bind(&entry.session_id)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}
