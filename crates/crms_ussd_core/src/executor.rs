//! crates/crms_ussd_core/src/executor.rs
//!
//! Runs the lookup behind a selected feature, renders the short reply shown on
//! the handset, and appends exactly one query log entry per call.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::domain::{mask_phone, Feature, ParameterKind, QueryLogEntry};
use crate::error::UssdError;
use crate::ports::{PortError, PortResult, QueryLogSink, RecordsLookup};

/// Maximum number of case lines listed in a background reply.
const MAX_CASE_LINES: usize = 2;

/// Who is asking, and from which interaction.
#[derive(Debug, Clone)]
pub struct QueryContext<'a> {
    pub officer_id: Uuid,
    pub phone_number: &'a str,
    pub session_id: &'a str,
    /// Lookups left in the officer's window, when known.
    pub remaining_quota: Option<u32>,
}

/// The rendered result of one lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutcome {
    pub reply: String,
    pub result_summary: String,
    pub success: bool,
}

impl QueryOutcome {
    fn found(reply: String, result_summary: impl Into<String>) -> Self {
        Self {
            reply,
            result_summary: result_summary.into(),
            success: true,
        }
    }
}

#[derive(Clone)]
pub struct QueryExecutor {
    records: Arc<dyn RecordsLookup>,
    query_log: Arc<dyn QueryLogSink>,
}

impl QueryExecutor {
    pub fn new(records: Arc<dyn RecordsLookup>, query_log: Arc<dyn QueryLogSink>) -> Self {
        Self { records, query_log }
    }

    /// Executes `feature` and returns the text for the terminal reply.
    ///
    /// Lookup failures are folded into a generic reply and logged with
    /// `success = false`; nothing here is propagated to the protocol layer.
    pub async fn execute(
        &self,
        feature: Feature,
        parameter: Option<&str>,
        ctx: &QueryContext<'_>,
    ) -> QueryOutcome {
        let outcome = match self.run(feature, parameter, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let failure = UssdError::LookupFailed(e.to_string());
                error!(
                    "{} lookup for officer {} failed: {}",
                    feature, ctx.officer_id, failure
                );
                QueryOutcome {
                    reply: failure.user_message(),
                    result_summary: "ERROR".to_string(),
                    success: false,
                }
            }
        };

        info!(
            "{} lookup by officer {} from {}: {}",
            feature,
            ctx.officer_id,
            mask_phone(ctx.phone_number),
            outcome.result_summary
        );

        let entry = QueryLogEntry {
            id: Uuid::new_v4(),
            officer_id: ctx.officer_id,
            phone_number: ctx.phone_number.to_string(),
            query_type: feature,
            search_term: parameter.map(str::to_string),
            result_summary: outcome.result_summary.clone(),
            success: outcome.success,
            session_id: ctx.session_id.to_string(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.query_log.record(entry).await {
            error!("Failed to write query log entry: {:?}", e);
        }

        outcome
    }

    async fn run(
        &self,
        feature: Feature,
        parameter: Option<&str>,
        ctx: &QueryContext<'_>,
    ) -> PortResult<QueryOutcome> {
        let required = || {
            parameter.ok_or_else(|| {
                PortError::Unexpected(format!("{} lookup needs a parameter", feature))
            })
        };
        match feature {
            Feature::Wanted => self.wanted(required()?).await,
            Feature::Missing => self.missing(required()?).await,
            Feature::Background => self.background(required()?).await,
            Feature::Vehicle => self.vehicle(required()?).await,
            Feature::Stats => self.stats(ctx).await,
        }
    }

    async fn wanted(&self, national_id: &str) -> PortResult<QueryOutcome> {
        let Some(person) = self.records.find_person_by_identifier(national_id).await? else {
            return Ok(not_found(ParameterKind::NationalId, national_id));
        };
        let outcome = match self.records.find_wanted_status(person.id).await? {
            Some(wanted) => QueryOutcome::found(
                format!(
                    "WANTED: {}\nID: {}\nCharges: {}\nDanger: {}\nDo not approach alone. Request backup.",
                    person.full_name, person.national_id, wanted.charges, wanted.danger_level
                ),
                "WANTED",
            ),
            None => QueryOutcome::found(
                format!(
                    "{}\nID: {}\nStatus: NOT WANTED",
                    person.full_name, person.national_id
                ),
                "CLEAR",
            ),
        };
        Ok(outcome)
    }

    async fn missing(&self, national_id: &str) -> PortResult<QueryOutcome> {
        let Some(person) = self.records.find_person_by_identifier(national_id).await? else {
            return Ok(not_found(ParameterKind::NationalId, national_id));
        };
        let outcome = match self.records.find_missing_report(person.id).await? {
            Some(report) => QueryOutcome::found(
                format!(
                    "MISSING PERSON: {}\nID: {}\nReported: {}\nLast seen: {}\nContact: {}",
                    person.full_name,
                    person.national_id,
                    report.reported_at.format("%Y-%m-%d"),
                    report.last_seen_location.as_deref().unwrap_or("Unknown"),
                    report.contact_phone.as_deref().unwrap_or("Nearest station"),
                ),
                "MISSING",
            ),
            None => QueryOutcome::found(
                format!(
                    "{}\nID: {}\nStatus: NOT REPORTED MISSING",
                    person.full_name, person.national_id
                ),
                "NOT_MISSING",
            ),
        };
        Ok(outcome)
    }

    async fn background(&self, national_id: &str) -> PortResult<QueryOutcome> {
        let Some(person) = self.records.find_person_by_identifier(national_id).await? else {
            return Ok(not_found(ParameterKind::NationalId, national_id));
        };
        let wanted = self.records.find_wanted_status(person.id).await?;
        let missing = self.records.find_missing_report(person.id).await?;
        let cases = self.records.find_cases_for_person(person.id).await?;

        let mut reply = format!(
            "Background: {}\nID: {}\nDOB: {}\nWanted: {}\nMissing: {}\nCases: {}",
            person.full_name,
            person.national_id,
            person
                .date_of_birth
                .map(|dob| dob.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "Unknown".to_string()),
            yes_no(wanted.is_some()),
            yes_no(missing.is_some()),
            cases.len(),
        );
        for case in cases.iter().take(MAX_CASE_LINES) {
            reply.push_str(&format!(
                "\n- {} {} ({})",
                case.case_number, case.offence, case.status
            ));
        }
        Ok(QueryOutcome::found(
            reply,
            format!("RECORD({} cases)", cases.len()),
        ))
    }

    async fn vehicle(&self, plate: &str) -> PortResult<QueryOutcome> {
        let Some(vehicle) = self.records.find_vehicle_by_plate(plate).await? else {
            return Ok(not_found(ParameterKind::LicensePlate, plate));
        };
        let owner = vehicle.owner_name.as_deref().unwrap_or("Unknown");
        let outcome = if vehicle.stolen {
            QueryOutcome::found(
                format!(
                    "STOLEN VEHICLE: {}\n{} {} ({})\nOwner: {}\nDetain vehicle and notify dispatch.",
                    vehicle.plate, vehicle.make, vehicle.model, vehicle.color, owner
                ),
                "STOLEN",
            )
        } else {
            QueryOutcome::found(
                format!(
                    "Vehicle: {}\n{} {} ({})\nOwner: {}\nStatus: CLEAR",
                    vehicle.plate, vehicle.make, vehicle.model, vehicle.color, owner
                ),
                "CLEAR",
            )
        };
        Ok(outcome)
    }

    async fn stats(&self, ctx: &QueryContext<'_>) -> PortResult<QueryOutcome> {
        let stats = self.records.officer_query_stats(ctx.officer_id).await?;
        let mut reply = format!(
            "My USSD Stats\nToday: {}\nThis week: {}\nTotal: {}",
            stats.today, stats.this_week, stats.total
        );
        if let Some(remaining) = ctx.remaining_quota {
            reply.push_str(&format!("\nRemaining today: {}", remaining));
        }
        Ok(QueryOutcome::found(reply, "STATS"))
    }
}

fn not_found(kind: ParameterKind, value: &str) -> QueryOutcome {
    let label = match kind {
        ParameterKind::NationalId => "ID",
        ParameterKind::LicensePlate => "plate",
    };
    QueryOutcome::found(format!("No record found for {}: {}", label, value), "NOT_FOUND")
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CaseSummary, MissingReport, OfficerQueryStats, Person, Vehicle, WantedRecord,
    };
    use crate::memory::InMemoryRecords;
    use async_trait::async_trait;

    struct OfflineRecords;

    #[async_trait]
    impl RecordsLookup for OfflineRecords {
        async fn find_person_by_identifier(&self, _: &str) -> PortResult<Option<Person>> {
            Err(PortError::Unexpected("records database offline".to_string()))
        }
        async fn find_wanted_status(&self, _: Uuid) -> PortResult<Option<WantedRecord>> {
            Err(PortError::Unexpected("records database offline".to_string()))
        }
        async fn find_missing_report(&self, _: Uuid) -> PortResult<Option<MissingReport>> {
            Err(PortError::Unexpected("records database offline".to_string()))
        }
        async fn find_cases_for_person(&self, _: Uuid) -> PortResult<Vec<CaseSummary>> {
            Err(PortError::Unexpected("records database offline".to_string()))
        }
        async fn find_vehicle_by_plate(&self, _: &str) -> PortResult<Option<Vehicle>> {
            Err(PortError::Unexpected("records database offline".to_string()))
        }
        async fn officer_query_stats(&self, _: Uuid) -> PortResult<OfficerQueryStats> {
            Err(PortError::Unexpected("records database offline".to_string()))
        }
    }

    fn ctx(officer_id: Uuid) -> QueryContext<'static> {
        QueryContext {
            officer_id,
            phone_number: "+254711000111",
            session_id: "ATUid_exec",
            remaining_quota: Some(7),
        }
    }

    async fn seeded() -> (Arc<InMemoryRecords>, Uuid) {
        let records = Arc::new(InMemoryRecords::new());
        let person_id = Uuid::new_v4();
        records
            .add_person(Person {
                id: person_id,
                national_id: "29384756".to_string(),
                full_name: "Brian Otieno".to_string(),
                date_of_birth: None,
            })
            .await;
        records
            .add_wanted(WantedRecord {
                person_id,
                charges: "Armed robbery".to_string(),
                danger_level: "HIGH".to_string(),
                issued_at: Utc::now(),
            })
            .await;
        records
            .add_case(
                person_id,
                CaseSummary {
                    case_number: "CR-2024-0091".to_string(),
                    offence: "Robbery".to_string(),
                    status: "open".to_string(),
                },
            )
            .await;
        records
            .add_vehicle(Vehicle {
                plate: "KDA123X".to_string(),
                make: "Toyota".to_string(),
                model: "Probox".to_string(),
                color: "White".to_string(),
                owner_name: None,
                stolen: true,
            })
            .await;
        (records, person_id)
    }

    #[tokio::test]
    async fn every_outcome_writes_exactly_one_log_entry() {
        let (records, _) = seeded().await;
        let executor = QueryExecutor::new(records.clone(), records.clone());
        let officer = Uuid::new_v4();

        let found = executor
            .execute(Feature::Wanted, Some("29384756"), &ctx(officer))
            .await;
        let missing = executor
            .execute(Feature::Vehicle, Some("ABC123"), &ctx(officer))
            .await;
        let offline = QueryExecutor::new(Arc::new(OfflineRecords), records.clone())
            .execute(Feature::Background, Some("29384756"), &ctx(officer))
            .await;

        assert_eq!(found.result_summary, "WANTED");
        assert!(found.reply.starts_with("WANTED: Brian Otieno"));
        assert_eq!(missing.reply, "No record found for plate: ABC123");
        assert!(missing.success);
        assert!(!offline.success);
        assert_eq!(
            offline.reply,
            "Error performing check. Please try again later."
        );

        let log = records.query_log().await;
        assert_eq!(log.len(), 3);
        assert_eq!(log[1].result_summary, "NOT_FOUND");
        assert_eq!(log[2].result_summary, "ERROR");
        assert!(!log[2].success);
        assert!(log.iter().all(|e| e.session_id == "ATUid_exec"));
    }

    #[tokio::test]
    async fn background_lists_cases_and_flags() {
        let (records, _) = seeded().await;
        let executor = QueryExecutor::new(records.clone(), records.clone());

        let outcome = executor
            .execute(Feature::Background, Some("29384756"), &ctx(Uuid::new_v4()))
            .await;
        assert!(outcome.reply.contains("Wanted: YES"));
        assert!(outcome.reply.contains("Missing: NO"));
        assert!(outcome.reply.contains("- CR-2024-0091 Robbery (open)"));
        assert_eq!(outcome.result_summary, "RECORD(1 cases)");
    }

    #[tokio::test]
    async fn stolen_vehicle_is_flagged() {
        let (records, _) = seeded().await;
        let executor = QueryExecutor::new(records.clone(), records.clone());

        let outcome = executor
            .execute(Feature::Vehicle, Some("KDA123X"), &ctx(Uuid::new_v4()))
            .await;
        assert_eq!(outcome.result_summary, "STOLEN");
        assert!(outcome.reply.contains("Owner: Unknown"));
    }

    #[tokio::test]
    async fn stats_count_previous_queries_and_show_quota() {
        let (records, _) = seeded().await;
        let executor = QueryExecutor::new(records.clone(), records.clone());
        let officer = Uuid::new_v4();

        executor
            .execute(Feature::Missing, Some("00000000"), &ctx(officer))
            .await;
        let outcome = executor.execute(Feature::Stats, None, &ctx(officer)).await;

        assert_eq!(outcome.result_summary, "STATS");
        assert!(outcome.reply.contains("Today: 1"));
        assert!(outcome.reply.contains("Remaining today: 7"));
        assert_eq!(records.query_log().await.len(), 2);
    }

    #[tokio::test]
    async fn missing_parameter_is_logged_as_a_failure() {
        let (records, _) = seeded().await;
        let executor = QueryExecutor::new(records.clone(), records.clone());

        let outcome = executor
            .execute(Feature::Wanted, None, &ctx(Uuid::new_v4()))
            .await;
        assert!(!outcome.success);
        assert_eq!(records.query_log().await.len(), 1);
    }
}
