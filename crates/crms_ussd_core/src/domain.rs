//! crates/crms_ussd_core/src/domain.rs
//!
//! Defines the pure, core data structures for the USSD engine.
//! These structs are independent of any database or wire format.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

//=========================================================================================
// Interaction Session
//=========================================================================================

/// Where an interaction currently sits in the menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuState {
    Main,
    AwaitingPin,
    AwaitingParameter,
}

impl MenuState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MenuState::Main => "main",
            MenuState::AwaitingPin => "awaiting_pin",
            MenuState::AwaitingParameter => "awaiting_parameter",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "main" => Some(MenuState::Main),
            "awaiting_pin" => Some(MenuState::AwaitingPin),
            "awaiting_parameter" => Some(MenuState::AwaitingParameter),
            _ => None,
        }
    }
}

/// Ephemeral per-interaction state, keyed by the gateway-assigned session id.
#[derive(Debug, Clone)]
pub struct UssdSession {
    pub session_id: String,
    pub phone_number: String,
    pub officer_id: Option<Uuid>,
    pub current_menu: MenuState,
    pub data: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl UssdSession {
    pub fn new(session_id: &str, phone_number: &str, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            phone_number: phone_number.to_string(),
            officer_id: None,
            current_menu: MenuState::Main,
            data: HashMap::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// A session idle for longer than `idle_timeout` is logically absent.
    pub fn is_idle_expired(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        now - self.last_activity > idle_timeout
    }

    /// Merges `update` into this session and refreshes `last_activity`.
    pub fn apply(&mut self, update: SessionUpdate, now: DateTime<Utc>) {
        if let Some(officer_id) = update.officer_id {
            self.officer_id = Some(officer_id);
        }
        if let Some(menu) = update.current_menu {
            self.current_menu = menu;
        }
        self.data.extend(update.data);
        self.last_activity = now;
    }
}

/// A partial update merged into an existing session.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub officer_id: Option<Uuid>,
    pub current_menu: Option<MenuState>,
    pub data: HashMap<String, String>,
}

impl SessionUpdate {
    pub fn menu(menu: MenuState) -> Self {
        Self {
            current_menu: Some(menu),
            ..Default::default()
        }
    }

    pub fn with_officer(mut self, officer_id: Uuid) -> Self {
        self.officer_id = Some(officer_id);
        self
    }

    pub fn with_data(mut self, key: &str, value: &str) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }
}

//=========================================================================================
// Features
//=========================================================================================

/// The lookups a field officer can pick from the entry menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Wanted,
    Missing,
    Background,
    Vehicle,
    Stats,
}

/// The extra input a feature needs before it can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    NationalId,
    LicensePlate,
}

impl Feature {
    pub const ALL: [Feature; 5] = [
        Feature::Wanted,
        Feature::Missing,
        Feature::Background,
        Feature::Vehicle,
        Feature::Stats,
    ];

    /// Maps the keypad code entered at the entry menu to a feature.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(Feature::Wanted),
            "2" => Some(Feature::Missing),
            "3" => Some(Feature::Background),
            "4" => Some(Feature::Vehicle),
            "5" => Some(Feature::Stats),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Feature::Wanted => 1,
            Feature::Missing => 2,
            Feature::Background => 3,
            Feature::Vehicle => 4,
            Feature::Stats => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Wanted => "wanted",
            Feature::Missing => "missing",
            Feature::Background => "background",
            Feature::Vehicle => "vehicle",
            Feature::Stats => "stats",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Feature::ALL.into_iter().find(|f| f.as_str() == value)
    }

    pub fn menu_label(&self) -> &'static str {
        match self {
            Feature::Wanted => "Wanted Check",
            Feature::Missing => "Missing Person Check",
            Feature::Background => "Background Check",
            Feature::Vehicle => "Vehicle Check",
            Feature::Stats => "My Stats",
        }
    }

    /// `None` means the feature runs as soon as the officer is authenticated.
    pub fn parameter(&self) -> Option<ParameterKind> {
        match self {
            Feature::Wanted | Feature::Missing | Feature::Background => {
                Some(ParameterKind::NationalId)
            }
            Feature::Vehicle => Some(ParameterKind::LicensePlate),
            Feature::Stats => None,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ParameterKind {
    pub fn prompt(&self) -> &'static str {
        match self {
            ParameterKind::NationalId => "Enter National ID:",
            ParameterKind::LicensePlate => "Enter License Plate:",
        }
    }

    /// Cleans up a raw keypad entry. Returns `None` when nothing usable is left.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let value = match self {
            ParameterKind::NationalId => raw.trim().to_string(),
            ParameterKind::LicensePlate => raw
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_uppercase(),
        };
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

//=========================================================================================
// Officers & Quick-PIN
//=========================================================================================

/// A phone-number-to-officer binding issued out of band.
#[derive(Debug, Clone)]
pub struct QuickPinBinding {
    pub phone_number: String,
    pub officer_id: Uuid,
    pub officer_name: String,
    pub badge_number: String,
    pub pin_hash: String,
    pub enabled: bool,
    pub daily_limit: i32,
}

/// The identity handed back after a successful Quick-PIN check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedOfficer {
    pub officer_id: Uuid,
    pub officer_name: String,
    pub badge_number: String,
    pub daily_limit: u32,
}

//=========================================================================================
// Rate Limiting
//=========================================================================================

/// The state of an expiring counter as reported by a `CounterStore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterState {
    pub count: u64,
    /// Seconds until the counter's window closes.
    pub ttl_seconds: u64,
}

/// The outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after_seconds: Option<u64>,
    /// Set when the counter store failed and the request was let through unchecked.
    pub degraded: bool,
}

//=========================================================================================
// Records consulted by lookups
//=========================================================================================

#[derive(Debug, Clone)]
pub struct Person {
    pub id: Uuid,
    pub national_id: String,
    pub full_name: String,
    pub date_of_birth: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct WantedRecord {
    pub person_id: Uuid,
    pub charges: String,
    pub danger_level: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MissingReport {
    pub person_id: Uuid,
    pub reported_at: DateTime<Utc>,
    pub last_seen_location: Option<String>,
    pub contact_phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CaseSummary {
    pub case_number: String,
    pub offence: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct Vehicle {
    pub plate: String,
    pub make: String,
    pub model: String,
    pub color: String,
    pub owner_name: Option<String>,
    pub stolen: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OfficerQueryStats {
    pub today: u64,
    pub this_week: u64,
    pub total: u64,
}

//=========================================================================================
// Query Log
//=========================================================================================

/// One append-only audit record per lookup attempt.
#[derive(Debug, Clone)]
pub struct QueryLogEntry {
    pub id: Uuid,
    pub officer_id: Uuid,
    pub phone_number: String,
    pub query_type: Feature,
    pub search_term: Option<String>,
    pub result_summary: String,
    pub success: bool,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Renders a phone number for logs, keeping only the last four digits.
pub fn mask_phone(phone_number: &str) -> String {
    let chars: Vec<char> = phone_number.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}
