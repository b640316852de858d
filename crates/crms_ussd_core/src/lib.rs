pub mod auth;
pub mod domain;
pub mod error;
pub mod executor;
pub mod input;
pub mod memory;
pub mod menu;
pub mod ports;
pub mod rate_limit;
pub mod reply;

pub use auth::{hash_pin, AuthError, QuickPinAuthenticator};
pub use domain::{
    AuthenticatedOfficer, CaseSummary, CounterState, Feature, MenuState, MissingReport,
    OfficerQueryStats, ParameterKind, Person, QueryLogEntry, QuickPinBinding, RateLimitDecision,
    SessionUpdate, UssdSession, Vehicle, WantedRecord,
};
pub use error::UssdError;
pub use executor::{QueryContext, QueryExecutor, QueryOutcome};
pub use input::ParsedInput;
pub use menu::UssdEngine;
pub use ports::{
    CounterStore, OfficerDirectory, PortError, PortResult, QueryLogSink, RecordsLookup,
    SessionStore,
};
pub use rate_limit::{RateLimitStrategy, RateLimiter};
pub use reply::UssdReply;
