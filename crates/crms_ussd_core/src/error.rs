//! crates/crms_ussd_core/src/error.rs
//!
//! The ways a USSD interaction can end early. Every variant is terminal: the
//! engine turns it into an `END` reply and clears the session.

use chrono::Duration;

#[derive(Debug, thiserror::Error)]
pub enum UssdError {
    #[error("session expired")]
    SessionExpired,
    #[error("invalid selection")]
    InvalidSelection,
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("rate limit of {limit} exceeded, retry after {retry_after_seconds}s")]
    RateLimitExceeded { limit: u32, retry_after_seconds: u64 },
    /// The only variant caused by backend faults rather than user input.
    #[error("lookup failed: {0}")]
    LookupFailed(String),
}

impl UssdError {
    /// The short text shown to the officer after `END `.
    pub fn user_message(&self) -> String {
        match self {
            UssdError::SessionExpired => "Session expired. Please dial again.".to_string(),
            UssdError::InvalidSelection => "Invalid selection. Please dial again.".to_string(),
            UssdError::AuthenticationFailed => "Invalid credentials.".to_string(),
            UssdError::RateLimitExceeded {
                limit,
                retry_after_seconds,
            } => {
                let wait = Duration::seconds(*retry_after_seconds as i64);
                format!(
                    "Daily limit of {} lookups reached. Resets in {}h {}m.",
                    limit,
                    wait.num_hours(),
                    wait.num_minutes() % 60
                )
            }
            UssdError::LookupFailed(_) => {
                "Error performing check. Please try again later.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_message_reports_reset_time() {
        let err = UssdError::RateLimitExceeded {
            limit: 20,
            retry_after_seconds: 3 * 3600 + 25 * 60 + 10,
        };
        assert_eq!(
            err.user_message(),
            "Daily limit of 20 lookups reached. Resets in 3h 25m."
        );
    }

    #[test]
    fn lookup_failure_hides_backend_detail() {
        let err = UssdError::LookupFailed("connection refused".to_string());
        assert!(!err.user_message().contains("connection refused"));
    }
}
