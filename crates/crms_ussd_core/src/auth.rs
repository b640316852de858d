//! crates/crms_ussd_core/src/auth.rs
//!
//! Quick-PIN authentication for officers dialing in from a bound phone.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use std::sync::{Arc, LazyLock};
use tracing::{error, info, warn};

use crate::domain::{mask_phone, AuthenticatedOfficer};
use crate::ports::{OfficerDirectory, PortError, PortResult};

pub const PIN_LENGTH: usize = 4;

/// Verified against when there is no real hash to check, so unknown phones
/// cost the same work as known ones.
static DUMMY_PIN_HASH: LazyLock<Option<String>> = LazyLock::new(|| hash_pin("0000").ok());

/// Why a Quick-PIN check failed. Callers may log the variant but must only
/// ever show the officer the single generic message.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("phone number is not registered for Quick PIN")]
    NotRegistered,
    #[error("Quick PIN binding is disabled")]
    Disabled,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("officer directory unavailable: {0}")]
    Directory(#[from] PortError),
}

impl AuthError {
    pub fn user_message(&self) -> &'static str {
        "Invalid credentials."
    }
}

/// Hashes a Quick PIN into an Argon2 PHC string for storage.
pub fn hash_pin(pin: &str) -> PortResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PortError::Unexpected(format!("Failed to hash PIN: {}", e)))
}

/// True when `pin` is exactly four ASCII digits.
pub fn is_well_formed_pin(pin: &str) -> bool {
    pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit())
}

fn verify_pin(pin: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(pin.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            error!("Stored Quick PIN hash is unreadable: {:?}", e);
            false
        }
    }
}

/// Validates a Quick PIN against the phone's officer binding.
#[derive(Clone)]
pub struct QuickPinAuthenticator {
    directory: Arc<dyn OfficerDirectory>,
    default_daily_limit: u32,
}

impl QuickPinAuthenticator {
    pub fn new(directory: Arc<dyn OfficerDirectory>, default_daily_limit: u32) -> Self {
        Self {
            directory,
            default_daily_limit,
        }
    }

    pub async fn authenticate(
        &self,
        phone_number: &str,
        pin: &str,
    ) -> Result<AuthenticatedOfficer, AuthError> {
        let masked = mask_phone(phone_number);
        let well_formed = is_well_formed_pin(pin);

        let binding = match self.directory.find_officer_binding(phone_number).await? {
            Some(binding) => binding,
            None => {
                if let Some(dummy) = DUMMY_PIN_HASH.as_deref() {
                    verify_pin(pin, dummy);
                }
                warn!("Quick PIN attempt from unregistered phone {}", masked);
                return Err(AuthError::NotRegistered);
            }
        };

        // The hash is checked even for disabled bindings so timing does not
        // reveal which check failed.
        let pin_matches = well_formed && verify_pin(pin, &binding.pin_hash);

        if !binding.enabled {
            warn!("Quick PIN attempt on disabled binding for {}", masked);
            return Err(AuthError::Disabled);
        }
        if !pin_matches {
            warn!("Invalid Quick PIN for {}", masked);
            return Err(AuthError::InvalidCredentials);
        }

        let daily_limit = if binding.daily_limit > 0 {
            binding.daily_limit as u32
        } else {
            self.default_daily_limit
        };
        info!(
            "Officer {} authenticated via Quick PIN from {}",
            binding.officer_id, masked
        );
        Ok(AuthenticatedOfficer {
            officer_id: binding.officer_id,
            officer_name: binding.officer_name,
            badge_number: binding.badge_number,
            daily_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QuickPinBinding;
    use crate::memory::InMemoryOfficerDirectory;
    use uuid::Uuid;

    async fn directory_with(enabled: bool, daily_limit: i32) -> (Arc<InMemoryOfficerDirectory>, Uuid) {
        let directory = Arc::new(InMemoryOfficerDirectory::new());
        let officer_id = Uuid::new_v4();
        directory
            .insert(QuickPinBinding {
                phone_number: "+254711000111".to_string(),
                officer_id,
                officer_name: "Cpl. Achieng".to_string(),
                badge_number: "KP-4471".to_string(),
                pin_hash: hash_pin("1234").unwrap(),
                enabled,
                daily_limit,
            })
            .await;
        (directory, officer_id)
    }

    #[test]
    fn pin_format_is_four_ascii_digits() {
        assert!(is_well_formed_pin("0042"));
        assert!(!is_well_formed_pin("123"));
        assert!(!is_well_formed_pin("12345"));
        assert!(!is_well_formed_pin("12a4"));
        assert!(!is_well_formed_pin("١٢٣٤"));
    }

    #[tokio::test]
    async fn correct_pin_returns_officer_and_limit() {
        let (directory, officer_id) = directory_with(true, 25).await;
        let auth = QuickPinAuthenticator::new(directory, 50);

        let officer = auth.authenticate("+254711000111", "1234").await.unwrap();
        assert_eq!(officer.officer_id, officer_id);
        assert_eq!(officer.daily_limit, 25);
    }

    #[tokio::test]
    async fn non_positive_limit_falls_back_to_default() {
        let (directory, _) = directory_with(true, 0).await;
        let auth = QuickPinAuthenticator::new(directory, 50);

        let officer = auth.authenticate("+254711000111", "1234").await.unwrap();
        assert_eq!(officer.daily_limit, 50);
    }

    #[tokio::test]
    async fn disabled_binding_fails_like_a_wrong_pin() {
        let (directory, _) = directory_with(false, 25).await;
        let auth = QuickPinAuthenticator::new(directory.clone(), 50);
        let disabled = auth.authenticate("+254711000111", "1234").await.unwrap_err();

        let (enabled_directory, _) = directory_with(true, 25).await;
        let auth = QuickPinAuthenticator::new(enabled_directory, 50);
        let wrong = auth.authenticate("+254711000111", "9999").await.unwrap_err();

        assert!(matches!(disabled, AuthError::Disabled));
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert_eq!(disabled.user_message(), wrong.user_message());
    }

    #[tokio::test]
    async fn unknown_phone_and_malformed_pin_are_rejected() {
        let (directory, _) = directory_with(true, 25).await;
        let auth = QuickPinAuthenticator::new(directory, 50);

        assert!(matches!(
            auth.authenticate("+254799999999", "1234").await,
            Err(AuthError::NotRegistered)
        ));
        assert!(matches!(
            auth.authenticate("+254711000111", "12").await,
            Err(AuthError::InvalidCredentials)
        ));
    }
}
