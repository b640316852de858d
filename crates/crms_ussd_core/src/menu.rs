//! crates/crms_ussd_core/src/menu.rs
//!
//! The menu state machine. Each gateway callback is answered from the parsed
//! keystroke history plus the stored session:
//!
//! | depth | state            | action                                        |
//! |-------|------------------|-----------------------------------------------|
//! | 0     | entry            | create session, show the feature menu         |
//! | 1     | feature selected | remember the feature, ask for the Quick PIN   |
//! | 2     | authenticating   | check PIN and quota, ask for the parameter    |
//! | 3+    | executing        | run the lookup, clear the session             |
//!
//! Every lookup ends the interaction, whatever its outcome.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::auth::QuickPinAuthenticator;
use crate::domain::{mask_phone, Feature, MenuState, SessionUpdate, UssdSession};
use crate::error::UssdError;
use crate::executor::{QueryContext, QueryExecutor};
use crate::input::ParsedInput;
use crate::ports::{PortError, SessionStore};
use crate::rate_limit::RateLimiter;
use crate::reply::UssdReply;

/// Session data key holding the selected feature.
pub const FEATURE_KEY: &str = "feature";

pub const MENU_TITLE: &str = "CRMS Field Tools";

pub const PIN_PROMPT: &str = "Enter your 4-digit Quick PIN:";

/// Text of the entry menu, one numbered line per feature.
pub fn main_menu() -> String {
    let mut menu = MENU_TITLE.to_string();
    for feature in Feature::ALL {
        menu.push_str(&format!("\n{}. {}", feature.code(), feature.menu_label()));
    }
    menu
}

fn store_error(e: PortError) -> UssdError {
    match e {
        PortError::NotFound(_) => UssdError::SessionExpired,
        other => UssdError::LookupFailed(other.to_string()),
    }
}

#[derive(Clone)]
pub struct UssdEngine {
    sessions: Arc<dyn SessionStore>,
    authenticator: QuickPinAuthenticator,
    rate_limiter: RateLimiter,
    executor: QueryExecutor,
}

impl UssdEngine {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        authenticator: QuickPinAuthenticator,
        rate_limiter: RateLimiter,
        executor: QueryExecutor,
    ) -> Self {
        Self {
            sessions,
            authenticator,
            rate_limiter,
            executor,
        }
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Answers one gateway callback. Never fails: every error becomes an `END` reply.
    pub async fn handle(&self, session_id: &str, phone_number: &str, text: &str) -> UssdReply {
        let input = ParsedInput::parse(text);
        let depth = input.depth();
        debug!("USSD session {} at depth {}", session_id, depth);

        let result = match depth {
            0 => self.entry(session_id, phone_number).await,
            1 => self.select_feature(session_id, phone_number, &input).await,
            2 => self.authenticate(session_id, phone_number, &input).await,
            _ => self.execute(session_id, phone_number, &input).await,
        };

        match result {
            Ok(reply) => reply,
            // An unknown feature code leaves the session to expire on its own.
            Err(UssdError::InvalidSelection) if depth == 1 => {
                info!("Invalid feature selection in session {}", session_id);
                UssdReply::end(UssdError::InvalidSelection.user_message())
            }
            Err(err) => self.terminate(session_id, err).await,
        }
    }

    /// Clears the session and renders the error as a terminal reply.
    pub async fn terminate(&self, session_id: &str, err: UssdError) -> UssdReply {
        match &err {
            UssdError::LookupFailed(detail) => {
                error!("USSD session {} failed: {}", session_id, detail)
            }
            UssdError::RateLimitExceeded { .. } | UssdError::AuthenticationFailed => {
                warn!("USSD session {} ended: {}", session_id, err)
            }
            _ => info!("USSD session {} ended: {}", session_id, err),
        }
        if let Err(e) = self.sessions.clear(session_id).await {
            error!("Failed to clear USSD session {}: {:?}", session_id, e);
        }
        UssdReply::end(err.user_message())
    }

    async fn entry(&self, session_id: &str, phone_number: &str) -> Result<UssdReply, UssdError> {
        self.sessions
            .create(session_id, phone_number)
            .await
            .map_err(store_error)?;
        info!(
            "USSD session {} started from {}",
            session_id,
            mask_phone(phone_number)
        );
        Ok(UssdReply::prompt(main_menu()))
    }

    async fn select_feature(
        &self,
        session_id: &str,
        phone_number: &str,
        input: &ParsedInput,
    ) -> Result<UssdReply, UssdError> {
        let feature = input
            .get(0)
            .and_then(Feature::from_code)
            .ok_or(UssdError::InvalidSelection)?;

        // The gateway may open a session straight at depth 1 when the feature
        // code is part of the dialed string.
        if self
            .sessions
            .load(session_id)
            .await
            .map_err(store_error)?
            .is_none()
        {
            self.sessions
                .create(session_id, phone_number)
                .await
                .map_err(store_error)?;
        }

        self.sessions
            .update(
                session_id,
                SessionUpdate::menu(MenuState::AwaitingPin).with_data(FEATURE_KEY, feature.as_str()),
            )
            .await
            .map_err(store_error)?;
        debug!("USSD session {} selected {}", session_id, feature);
        Ok(UssdReply::prompt(PIN_PROMPT))
    }

    async fn authenticate(
        &self,
        session_id: &str,
        phone_number: &str,
        input: &ParsedInput,
    ) -> Result<UssdReply, UssdError> {
        let session = self.live_session(session_id, phone_number).await?;
        // A replayed PIN step must not verify again or consume more quota.
        if session.current_menu != MenuState::AwaitingPin {
            return Err(UssdError::SessionExpired);
        }
        let feature = stored_feature(&session)?;
        let pin = input.get(1).ok_or(UssdError::AuthenticationFailed)?;

        let officer = self
            .authenticator
            .authenticate(phone_number, pin)
            .await
            .map_err(|e| {
                debug!("Quick PIN rejected for session {}: {}", session_id, e);
                UssdError::AuthenticationFailed
            })?;

        self.sessions
            .update(
                session_id,
                SessionUpdate::menu(MenuState::AwaitingParameter).with_officer(officer.officer_id),
            )
            .await
            .map_err(store_error)?;

        let decision = self
            .rate_limiter
            .check_and_consume(officer.officer_id, officer.daily_limit)
            .await;
        if !decision.allowed {
            return Err(UssdError::RateLimitExceeded {
                limit: decision.limit,
                retry_after_seconds: decision.retry_after_seconds.unwrap_or(1),
            });
        }
        if decision.degraded {
            warn!(
                "Officer {} admitted without quota enforcement",
                officer.officer_id
            );
        }

        match feature.parameter() {
            Some(kind) => Ok(UssdReply::prompt(kind.prompt())),
            None => {
                let ctx = QueryContext {
                    officer_id: officer.officer_id,
                    phone_number,
                    session_id,
                    remaining_quota: (!decision.degraded).then_some(decision.remaining),
                };
                let outcome = self.executor.execute(feature, None, &ctx).await;
                self.finish(session_id).await;
                Ok(UssdReply::end(outcome.reply))
            }
        }
    }

    async fn execute(
        &self,
        session_id: &str,
        phone_number: &str,
        input: &ParsedInput,
    ) -> Result<UssdReply, UssdError> {
        let session = self.live_session(session_id, phone_number).await?;
        let officer_id = session.officer_id.ok_or(UssdError::SessionExpired)?;
        if session.current_menu != MenuState::AwaitingParameter {
            return Err(UssdError::SessionExpired);
        }
        let feature = stored_feature(&session)?;
        let kind = feature.parameter().ok_or(UssdError::InvalidSelection)?;
        let parameter = input
            .last()
            .and_then(|raw| kind.normalize(raw))
            .ok_or(UssdError::InvalidSelection)?;

        let ctx = QueryContext {
            officer_id,
            phone_number,
            session_id,
            remaining_quota: None,
        };
        let outcome = self.executor.execute(feature, Some(&parameter), &ctx).await;
        self.finish(session_id).await;
        Ok(UssdReply::end(outcome.reply))
    }

    /// Loads the session, treating a missing one or one opened from a
    /// different phone as expired.
    async fn live_session(
        &self,
        session_id: &str,
        phone_number: &str,
    ) -> Result<UssdSession, UssdError> {
        let session = self
            .sessions
            .load(session_id)
            .await
            .map_err(store_error)?
            .ok_or(UssdError::SessionExpired)?;
        if session.phone_number != phone_number {
            warn!(
                "USSD session {} resumed from a different phone {}",
                session_id,
                mask_phone(phone_number)
            );
            return Err(UssdError::SessionExpired);
        }
        Ok(session)
    }

    async fn finish(&self, session_id: &str) {
        if let Err(e) = self.sessions.clear(session_id).await {
            error!("Failed to clear USSD session {}: {:?}", session_id, e);
        }
    }
}

fn stored_feature(session: &UssdSession) -> Result<Feature, UssdError> {
    session
        .data
        .get(FEATURE_KEY)
        .and_then(|value| Feature::parse(value))
        .ok_or(UssdError::SessionExpired)
}
