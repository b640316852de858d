//! services/ussd_gateway/src/web/ussd.rs
//!
//! The telecom gateway's callback. One form-encoded POST arrives per keystroke
//! and is answered with plain text starting with `CON ` or `END `. The HTTP
//! status is always 200; the gateway does not interpret anything else.

use crate::web::state::AppState;
use axum::{
    extract::{rejection::FormRejection, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Form,
};
use crms_ussd_core::{UssdError, UssdReply};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::ToSchema;

pub const BUSY_MESSAGE: &str = "Service busy. Please try again.";
pub const BAD_REQUEST_MESSAGE: &str = "Invalid request.";

//=========================================================================================
// Request Payload
//=========================================================================================

/// The fields the gateway posts on every callback.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UssdCallback {
    /// Gateway-assigned id, stable for the whole dial.
    pub session_id: String,
    pub phone_number: String,
    /// Every entry so far, joined by `*`. Empty on the first callback.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub service_code: Option<String>,
    #[serde(default)]
    pub network_code: Option<String>,
}

//=========================================================================================
// Handler
//=========================================================================================

/// Answer a USSD gateway callback.
#[utoipa::path(
    post,
    path = "/ussd/callback",
    request_body(content = UssdCallback, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Reply text prefixed with CON (continue) or END (terminate)", body = String, content_type = "text/plain")
    )
)]
pub async fn ussd_callback_handler(
    State(state): State<Arc<AppState>>,
    form: Result<Form<UssdCallback>, FormRejection>,
) -> impl IntoResponse {
    let reply = match form {
        Ok(Form(callback)) => answer(&state, callback).await,
        Err(rejection) => {
            warn!("Malformed USSD callback: {}", rejection);
            UssdReply::end(BAD_REQUEST_MESSAGE)
        }
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        reply.to_string(),
    )
}

async fn answer(state: &Arc<AppState>, callback: UssdCallback) -> UssdReply {
    if callback.session_id.trim().is_empty() || callback.phone_number.trim().is_empty() {
        warn!("USSD callback without session id or phone number");
        return UssdReply::end(BAD_REQUEST_MESSAGE);
    }

    let budget = state.config.response_budget;
    let engine = state.engine.clone();
    let session_id = callback.session_id.clone();
    // The engine runs in its own task so a lookup cut off by the budget still
    // completes and writes its query log entry.
    let mut handling = tokio::spawn(async move {
        engine
            .handle(&callback.session_id, &callback.phone_number, &callback.text)
            .await
    });

    match tokio::time::timeout(budget, &mut handling).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(join_error)) => {
            error!(
                "USSD session {} handler task failed: {}",
                session_id, join_error
            );
            clear_session(state, session_id).await;
            UssdReply::end(UssdError::LookupFailed(join_error.to_string()).user_message())
        }
        Err(_) => {
            error!(
                "USSD session {} exceeded the {:?} response budget",
                session_id, budget
            );
            // The gateway is about to drop the leg; clear once the engine is done.
            let state = state.clone();
            tokio::spawn(async move {
                if let Err(e) = handling.await {
                    error!("USSD session {} handler task failed: {}", session_id, e);
                }
                clear_session(&state, session_id).await;
            });
            UssdReply::end(BUSY_MESSAGE)
        }
    }
}

async fn clear_session(state: &Arc<AppState>, session_id: String) {
    if let Err(e) = state.engine.sessions().clear(&session_id).await {
        error!("Failed to clear USSD session {}: {:?}", session_id, e);
    }
}
