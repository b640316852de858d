//! services/ussd_gateway/src/web/rest.rs
//!
//! Contains the health endpoint and the master definition for the OpenAPI
//! specification.

use crate::web::ussd::UssdCallback;
use utoipa::OpenApi;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::ussd::ussd_callback_handler,
        health_handler,
    ),
    components(
        schemas(UssdCallback)
    ),
    tags(
        (name = "CRMS USSD Gateway", description = "Callback endpoint for feature-phone field lookups.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Handlers
//=========================================================================================

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "The service is up", body = String, content_type = "text/plain")
    )
)]
pub async fn health_handler() -> &'static str {
    "OK"
}
