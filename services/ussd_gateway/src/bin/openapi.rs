//! services/ussd_gateway/src/bin/openapi.rs
//!
//! Writes the OpenAPI document for the gateway's two routes, the form-encoded
//! `POST /ussd/callback` and `GET /health`, so the telecom integration team can
//! review the callback contract without running the service.
//!
//! Usage: `openapi [OUTPUT]`. The document goes to `openapi.json` when no path
//! is given.

use ussd_gateway_lib::web::rest::ApiDoc;
use utoipa::OpenApi;

const DEFAULT_OUTPUT: &str = "openapi.json";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let output = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_OUTPUT.to_string());

    let document = ApiDoc::openapi();
    let route_count = document.paths.paths.len();
    std::fs::write(&output, document.to_pretty_json()?)?;
    println!(
        "Wrote the USSD gateway OpenAPI document ({} routes) to {}",
        route_count, output
    );
    Ok(())
}
