pub mod middleware;
pub mod rest;
pub mod state;
pub mod ussd;

pub use middleware::require_gateway_token;
pub use rest::{health_handler, ApiDoc};
pub use ussd::ussd_callback_handler;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use state::AppState;

/// Builds the gateway's router: the guarded callback route plus the health probe.
pub fn router(app_state: Arc<AppState>) -> Router {
    let callback_routes = Router::new()
        .route("/ussd/callback", post(ussd_callback_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_gateway_token,
        ));

    Router::new()
        .merge(callback_routes)
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
