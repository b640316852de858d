//! services/ussd_gateway/src/bin/ussd_gateway.rs

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ussd_gateway_lib::{
    adapters::DbAdapter,
    config::{Config, StoreBackend},
    error::GatewayError,
    web::{
        self,
        rest::ApiDoc,
        state::{AppState, Backends, MemoryStores},
    },
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// How often idle sessions and lapsed counters are swept.
const PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<(), GatewayError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting USSD gateway...");

    // --- 2. Connect to the Database ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(
        db_pool,
        web::state::to_chrono(config.session_idle_timeout)?,
    ));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Select the Session & Counter Stores ---
    let backends = match config.store_backend {
        StoreBackend::Postgres => {
            let db = db_adapter.clone();
            spawn_purge_task("database", move || {
                let db = db.clone();
                async move { db.purge_expired().await.map_err(GatewayError::from) }
            });
            Backends::postgres(db_adapter)
        }
        StoreBackend::Memory => {
            warn!("Using in-memory sessions and counters; state is not shared between gateway processes.");
            let memory = MemoryStores::new(&config)?;
            let sweep = memory.clone();
            spawn_purge_task("in-memory", move || {
                let sweep = sweep.clone();
                async move { Ok(sweep.purge_expired().await as u64) }
            });
            Backends::with_memory_sessions(db_adapter, &memory)
        }
    };

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(config.clone(), backends)?);
    if config.gateway_token.is_none() {
        warn!("USSD_GATEWAY_TOKEN is not set; callbacks are accepted from any caller.");
    }

    // --- 5. Create the Web Router ---
    let app = Router::new()
        .merge(web::router(app_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn spawn_purge_task<F, Fut>(store: &'static str, purge: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<u64, GatewayError>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            match purge().await {
                Ok(0) => {}
                Ok(removed) => info!("Purged {} expired {} USSD entries", removed, store),
                Err(e) => error!("Failed to purge expired {} USSD entries: {:?}", store, e),
            }
        }
    });
}
