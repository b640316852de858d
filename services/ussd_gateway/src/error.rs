//! services/ussd_gateway/src/error.rs
//!
//! Startup failures of the gateway process. Callback handling never produces
//! one of these: the engine turns every runtime fault into an `END` reply, so
//! a `GatewayError` always means the process could not come up (bad
//! configuration, unreachable database, failed migration, unbindable socket).

use crate::config::ConfigError;
use crms_ussd_core::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The periodic database sweep failed.
    #[error("Store error: {0}")]
    Port(#[from] PortError),

    /// Connecting the PostgreSQL pool failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Binding or serving the listener failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A configured duration does not fit the engine's clock type.
    #[error("Invalid duration: {0}")]
    Duration(String),
}
