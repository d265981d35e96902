//! Codebox server - HTTP API over a persistent code execution session

pub mod config;
pub mod error;
pub mod logging;
pub mod routes;

pub use config::{CliArgs, ConfigError, ServerConfig};
pub use error::ApiError;
pub use routes::{create_router, AppState};
