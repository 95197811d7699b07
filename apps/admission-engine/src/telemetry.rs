//! Tracing setup.
//!
//! Console-only structured logging. The output format and default level come
//! from [`LoggingConfig`]; `RUST_LOG` overrides the configured level when
//! set.
//!
//! # Usage
//!
//! ```rust,ignore
//! use admission_engine::telemetry::init_telemetry;
//!
//! #[tokio::main]
//! async fn main() {
//!     init_telemetry(&config.observability.logging);
//!     // ... application code
//! }
//! ```

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Initialize tracing from the logging configuration.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_telemetry(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    if config.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    tracing::info!(
        level = %config.level,
        format = %config.format,
        "Tracing initialized"
    );
}
