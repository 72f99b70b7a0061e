//! Structured logging configuration.
//!
//! Library crates log through the `log` facade; the subscriber installed here
//! picks those records up alongside native `tracing` events. Everything goes
//! to stderr so it never interleaves with the rendered session on stdout.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use turn_sync::sync::Connectivity;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,tokio_tungstenite=warn,tungstenite=warn";

/// Initialize logging
///
/// Levels are configurable via the `RUST_LOG` env var.
///
/// # Example
///
/// ```no_run
/// use ts_client::logging;
///
/// logging::init();
/// tracing::info!("Client starting");
/// ```
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::debug!("Logging initialized");
}

/// Log a connectivity change with structured fields
///
/// # Arguments
///
/// * `state` - New connectivity state
/// * `game_id` - Game the session belongs to
pub fn log_connectivity(state: Connectivity, game_id: &str) {
    match state {
        Connectivity::Online => {
            tracing::info!(game_id = game_id, state = "online", "Connection established");
        }
        Connectivity::Reconnecting { attempts } => {
            tracing::warn!(
                game_id = game_id,
                state = "reconnecting",
                attempts = attempts,
                "Connection lost"
            );
        }
        Connectivity::Offline => {
            tracing::info!(game_id = game_id, state = "offline", "Connection closed");
        }
        Connectivity::Connecting => {
            tracing::debug!(game_id = game_id, state = "connecting", "Connecting");
        }
    }
}
