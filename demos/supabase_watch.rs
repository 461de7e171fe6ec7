//! # Supabase Watch Example
//!
//! Opens a realtime channel against a Supabase project and logs every cache
//! invalidation and connection state change until Ctrl+C.
//!
//! ## Running
//!
//! ```sh
//! SUPABASE_URL=https://xyz.supabase.co \
//! SUPABASE_ANON_KEY=eyJ... \
//! TIERGATE_TABLES=newsletters,telegram_messages \
//! cargo run --example supabase_watch
//! ```

use tiergate::{RealtimeConfig, RealtimeManager, WebSocketConnector};

/// Tables watched when `TIERGATE_TABLES` is not set.
const DEFAULT_TABLES: &str = "newsletters";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tiergate=debug")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let project_url = std::env::var("SUPABASE_URL")?;
    let anon_key = std::env::var("SUPABASE_ANON_KEY")?;
    let tables = std::env::var("TIERGATE_TABLES").unwrap_or_else(|_| DEFAULT_TABLES.to_string());

    let mut config = RealtimeConfig::new("tiergate-watch").with_tables(
        tables
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string),
    );
    if let Ok(token) = std::env::var("SUPABASE_ACCESS_TOKEN") {
        config = config.with_access_token(token);
    }

    let connector = WebSocketConnector::supabase(&project_url, &anon_key);
    tracing::info!(?connector, "connecting");

    let manager = RealtimeManager::new(connector, config, |table: &str| {
        tracing::info!(table, "invalidate");
    });
    let mut state = manager.subscribe_state();
    manager.connect().await?;

    // ── Watch ───────────────────────────────────────────────────────
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                tracing::info!(
                    status = %current.status,
                    attempts = current.reconnect_attempts,
                    error = current.error.as_deref().unwrap_or("-"),
                    "state"
                );
                if current.is_terminal() {
                    tracing::warn!("reconnects exhausted, retrying manually");
                    manager.reconnect().await?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    manager.disconnect().await;
    Ok(())
}
