//! # Dashboard Session Example
//!
//! Walks through a complete tiergate session without any network:
//!
//! 1. Resolve the user's tier from in-memory Whop and Beehiiv sources
//! 2. Check admin status through the TTL cache
//! 3. Derive the tables the tier may watch
//! 4. Open a realtime channel over an in-process loopback server
//! 5. Watch cache invalidations arrive, then a server-side drop and recovery
//!
//! ## Running
//!
//! ```sh
//! cargo run --example dashboard_session
//!
//! # Verbose manager logs:
//! RUST_LOG=tiergate=debug cargo run --example dashboard_session
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tiergate::protocol::{Frame, PHOENIX_TOPIC};
use tiergate::{
    resolve_access, AdminCacheConfig, AdminLookup, AdminStatusCache, BackoffPolicy, Connector,
    RealtimeConfig, RealtimeManager, StaticTierSource, Subscriber, SubscriptionStatus,
    SubscriptionTier, TierGateError, TierProvenance, TierResolver, TierResolverConfig,
    TierTables, Transport,
};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: A loopback connector standing in for the realtime service
// ─────────────────────────────────────────────────────────────────────

/// Client half of one loopback connection.
struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Server half of one loopback connection.
struct LoopbackServer {
    rx: mpsc::UnboundedReceiver<String>,
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), TierGateError> {
        self.tx
            .send(message)
            .map_err(|e| TierGateError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TierGateError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TierGateError> {
        Ok(())
    }
}

/// Opens a fresh loopback pair per `connect()` and hands the server half to
/// whoever plays the realtime service.
struct LoopbackConnector {
    servers: mpsc::UnboundedSender<LoopbackServer>,
}

#[async_trait]
impl Connector for LoopbackConnector {
    type Transport = LoopbackTransport;

    async fn connect(&self) -> Result<LoopbackTransport, TierGateError> {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        self.servers
            .send(LoopbackServer {
                rx: server_rx,
                tx: server_tx,
            })
            .map_err(|_| TierGateError::TransportClosed)?;
        Ok(LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        })
    }
}

fn reply(topic: &str, msg_ref: Option<&str>) -> String {
    serde_json::json!({
        "topic": topic,
        "event": "phx_reply",
        "payload": {"status": "ok", "response": {}},
        "ref": msg_ref,
    })
    .to_string()
}

fn change(topic: &str, table: &str) -> String {
    serde_json::json!({
        "topic": topic,
        "event": "postgres_changes",
        "payload": {
            "ids": [1],
            "data": {
                "schema": "public",
                "table": table,
                "type": "INSERT",
                "record": {"id": 1}
            }
        },
        "ref": null
    })
    .to_string()
}

/// Answer joins and heartbeats, publish one change per joined table and
/// return once the client leaves or the connection ends.
async fn serve(mut server: LoopbackServer, drop_after_join: bool) {
    while let Some(text) = server.rx.recv().await {
        let Ok(frame) = Frame::decode(&text) else {
            continue;
        };
        match frame.event.as_str() {
            "phx_join" => {
                let _ = server.tx.send(reply(&frame.topic, frame.msg_ref.as_deref()));
                for table in frame.payload["config"]["postgres_changes"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(|t| t["table"].as_str())
                {
                    let _ = server.tx.send(change(&frame.topic, table));
                }
                if drop_after_join {
                    tracing::info!("server: dropping connection");
                    return;
                }
            }
            "heartbeat" => {
                let _ = server.tx.send(reply(PHOENIX_TOPIC, frame.msg_ref.as_deref()));
            }
            "phx_leave" => return,
            _ => {}
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Tier and admin backends
// ─────────────────────────────────────────────────────────────────────

struct AdminTable(Vec<&'static str>);

#[async_trait]
impl AdminLookup for AdminTable {
    async fn is_admin(&self, email: &str) -> tiergate::Result<bool> {
        Ok(self.0.contains(&email))
    }
}

fn subscriber(email: &str, tier: SubscriptionTier) -> Subscriber {
    Subscriber {
        id: format!("sub_{}", email.len()),
        email: email.to_string(),
        subscription_tier: tier,
        status: SubscriptionStatus::Active,
        created_at: "2026-01-01T00:00:00Z".into(),
        updated_at: "2026-01-01T00:00:00Z".into(),
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Wire it together
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let email = std::env::var("TIERGATE_EMAIL").unwrap_or_else(|_| "trader@example.com".into());

    // ── Access ──────────────────────────────────────────────────────
    let resolver = TierResolver::new(TierResolverConfig::default())
        .with_source(
            StaticTierSource::new(TierProvenance::Whop)
                .with_subscriber(subscriber("trader@example.com", SubscriptionTier::Premium)),
        )
        .with_source(
            StaticTierSource::new(TierProvenance::Beehiiv)
                .with_subscriber(subscriber("reader@example.com", SubscriptionTier::Paid)),
        );
    let admins = AdminStatusCache::new(
        AdminTable(vec!["owner@example.com"]),
        AdminCacheConfig::default(),
    );

    let access = resolve_access(&resolver, &admins, &email).await?;
    let tier = access.tier().unwrap_or_default();
    tracing::info!(
        %email,
        %tier,
        admin = access.can_administer(),
        premium = access.can_access(SubscriptionTier::Premium),
        "access resolved"
    );

    // ── Realtime ────────────────────────────────────────────────────
    let tables = TierTables::default()
        .with_tables(SubscriptionTier::Free, ["newsletters"])
        .with_tables(SubscriptionTier::Premium, ["telegram_messages"]);
    let config = tables.realtime_config(
        tier,
        RealtimeConfig::new("dashboard")
            .with_invalidation_throttle(Duration::from_millis(500))
            .with_backoff(BackoffPolicy::default().with_base_delay(Duration::from_millis(200))),
    );

    let (servers_tx, mut servers_rx) = mpsc::unbounded_channel();
    let manager = RealtimeManager::new(
        LoopbackConnector {
            servers: servers_tx,
        },
        config,
        |table: &str| tracing::info!(table, "query cache invalidated"),
    );

    // First connection drops right after the join; the second one stays up.
    tokio::spawn(async move {
        let mut first = true;
        while let Some(server) = servers_rx.recv().await {
            tokio::spawn(serve(server, first));
            first = false;
        }
    });

    let mut state = manager.subscribe_state();
    manager.connect().await?;

    let watch_states = async {
        let mut subscribed = 0;
        while state.changed().await.is_ok() {
            let current = state.borrow_and_update().clone();
            tracing::info!(
                status = %current.status,
                attempts = current.reconnect_attempts,
                error = current.error.as_deref().unwrap_or("-"),
                "state"
            );
            if current.status == tiergate::ConnectionStatus::Connected {
                subscribed += 1;
                if subscribed == 2 {
                    break;
                }
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(5), watch_states)
        .await
        .is_err()
    {
        tracing::warn!("channel did not recover within 5s");
    }

    // ── Clean shutdown ──────────────────────────────────────────────
    manager.disconnect().await;
    tracing::info!(status = %manager.status(), "done");
    Ok(())
}
