#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Manifest and configuration policy tests for tiergate.
//!
//! These verify that Cargo.toml keeps the panic-free lint policy and the
//! feature layout, and that a TOML configuration document loads into
//! `TierGateConfig`. If one fails, the project setup has drifted.

use std::path::PathBuf;
use std::time::Duration;

use tiergate::protocol::EventMask;
use tiergate::{SubscriptionTier, TierGateConfig, TierTables};

/// Returns the project root directory (where Cargo.toml lives).
fn project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// Reads a file relative to the project root.
fn read_project_file(relative_path: &str) -> String {
    let path = project_root().join(relative_path);
    std::fs::read_to_string(&path).unwrap_or_else(|e| {
        panic!(
            "Failed to read '{}': {}. This file is required by project policy.",
            path.display(),
            e
        )
    })
}

fn manifest() -> toml::Table {
    read_project_file("Cargo.toml")
        .parse::<toml::Table>()
        .expect("Cargo.toml must be valid TOML")
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: lint_policy
// ─────────────────────────────────────────────────────────────────────────────

mod lint_policy {
    use super::*;

    const REQUIRED_DENY_LINTS: &[&str] = &[
        "unwrap_used",
        "expect_used",
        "panic",
        "todo",
        "unimplemented",
        "indexing_slicing",
    ];

    #[test]
    fn cargo_toml_denies_all_panic_prone_lints() {
        let manifest = manifest();
        let clippy = manifest["lints"]["clippy"]
            .as_table()
            .expect("Cargo.toml is missing a [lints.clippy] section");

        for lint in REQUIRED_DENY_LINTS {
            assert_eq!(
                clippy.get(*lint).and_then(|v| v.as_str()),
                Some("deny"),
                "Cargo.toml must set `{lint} = \"deny\"` in [lints.clippy] to keep \
                 library code panic-free."
            );
        }
    }

    #[test]
    fn msrv_is_documented_in_readme() {
        let manifest = manifest();
        let version = manifest["package"]["rust-version"]
            .as_str()
            .expect("Cargo.toml must declare a rust-version");
        let readme = read_project_file("README.md");
        assert!(
            readme.contains(version),
            "README.md does not mention the MSRV '{version}' from Cargo.toml."
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: feature_layout
// ─────────────────────────────────────────────────────────────────────────────

mod feature_layout {
    use super::*;

    #[test]
    fn websocket_transport_is_default() {
        let manifest = manifest();
        let default = manifest["features"]["default"].as_array().unwrap();
        assert!(default.iter().any(|f| f.as_str() == Some("transport-websocket")));
    }

    #[test]
    fn optional_stacks_stay_optional() {
        let manifest = manifest();
        let deps = manifest["dependencies"].as_table().unwrap();
        for name in ["tokio-tungstenite", "futures-util", "reqwest"] {
            assert_eq!(
                deps[name]["optional"].as_bool(),
                Some(true),
                "`{name}` must stay behind a feature flag"
            );
        }
    }

    #[test]
    fn http_feature_enables_a_tls_backend() {
        let manifest = manifest();
        let features = manifest["features"].as_table().unwrap();
        let http: Vec<&str> = features["http"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|f| f.as_str())
            .collect();
        assert!(
            http.contains(&"rustls-tls") || http.contains(&"native-tls"),
            "the `http` feature must enable a reqwest TLS backend so https:// endpoints work"
        );
        for backend in ["rustls-tls", "native-tls"] {
            let enables: Vec<&str> = features[backend]
                .as_array()
                .unwrap()
                .iter()
                .filter_map(|f| f.as_str())
                .collect();
            assert!(enables.contains(&format!("reqwest/{backend}").as_str()));
        }
    }

    #[test]
    fn declared_examples_exist() {
        let manifest = manifest();
        for example in manifest["example"].as_array().unwrap() {
            let path = example["path"].as_str().unwrap();
            assert!(
                project_root().join(path).is_file(),
                "example path '{path}' declared in Cargo.toml does not exist"
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: config_documents
// ─────────────────────────────────────────────────────────────────────────────

mod config_documents {
    use super::*;

    const DOCUMENT: &str = r#"
[realtime]
channel_name = "dashboard"
invalidation_throttle_ms = 5000
heartbeat_interval_ms = 20000
tables = [{ table = "newsletters" }, { table = "telegram_messages", event = "INSERT" }]

[realtime.backoff]
base_delay_ms = 2000
growth = 1.5
max_attempts = 5

[admin_cache]
ttl_ms = 60000
max_entries = 64

[tier_resolver]
lookup_timeout_ms = 3000
"#;

    #[test]
    fn full_document_loads() {
        let config: TierGateConfig = toml::from_str(DOCUMENT).unwrap();

        assert_eq!(config.realtime.channel_name, "dashboard");
        assert_eq!(config.realtime.invalidation_throttle, Duration::from_secs(5));
        assert_eq!(config.realtime.heartbeat_interval, Duration::from_secs(20));
        assert_eq!(config.realtime.tables[1].event, EventMask::Insert);
        assert_eq!(config.realtime.backoff.base_delay, Duration::from_secs(2));
        assert_eq!(config.realtime.backoff.max_delay, Duration::from_secs(30));
        assert_eq!(config.realtime.backoff.max_attempts, 5);
        assert_eq!(config.admin_cache.ttl, Duration::from_secs(60));
        assert_eq!(config.admin_cache.max_entries, 64);
        assert_eq!(config.tier_resolver.lookup_timeout, Duration::from_secs(3));
        config.realtime.validate().unwrap();
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config: TierGateConfig = toml::from_str("").unwrap();
        assert!(config.realtime.enabled);
        assert_eq!(config.realtime.subscribe_timeout, Duration::from_secs(10));
        assert_eq!(config.admin_cache.ttl, Duration::from_secs(300));
        assert!(config.realtime.validate().is_err());
    }

    #[test]
    fn tier_tables_load_from_toml() {
        let tables: TierTables = toml::from_str(
            r#"
free = [{ table = "newsletters" }]
premium = [{ table = "telegram_messages", schema = "chat" }]
"#,
        )
        .unwrap();
        let premium = tables.tables_for(SubscriptionTier::Premium);
        assert_eq!(premium.len(), 2);
        assert_eq!(premium[1].schema, "chat");
        assert_eq!(tables.tables_for(SubscriptionTier::Paid).len(), 1);
    }
}
