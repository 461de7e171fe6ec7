//! HTTP tier and admin lookups.
//!
//! Both adapters issue `GET {endpoint}?email=<email>` and read a JSON body:
//!
//! | Adapter             | Body                                             | 404             |
//! |---------------------|--------------------------------------------------|-----------------|
//! | [`HttpTierSource`]  | `{"tier":"paid","status":"active","raw_provenance":"plan_1"}` | `Ok(None)` |
//! | [`HttpAdminLookup`] | `{"is_admin":true}`                              | `Ok(false)`     |
//!
//! Other non-success statuses become [`TierGateError::Http`]; 5xx and 429 are
//! transient. Connection failures become [`TierGateError::TransportSend`].
//!
//! The `http` feature turns on `rustls-tls` so `https://` endpoints work out of
//! the box. Enable `native-tls` as well to build clients on the platform TLS
//! stack through [`HttpTierSource::with_client`].

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::admin::AdminLookup;
use crate::error::{Result, TierGateError};
use crate::tier::{TierProvenance, TierRecord, TierSource};

/// Endpoint shared by both adapters.
#[derive(Debug, Clone)]
struct Endpoint {
    client: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
}

impl Endpoint {
    fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            bearer_token: None,
        }
    }

    /// `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(&self, email: &str) -> Result<Option<T>> {
        let mut request = self.client.get(&self.url).query(&[("email", email)]);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| TierGateError::TransportSend(error_chain(&e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(url = %self.url, "lookup returned 404");
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TierGateError::Http {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| TierGateError::MalformedResponse(e.to_string()))
    }
}

// ── Tier source ─────────────────────────────────────────────────────

/// A [`TierSource`] backed by an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpTierSource {
    provenance: TierProvenance,
    endpoint: Endpoint,
}

impl HttpTierSource {
    pub fn new(provenance: TierProvenance, url: impl Into<String>) -> Self {
        Self {
            provenance,
            endpoint: Endpoint::new(url),
        }
    }

    /// Use a preconfigured client (timeouts, proxies, TLS).
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.endpoint.client = client;
        self
    }

    /// Send `Authorization: Bearer <token>`.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.endpoint.bearer_token = Some(token.into());
        self
    }
}

#[async_trait]
impl TierSource for HttpTierSource {
    fn provenance(&self) -> TierProvenance {
        self.provenance
    }

    async fn lookup(&self, email: &str) -> Result<Option<TierRecord>> {
        self.endpoint.get_json(email).await
    }
}

/// `reqwest` keeps the useful part (refused, TLS, DNS) in the source chain.
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

// ── Admin lookup ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AdminAnswer {
    is_admin: bool,
}

/// An [`AdminLookup`] backed by an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpAdminLookup {
    endpoint: Endpoint,
}

impl HttpAdminLookup {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::new(url),
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.endpoint.client = client;
        self
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.endpoint.bearer_token = Some(token.into());
        self
    }
}

#[async_trait]
impl AdminLookup for HttpAdminLookup {
    async fn is_admin(&self, email: &str) -> Result<bool> {
        let answer: Option<AdminAnswer> = self.endpoint.get_json(email).await?;
        Ok(answer.is_some_and(|a| a.is_admin))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::tier::{SubscriptionStatus, SubscriptionTier};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Serve one canned response per connection; report each request head.
    async fn start_server(
        status: &'static str,
        body: &'static str,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = vec![0u8; 4096];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let _ = tx.send(String::from_utf8_lossy(&buf[..n]).to_string());
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        (format!("http://{addr}/tier"), rx)
    }

    #[tokio::test]
    async fn tier_record_is_parsed() {
        let (url, mut requests) = start_server(
            "200 OK",
            r#"{"tier":"premium","status":"trialing","raw_provenance":"plan_9"}"#,
        )
        .await;
        let source = HttpTierSource::new(TierProvenance::Whop, url).with_bearer_token("secret");

        let record = source.lookup("ann@example.com").await.unwrap().unwrap();
        assert_eq!(record.tier, SubscriptionTier::Premium);
        assert_eq!(record.status, SubscriptionStatus::Trialing);
        assert_eq!(record.raw_provenance.as_deref(), Some("plan_9"));

        let head = requests.recv().await.unwrap();
        assert!(head.starts_with("GET /tier?email=ann%40example.com"));
        assert!(head.to_lowercase().contains("authorization: bearer secret"));
    }

    #[tokio::test]
    async fn not_found_means_unknown_email() {
        let (url, _requests) = start_server("404 Not Found", "{}").await;
        let source = HttpTierSource::new(TierProvenance::Beehiiv, url);
        assert_eq!(source.lookup("nobody@example.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let (url, _requests) = start_server("503 Service Unavailable", "down").await;
        let source = HttpTierSource::new(TierProvenance::Beehiiv, url);
        let err = source.lookup("ann@example.com").await.unwrap_err();
        assert!(matches!(err, TierGateError::Http { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let (url, _requests) = start_server("200 OK", r#"{"tier":"gold"}"#).await;
        let source = HttpTierSource::new(TierProvenance::Whop, url);
        let err = source.lookup("ann@example.com").await.unwrap_err();
        assert!(matches!(err, TierGateError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn admin_answer_is_parsed() {
        let (url, _requests) = start_server("200 OK", r#"{"is_admin":true}"#).await;
        let lookup = HttpAdminLookup::new(url);
        assert!(lookup.is_admin("root@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn admin_not_found_is_false() {
        let (url, _requests) = start_server("404 Not Found", "").await;
        let lookup = HttpAdminLookup::new(url);
        assert!(!lookup.is_admin("root@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        let lookup = HttpAdminLookup::new("http://127.0.0.1:1/admin");
        let err = lookup.is_admin("root@example.com").await.unwrap_err();
        assert!(matches!(err, TierGateError::TransportSend(_)));
    }

    #[tokio::test]
    async fn https_endpoint_performs_tls_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (first_byte_tx, first_byte_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut byte = [0u8; 1];
            let _ = stream.read_exact(&mut byte).await;
            let _ = first_byte_tx.send(byte[0]);
        });

        let source = HttpTierSource::new(TierProvenance::Whop, format!("https://{addr}/tier"));
        let err = source.lookup("ann@example.com").await.unwrap_err();

        // 0x16 opens a TLS handshake record (ClientHello).
        assert_eq!(first_byte_rx.await.unwrap(), 0x16);
        match err {
            TierGateError::TransportSend(message) => {
                assert!(!message.contains("scheme is not http"), "{message}");
            }
            other => panic!("expected TransportSend, got {other:?}"),
        }
    }
}
