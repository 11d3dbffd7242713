//! Load-generating HTTP client.
//!
//! Posts a sample transaction to the gateway on a fixed interval and logs
//! what comes back. Requests are not serialized: a slow reply does not hold
//! up the next tick.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::config::ClientConfig;
use crate::utils::cancel::CancellationToken;

/// Errors from one request to the gateway.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server responded with status: {0}")]
    Status(u16),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A transaction like the ones the gateway is built for.
pub fn sample_transaction<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> Value {
    json!({
        "id": format!("TX{}", now.timestamp_millis()),
        "amount": rng.random_range(0..=100),
        "currency": "EUR",
        "timestamp": now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    })
}

/// HTTP client for the gateway.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl Client {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            http,
            url: config.server_url(),
            timeout: config.timeout(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Post one transaction and return the reply body.
    pub async fn send(&self, transaction: &Value) -> Result<Value, ClientError> {
        let response = self
            .http
            .post(&self.url)
            .json(transaction)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }

        response.json().await.map_err(|e| self.classify(e))
    }

    fn classify(&self, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout(self.timeout)
        } else {
            ClientError::Http(err)
        }
    }

    /// Send a sample transaction every `interval` until `shutdown` is cancelled.
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => break,
            }

            let transaction = sample_transaction(Utc::now(), &mut rand::rng());
            let client = self.clone();
            tokio::spawn(async move {
                info!(transaction = %transaction, "Sending transaction");
                match client.send(&transaction).await {
                    Ok(reply) => info!(reply = %reply, "Response received"),
                    Err(ClientError::Timeout(after)) => {
                        error!(timeout = ?after, "Request timed out")
                    }
                    Err(e) => error!(error = %e, "Request failed"),
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    async fn spawn_server(app: Router) -> ClientConfig {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, app).await });

        ClientConfig {
            server_host: "127.0.0.1".to_string(),
            server_port: port,
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_sample_transaction_shape() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let tx = sample_transaction(now, &mut rng);

        assert_eq!(tx["id"], format!("TX{}", now.timestamp_millis()));
        assert_eq!(tx["currency"], "EUR");
        assert_eq!(tx["timestamp"], "2024-05-01T12:00:00.000Z");
        let amount = tx["amount"].as_i64().unwrap();
        assert!((0..=100).contains(&amount));
    }

    #[tokio::test]
    async fn test_send_returns_reply() {
        let app = Router::new().route(
            "/",
            post(|Json(mut body): Json<Value>| async move {
                body["status"] = json!("success");
                Json(body)
            }),
        );
        let client = Client::new(&spawn_server(app).await).unwrap();

        let reply = client.send(&json!({"id": "TX1"})).await.unwrap();

        assert_eq!(reply, json!({"id": "TX1", "status": "success"}));
    }

    #[tokio::test]
    async fn test_send_reports_status() {
        let app = Router::new().route(
            "/",
            post(|| async {
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    Json(json!({"error": "The server took too long to respond."})),
                )
            }),
        );
        let client = Client::new(&spawn_server(app).await).unwrap();

        let result = client.send(&json!({"id": "TX1"})).await;

        assert!(matches!(result, Err(ClientError::Status(504))));
    }

    #[tokio::test]
    async fn test_send_times_out() {
        let app = Router::new().route(
            "/",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({}))
            }),
        );
        let config = ClientConfig {
            timeout_ms: 100,
            ..spawn_server(app).await
        };
        let client = Client::new(&config).unwrap();

        let result = client.send(&json!({"id": "TX1"})).await;

        assert!(matches!(result, Err(ClientError::Timeout(_))));
    }
}
