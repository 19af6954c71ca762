//! Delivery to the remote ingestion service
//!
//! Every request is a JSON `POST` with a fixed timeout. Any status >= 300 is a
//! delivery error; 429 is distinguishable so the worker can cool down.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("API Error {code} {reason}{}", rate_limit_note(.code))]
    Status { code: u16, reason: String },
}

impl DeliveryError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            DeliveryError::Status { code, .. } if *code == StatusCode::TOO_MANY_REQUESTS.as_u16()
        )
    }
}

fn rate_limit_note(code: &u16) -> &'static str {
    if *code == StatusCode::TOO_MANY_REQUESTS.as_u16() {
        " (rate limited)"
    } else {
        ""
    }
}

/// One metric value in cargo mode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CargoSample {
    pub time: String,
    pub ship_id: String,
    pub cargo_id: String,
    pub value: Value,
}

/// Current UTC time, RFC3339 with nanoseconds
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `body` as JSON to `url`
    async fn send(&self, url: &str, api_key: &str, body: &Value) -> Result<(), DeliveryError>;
}

/// reqwest-backed transport shared by all workers
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, DeliveryError> {
        Self::with_timeout(DELIVERY_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("harbor-lighthouse/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, url: &str, api_key: &str, body: &Value) -> Result<(), DeliveryError> {
        let mut request = self.client.post(url).json(body);
        if has_api_key(api_key) {
            request = request.header("X-API-Key", api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!("POST {} -> {}", url, status);

        if status.as_u16() >= 300 {
            return Err(DeliveryError::Status {
                code: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }
        Ok(())
    }
}

fn has_api_key(key: &str) -> bool {
    !key.is_empty() && key != "undefined"
}

#[cfg(test)]
mod tests {
    use super::*;
    use lighthouse_devkit::{check_timestamp, IngestStub};
    use serde_json::json;

    #[tokio::test]
    async fn test_send_sets_headers() {
        let stub = IngestStub::start().await.unwrap();
        let transport = HttpTransport::new().unwrap();
        let url = format!("{}/api/v2/ingest/gps", stub.base_url());

        transport.send(&url, "k-123", &json!({"lat": 1.0})).await.unwrap();

        let requests = stub.requests_to("/api/v2/ingest/gps");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].api_key.as_deref(), Some("k-123"));
        assert_eq!(requests[0].content_type.as_deref(), Some("application/json"));
        assert_eq!(requests[0].body["lat"], 1.0);
    }

    #[tokio::test]
    async fn test_missing_key_omits_header() {
        let stub = IngestStub::start().await.unwrap();
        let transport = HttpTransport::new().unwrap();
        let url = format!("{}/x", stub.base_url());

        transport.send(&url, "", &json!({})).await.unwrap();
        transport.send(&url, "undefined", &json!({})).await.unwrap();

        assert!(stub.requests().iter().all(|r| r.api_key.is_none()));
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let stub = IngestStub::start().await.unwrap();
        stub.push_responses([429, 500, 302]);
        let transport = HttpTransport::new().unwrap();
        let url = format!("{}/batch", stub.base_url());

        let limited = transport.send(&url, "", &json!([])).await.unwrap_err();
        assert!(limited.is_rate_limited());
        assert_eq!(limited.to_string(), "API Error 429 Too Many Requests (rate limited)");

        let server = transport.send(&url, "", &json!([])).await.unwrap_err();
        assert!(!server.is_rate_limited());
        assert_eq!(server.to_string(), "API Error 500 Internal Server Error");

        let redirect = transport.send(&url, "", &json!([])).await.unwrap_err();
        assert!(matches!(redirect, DeliveryError::Status { code: 302, .. }));
    }

    #[tokio::test]
    async fn test_network_failure() {
        let transport = HttpTransport::with_timeout(Duration::from_millis(500)).unwrap();
        let err = transport
            .send("http://127.0.0.1:1/api", "", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Network(_)));
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn test_cargo_sample_wire_shape() {
        let sample = CargoSample {
            time: timestamp(),
            ship_id: "buoy1".into(),
            cargo_id: "temp".into(),
            value: json!(20),
        };
        let wire = serde_json::to_value(&sample).unwrap();
        lighthouse_devkit::check_cargo_sample(&wire).unwrap();
        assert_eq!(wire["ship_id"], "buoy1");
        assert_eq!(wire["cargo_id"], "temp");
    }

    #[test]
    fn test_timestamp_is_utc_nanos() {
        let ts = timestamp();
        check_timestamp(&json!(ts)).unwrap();
        assert!(ts.ends_with('Z'));
        let fraction = ts.split('.').nth(1).unwrap();
        assert_eq!(fraction.len(), "123456789Z".len());
    }
}
