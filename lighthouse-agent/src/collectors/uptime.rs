//! HTTP availability probe
//!
//! GETs `params.target_url` and reports timing and response facts as numbers only.
//! An unreachable target is a measurement (`http_up = 0`), not a collection error.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::redirect::Policy;
use serde_json::json;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{record, timeout_param, CollectError, Collector, MetricRecord, Params};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// CDN headers carrying a cache hit/miss verdict, checked in order
const CACHE_HEADERS: &[&str] = &[
    "x-vercel-cache",
    "cf-cache-status",
    "x-cache",
    "x-fastly-cache-status",
    "x-netlify-cache",
    "x-cache-status",
];

pub struct UptimeCollector;

#[async_trait]
impl Collector for UptimeCollector {
    async fn collect(&self, params: &Params) -> Result<Vec<MetricRecord>, CollectError> {
        let target = params
            .get("target_url")
            .filter(|t| !t.is_empty())
            .ok_or(CollectError::MissingParam("target_url"))?;
        let timeout = timeout_param(params, DEFAULT_TIMEOUT);

        // Redirects are counted, not followed
        let redirects = Arc::new(AtomicI64::new(0));
        let counter = redirects.clone();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::custom(move |attempt| {
                counter.store(attempt.previous().len() as i64, Ordering::Relaxed);
                attempt.stop()
            }))
            .build()?;

        let start = Instant::now();
        let response = client.get(target.as_str()).send().await;
        let ttfb_ms = start.elapsed().as_millis() as i64;

        let mut result = record([
            ("http_up", json!(0)),
            ("http_latency_ms", json!(ttfb_ms)),
            ("http_status_code", json!(0)),
            ("http_ttfb_ms", json!(0)),
            ("http_download_ms", json!(0)),
            ("http_response_size_bytes", json!(0)),
            ("http_redirect_count", json!(0)),
            ("http_cache_hit", json!(0)),
        ]);

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                debug!("Uptime probe to {} failed: {}", target, e);
                return Ok(vec![result]);
            }
        };

        let status = response.status().as_u16();
        let cache_hit = is_cache_hit(response.headers());
        let content_length = response.content_length();
        let size = match response.bytes().await {
            Ok(body) => body.len() as u64,
            Err(_) => content_length.unwrap_or(0),
        };
        let total_ms = start.elapsed().as_millis() as i64;

        result.extend(record([
            ("http_up", json!(1)),
            ("http_latency_ms", json!(total_ms)),
            ("http_status_code", json!(status)),
            ("http_ttfb_ms", json!(ttfb_ms)),
            ("http_download_ms", json!((total_ms - ttfb_ms).max(0))),
            ("http_response_size_bytes", json!(size)),
            ("http_redirect_count", json!(redirects.load(Ordering::Relaxed))),
            ("http_cache_hit", json!(cache_hit as i64)),
        ]));

        Ok(vec![result])
    }
}

fn is_cache_hit(headers: &HeaderMap) -> bool {
    CACHE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .map(|verdict| verdict.eq_ignore_ascii_case("hit"))
        .unwrap_or(false)
}
