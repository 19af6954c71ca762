//! Local LLM server probe
//!
//! Checks `/api/version` for liveness, then `/api/ps` for what is loaded. A server
//! that does not answer is reported as `ollama_up = 0`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{record, CollectError, Collector, MetricRecord, Params};

const DEFAULT_URL: &str = "http://localhost:11434";
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const MB: i64 = 1024 * 1024;

pub struct OllamaCollector;

#[derive(Debug, Default, Deserialize)]
struct RunningModels {
    #[serde(default)]
    models: Vec<RunningModel>,
}

#[derive(Debug, Default, Deserialize)]
struct RunningModel {
    #[serde(default)]
    size: i64,
    #[serde(default)]
    size_vram: i64,
}

#[async_trait]
impl Collector for OllamaCollector {
    async fn collect(&self, params: &Params) -> Result<Vec<MetricRecord>, CollectError> {
        let base = params
            .get("url")
            .filter(|u| !u.is_empty())
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_URL.to_string());

        let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;

        let start = Instant::now();
        if let Err(e) = client.get(format!("{}/api/version", base)).send().await {
            debug!("Ollama at {} unreachable: {}", base, e);
            return Ok(vec![record([("ollama_up", json!(0))])]);
        }
        let latency_ms = start.elapsed().as_millis() as i64;

        // Older servers lack /api/ps; they simply report nothing loaded
        let running = match client.get(format!("{}/api/ps", base)).send().await {
            Ok(resp) if resp.status().is_success() => {
                resp.json::<RunningModels>().await.unwrap_or_default()
            }
            _ => RunningModels::default(),
        };

        let (vram, size) = running
            .models
            .iter()
            .fold((0i64, 0i64), |(v, s), m| (v + m.size_vram, s + m.size));

        Ok(vec![record([
            ("ollama_up", json!(1)),
            ("ollama_latency_ms", json!(latency_ms)),
            ("ollama_models_loaded", json!(running.models.len())),
            ("ollama_vram_usage_mb", json!(vram / MB)),
            ("ollama_model_size_mb", json!(size / MB)),
        ])])
    }
}
