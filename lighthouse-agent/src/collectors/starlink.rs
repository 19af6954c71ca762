//! Satellite dish probe
//!
//! Reads the dish's local status endpoint and normalizes a handful of link figures.
//! Unreachable dish: `starlink_connected = 0`. A body that no longer parses is an
//! error, since it means the firmware changed shape.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{record, CollectError, Collector, MetricRecord, Params};

const DEFAULT_URL: &str = "http://192.168.100.1/api/get_status_data";
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub struct StarlinkCollector;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DishStatus {
    device_state: DeviceState,
    pop_ping_drop_rate: f64,
    pop_ping_latency_ms: f64,
    downlink_throughput_bps: f64,
    uplink_throughput_bps: f64,
    dish_get_context: DishContext,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DeviceState {
    #[serde(rename = "uptimeS")]
    uptime_s: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DishContext {
    obstruction_stats: ObstructionStats,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ObstructionStats {
    fraction_obstructed: f64,
}

impl DishStatus {
    fn to_record(&self) -> MetricRecord {
        record([
            ("starlink_connected", json!(1)),
            ("starlink_uptime_seconds", json!(self.device_state.uptime_s)),
            ("starlink_latency_ms", json!(self.pop_ping_latency_ms)),
            ("starlink_packet_loss_pct", json!(self.pop_ping_drop_rate * 100.0)),
            ("starlink_downlink_mbps", json!(self.downlink_throughput_bps / 1_000_000.0)),
            ("starlink_uplink_mbps", json!(self.uplink_throughput_bps / 1_000_000.0)),
            (
                "starlink_obstruction_pct",
                json!(self.dish_get_context.obstruction_stats.fraction_obstructed * 100.0),
            ),
        ])
    }
}

#[async_trait]
impl Collector for StarlinkCollector {
    async fn collect(&self, params: &Params) -> Result<Vec<MetricRecord>, CollectError> {
        let url = params
            .get("url")
            .filter(|u| !u.is_empty())
            .map(String::as_str)
            .unwrap_or(DEFAULT_URL);

        let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
        let response = match client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Dish at {} unreachable: {}", url, e);
                return Ok(vec![record([("starlink_connected", json!(0))])]);
            }
        };

        let body = response.text().await?;
        let status: DishStatus =
            serde_json::from_str(&body).map_err(|e| CollectError::Malformed(e.to_string()))?;

        Ok(vec![status.to_record()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_fields() {
        let body = r#"{
            "deviceState": {"uptimeS": 86400},
            "popPingDropRate": 0.01,
            "popPingLatencyMs": 38.5,
            "downlinkThroughputBps": 125000000,
            "uplinkThroughputBps": 12000000,
            "dishGetContext": {"obstructionStats": {"fractionObstructed": 0.02, "validS": 100}}
        }"#;
        let status: DishStatus = serde_json::from_str(body).unwrap();
        let rec = status.to_record();

        assert_eq!(rec["starlink_connected"], 1);
        assert_eq!(rec["starlink_uptime_seconds"], 86400);
        let close = |field: &str, want: f64| {
            let got = rec[field].as_f64().unwrap();
            assert!((got - want).abs() < 1e-9, "{} = {}", field, got);
        };
        close("starlink_packet_loss_pct", 1.0);
        close("starlink_downlink_mbps", 125.0);
        close("starlink_uplink_mbps", 12.0);
        close("starlink_obstruction_pct", 2.0);
    }

    #[test]
    fn test_malformed_body_rejected() {
        assert!(serde_json::from_str::<DishStatus>("<html>login</html>").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_dish() {
        let params: Params = [("url".to_string(), "http://127.0.0.1:1/api".to_string())]
            .into_iter()
            .collect();
        let records = StarlinkCollector.collect(&params).await.unwrap();
        assert_eq!(records[0]["starlink_connected"], 0);
        assert_eq!(records[0].len(), 1);
    }
}
