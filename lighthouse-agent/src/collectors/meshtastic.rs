//! Mesh radio probe
//!
//! With an `ip` param the node's HTTP JSON report is fetched and flattened into one
//! record (nested keys joined with `_`, booleans as 0/1, arrays and nulls dropped).
//! Without it the `meshtastic` CLI is asked for `--info` over USB/serial and only the
//! connection status is reported.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use super::{record, timeout_param, CollectError, Collector, MetricRecord, Params};

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const CLI_TIMEOUT: Duration = Duration::from_secs(20);

pub struct MeshtasticCollector;

#[async_trait]
impl Collector for MeshtasticCollector {
    async fn collect(&self, params: &Params) -> Result<Vec<MetricRecord>, CollectError> {
        match params.get("ip").map(|ip| ip.trim()).filter(|ip| !ip.is_empty()) {
            Some(ip) => fetch_report(ip).await,
            None => probe_cli(timeout_param(params, CLI_TIMEOUT)).await,
        }
    }
}

async fn fetch_report(ip: &str) -> Result<Vec<MetricRecord>, CollectError> {
    let url = format!("http://{}/json/report", ip);
    debug!("Fetching mesh report from {}", url);

    let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
    let body = client.get(&url).send().await?.text().await?;
    let report: Value =
        serde_json::from_str(&body).map_err(|e| CollectError::Malformed(e.to_string()))?;

    match report {
        Value::Object(_) => {
            let mut flat = MetricRecord::new();
            flatten_into(&mut flat, "", &report);
            Ok(vec![flat])
        }
        _ => Err(CollectError::Malformed("report is not a JSON object".into())),
    }
}

async fn probe_cli(timeout: Duration) -> Result<Vec<MetricRecord>, CollectError> {
    let output = tokio::time::timeout(
        timeout,
        AsyncCommand::new("meshtastic")
            .arg("--info")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| CollectError::Timeout {
        what: "meshtastic --info".to_string(),
        after: timeout,
    })?
    .map_err(|e| CollectError::Command(format!("meshtastic CLI unavailable: {}", e)))?;

    if !output.status.success() {
        return Err(CollectError::Command(format!(
            "meshtastic --info exited with {}",
            output.status
        )));
    }

    Ok(vec![record([
        ("status", json!("connected")),
        ("raw_output_length", json!(output.stdout.len() + output.stderr.len())),
        ("method", json!("usb_cli")),
    ])])
}

fn flatten_into(out: &mut MetricRecord, prefix: &str, value: &Value) {
    let key = |name: &str| {
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}_{}", prefix, name)
        }
    };

    match value {
        Value::Object(map) => {
            for (name, inner) in map {
                flatten_into(out, &key(name), inner);
            }
        }
        Value::Number(_) | Value::String(_) => {
            out.insert(prefix.to_string(), value.clone());
        }
        Value::Bool(b) => {
            out.insert(prefix.to_string(), json!(*b as i64));
        }
        Value::Array(_) | Value::Null => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_report() {
        let report = json!({
            "data": {
                "airtime": {"channel_utilization": 4.5, "seconds_since_boot": 3600},
                "power": {"battery_percent": 87, "has_battery": true},
                "wifi": {"ip": "10.0.0.9", "rssi": -61},
                "neighbors": [1, 2, 3],
                "note": null
            },
            "status": "ok"
        });

        let mut flat = MetricRecord::new();
        flatten_into(&mut flat, "", &report);

        assert_eq!(flat["data_airtime_channel_utilization"], 4.5);
        assert_eq!(flat["data_power_battery_percent"], 87);
        assert_eq!(flat["data_power_has_battery"], 1);
        assert_eq!(flat["data_wifi_ip"], "10.0.0.9");
        assert_eq!(flat["status"], "ok");
        assert!(!flat.contains_key("data_neighbors"));
        assert!(!flat.contains_key("data_note"));
        assert!(flat.values().all(|v| v.is_number() || v.is_string()));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_error() {
        let params: Params = [("ip".to_string(), "127.0.0.1:1".to_string())]
            .into_iter()
            .collect();
        let err = MeshtasticCollector.collect(&params).await.unwrap_err();
        assert!(matches!(err, CollectError::Probe(_)));
    }
}
