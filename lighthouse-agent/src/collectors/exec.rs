//! Script collector
//!
//! Runs `params.command` (or `params.script_path`) and reads JSON from its stdout:
//! a line holding an object is one record, a line holding an array of objects adds
//! all of them. Anything else on stdout is ignored.

use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, warn};

use super::{timeout_param, CollectError, Collector, MetricRecord, Params};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ExecCollector;

#[async_trait]
impl Collector for ExecCollector {
    async fn collect(&self, params: &Params) -> Result<Vec<MetricRecord>, CollectError> {
        let command = params
            .get("command")
            .or_else(|| params.get("script_path"))
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .ok_or(CollectError::MissingParam("command' or 'script_path"))?;

        let timeout = timeout_param(params, DEFAULT_TIMEOUT);
        let mut parts = command.split_whitespace();
        let head = parts.next().ok_or(CollectError::MissingParam("command"))?;

        debug!("Executing collector command: {} (timeout: {:?})", command, timeout);

        let output = tokio::time::timeout(
            timeout,
            AsyncCommand::new(head)
                .args(parts)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| CollectError::Timeout {
            what: "command".to_string(),
            after: timeout,
        })?
        .map_err(|e| CollectError::Command(format!("{}: {}", head, e)))?;

        // A failing script still reports whatever it printed before exiting
        if !output.status.success() {
            warn!(
                "Command '{}' exited with {}: {}",
                command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(parse_json_lines(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn parse_json_lines(stdout: &str) -> Vec<MetricRecord> {
    let mut records = Vec::new();

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(row)) => records.push(row),
            Ok(Value::Array(rows)) => {
                records.extend(rows.into_iter().filter_map(|row| match row {
                    Value::Object(obj) => Some(obj),
                    _ => None,
                }));
            }
            _ => {}
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parse_objects_arrays_and_noise() {
        let stdout = "starting up\n{\"temp\": 20}\n[{\"a\": 1}, {\"b\": 2}, 3]\nnot json\n\n";
        let records = parse_json_lines(stdout);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["temp"], 20);
        assert_eq!(records[1]["a"], 1);
        assert_eq!(records[2]["b"], 2);
    }

    #[tokio::test]
    async fn test_missing_command() {
        let err = ExecCollector.collect(&Params::new()).await.unwrap_err();
        assert!(matches!(err, CollectError::MissingParam(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_echo_json() {
        let records = ExecCollector
            .collect(&params(&[("command", r#"echo {"humidity":55}"#)]))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["humidity"], 55);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_script_path_alias_and_empty_output() {
        let records = ExecCollector
            .collect(&params(&[("script_path", "true")]))
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_timeout() {
        let err = ExecCollector
            .collect(&params(&[("command", "sleep 5"), ("timeout_ms", "100")]))
            .await
            .unwrap_err();
        assert!(matches!(err, CollectError::Timeout { .. }));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_error() {
        let err = ExecCollector
            .collect(&params(&[("command", "definitely-not-a-real-binary-4242")]))
            .await
            .unwrap_err();
        assert!(matches!(err, CollectError::Command(_)));
    }
}
