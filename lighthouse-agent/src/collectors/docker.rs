//! Container engine collector
//!
//! Talks to the engine through the `docker` CLI with JSON output formats. Container
//! counts come from `docker ps -a`; engine-wide facts come from `docker info`. When
//! the info call fails the counts are still reported, flagged with `docker_error = 1`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, warn};

use super::{record, timeout_param, CollectError, Collector, MetricRecord, Params};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DockerCollector;

#[derive(Debug, Deserialize)]
struct ContainerRow {
    #[serde(rename = "State", default)]
    state: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct EngineInfo {
    images: i64,
    #[serde(rename = "NCPU")]
    ncpu: i64,
    mem_total: i64,
    #[serde(rename = "NGoroutines")]
    n_goroutines: i64,
    #[serde(rename = "NFd")]
    n_fd: i64,
    n_events_listener: i64,
    swap_limit: bool,
    memory_limit: bool,
    oom_kill_disable: bool,
    #[serde(rename = "IPv4Forwarding")]
    ipv4_forwarding: bool,
    swarm: SwarmInfo,
    plugins: PluginInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SwarmInfo {
    local_node_state: String,
    managers: i64,
    nodes: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct PluginInfo {
    volume: Option<Vec<String>>,
}

#[derive(Debug, Default, PartialEq)]
struct StateCounts {
    total: i64,
    running: i64,
    paused: i64,
    exited: i64,
    created: i64,
    restarting: i64,
    removing: i64,
    dead: i64,
}

#[async_trait]
impl Collector for DockerCollector {
    async fn collect(&self, params: &Params) -> Result<Vec<MetricRecord>, CollectError> {
        let timeout = timeout_param(params, DEFAULT_TIMEOUT);

        let listing = docker(&["ps", "-a", "--format", "{{json .}}"], timeout).await?;
        let counts = count_states(&listing);
        debug!("Docker reports {} containers", counts.total);

        let mut metrics = record([
            ("docker_containers_total", json!(counts.total)),
            ("docker_containers_running", json!(counts.running)),
            ("docker_containers_paused", json!(counts.paused)),
            ("docker_containers_exited", json!(counts.exited)),
        ]);

        let info = match docker(&["info", "--format", "{{json .}}"], timeout).await {
            Ok(raw) => serde_json::from_str::<EngineInfo>(raw.trim())
                .map_err(|e| CollectError::Malformed(e.to_string())),
            Err(e) => Err(e),
        };

        match info {
            Ok(info) => metrics.extend(engine_fields(&counts, &info)),
            Err(e) => {
                warn!("docker info failed: {}", e);
                metrics.insert("docker_error".into(), json!(1));
            }
        }

        Ok(vec![metrics])
    }
}

async fn docker(args: &[&str], timeout: Duration) -> Result<String, CollectError> {
    let output = tokio::time::timeout(
        timeout,
        AsyncCommand::new("docker")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| CollectError::Timeout {
        what: format!("docker {}", args[0]),
        after: timeout,
    })?
    .map_err(|e| CollectError::Command(format!("docker: {}", e)))?;

    if !output.status.success() {
        return Err(CollectError::Command(format!(
            "docker {} exited with {}: {}",
            args[0],
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn count_states(listing: &str) -> StateCounts {
    let mut counts = StateCounts::default();

    for row in listing
        .lines()
        .filter_map(|line| serde_json::from_str::<ContainerRow>(line.trim()).ok())
    {
        counts.total += 1;
        match row.state.to_lowercase().as_str() {
            "running" => counts.running += 1,
            "paused" => counts.paused += 1,
            "exited" => counts.exited += 1,
            "created" => counts.created += 1,
            "restarting" => counts.restarting += 1,
            "removing" => counts.removing += 1,
            "dead" => counts.dead += 1,
            _ => {}
        }
    }

    counts
}

fn swarm_state_code(state: &str) -> i64 {
    match state.to_lowercase().as_str() {
        "inactive" => 0,
        "pending" => 1,
        "active" => 2,
        "error" => 3,
        "locked" => 4,
        _ => -1,
    }
}

fn engine_fields(counts: &StateCounts, info: &EngineInfo) -> MetricRecord {
    let volumes = info.plugins.volume.as_ref().map_or(0, Vec::len);

    record([
        ("docker_images_total", json!(info.images)),
        ("docker_volumes_total", json!(volumes)),
        ("docker_goroutines", json!(info.n_goroutines)),
        ("docker_containers_created", json!(counts.created)),
        ("docker_containers_restarting", json!(counts.restarting)),
        ("docker_containers_removing", json!(counts.removing)),
        ("docker_containers_dead", json!(counts.dead)),
        ("docker_ncpu", json!(info.ncpu)),
        ("docker_mem_total_bytes", json!(info.mem_total)),
        ("docker_file_descriptors", json!(info.n_fd)),
        ("docker_events_listeners", json!(info.n_events_listener)),
        ("docker_swarm_state", json!(swarm_state_code(&info.swarm.local_node_state))),
        ("docker_swarm_managers", json!(info.swarm.managers)),
        ("docker_swarm_nodes", json!(info.swarm.nodes)),
        ("docker_cap_swap_limit", json!(info.swap_limit as i64)),
        ("docker_cap_memory_limit", json!(info.memory_limit as i64)),
        ("docker_cap_oom_kill_disable", json!(info.oom_kill_disable as i64)),
        ("docker_cap_ipv4_forwarding", json!(info.ipv4_forwarding as i64)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_states() {
        let listing = r#"{"ID":"a1","State":"running","Names":"web"}
{"ID":"b2","State":"exited","Names":"job"}
{"ID":"c3","State":"running","Names":"db"}
{"ID":"d4","State":"paused","Names":"cache"}
garbage line
"#;
        let counts = count_states(listing);
        assert_eq!(
            counts,
            StateCounts {
                total: 4,
                running: 2,
                paused: 1,
                exited: 1,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_engine_info_fields() {
        let raw = r#"{
            "Images": 12, "NCPU": 8, "MemTotal": 16777216000, "NGoroutines": 44,
            "NFd": 30, "NEventsListener": 0, "SwapLimit": true, "MemoryLimit": true,
            "OomKillDisable": false, "IPv4Forwarding": true,
            "Swarm": {"LocalNodeState": "inactive", "Managers": 0, "Nodes": 0},
            "Plugins": {"Volume": ["local"], "Network": ["bridge", "host"]},
            "ServerVersion": "27.0.1"
        }"#;
        let info: EngineInfo = serde_json::from_str(raw).unwrap();
        let fields = engine_fields(&StateCounts::default(), &info);

        assert_eq!(fields["docker_images_total"], 12);
        assert_eq!(fields["docker_ncpu"], 8);
        assert_eq!(fields["docker_volumes_total"], 1);
        assert_eq!(fields["docker_swarm_state"], 0);
        assert_eq!(fields["docker_cap_ipv4_forwarding"], 1);
        assert_eq!(fields["docker_cap_oom_kill_disable"], 0);
        assert!(fields.values().all(|v| v.is_number()));
    }

    #[test]
    fn test_swarm_state_codes() {
        assert_eq!(swarm_state_code("active"), 2);
        assert_eq!(swarm_state_code("Locked"), 4);
        assert_eq!(swarm_state_code(""), -1);
    }
}
