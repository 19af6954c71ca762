//! Host resource collector
//!
//! One aggregate record per cycle:
//! - CPU usage, core count and load averages
//! - Memory and swap usage
//! - Root filesystem usage
//! - Cumulative disk and network IO
//! - Uptime and process count

use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use sysinfo::{Disks, Networks, System};
use tracing::debug;

use super::{record, CollectError, Collector, MetricRecord, Params};

const MB: u64 = 1024 * 1024;
const GB: u64 = 1024 * 1024 * 1024;

pub struct SystemCollector;

#[async_trait]
impl Collector for SystemCollector {
    async fn collect(&self, _params: &Params) -> Result<Vec<MetricRecord>, CollectError> {
        debug!("Collecting system metrics...");

        let mut sys = System::new_all();
        sys.refresh_all();

        // Wait a moment for accurate CPU readings
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        sys.refresh_cpu_usage();

        let mut snapshot = MetricRecord::new();
        snapshot.extend(cpu_fields(&sys));
        snapshot.extend(memory_fields(&sys));
        snapshot.extend(disk_fields(&sys));
        snapshot.extend(network_fields());
        snapshot.extend(record([
            ("uptime_seconds", json!(System::uptime())),
            ("process_count", json!(sys.processes().len())),
        ]));

        Ok(vec![snapshot])
    }
}

fn cpu_fields(sys: &System) -> MetricRecord {
    let mut fields = record([
        ("cpu_percent", json!(sys.global_cpu_info().cpu_usage())),
        ("cpu_cores", json!(sys.cpus().len())),
    ]);

    // Load averages are not available on Windows
    if cfg!(unix) {
        let load = System::load_average();
        fields.extend(record([
            ("load_1", json!(load.one)),
            ("load_5", json!(load.five)),
            ("load_15", json!(load.fifteen)),
        ]));
    }
    fields
}

fn memory_fields(sys: &System) -> MetricRecord {
    let total = sys.total_memory();
    let used = sys.used_memory();
    let swap_total = sys.total_swap();
    let swap_used = sys.used_swap();

    record([
        ("ram_used_percent", json!(percent(used, total))),
        ("ram_total_mb", json!(total / MB)),
        ("ram_used_mb", json!(used / MB)),
        ("ram_free_mb", json!(sys.free_memory() / MB)),
        ("swap_used_percent", json!(percent(swap_used, swap_total))),
        ("swap_used_mb", json!(swap_used / MB)),
    ])
}

fn disk_fields(sys: &System) -> MetricRecord {
    let mut fields = MetricRecord::new();

    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
        .or_else(|| disks.list().first());

    if let Some(disk) = root {
        let total = disk.total_space();
        let free = disk.available_space();
        fields.extend(record([
            ("disk_used_percent", json!(percent(total.saturating_sub(free), total))),
            ("disk_free_gb", json!(free / GB)),
            ("disk_total_gb", json!(total / GB)),
        ]));
    }

    let (read, written) = sys.processes().values().fold((0u64, 0u64), |(r, w), p| {
        let usage = p.disk_usage();
        (r + usage.total_read_bytes, w + usage.total_written_bytes)
    });
    fields.extend(record([
        ("disk_read_bytes", json!(read)),
        ("disk_write_bytes", json!(written)),
    ]));

    fields
}

fn network_fields() -> MetricRecord {
    let networks = Networks::new_with_refreshed_list();
    let (sent, recv) = (&networks)
        .into_iter()
        .fold((0u64, 0u64), |(s, r), (_name, data)| {
            (s + data.total_transmitted(), r + data.total_received())
        });

    record([
        ("net_bytes_sent", json!(sent)),
        ("net_bytes_recv", json!(recv)),
    ])
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_system_snapshot() {
        let records = SystemCollector.collect(&Params::new()).await.unwrap();
        assert_eq!(records.len(), 1);

        let snapshot = &records[0];
        assert!(snapshot["cpu_cores"].as_u64().unwrap() > 0);
        assert!(snapshot["ram_total_mb"].as_u64().unwrap() > 0);
        assert!(snapshot.contains_key("uptime_seconds"));
        assert!(snapshot.contains_key("net_bytes_sent"));
        assert!(snapshot.values().all(|v| v.is_number()));
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(1, 4), 25.0);
        assert_eq!(percent(5, 0), 0.0);
    }
}
