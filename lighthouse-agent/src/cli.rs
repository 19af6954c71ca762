//! Command line surface
//!
//! Every command is a one-shot edit or report on the files in the data directory.
//! With no command the daemon runs in the foreground.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::collections::HashMap;

use crate::config::{AgentConfig, Instance, Paths};
use crate::status::{InstanceStatus, StatusLedger};
use crate::updater::VERSION;

/// Harbor Lighthouse - edge telemetry agent
#[derive(Parser, Debug)]
#[command(name = "harbor-lighthouse", disable_version_flag = true, about, long_about = None)]
pub struct Args {
    /// Show version
    #[arg(long)]
    pub version: bool,

    /// Show every instance with its last known status
    #[arg(long)]
    pub list: bool,

    /// Show log lines of one instance
    #[arg(long, value_name = "NAME")]
    pub logs: Option<String>,

    /// Add an instance (requires --name and --harbor-id)
    #[arg(long)]
    pub add: bool,

    /// Remove an instance
    #[arg(long, value_name = "NAME")]
    pub remove: Option<String>,

    /// Enable or disable the background updater
    #[arg(long, value_name = "true|false")]
    pub autoupdate: Option<bool>,

    /// Instance name (ship id)
    #[arg(long)]
    pub name: Option<String>,

    /// Harbor id
    #[arg(long = "harbor-id")]
    pub harbor_id: Option<String>,

    /// API key
    #[arg(long)]
    pub key: Option<String>,

    /// Collector source (linux, docker, exec, uptime, ...)
    #[arg(long, default_value = "linux")]
    pub source: String,

    /// Harbor type (general, gps, ...)
    #[arg(long = "type", default_value = "general")]
    pub harbor_type: String,

    /// Collector parameter, repeatable
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    /// Seconds between collections
    #[arg(long)]
    pub interval: Option<i64>,

    /// Max samples per cargo batch
    #[arg(long = "batch-size")]
    pub batch_size: Option<i64>,

    /// Override the ingest base URL
    #[arg(long)]
    pub endpoint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum Command {
    Version,
    AutoUpdate(bool),
    List,
    Logs(String),
    Add(Instance),
    Remove(String),
    Daemon,
}

impl Args {
    /// Pick the command, first match wins
    pub fn action(self) -> Result<Command> {
        if self.version {
            return Ok(Command::Version);
        }
        if let Some(enabled) = self.autoupdate {
            return Ok(Command::AutoUpdate(enabled));
        }
        if self.list {
            return Ok(Command::List);
        }
        if let Some(name) = self.logs.filter(|n| !n.is_empty()) {
            return Ok(Command::Logs(name));
        }
        if self.add {
            let (Some(name), Some(harbor_id)) = (
                self.name.filter(|n| !n.is_empty()),
                self.harbor_id.filter(|h| !h.is_empty()),
            ) else {
                anyhow::bail!("--name and --harbor-id are required");
            };

            return Ok(Command::Add(Instance {
                name,
                harbor_id,
                api_key: self.key.unwrap_or_default(),
                source: self.source,
                harbor_type: self.harbor_type,
                interval: self.interval.unwrap_or(0),
                max_batch_size: self.batch_size.unwrap_or(0),
                endpoint: self.endpoint.filter(|e| !e.is_empty()),
                params: self.params.into_iter().collect::<HashMap<_, _>>(),
            }));
        }
        if let Some(name) = self.remove.filter(|n| !n.is_empty()) {
            return Ok(Command::Remove(name));
        }
        Ok(Command::Daemon)
    }
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))
}

pub fn print_version() {
    println!("Harbor Lighthouse {}", VERSION);
}

pub async fn set_auto_update(paths: &Paths, enabled: bool) -> Result<()> {
    let path = paths.config_file();
    let mut config = AgentConfig::load(&path).await?;
    config.set_auto_update(enabled);
    config.save(&path).await?;
    println!("✅ Auto-Update set to: {}", enabled);
    Ok(())
}

pub async fn add_instance(paths: &Paths, instance: Instance) -> Result<()> {
    let path = paths.config_file();
    let mut config = AgentConfig::load(&path).await?;
    config.add(instance)?;
    config.save(&path).await?;
    println!("✅ Added instance. Restart service to apply.");
    Ok(())
}

pub async fn remove_instance(paths: &Paths, name: &str) -> Result<()> {
    let path = paths.config_file();
    let mut config = AgentConfig::load(&path).await?;
    if config.remove(name) {
        config.save(&path).await?;
        println!("🗑️ Removed instance.");
    } else {
        println!("❌ Instance not found.");
    }
    Ok(())
}

pub async fn list(paths: &Paths) -> Result<()> {
    let config = AgentConfig::load(&paths.config_file()).await?;
    let statuses = StatusLedger::read_file(&paths.status_file());
    let now = Utc::now().timestamp();

    println!("📋 Harbor Lighthouse {}", VERSION);
    if config.instances.is_empty() {
        println!("   (No instances)");
    }
    for instance in &config.instances {
        println!("{}", status_line(instance, statuses.get(&instance.name), now));
    }
    Ok(())
}

pub async fn show_logs(paths: &Paths, name: &str) -> Result<()> {
    let path = paths.log_file();
    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Cannot read {}", path.display()))?;

    for line in log_lines_for(&content, name) {
        println!("{}", line);
    }
    Ok(())
}

fn status_line(instance: &Instance, status: Option<&InstanceStatus>, now: i64) -> String {
    let (icon, message) = match status.filter(|s| s.last_contact > 0) {
        None => ("🔴", "Offline".to_string()),
        Some(s) => {
            let ago = (now - s.last_contact).max(0);
            if s.healthy {
                ("🟢", format!("Healthy ({}s ago)", ago))
            } else {
                ("⚠️ ", format!("Error: {} ({}s ago)", s.last_error, ago))
            }
        }
    };

    format!(
        "{} [{}] {} -> {}\n     └─ {}",
        icon, instance.name, instance.source, instance.harbor_id, message
    )
}

/// Lines logged inside the worker span of `name`
fn log_lines_for<'a>(content: &'a str, name: &str) -> Vec<&'a str> {
    let tag = format!("instance{{name={}}}", name);
    content.lines().filter(|line| line.contains(&tag)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::file_layer;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    fn parse(args: &[&str]) -> Args {
        let argv = std::iter::once("harbor-lighthouse").chain(args.iter().copied());
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_no_flags_runs_daemon() {
        assert_eq!(parse(&[]).action().unwrap(), Command::Daemon);
    }

    #[test]
    fn test_add_command() {
        let cmd = parse(&[
            "--add", "--name", "buoy1", "--harbor-id", "786", "--type", "gps",
            "--param", "target_url=http://x/?a=b", "--param", "timeout_ms=500",
            "--interval", "5", "--endpoint", "http://localhost:8080",
        ])
        .action()
        .unwrap();

        let Command::Add(instance) = cmd else {
            panic!("expected add, got {:?}", cmd);
        };
        assert_eq!(instance.name, "buoy1");
        assert_eq!(instance.source, "linux");
        assert_eq!(instance.harbor_type, "gps");
        assert_eq!(instance.params["target_url"], "http://x/?a=b");
        assert_eq!(instance.params["timeout_ms"], "500");
        assert_eq!(instance.interval, 5);
        assert_eq!(instance.max_batch_size, 0);
        assert_eq!(instance.endpoint.as_deref(), Some("http://localhost:8080"));
    }

    #[test]
    fn test_add_requires_name_and_id() {
        assert!(parse(&["--add", "--name", "x"]).action().is_err());
    }

    #[test]
    fn test_other_commands() {
        assert_eq!(parse(&["--version"]).action().unwrap(), Command::Version);
        assert_eq!(parse(&["--list"]).action().unwrap(), Command::List);
        assert_eq!(parse(&["--remove", "x"]).action().unwrap(), Command::Remove("x".into()));
        assert_eq!(parse(&["--logs", "x"]).action().unwrap(), Command::Logs("x".into()));
        assert_eq!(
            parse(&["--autoupdate", "false"]).action().unwrap(),
            Command::AutoUpdate(false)
        );
    }

    #[test]
    fn test_bad_param_rejected() {
        let argv = ["harbor-lighthouse", "--param", "novalue"];
        assert!(Args::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_status_lines() {
        let instance = Instance {
            name: "buoy1".into(),
            harbor_id: "786".into(),
            source: "linux".into(),
            ..Default::default()
        };

        assert!(status_line(&instance, None, 100).contains("Offline"));

        let healthy = InstanceStatus { last_contact: 90, last_error: String::new(), healthy: true };
        assert!(status_line(&instance, Some(&healthy), 100).contains("Healthy (10s ago)"));

        let failed = InstanceStatus {
            last_contact: 40,
            last_error: "API Error 500".into(),
            healthy: false,
        };
        let line = status_line(&instance, Some(&failed), 100);
        assert!(line.contains("Error: API Error 500 (60s ago)"));
        assert!(line.starts_with("⚠️  [buoy1] linux -> 786"));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Log file content as the daemon would write it
    fn daemon_log(emit: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber =
            tracing_subscriber::registry().with(file_layer(move || writer.clone()));
        tracing::subscriber::with_default(subscriber, emit);

        let bytes = captured.0.lock().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_log_filter() {
        let content = daemon_log(|| {
            tracing::info!("Starting");
            tracing::info_span!("instance", name = %"buoy1")
                .in_scope(|| tracing::info!("Started"));
            tracing::info_span!("instance", name = %"buoy10")
                .in_scope(|| tracing::warn!("Send failed"));
        });

        let lines = log_lines_for(&content, "buoy1");
        assert_eq!(lines.len(), 1, "log content:\n{}", content);
        assert!(lines[0].ends_with("Started"));
        assert_eq!(log_lines_for(&content, "buoy10").len(), 1);
        assert!(log_lines_for(&content, "buoy2").is_empty());
    }

    #[tokio::test]
    async fn test_add_remove_and_autoupdate_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::new(dir.path());
        let instance = Instance { name: "a".into(), harbor_id: "1".into(), ..Default::default() };

        add_instance(&paths, instance.clone()).await.unwrap();
        assert!(add_instance(&paths, instance).await.is_err());
        set_auto_update(&paths, false).await.unwrap();

        let config = AgentConfig::load(&paths.config_file()).await.unwrap();
        assert_eq!(config.instances.len(), 1);
        assert!(!config.auto_update);

        remove_instance(&paths, "a").await.unwrap();
        let config = AgentConfig::load(&paths.config_file()).await.unwrap();
        assert!(config.instances.is_empty());
    }
}
