//! Auto-updater using GitHub releases
//!
//! Checks the latest release at start and then once a day. When a newer build exists
//! for this platform it is downloaded, swapped in for the running executable, and the
//! process exits with status 1 so the service manager restarts the new binary.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Build version; `dev` builds never self-update
pub const VERSION: &str = match option_env!("LIGHTHOUSE_BUILD_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

pub const REPO_SLUG: &str = "harborscale/harbor-lighthouse";

pub const CHECK_INTERVAL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone)]
pub struct UpdateInfo {
    pub current_version: String,
    pub latest_version: String,
    pub download_url: String,
    pub is_update_available: bool,
}

pub struct AgentUpdater {
    client: reqwest::Client,
    repo: String,
    current_version: String,
}

impl AgentUpdater {
    pub fn new(current_version: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("harbor-lighthouse/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build update client")?;

        Ok(Self {
            client,
            repo: REPO_SLUG.to_string(),
            current_version: current_version.trim_start_matches('v').to_string(),
        })
    }

    /// Check if an update is available
    pub async fn check_update(&self) -> Result<UpdateInfo> {
        let url = format!("https://api.github.com/repos/{}/releases/latest", self.repo);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to reach GitHub")?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to fetch release info: {}", response.status());
        }

        let release: GitHubRelease = response.json().await.context("Malformed release info")?;
        let latest_version = release.tag_name.trim_start_matches('v');

        let suffix = platform_suffix();
        let asset = release
            .assets
            .iter()
            .find(|a| a.name.to_lowercase().contains(&suffix))
            .ok_or_else(|| anyhow::anyhow!("No asset found for platform: {}", suffix))?;

        Ok(UpdateInfo {
            current_version: self.current_version.clone(),
            latest_version: latest_version.to_string(),
            download_url: asset.browser_download_url.clone(),
            is_update_available: is_newer_version(&self.current_version, latest_version),
        })
    }

    /// Download and install the release described by `update_info`
    pub async fn perform_update(&self, update_info: &UpdateInfo) -> Result<()> {
        if !update_info.is_update_available {
            return Ok(());
        }

        info!(
            "Updating from {} to {}",
            update_info.current_version, update_info.latest_version
        );

        let temp_path = self.download_update(&update_info.download_url).await?;
        let current_exe = std::env::current_exe().context("Cannot locate running executable")?;

        let result = replace_executable(&temp_path, &current_exe);
        let _ = std::fs::remove_file(&temp_path);
        result
    }

    async fn download_update(&self, url: &str) -> Result<PathBuf> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Download failed: {}", response.status());
        }

        let temp_path =
            std::env::temp_dir().join(format!("harbor-lighthouse-update-{}", uuid::Uuid::new_v4()));
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            anyhow::bail!("Downloaded binary is empty");
        }
        tokio::fs::write(&temp_path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o755))?;
        }

        Ok(temp_path)
    }
}

/// Stage next to the running binary, then rename over it
#[cfg(unix)]
fn replace_executable(new_path: &Path, current_path: &Path) -> Result<()> {
    let staged = current_path.with_extension("new");
    std::fs::copy(new_path, &staged)
        .with_context(|| format!("Failed to stage {}", staged.display()))?;
    std::fs::rename(&staged, current_path)
        .with_context(|| format!("Failed to replace {}", current_path.display()))?;
    Ok(())
}

#[cfg(windows)]
fn replace_executable(new_path: &Path, _current_path: &Path) -> Result<()> {
    self_replace::self_replace(new_path).context("Failed to replace running executable")?;
    Ok(())
}

/// `os_arch` tag as used in release asset names, e.g. `linux_amd64`
fn platform_suffix() -> String {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    };
    format!("{}_{}", os, arch)
}

fn is_newer_version(current: &str, latest: &str) -> bool {
    let parse = |v: &str| -> Vec<u32> {
        v.trim_start_matches('v')
            .split(['-', '+'])
            .next()
            .unwrap_or_default()
            .split('.')
            .map(|s| s.parse().unwrap_or(0))
            .collect()
    };
    let (current, latest) = (parse(current), parse(latest));

    for (c, l) in current.iter().zip(latest.iter()) {
        if l != c {
            return l > c;
        }
    }
    latest.len() > current.len()
}

/// Background update loop. Never affects workers; failures are only logged.
pub async fn run_background(enabled: bool) {
    if !enabled {
        info!("Auto-update disabled");
        return;
    }
    if VERSION == "dev" {
        debug!("Development build, auto-update skipped");
        return;
    }

    let updater = match AgentUpdater::new(VERSION) {
        Ok(updater) => updater,
        Err(e) => {
            warn!("Auto-update unavailable: {:#}", e);
            return;
        }
    };

    let mut ticker = tokio::time::interval(CHECK_INTERVAL);
    loop {
        ticker.tick().await;

        match updater.check_update().await {
            Ok(update) if update.is_update_available => {
                match updater.perform_update(&update).await {
                    Ok(()) => {
                        info!(
                            "Updated to {}, exiting so the service manager restarts the new binary",
                            update.latest_version
                        );
                        std::process::exit(1);
                    }
                    Err(e) => error!("Auto-update failed: {:#}", e),
                }
            }
            Ok(update) => debug!("Up to date ({})", update.current_version),
            Err(e) => warn!("Auto-update check failed: {:#}", e),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
}
