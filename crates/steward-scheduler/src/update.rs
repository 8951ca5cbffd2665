//! Auto-update and self-healing. A 24-hour cycle scans dependencies for
//! advisories, backs up the lockfile, optionally applies updates, and pulls
//! new commits from the source checkout; a parallel watcher notices env
//! file edits. Restarts are requested through a watch channel the process
//! supervisor listens on; this code never exec's anything itself.
//!
//! Quiet by design: a clean scan produces no notification.

use std::path::{Path, PathBuf};
use std::time::Duration;

use std::sync::Arc;

use steward_core::config::UpdateConfig;
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use steward_channels::{Notifier, NotifyLevel};

const CYCLE: Duration = Duration::from_secs(24 * 3600);
const ENV_POLL: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Clone)]
pub struct UpdateReport {
    pub advisories: usize,
    pub updated: bool,
    pub update_failed: bool,
    pub pulled_commits: bool,
}

pub struct AutoUpdater {
    config: UpdateConfig,
    notifier: Arc<dyn Notifier>,
    data_dir: PathBuf,
    restart_tx: watch::Sender<bool>,
}

impl AutoUpdater {
    pub fn new(
        config: UpdateConfig,
        notifier: Arc<dyn Notifier>,
        data_dir: impl Into<PathBuf>,
        restart_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            config,
            notifier,
            data_dir: data_dir.into(),
            restart_tx,
        }
    }

    /// Drive both loops: the daily update cycle and the env-file watcher.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        if !self.config.enabled {
            info!("auto-update disabled");
            return;
        }
        info!("auto-updater started (24h cycle)");

        let cycle = {
            let this = Arc::clone(&self);
            let shutdown = shutdown.clone();
            async move {
                loop {
                    match this.run_cycle().await {
                        Ok(report) => debug!(?report, "update cycle complete"),
                        Err(e) => error!(error = %e, "update cycle error"),
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(CYCLE) => {}
                    }
                }
            }
        };

        let watcher = {
            let this = Arc::clone(&self);
            let shutdown = shutdown.clone();
            async move { this.watch_env_file(shutdown).await }
        };

        tokio::join!(cycle, watcher);
        info!("auto-updater shutting down");
    }

    /// One full update cycle.
    pub async fn run_cycle(&self) -> Result<UpdateReport, String> {
        let mut report = UpdateReport::default();
        let repo = self.config.repo_root.clone();
        if repo.is_empty() {
            return Ok(report);
        }

        // 1. Dependency advisory scan.
        report.advisories = self.scan_dependencies(&repo).await;

        // 2. Back up the dependency manifest before touching anything.
        self.backup_lockfile(&repo);

        // 3. Apply updates. Security-only mode updates only when the scan
        //    found something.
        if report.advisories > 0 || !self.config.security_only {
            match run(&repo, "cargo", &["update"]).await {
                Ok(_) => {
                    report.updated = true;
                    self.notify(
                        &format!(
                            "Dependency update applied ({} advisories in scan).",
                            report.advisories
                        ),
                        NotifyLevel::Info,
                    )
                    .await;
                }
                Err(e) => {
                    report.update_failed = true;
                    warn!(error = %e, "cargo update failed");
                    self.notify(&format!("Dependency update failed: {e}"), NotifyLevel::Warning)
                        .await;
                }
            }
        }

        // 4. Restart after a successful update, if configured.
        if report.updated && self.config.auto_restart {
            self.request_restart("dependency update").await;
        }

        // 5. New commits on the source checkout.
        report.pulled_commits = self.check_git_updates(&repo).await;
        if report.pulled_commits && self.config.auto_restart {
            self.request_restart("new commits pulled").await;
        }

        Ok(report)
    }

    /// Count RUSTSEC advisories via cargo-audit; absence of the tool is a
    /// silent zero, never an error.
    async fn scan_dependencies(&self, repo: &str) -> usize {
        match run(repo, "cargo", &["audit", "--color", "never"]).await {
            Ok(output) => {
                let count = output.matches("RUSTSEC-").count();
                if count > 0 {
                    warn!(advisories = count, "dependency scan found advisories");
                }
                count
            }
            Err(e) => {
                debug!(error = %e, "cargo audit unavailable or failed");
                0
            }
        }
    }

    fn backup_lockfile(&self, repo: &str) {
        let src = Path::new(repo).join("Cargo.lock");
        if !src.exists() {
            return;
        }
        let backups = self.data_dir.join("backups");
        let stamp = chrono::Utc::now().format("%Y%m%d");
        if let Err(e) = std::fs::create_dir_all(&backups)
            .and_then(|_| std::fs::copy(&src, backups.join(format!("Cargo.lock.{stamp}"))))
        {
            warn!(error = %e, "lockfile backup failed");
        }
    }

    /// Fetch and fast-forward when the upstream has new commits. Returns
    /// true when commits were pulled.
    async fn check_git_updates(&self, repo: &str) -> bool {
        if run(repo, "git", &["fetch", "--quiet"]).await.is_err() {
            return false;
        }
        let local = run(repo, "git", &["rev-parse", "HEAD"]).await;
        let remote = run(repo, "git", &["rev-parse", "@{u}"]).await;
        let (Ok(local), Ok(remote)) = (local, remote) else {
            return false;
        };
        if local.trim() == remote.trim() {
            return false;
        }

        info!("upstream has new commits, pulling");
        match run(repo, "git", &["pull", "--ff-only", "--quiet"]).await {
            Ok(_) => {
                self.notify("Pulled new commits from the source repo.", NotifyLevel::Info)
                    .await;
                true
            }
            Err(e) => {
                warn!(error = %e, "git pull failed");
                self.notify(&format!("Source update failed: {e}"), NotifyLevel::Warning)
                    .await;
                false
            }
        }
    }

    /// Poll the env file's mtime; a change means credentials were edited and
    /// the process needs a restart to pick them up.
    async fn watch_env_file(&self, shutdown: CancellationToken) {
        let path = PathBuf::from(&self.config.env_file);
        let mut last_mtime = mtime(&path);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(ENV_POLL) => {}
            }
            let current = mtime(&path);
            if current != last_mtime && current.is_some() && last_mtime.is_some() {
                info!(path = %path.display(), "env file changed");
                self.notify("Environment file changed; restarting to pick it up.", NotifyLevel::Warning)
                    .await;
                self.request_restart("env file changed").await;
            }
            last_mtime = current;
        }
    }

    async fn request_restart(&self, reason: &str) {
        info!(reason, "requesting service restart");
        let _ = self.restart_tx.send(true);
    }

    async fn notify(&self, text: &str, level: NotifyLevel) {
        self.notifier.notify(text, level).await;
    }
}

fn mtime(path: &Path) -> Option<std::time::SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Run a command in a directory, returning stdout on success.
async fn run(dir: &str, program: &str, args: &[&str]) -> Result<String, String> {
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| format!("{program} spawn failed: {e}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(format!(
            "{program} exited {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).chars().take(300).collect::<String>()
        ))
    }
}
