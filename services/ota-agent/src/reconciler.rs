//! Reconciliation of local files against the remote manifest.
//!
//! One cycle:
//! - Fetches and validates the manifest
//! - Short-circuits when the aggregate marker already equals its version
//! - Runs the file pipeline for each entry, in manifest order
//! - Runs the restart command once more if anything changed
//! - Advances the aggregate marker
//!
//! The daemon loop runs a cycle immediately and then on a fixed interval,
//! keeping the managed process (if any) alive between cycles.

use std::sync::Arc;
use std::time::Duration;

use ota_manifest::Manifest;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::command::{CommandLine, CommandRunner};
use crate::error::UpdateError;
use crate::fetcher::HttpFetcher;
use crate::pipeline::{FileOutcome, FileUpdater};
use crate::supervisor::SupervisorRegistry;
use crate::version_store::VersionStore;

/// Reconciliation loop configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Interval between update checks.
    pub check_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(300),
        }
    }
}

/// Summary of a cycle that reached the file pass (or skipped it).
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Version named by the manifest.
    pub remote_version: String,

    /// Aggregate marker before the cycle.
    pub local_version: String,

    /// The aggregate marker already matched; no files were examined.
    pub up_to_date: bool,

    /// Files replaced this cycle.
    pub updated: Vec<String>,

    /// Files whose own marker already matched.
    pub current: Vec<String>,

    /// Files that failed, in manifest order.
    pub failed: Vec<String>,

    /// The last per-file error.
    pub last_error: Option<UpdateError>,
}

impl CycleReport {
    /// Returns true if at least one file changed on disk.
    pub fn any_updated(&self) -> bool {
        !self.updated.is_empty()
    }

    /// Collapse into the last per-file error, if any.
    ///
    /// An error here does not mean nothing changed.
    pub fn into_result(self) -> Result<(), UpdateError> {
        match self.last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// The managed process kept alive by the daemon loop.
struct ManagedProcess {
    registry: Arc<SupervisorRegistry>,
    command: CommandLine,
}

impl ManagedProcess {
    async fn ensure(&self, reason: &str) {
        if let Err(e) = self.registry.ensure(&self.command, reason).await {
            error!(command = %self.command, error = %e, "Failed to start managed process");
        }
    }

    async fn restart(&self, reason: &str) {
        if let Err(e) = self.registry.restart(&self.command, reason).await {
            error!(command = %self.command, error = %e, "Failed to restart managed process");
        }
    }
}

/// Drives reconciliation cycles.
pub struct Reconciler {
    manifest_url: String,
    fetcher: HttpFetcher,
    versions: VersionStore,
    updater: FileUpdater,
    runner: Arc<dyn CommandRunner>,
    config: ReconcilerConfig,
    managed: Option<ManagedProcess>,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        manifest_url: impl Into<String>,
        fetcher: HttpFetcher,
        versions: VersionStore,
        runner: Arc<dyn CommandRunner>,
        config: ReconcilerConfig,
    ) -> Self {
        let updater = FileUpdater::new(fetcher.clone(), versions.clone(), Arc::clone(&runner));
        Self {
            manifest_url: manifest_url.into(),
            fetcher,
            versions,
            updater,
            runner,
            config,
            managed: None,
        }
    }

    /// Keep `command` running through `registry` while the daemon loop runs.
    pub fn with_managed_process(mut self, registry: Arc<SupervisorRegistry>, command: CommandLine) -> Self {
        self.managed = Some(ManagedProcess { registry, command });
        self
    }

    /// Run one cycle and return its last per-file error, if any.
    pub async fn check_once(&self) -> Result<(), UpdateError> {
        self.run_cycle().await?.into_result()
    }

    /// Run one reconciliation cycle.
    ///
    /// `Err` is returned only for cycle-level failures, before any file is
    /// touched or from the post-pass restart. Per-file failures are in the
    /// report.
    pub async fn run_cycle(&self) -> Result<CycleReport, UpdateError> {
        debug!(url = %self.manifest_url, "Checking for updates");

        let manifest = self.fetch_manifest().await?;
        let restart = manifest.restart_command().and_then(CommandLine::parse);

        let local_version = match self.versions.read_aggregate() {
            Ok(local) => local,
            Err(e) => {
                warn!(
                    path = %self.versions.aggregate_path().display(),
                    error = %e,
                    "Failed to read local version, treating as no version"
                );
                String::new()
            }
        };

        let mut report = CycleReport {
            remote_version: manifest.version.clone(),
            local_version,
            ..CycleReport::default()
        };

        if report.local_version == manifest.version {
            info!(version = %manifest.version, "Already up to date");
            report.up_to_date = true;
            return Ok(report);
        }

        info!(
            local_version = %report.local_version,
            remote_version = %manifest.version,
            file_count = manifest.files.len(),
            "Update available"
        );

        for entry in &manifest.files {
            let version = manifest.effective_version(entry);
            match self.updater.update_file(entry, version, restart.as_ref()).await {
                Ok(FileOutcome::AlreadyCurrent) => report.current.push(entry.name.clone()),
                Ok(FileOutcome::Updated { bytes, .. }) => {
                    info!(file = %entry.name, version, bytes, "File updated");
                    report.updated.push(entry.name.clone());
                }
                Err(e) => {
                    error!(
                        file = %entry.name,
                        reason = e.reason_code(),
                        error = %e,
                        "File update failed"
                    );
                    report.failed.push(entry.name.clone());
                    report.last_error = Some(e);
                }
            }
        }

        if !report.any_updated() {
            return Ok(report);
        }

        if let Some(restart) = &restart {
            info!(command = %restart, "Running restart command after update");
            if let Err(e) = self.runner.run(restart).await {
                error!(command = %restart, error = %format!("{e:#}"), "Restart command failed");
                return Err(UpdateError::GlobalRestartFailed(format!("{e:#}")));
            }
        }

        if let Err(e) = self.versions.write_aggregate(&manifest.version) {
            warn!(
                path = %self.versions.aggregate_path().display(),
                error = %e,
                "Failed to write local version (non-fatal)"
            );
        }

        info!(
            version = %manifest.version,
            updated = report.updated.len(),
            failed = report.failed.len(),
            "Update cycle complete"
        );
        Ok(report)
    }

    async fn fetch_manifest(&self) -> Result<Manifest, UpdateError> {
        let manifest = match self.fetcher.fetch_manifest(&self.manifest_url).await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(reason = e.reason_code(), error = %e, "Failed to fetch manifest");
                return Err(e);
            }
        };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Run cycles until shutdown.
    ///
    /// The first cycle runs immediately. A cycle in flight is allowed to
    /// finish before the loop observes shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            url = %self.manifest_url,
            check_interval_secs = self.config.check_interval.as_secs(),
            "Starting update loop"
        );

        if let Some(managed) = &self.managed {
            managed.ensure("startup").await;
        }

        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Update loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        let updated = match self.run_cycle().await {
            Ok(report) => {
                if let Some(e) = &report.last_error {
                    error!(
                        reason = e.reason_code(),
                        error = %e,
                        failed = report.failed.len(),
                        "Update check completed with errors"
                    );
                }
                report.any_updated()
            }
            Err(e) => {
                error!(reason = e.reason_code(), error = %e, "Update check failed");
                false
            }
        };

        if let Some(managed) = &self.managed {
            if updated {
                managed.restart("files updated").await;
            } else {
                managed.ensure("periodic check").await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ProcessRunner;
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_reconciler_config_default() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.check_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_report_into_result() {
        let report = CycleReport::default();
        assert!(!report.any_updated());
        assert!(report.into_result().is_ok());

        let report = CycleReport {
            updated: vec!["a".to_string()],
            last_error: Some(UpdateError::GlobalRestartFailed("boom".to_string())),
            ..CycleReport::default()
        };
        assert!(report.any_updated());
        assert!(report.into_result().is_err());
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let fetcher = HttpFetcher::new(Duration::from_secs(2), 1).unwrap();
        let reconciler = Reconciler::new(
            server.uri(),
            fetcher,
            VersionStore::new(dir.path().join("version")),
            Arc::new(ProcessRunner),
            ReconcilerConfig {
                check_interval: Duration::from_secs(3600),
            },
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { reconciler.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
        assert!(!server.received_requests().await.unwrap().is_empty());
    }
}
