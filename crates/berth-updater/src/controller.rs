//! Update lifecycle controller.
//!
//! A single actor task owns all mutable update state (the current phase, the
//! managing-cluster registry, the latest resolution) and consumes commands and
//! download events from one channel in arrival order. Subscribers receive
//! immutable `AppUpdateEvent` snapshots over a watch channel; nothing outside
//! the actor ever holds the state by reference.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use semver::Version;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use berth_backend::{
    AppUpdateEvent, AutoUpdatesStatus, ClusterUri, ClusterVersionSource, DownloadProgress,
    DownloadedUpdate, ProviderError, UpdateInfo, UpdateKind, UpdaterProvider,
};

use crate::env::EnvOverrideSource;
use crate::probe::ClusterVersionProbe;
use crate::registry::ManagingClusterRegistry;
use crate::resolver;

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const PROGRESS_CHANNEL_CAPACITY: usize = 32;
const DEFAULT_PER_CLUSTER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("update controller task is no longer running")]
    Closed,
    #[error("no downloaded update is ready to install")]
    NothingToInstall,
    #[error(transparent)]
    Provider(ProviderError),
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// The tools version this client is currently running.
    pub current_version: Version,
    pub per_cluster_timeout: Duration,
    pub env_override: EnvOverrideSource,
}

impl ControllerConfig {
    #[must_use]
    pub fn new(current_version: Version) -> Self {
        Self {
            current_version,
            per_cluster_timeout: DEFAULT_PER_CLUSTER_TIMEOUT,
            env_override: EnvOverrideSource::Process,
        }
    }
}

enum Request {
    Check {
        reply: oneshot::Sender<AutoUpdatesStatus>,
    },
    Download {
        reply: oneshot::Sender<bool>,
    },
    CancelDownload {
        reply: oneshot::Sender<bool>,
    },
    QuitAndInstall {
        reply: oneshot::Sender<Result<(), ControllerError>>,
    },
    ChangeManagingCluster {
        uri: Option<ClusterUri>,
        reply: oneshot::Sender<AutoUpdatesStatus>,
    },
    ClusterLoggedOut {
        uri: ClusterUri,
        reply: oneshot::Sender<AutoUpdatesStatus>,
    },
    CheckFinished {
        generation: u64,
        outcome: CheckOutcome,
    },
    DownloadEvent {
        attempt: u64,
        event: DownloadEvent,
    },
}

enum CheckOutcome {
    NoUpdate {
        status: AutoUpdatesStatus,
    },
    UpdateFound {
        status: AutoUpdatesStatus,
        update: UpdateInfo,
    },
    ProviderFailed {
        status: AutoUpdatesStatus,
        message: String,
    },
}

enum DownloadEvent {
    Progress(DownloadProgress),
    Finished(Result<DownloadedUpdate, ProviderError>),
}

enum Phase {
    Idle,
    Checking,
    UpToDate,
    Available {
        status: AutoUpdatesStatus,
        update: UpdateInfo,
    },
    Downloading {
        status: AutoUpdatesStatus,
        update: UpdateInfo,
        attempt: u64,
        cancel: CancellationToken,
    },
    Downloaded {
        downloaded: DownloadedUpdate,
    },
    Failed,
}

/// Cheaply cloneable command surface of the controller.
#[derive(Clone)]
pub struct UpdateControllerHandle {
    requests: mpsc::Sender<Request>,
    events: watch::Receiver<AppUpdateEvent>,
}

impl UpdateControllerHandle {
    /// Re-resolve the auto-update decision and look for an update.
    ///
    /// A check issued while one is already in flight awaits the same
    /// resolution instead of starting a second one.
    ///
    /// # Errors
    /// Returns [`ControllerError::Closed`] when the controller task is gone.
    pub async fn check_for_app_updates(&self) -> Result<AutoUpdatesStatus, ControllerError> {
        self.request(|reply| Request::Check { reply }).await
    }

    /// Start downloading the available update. Returns false when no update
    /// is waiting for a download.
    ///
    /// # Errors
    /// Returns [`ControllerError::Closed`] when the controller task is gone.
    pub async fn download_app_update(&self) -> Result<bool, ControllerError> {
        self.request(|reply| Request::Download { reply }).await
    }

    /// Cancel the running download and discard the partial artifact.
    ///
    /// Once this resolves, no further `DownloadProgress` event for the
    /// cancelled attempt will be observed by any subscriber.
    ///
    /// # Errors
    /// Returns [`ControllerError::Closed`] when the controller task is gone.
    pub async fn cancel_app_update_download(&self) -> Result<bool, ControllerError> {
        self.request(|reply| Request::CancelDownload { reply }).await
    }

    /// Hand the downloaded update to the installer; the process is replaced
    /// externally afterwards.
    ///
    /// # Errors
    /// Returns an error when nothing is downloaded, the provider refuses the
    /// hand-off, or the controller task is gone.
    pub async fn quit_and_install_app_update(&self) -> Result<(), ControllerError> {
        self.request(|reply| Request::QuitAndInstall { reply })
            .await?
    }

    /// Record or clear the managing-cluster override, then re-resolve.
    ///
    /// # Errors
    /// Returns [`ControllerError::Closed`] when the controller task is gone.
    pub async fn change_managing_cluster(
        &self,
        uri: Option<ClusterUri>,
    ) -> Result<AutoUpdatesStatus, ControllerError> {
        self.request(|reply| Request::ChangeManagingCluster { uri, reply })
            .await
    }

    /// Invalidate any override pointing at `uri` and re-resolve. Must be
    /// called on cluster logout or removal, before anything else reads the
    /// decision.
    ///
    /// # Errors
    /// Returns [`ControllerError::Closed`] when the controller task is gone.
    pub async fn cluster_logged_out(
        &self,
        uri: ClusterUri,
    ) -> Result<AutoUpdatesStatus, ControllerError> {
        self.request(|reply| Request::ClusterLoggedOut { uri, reply })
            .await
    }

    /// Subscribe to lifecycle events. A late subscriber immediately observes
    /// the most recent event, not history.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AppUpdateEvent> {
        self.events.clone()
    }

    #[must_use]
    pub fn latest_event(&self) -> AppUpdateEvent {
        self.events.borrow().clone()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, ControllerError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .await
            .map_err(|_| ControllerError::Closed)?;
        response.await.map_err(|_| ControllerError::Closed)
    }
}

pub struct UpdateController {
    config: ControllerConfig,
    probe: ClusterVersionProbe,
    provider: Arc<dyn UpdaterProvider>,
    registry: ManagingClusterRegistry,
    phase: Phase,
    last_status: Option<AutoUpdatesStatus>,
    check_seq: u64,
    attempt_seq: u64,
    pending_checks: Vec<oneshot::Sender<AutoUpdatesStatus>>,
    events: watch::Sender<AppUpdateEvent>,
    requests_tx: mpsc::Sender<Request>,
    requests_rx: mpsc::Receiver<Request>,
}

impl UpdateController {
    /// Spawn the controller actor and return its command handle.
    #[must_use]
    pub fn spawn(
        config: ControllerConfig,
        source: Arc<dyn ClusterVersionSource>,
        provider: Arc<dyn UpdaterProvider>,
        registry: ManagingClusterRegistry,
    ) -> UpdateControllerHandle {
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (events, events_rx) = watch::channel(AppUpdateEvent::Idle);

        let probe = ClusterVersionProbe::new(source, config.per_cluster_timeout);
        let controller = Self {
            config,
            probe,
            provider,
            registry,
            phase: Phase::Idle,
            last_status: None,
            check_seq: 0,
            attempt_seq: 0,
            pending_checks: Vec::new(),
            events,
            requests_tx: requests_tx.clone(),
            requests_rx,
        };
        tokio::spawn(controller.run());

        UpdateControllerHandle {
            requests: requests_tx,
            events: events_rx,
        }
    }

    async fn run(mut self) {
        while let Some(request) = self.requests_rx.recv().await {
            self.handle(request);
        }
        debug!("Update controller shutting down, all handles dropped");
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Check { reply } => self.handle_check(reply),
            Request::Download { reply } => self.handle_download(reply),
            Request::CancelDownload { reply } => self.handle_cancel(reply),
            Request::QuitAndInstall { reply } => self.handle_quit_and_install(reply),
            Request::ChangeManagingCluster { uri, reply } => {
                if let Err(error) = self.registry.set(uri) {
                    self.report_registry_failure(&error.to_string());
                }
                self.restart_check(reply);
            }
            Request::ClusterLoggedOut { uri, reply } => {
                match self.registry.invalidate(&uri) {
                    Ok(true) => info!("Managing cluster override invalidated by logout of {uri}"),
                    Ok(false) => {}
                    Err(error) => self.report_registry_failure(&error.to_string()),
                }
                self.restart_check(reply);
            }
            Request::CheckFinished {
                generation,
                outcome,
            } => self.handle_check_finished(generation, outcome),
            Request::DownloadEvent { attempt, event } => {
                self.handle_download_event(attempt, event);
            }
        }
    }

    fn handle_check(&mut self, reply: oneshot::Sender<AutoUpdatesStatus>) {
        match &self.phase {
            // Coalescing: the caller awaits the resolution already in flight.
            Phase::Checking => self.pending_checks.push(reply),
            // A running download answers from the decision that produced it;
            // a plain check never yanks the transfer out from under the user.
            Phase::Downloading { status, .. } => {
                let _ = reply.send(status.clone());
            }
            Phase::Idle
            | Phase::UpToDate
            | Phase::Available { .. }
            | Phase::Downloaded { .. }
            | Phase::Failed => {
                self.pending_checks.push(reply);
                self.start_check();
            }
        }
    }

    fn handle_download(&mut self, reply: oneshot::Sender<bool>) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Available { status, update } => {
                self.start_download(status, update);
                let _ = reply.send(true);
            }
            other => {
                warn!("Ignoring download request: no update is waiting for one");
                self.phase = other;
                let _ = reply.send(false);
            }
        }
    }

    fn handle_cancel(&mut self, reply: oneshot::Sender<bool>) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Downloading {
                status,
                update,
                cancel,
                ..
            } => {
                cancel.cancel();
                info!("Download of {} cancelled", update.version);
                // Leaving the Downloading phase is what guarantees the
                // ordering contract: any event from the cancelled attempt
                // that is still in the queue no longer matches and is
                // discarded before it can reach subscribers.
                self.emit(AppUpdateEvent::UpdateAvailable {
                    status: status.clone(),
                    update: update.clone(),
                    auto_download: false,
                });
                self.phase = Phase::Available { status, update };
                let _ = reply.send(true);
            }
            other => {
                self.phase = other;
                let _ = reply.send(false);
            }
        }
    }

    fn handle_quit_and_install(&mut self, reply: oneshot::Sender<Result<(), ControllerError>>) {
        let result = match &self.phase {
            Phase::Downloaded { downloaded } => {
                info!(
                    "Handing update {} to the installer",
                    downloaded.update.version
                );
                self.provider
                    .quit_and_install(downloaded)
                    .map_err(ControllerError::Provider)
            }
            _ => Err(ControllerError::NothingToInstall),
        };
        let _ = reply.send(result);
    }

    /// Re-resolution forced by an override or cluster-lifecycle change. Any
    /// in-flight download belongs to a stale decision and is abandoned.
    fn restart_check(&mut self, reply: oneshot::Sender<AutoUpdatesStatus>) {
        if let Phase::Downloading { cancel, update, .. } = &self.phase {
            info!(
                "Abandoning download of {}: the update decision changed",
                update.version
            );
            cancel.cancel();
        }
        self.pending_checks.push(reply);
        self.start_check();
    }

    fn start_check(&mut self) {
        self.check_seq += 1;
        let generation = self.check_seq;
        self.phase = Phase::Checking;
        self.emit(AppUpdateEvent::CheckingForUpdate {
            status: self.last_status.clone(),
        });

        let probe = self.probe.clone();
        let env_override = self.config.env_override.current();
        let managing = self.registry.get().cloned();
        let provider = Arc::clone(&self.provider);
        let current_version = self.config.current_version.clone();
        let requests = self.requests_tx.clone();

        tokio::spawn(async move {
            let report = probe.probe().await;
            let status = resolver::resolve(env_override.as_ref(), managing.as_ref(), &report);

            let target = match &status {
                AutoUpdatesStatus::Enabled { version, .. } if *version != current_version => {
                    Some(version.clone())
                }
                _ => None,
            };
            let outcome = match target {
                Some(target) => match provider.fetch_update_info(&target).await {
                    Ok(mut update) => {
                        update.update_kind = if update.version < current_version {
                            UpdateKind::Downgrade
                        } else {
                            UpdateKind::Upgrade
                        };
                        CheckOutcome::UpdateFound { status, update }
                    }
                    Err(error) => CheckOutcome::ProviderFailed {
                        status,
                        message: error.to_string(),
                    },
                },
                None => CheckOutcome::NoUpdate { status },
            };

            let _ = requests
                .send(Request::CheckFinished {
                    generation,
                    outcome,
                })
                .await;
        });
    }

    fn handle_check_finished(&mut self, generation: u64, outcome: CheckOutcome) {
        if generation != self.check_seq || !matches!(self.phase, Phase::Checking) {
            debug!("Discarding result of a superseded update check");
            return;
        }

        let status = match &outcome {
            CheckOutcome::NoUpdate { status }
            | CheckOutcome::UpdateFound { status, .. }
            | CheckOutcome::ProviderFailed { status, .. } => status.clone(),
        };
        self.last_status = Some(status.clone());
        for waiter in self.pending_checks.drain(..) {
            let _ = waiter.send(status.clone());
        }

        match outcome {
            CheckOutcome::NoUpdate { status } => {
                debug!("No update available");
                self.emit(AppUpdateEvent::UpdateNotAvailable { status });
                self.phase = Phase::UpToDate;
            }
            CheckOutcome::UpdateFound { status, update } => {
                let auto_download = status.should_auto_download();
                info!(
                    "Update {} available (auto download: {auto_download})",
                    update.version
                );
                self.emit(AppUpdateEvent::UpdateAvailable {
                    status: status.clone(),
                    update: update.clone(),
                    auto_download,
                });
                if auto_download {
                    self.start_download(status, update);
                } else {
                    self.phase = Phase::Available { status, update };
                }
            }
            CheckOutcome::ProviderFailed { status, message } => {
                warn!("Update check failed: {message}");
                self.emit(AppUpdateEvent::Error {
                    status: Some(status),
                    message,
                    update: None,
                });
                self.phase = Phase::Failed;
            }
        }
    }

    fn start_download(&mut self, status: AutoUpdatesStatus, update: UpdateInfo) {
        self.attempt_seq += 1;
        let attempt = self.attempt_seq;
        let cancel = CancellationToken::new();

        let provider = Arc::clone(&self.provider);
        let requests = self.requests_tx.clone();
        let download_update = update.clone();
        let download_cancel = cancel.clone();
        tokio::spawn(async move {
            let (progress_tx, mut progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
            let transfer = tokio::spawn(async move {
                provider
                    .download(&download_update, progress_tx, download_cancel)
                    .await
            });

            while let Some(progress) = progress_rx.recv().await {
                let _ = requests
                    .send(Request::DownloadEvent {
                        attempt,
                        event: DownloadEvent::Progress(progress),
                    })
                    .await;
            }

            let result = match transfer.await {
                Ok(result) => result,
                Err(join_error) => Err(ProviderError::Invalid(format!(
                    "download task panicked: {join_error}"
                ))),
            };
            let _ = requests
                .send(Request::DownloadEvent {
                    attempt,
                    event: DownloadEvent::Finished(result),
                })
                .await;
        });

        let total = update.files.iter().map(|file| file.size).sum();
        self.emit(AppUpdateEvent::DownloadProgress {
            status: status.clone(),
            update: update.clone(),
            progress: DownloadProgress {
                transferred: 0,
                total: Some(total),
            },
        });
        self.phase = Phase::Downloading {
            status,
            update,
            attempt,
            cancel,
        };
    }

    fn handle_download_event(&mut self, attempt: u64, event: DownloadEvent) {
        let (status, update) = match &self.phase {
            Phase::Downloading {
                status,
                update,
                attempt: active,
                ..
            } if *active == attempt => (status.clone(), update.clone()),
            _ => {
                debug!("Discarding event from a cancelled or superseded download attempt");
                return;
            }
        };

        match event {
            DownloadEvent::Progress(progress) => {
                self.emit(AppUpdateEvent::DownloadProgress {
                    status,
                    update,
                    progress,
                });
            }
            DownloadEvent::Finished(Ok(downloaded)) => {
                info!("Update {} downloaded and verified", update.version);
                self.emit(AppUpdateEvent::UpdateDownloaded { status, update });
                self.phase = Phase::Downloaded { downloaded };
            }
            DownloadEvent::Finished(Err(error)) => {
                warn!("Download of {} failed: {error}", update.version);
                self.emit(AppUpdateEvent::Error {
                    status: Some(status),
                    message: error.to_string(),
                    update: Some(update),
                });
                self.phase = Phase::Failed;
            }
        }
    }

    /// Infrastructure faults around persistence are reported, never fatal.
    fn report_registry_failure(&self, message: &str) {
        warn!("Managing cluster persistence failed: {message}");
        self.emit(AppUpdateEvent::Error {
            status: self.last_status.clone(),
            message: message.to_string(),
            update: None,
        });
    }

    fn emit(&self, event: AppUpdateEvent) {
        self.events.send_replace(event);
    }
}
