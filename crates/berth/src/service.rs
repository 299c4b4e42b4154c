use std::sync::Arc;
use std::time::Duration;

use log::info;
use semver::Version;
use thiserror::Error;
use tokio::sync::watch;

use berth_backend::{
    AppUpdateEvent, AutoUpdatesStatus, ClusterUri, ClusterVersionSource, ProviderError,
    UpdaterProvider,
};
use berth_platform::AppPaths;
use berth_updater::{
    ControllerConfig, ControllerError, EnvOverrideSource, HttpUpdaterProvider,
    ManagingClusterRegistry, UpdateController, UpdateControllerHandle,
};

use crate::settings::AppSettings;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to resolve application paths: {details}")]
    Paths { details: String },
    #[error("failed to prepare application directories: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error("update artifact host {host:?} is not a known download host")]
    UntrustedHost { host: String },
}

/// Facade the desktop frontend talks to. Owns the controller handle and the
/// host-level policy that sits above it, such as the download host check.
pub struct UpdaterService {
    settings: AppSettings,
    controller: UpdateControllerHandle,
}

impl UpdaterService {
    /// Wire the whole update subsystem from settings and the host's cluster
    /// source, then kick off the initial check in the background.
    ///
    /// # Errors
    /// Returns an error when platform paths cannot be prepared or the HTTP
    /// provider cannot be constructed.
    pub fn start(
        settings: AppSettings,
        source: Arc<dyn ClusterVersionSource>,
        current_version: Version,
    ) -> Result<Self, ServiceError> {
        let paths = AppPaths::new().map_err(|error| ServiceError::Paths {
            details: error.to_string(),
        })?;
        paths
            .ensure_dirs()
            .map_err(|source| ServiceError::Io { source })?;

        let registry = ManagingClusterRegistry::load(paths.managing_cluster_file());
        let provider = HttpUpdaterProvider::new(
            settings.update_manifest_base_url.clone(),
            paths.update_cache_dir(),
        )?;
        let config = ControllerConfig {
            current_version,
            per_cluster_timeout: Duration::from_secs(settings.probe_timeout_secs),
            env_override: EnvOverrideSource::Process,
        };
        let controller =
            UpdateController::spawn(config, source, Arc::new(provider), registry);

        let initial = controller.clone();
        tokio::spawn(async move {
            if let Err(error) = initial.check_for_app_updates().await {
                info!("Initial update check did not complete: {error}");
            }
        });

        Ok(Self {
            settings,
            controller,
        })
    }

    /// Assemble a service around an already-spawned controller.
    #[must_use]
    pub fn with_parts(settings: AppSettings, controller: UpdateControllerHandle) -> Self {
        Self {
            settings,
            controller,
        }
    }

    /// # Errors
    /// Returns an error when the controller is gone.
    pub async fn check_for_updates(&self) -> Result<AutoUpdatesStatus, ServiceError> {
        Ok(self.controller.check_for_app_updates().await?)
    }

    /// Start downloading the available update, after checking that its
    /// artifacts come from a known download host.
    ///
    /// # Errors
    /// Returns an error when the artifact host is not trusted or the
    /// controller is gone.
    pub async fn download_update(&self) -> Result<bool, ServiceError> {
        if let AppUpdateEvent::UpdateAvailable { update, .. } = self.controller.latest_event() {
            // An update without a parseable artifact host is never trusted.
            let host = update.download_host().unwrap_or_default();
            if !self.settings.trusts_download_host(&host) {
                return Err(ServiceError::UntrustedHost { host });
            }
        }
        Ok(self.controller.download_app_update().await?)
    }

    /// # Errors
    /// Returns an error when the controller is gone.
    pub async fn cancel_download(&self) -> Result<bool, ServiceError> {
        Ok(self.controller.cancel_app_update_download().await?)
    }

    /// # Errors
    /// Returns an error when no update is downloaded, the installer refuses,
    /// or the controller is gone.
    pub async fn quit_and_install(&self) -> Result<(), ServiceError> {
        self.controller.quit_and_install_app_update().await?;
        Ok(())
    }

    /// Record or clear the managing-cluster override and return the
    /// re-resolved status.
    ///
    /// # Errors
    /// Returns an error when the controller is gone.
    pub async fn set_managing_cluster(
        &self,
        uri: Option<ClusterUri>,
    ) -> Result<AutoUpdatesStatus, ServiceError> {
        Ok(self.controller.change_managing_cluster(uri).await?)
    }

    /// A new cluster connection changes the candidate set, so re-resolve.
    ///
    /// # Errors
    /// Returns an error when the controller is gone.
    pub async fn on_cluster_added(&self) -> Result<AutoUpdatesStatus, ServiceError> {
        Ok(self.controller.check_for_app_updates().await?)
    }

    /// # Errors
    /// Returns an error when the controller is gone.
    pub async fn on_cluster_logged_out(
        &self,
        uri: ClusterUri,
    ) -> Result<AutoUpdatesStatus, ServiceError> {
        Ok(self.controller.cluster_logged_out(uri).await?)
    }

    /// # Errors
    /// Returns an error when the controller is gone.
    pub async fn on_cluster_removed(
        &self,
        uri: ClusterUri,
    ) -> Result<AutoUpdatesStatus, ServiceError> {
        Ok(self.controller.cluster_logged_out(uri).await?)
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AppUpdateEvent> {
        self.controller.subscribe()
    }

    #[must_use]
    pub fn latest_event(&self) -> AppUpdateEvent {
        self.controller.latest_event()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use semver::Version;
    use tokio::sync::{mpsc, watch};
    use tokio_util::sync::CancellationToken;

    use berth_backend::{
        AppUpdateEvent, ClusterUri, ClusterVersionInfo, ClusterVersionSource, DownloadProgress,
        DownloadedUpdate, ProviderError, SourceError, UpdateFile, UpdateInfo, UpdateKind,
        UpdaterProvider,
    };
    use berth_updater::{
        ControllerConfig, EnvOverrideSource, ManagingClusterRegistry, UpdateController,
    };

    use super::{ServiceError, UpdaterService};
    use crate::settings::AppSettings;

    struct OneClusterSource {
        info: ClusterVersionInfo,
    }

    #[async_trait]
    impl ClusterVersionSource for OneClusterSource {
        fn known_clusters(&self) -> Vec<ClusterUri> {
            vec![self.info.cluster_uri.clone()]
        }

        async fn fetch_version_info(
            &self,
            _cluster: &ClusterUri,
        ) -> Result<ClusterVersionInfo, SourceError> {
            Ok(self.info.clone())
        }
    }

    struct HostedProvider {
        host: &'static str,
    }

    #[async_trait]
    impl UpdaterProvider for HostedProvider {
        async fn fetch_update_info(
            &self,
            version: &Version,
        ) -> Result<UpdateInfo, ProviderError> {
            Ok(UpdateInfo {
                version: version.clone(),
                files: vec![UpdateFile {
                    url: format!("https://{}/berth-{version}.tar.gz", self.host),
                    sha512: "0".repeat(128),
                    size: 100,
                }],
                update_kind: UpdateKind::Upgrade,
                release_date: Utc::now(),
            })
        }

        async fn download(
            &self,
            update: &UpdateInfo,
            _progress: mpsc::Sender<DownloadProgress>,
            _cancel: CancellationToken,
        ) -> Result<DownloadedUpdate, ProviderError> {
            Ok(DownloadedUpdate {
                update: update.clone(),
                artifact_paths: vec![PathBuf::from("/tmp/berth-update")],
            })
        }

        fn quit_and_install(&self, _downloaded: &DownloadedUpdate) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn service_with_host(host: &'static str) -> (UpdaterService, tempfile::TempDir) {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let registry = ManagingClusterRegistry::load(temp.path().join("managing.json"));
        let source = OneClusterSource {
            info: ClusterVersionInfo {
                cluster_uri: "main.example.com".parse().expect("valid cluster uri"),
                tools_version: Version::new(2, 0, 0),
                min_tools_version: Version::new(1, 0, 0),
                tools_auto_update: true,
            },
        };
        let config = ControllerConfig {
            current_version: Version::new(1, 0, 0),
            per_cluster_timeout: Duration::from_millis(200),
            env_override: EnvOverrideSource::Fixed(None),
        };
        let controller = UpdateController::spawn(
            config,
            Arc::new(source),
            Arc::new(HostedProvider { host }),
            registry,
        );
        (
            UpdaterService::with_parts(AppSettings::default(), controller),
            temp,
        )
    }

    async fn wait_for_available(events: &mut watch::Receiver<AppUpdateEvent>) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if matches!(
                    *events.borrow_and_update(),
                    AppUpdateEvent::UpdateAvailable { .. }
                ) {
                    return;
                }
                events.changed().await.expect("service should stay alive");
            }
        })
        .await
        .expect("update should become available");
    }

    #[tokio::test]
    async fn download_from_a_known_host_is_allowed() {
        let (service, _temp) = service_with_host("cdn.berth.dev");
        let mut events = service.subscribe();

        service
            .check_for_updates()
            .await
            .expect("check should complete");
        wait_for_available(&mut events).await;

        let started = service
            .download_update()
            .await
            .expect("trusted host should pass the policy check");
        assert!(started);
    }

    #[tokio::test]
    async fn download_from_an_unknown_host_is_refused() {
        let (service, _temp) = service_with_host("mirror.example.net");
        let mut events = service.subscribe();

        service
            .check_for_updates()
            .await
            .expect("check should complete");
        wait_for_available(&mut events).await;

        let result = service.download_update().await;
        let Err(ServiceError::UntrustedHost { host }) = result else {
            panic!("expected the untrusted host to be refused");
        };
        assert_eq!(host, "mirror.example.net");
    }

    #[tokio::test]
    async fn cluster_lifecycle_hooks_re_resolve_the_status() {
        let (service, _temp) = service_with_host("cdn.berth.dev");

        let added = service
            .on_cluster_added()
            .await
            .expect("re-resolution should complete");
        assert!(added.is_enabled());

        let removed = service
            .on_cluster_removed("other.example.com".parse().expect("valid cluster uri"))
            .await
            .expect("re-resolution should complete");
        assert_eq!(removed.options().managing_cluster_uri, None);
    }
}
