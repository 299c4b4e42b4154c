use std::path::PathBuf;

use async_trait::async_trait;
use semver::Version;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, SourceError};
use crate::types::{ClusterUri, ClusterVersionInfo, DownloadProgress, UpdateInfo};

/// Transport-layer view of the clusters the client currently knows about.
///
/// Implemented by the RPC layer; the probe wraps every call in its own
/// per-cluster timeout, so implementations may block for as long as their
/// transport allows.
#[async_trait]
pub trait ClusterVersionSource: Send + Sync {
    fn known_clusters(&self) -> Vec<ClusterUri>;

    async fn fetch_version_info(
        &self,
        cluster: &ClusterUri,
    ) -> Result<ClusterVersionInfo, SourceError>;
}

/// A fully downloaded and verified update, ready to hand to the installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedUpdate {
    pub update: UpdateInfo,
    pub artifact_paths: Vec<PathBuf>,
}

/// External updater seam: release metadata lookup, file transfer with
/// verification, and install hand-off all live behind this trait.
#[async_trait]
pub trait UpdaterProvider: Send + Sync {
    /// Fetch the update package description for an exact version.
    async fn fetch_update_info(&self, version: &Version) -> Result<UpdateInfo, ProviderError>;

    /// Download and verify every file of `update`.
    ///
    /// Progress is reported through `progress` in arrival order. When `cancel`
    /// fires, the provider must stop promptly, discard any partial artifact,
    /// and return [`ProviderError::Cancelled`].
    async fn download(
        &self,
        update: &UpdateInfo,
        progress: mpsc::Sender<DownloadProgress>,
        cancel: CancellationToken,
    ) -> Result<DownloadedUpdate, ProviderError>;

    /// Hand the downloaded artifact to the platform installer and exit.
    fn quit_and_install(&self, downloaded: &DownloadedUpdate) -> Result<(), ProviderError>;
}
