use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Address of a root cluster the client is connected to.
///
/// Stored and compared as an opaque, normalized string so the override survives
/// re-login to the same cluster regardless of session state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterUri(String);

impl ClusterUri {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Error)]
pub enum ClusterUriParseError {
    #[error("cluster uri must not be empty")]
    Empty,
    #[error("cluster uri must not contain whitespace: {input}")]
    ContainsWhitespace { input: String },
}

impl FromStr for ClusterUri {
    type Err = ClusterUriParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ClusterUriParseError::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(ClusterUriParseError::ContainsWhitespace {
                input: trimmed.to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Version requirements a single reachable cluster reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterVersionInfo {
    pub cluster_uri: ClusterUri,
    pub tools_version: Version,
    pub min_tools_version: Version,
    pub tools_auto_update: bool,
}

/// A cluster whose version query failed or timed out. Never dropped from the
/// outcome, so the UI can always say which clusters could not be checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreachableCluster {
    pub cluster_uri: ClusterUri,
    pub error_message: String,
}

/// Fan-in result of probing every known cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterVersionReport {
    pub reachable: Vec<ClusterVersionInfo>,
    pub unreachable: Vec<UnreachableCluster>,
}

/// Where an enabled auto-update decision came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum UpdateSource {
    EnvVar,
    ManagingCluster { managing_cluster_uri: ClusterUri },
    HighestCompatible,
}

/// Why auto-updates ended up disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisabledReason {
    DisabledByEnvVar,
    NoClusterWithAutoUpdate,
    ManagingClusterUnableToManage,
    NoCompatibleVersion,
}

/// Supporting data attached to every resolution outcome, enabled or not, so
/// the UI never needs a second query to explain the decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusOptions {
    pub managing_cluster_uri: Option<ClusterUri>,
    pub highest_compatible_version: Option<Version>,
    pub clusters: Vec<ClusterVersionInfo>,
    pub unreachable_clusters: Vec<UnreachableCluster>,
}

/// The single authoritative answer to "should this client self-update, and to
/// what". Recomputed from scratch on every trigger, never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum AutoUpdatesStatus {
    Enabled {
        version: Version,
        source: UpdateSource,
        options: StatusOptions,
    },
    Disabled {
        reason: DisabledReason,
        options: StatusOptions,
    },
}

impl AutoUpdatesStatus {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }

    #[must_use]
    pub fn options(&self) -> &StatusOptions {
        match self {
            Self::Enabled { options, .. } | Self::Disabled { options, .. } => options,
        }
    }

    /// Whether a found update should start downloading without a user click.
    ///
    /// True only when the version is pinned by policy (env var) or an
    /// explicitly chosen managing cluster. A heuristically picked
    /// highest-compatible version always waits for user confirmation.
    #[must_use]
    pub fn should_auto_download(&self) -> bool {
        match self {
            Self::Enabled { source, .. } => !matches!(source, UpdateSource::HighestCompatible),
            Self::Disabled { .. } => false,
        }
    }
}

/// One file of an update package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFile {
    pub url: String,
    pub sha512: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateKind {
    Upgrade,
    Downgrade,
}

/// A concrete update the provider can deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub version: Version,
    pub files: Vec<UpdateFile>,
    pub update_kind: UpdateKind,
    pub release_date: DateTime<Utc>,
}

impl UpdateInfo {
    /// Host of the first update file's URL, surfaced to the UI as trust
    /// metadata. Read-only provenance, never part of the decision logic.
    #[must_use]
    pub fn download_host(&self) -> Option<String> {
        let first = self.files.first()?;
        let parsed = url::Url::parse(&first.url).ok()?;
        parsed.host_str().map(ToString::to_string)
    }
}

/// Cumulative progress of a download attempt across all of its files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub transferred: u64,
    pub total: Option<u64>,
}

impl DownloadProgress {
    #[must_use]
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => {
                #[allow(clippy::cast_precision_loss)]
                Some((self.transferred as f64 / total as f64) * 100.0)
            }
            _ => None,
        }
    }
}

/// Events published by the update lifecycle controller. Each variant carries
/// the `AutoUpdatesStatus` snapshot that produced it; late subscribers receive
/// the most recent event, not history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum AppUpdateEvent {
    /// No check has run yet in this process.
    Idle,
    CheckingForUpdate {
        /// Snapshot from the previous resolution, absent on the first check.
        status: Option<AutoUpdatesStatus>,
    },
    UpdateNotAvailable {
        status: AutoUpdatesStatus,
    },
    UpdateAvailable {
        status: AutoUpdatesStatus,
        update: UpdateInfo,
        auto_download: bool,
    },
    DownloadProgress {
        status: AutoUpdatesStatus,
        update: UpdateInfo,
        progress: DownloadProgress,
    },
    UpdateDownloaded {
        status: AutoUpdatesStatus,
        update: UpdateInfo,
    },
    Error {
        status: Option<AutoUpdatesStatus>,
        message: String,
        update: Option<UpdateInfo>,
    },
}

impl AppUpdateEvent {
    #[must_use]
    pub fn status(&self) -> Option<&AutoUpdatesStatus> {
        match self {
            Self::Idle => None,
            Self::CheckingForUpdate { status } | Self::Error { status, .. } => status.as_ref(),
            Self::UpdateNotAvailable { status }
            | Self::UpdateAvailable { status, .. }
            | Self::DownloadProgress { status, .. }
            | Self::UpdateDownloaded { status, .. } => Some(status),
        }
    }
}
