mod error;
mod traits;
mod types;

pub use error::{ProviderError, SourceError};
pub use traits::{ClusterVersionSource, DownloadedUpdate, UpdaterProvider};
pub use types::{
    AppUpdateEvent, AutoUpdatesStatus, ClusterUri, ClusterUriParseError, ClusterVersionInfo,
    ClusterVersionReport, DisabledReason, DownloadProgress, StatusOptions, UnreachableCluster,
    UpdateFile, UpdateInfo, UpdateKind, UpdateSource,
};
