//! HTTP release-feed provider.
//!
//! Release metadata lives at `{base}/{version}.json`, one manifest per
//! published version. Artifacts download into a scratch directory that is
//! dropped on any failure or cancellation, so a partial download never
//! survives. Only a fully verified set of files is kept.

use std::path::{Path, PathBuf};
use std::pin::pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use log::{debug, info};
use semver::Version;
use serde::Deserialize;
use sha2::{Digest, Sha512};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use berth_backend::{
    DownloadProgress, DownloadedUpdate, ProviderError, UpdateFile, UpdateInfo, UpdateKind,
    UpdaterProvider,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ReleaseManifest {
    version: Version,
    files: Vec<UpdateFile>,
    release_date: DateTime<Utc>,
}

pub struct HttpUpdaterProvider {
    client: reqwest::Client,
    manifest_base_url: String,
    download_dir: PathBuf,
}

impl HttpUpdaterProvider {
    /// # Errors
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(
        manifest_base_url: impl Into<String>,
        download_dir: PathBuf,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|source| ProviderError::http("failed to build HTTP client", source))?;
        Ok(Self {
            client,
            manifest_base_url: manifest_base_url.into().trim_end_matches('/').to_string(),
            download_dir,
        })
    }

    fn manifest_url(&self, version: &Version) -> String {
        format!("{}/{version}.json", self.manifest_base_url)
    }

    async fn download_file(
        &self,
        file: &UpdateFile,
        destination: &Path,
        transferred_before: u64,
        total: u64,
        progress: &mpsc::Sender<DownloadProgress>,
        cancel: &CancellationToken,
    ) -> Result<u64, ProviderError> {
        let response = self
            .client
            .get(&file.url)
            .send()
            .await
            .map_err(|source| ProviderError::http("failed to request update artifact", source))?;
        if !response.status().is_success() {
            return Err(ProviderError::HttpStatus {
                status: response.status(),
            });
        }

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|source| ProviderError::http("failed to read artifact", source)));
        store_and_verify(
            chunks,
            destination,
            file,
            transferred_before,
            total,
            progress,
            cancel,
        )
        .await
    }
}

/// Stream artifact bytes into `destination`, hashing as they arrive, and
/// compare the final SHA-512 against the manifest. Cancellation interrupts
/// the transfer between chunks.
async fn store_and_verify<S, C>(
    stream: S,
    destination: &Path,
    file: &UpdateFile,
    transferred_before: u64,
    total: u64,
    progress: &mpsc::Sender<DownloadProgress>,
    cancel: &CancellationToken,
) -> Result<u64, ProviderError>
where
    S: Stream<Item = Result<C, ProviderError>>,
    C: AsRef<[u8]>,
{
    let mut output = tokio::fs::File::create(destination)
        .await
        .map_err(|source| ProviderError::io("failed to create download file", source))?;
    let mut hasher = Sha512::new();
    let mut transferred = transferred_before;
    let mut stream = pin!(stream);

    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else {
            break;
        };
        let bytes = chunk?;
        let bytes = bytes.as_ref();
        hasher.update(bytes);
        output
            .write_all(bytes)
            .await
            .map_err(|source| ProviderError::io("failed to write download file", source))?;
        transferred += bytes.len() as u64;
        let _ = progress
            .send(DownloadProgress {
                transferred,
                total: Some(total),
            })
            .await;
    }
    output
        .flush()
        .await
        .map_err(|source| ProviderError::io("failed to flush download file", source))?;

    let digest = format!("{:x}", hasher.finalize());
    if !digest.eq_ignore_ascii_case(file.sha512.trim()) {
        return Err(ProviderError::ChecksumMismatch {
            file: file.url.clone(),
        });
    }
    Ok(transferred)
}

#[async_trait]
impl UpdaterProvider for HttpUpdaterProvider {
    async fn fetch_update_info(&self, version: &Version) -> Result<UpdateInfo, ProviderError> {
        let url = self.manifest_url(version);
        debug!("Fetching release manifest from {url}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| ProviderError::http("failed to request release manifest", source))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::UnknownVersion {
                version: version.clone(),
            });
        }
        if !response.status().is_success() {
            return Err(ProviderError::HttpStatus {
                status: response.status(),
            });
        }

        let manifest: ReleaseManifest = response
            .json()
            .await
            .map_err(|source| ProviderError::http("failed to decode release manifest", source))?;
        if manifest.version != *version {
            return Err(ProviderError::Invalid(format!(
                "release manifest for {version} describes version {}",
                manifest.version
            )));
        }
        if manifest.files.is_empty() {
            return Err(ProviderError::Invalid(format!(
                "release manifest for {version} lists no files"
            )));
        }

        Ok(UpdateInfo {
            version: manifest.version,
            files: manifest.files,
            // The caller decides the direction against its running version.
            update_kind: UpdateKind::Upgrade,
            release_date: manifest.release_date,
        })
    }

    async fn download(
        &self,
        update: &UpdateInfo,
        progress: mpsc::Sender<DownloadProgress>,
        cancel: CancellationToken,
    ) -> Result<DownloadedUpdate, ProviderError> {
        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|source| ProviderError::io("failed to create download directory", source))?;
        // Scratch dir cleans itself up unless every file verifies.
        let scratch = tempfile::Builder::new()
            .prefix("download-")
            .tempdir_in(&self.download_dir)
            .map_err(|source| ProviderError::io("failed to create scratch directory", source))?;

        let total: u64 = update.files.iter().map(|file| file.size).sum();
        let mut transferred = 0;
        let mut names = Vec::with_capacity(update.files.len());
        for file in &update.files {
            let name = artifact_file_name(&file.url)?;
            info!("Downloading {name} for update {}", update.version);
            transferred = self
                .download_file(
                    file,
                    &scratch.path().join(&name),
                    transferred,
                    total,
                    &progress,
                    &cancel,
                )
                .await?;
            names.push(name);
        }

        let kept = scratch.keep();
        Ok(DownloadedUpdate {
            update: update.clone(),
            artifact_paths: names.into_iter().map(|name| kept.join(name)).collect(),
        })
    }

    /// Installation is host-specific; this provider only fetches and
    /// verifies. Hosts wire their installer on top of the downloaded paths.
    fn quit_and_install(&self, _downloaded: &DownloadedUpdate) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported {
            operation: "quit and install",
        })
    }
}

/// Derive a local file name from the artifact url's last path segment.
fn artifact_file_name(raw: &str) -> Result<String, ProviderError> {
    let parsed = url::Url::parse(raw)
        .map_err(|error| ProviderError::Invalid(format!("invalid artifact url {raw:?}: {error}")))?;
    let name = parsed
        .path_segments()
        .and_then(Iterator::last)
        .unwrap_or_default()
        .trim()
        .to_string();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(ProviderError::Invalid(format!(
            "artifact url {raw:?} has no usable file name"
        )));
    }
    Ok(name)
}
