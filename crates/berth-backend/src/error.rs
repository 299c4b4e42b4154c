use semver::Version;
use thiserror::Error;

/// Failure of a single cluster's version query. Always tolerated by the
/// probe: the cluster is reclassified as unreachable, never aborting the
/// overall resolution.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cluster is not connected")]
    NotConnected,
    #[error("version query failed: {details}")]
    Query { details: String },
}

impl SourceError {
    pub fn query(details: impl Into<String>) -> Self {
        Self::Query {
            details: details.into(),
        }
    }
}

/// Errors from the external updater provider (metadata fetch, download,
/// verification, install hand-off).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("update request failed with HTTP {status}")]
    HttpStatus { status: reqwest::StatusCode },
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("no release found for version {version}")]
    UnknownVersion { version: Version },
    #[error("checksum mismatch for {file}, refusing to keep the download")]
    ChecksumMismatch { file: String },
    #[error("download cancelled")]
    Cancelled,
    #[error("operation not supported by this provider: {operation}")]
    Unsupported { operation: &'static str },
    #[error("{0}")]
    Invalid(String),
}

impl ProviderError {
    pub fn http(context: &'static str, source: reqwest::Error) -> Self {
        Self::Http { context, source }
    }

    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}

#[cfg(test)]
mod tests {
    use super::{ProviderError, SourceError};

    #[test]
    fn source_error_display_includes_details() {
        let error = SourceError::query("grpc transport closed");
        assert_eq!(
            error.to_string(),
            "version query failed: grpc transport closed"
        );
    }

    #[test]
    fn provider_error_display_names_mismatched_file() {
        let error = ProviderError::ChecksumMismatch {
            file: "berth-17.0.0.tar.gz".to_string(),
        };
        assert!(error.to_string().contains("berth-17.0.0.tar.gz"));
    }

    #[test]
    fn provider_io_helper_keeps_context() {
        let error = ProviderError::io(
            "failed to create download file",
            std::io::Error::other("disk full"),
        );
        assert!(
            error
                .to_string()
                .starts_with("failed to create download file")
        );
    }
}
