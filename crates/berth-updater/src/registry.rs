use std::path::PathBuf;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use berth_backend::ClusterUri;
use berth_platform::AppPaths;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to resolve app paths: {details}")]
    Paths { details: String },
    #[error("failed to {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode managing cluster state: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedOverride {
    #[serde(default)]
    managing_cluster_uri: Option<ClusterUri>,
}

/// Persisted managing-cluster override.
///
/// The override is keyed by cluster uri only, independent of any session
/// token, so it survives process restarts and re-login to the same cluster.
/// Cluster logout/removal must call [`ManagingClusterRegistry::invalidate`]
/// before the next resolution runs, so the override can never point at a
/// cluster that no longer exists.
#[derive(Debug)]
pub struct ManagingClusterRegistry {
    path: PathBuf,
    state: PersistedOverride,
}

impl ManagingClusterRegistry {
    /// Load the override from `path`. A missing or corrupt file loads as an
    /// empty override rather than failing startup.
    #[must_use]
    pub fn load(path: PathBuf) -> Self {
        let state = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|error| {
                warn!(
                    "Discarding corrupt managing cluster file {}: {error}",
                    path.display()
                );
                PersistedOverride::default()
            }),
            Err(_) => PersistedOverride::default(),
        };
        Self { path, state }
    }

    /// Load from the platform's default location.
    ///
    /// # Errors
    /// Returns an error when the platform config directory cannot be
    /// determined or created.
    pub fn open_default() -> Result<Self, RegistryError> {
        let paths = AppPaths::new().map_err(|error| RegistryError::Paths {
            details: error.to_string(),
        })?;
        paths.ensure_dirs().map_err(|source| RegistryError::Io {
            context: "create config directory",
            source,
        })?;
        Ok(Self::load(paths.managing_cluster_file()))
    }

    #[must_use]
    pub fn get(&self) -> Option<&ClusterUri> {
        self.state.managing_cluster_uri.as_ref()
    }

    /// Record or clear the override and persist it.
    ///
    /// The in-memory value is updated even when persistence fails, so the
    /// running process keeps behaving as the user asked.
    ///
    /// # Errors
    /// Returns an error when the override file cannot be written.
    pub fn set(&mut self, uri: Option<ClusterUri>) -> Result<(), RegistryError> {
        match &uri {
            Some(uri) => info!("Managing cluster set to {uri}"),
            None => info!("Managing cluster cleared, reverting to automatic mode"),
        }
        self.state.managing_cluster_uri = uri;
        self.save()
    }

    /// Clear the override if it points at `uri`. Called on cluster logout or
    /// removal. Returns whether the override was cleared.
    ///
    /// # Errors
    /// Returns an error when the cleared state cannot be persisted.
    pub fn invalidate(&mut self, uri: &ClusterUri) -> Result<bool, RegistryError> {
        if self.state.managing_cluster_uri.as_ref() != Some(uri) {
            return Ok(false);
        }
        info!("Managing cluster {uri} is gone, clearing the override");
        self.state.managing_cluster_uri = None;
        self.save()?;
        Ok(true)
    }

    fn save(&self) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| RegistryError::Io {
                context: "create config directory",
                source,
            })?;
        }
        let content = serde_json::to_string_pretty(&self.state)
            .map_err(|source| RegistryError::Serialize { source })?;
        std::fs::write(&self.path, content).map_err(|source| RegistryError::Io {
            context: "write managing cluster file",
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use berth_backend::ClusterUri;

    use super::ManagingClusterRegistry;

    fn uri(raw: &str) -> ClusterUri {
        raw.parse().expect("valid cluster uri in test")
    }

    #[test]
    fn set_persists_and_survives_reload() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("managing_cluster.json");

        let mut registry = ManagingClusterRegistry::load(path.clone());
        assert_eq!(registry.get(), None);

        registry
            .set(Some(uri("main.example.com")))
            .expect("override should persist");

        let reloaded = ManagingClusterRegistry::load(path);
        assert_eq!(reloaded.get(), Some(&uri("main.example.com")));
    }

    #[test]
    fn clearing_persists_an_empty_override() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("managing_cluster.json");

        let mut registry = ManagingClusterRegistry::load(path.clone());
        registry
            .set(Some(uri("main.example.com")))
            .expect("override should persist");
        registry.set(None).expect("cleared override should persist");

        let reloaded = ManagingClusterRegistry::load(path);
        assert_eq!(reloaded.get(), None);
    }

    #[test]
    fn invalidate_clears_only_the_matching_cluster() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("managing_cluster.json");

        let mut registry = ManagingClusterRegistry::load(path.clone());
        registry
            .set(Some(uri("main.example.com")))
            .expect("override should persist");

        let untouched = registry
            .invalidate(&uri("other.example.com"))
            .expect("no-op invalidation should succeed");
        assert!(!untouched);
        assert_eq!(registry.get(), Some(&uri("main.example.com")));

        let cleared = registry
            .invalidate(&uri("main.example.com"))
            .expect("matching invalidation should succeed");
        assert!(cleared);
        assert_eq!(registry.get(), None);

        let reloaded = ManagingClusterRegistry::load(path);
        assert_eq!(reloaded.get(), None);
    }

    #[test]
    fn corrupt_file_loads_as_empty_override() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("managing_cluster.json");
        std::fs::write(&path, "{not json").expect("corrupt file should be written");

        let registry = ManagingClusterRegistry::load(path);
        assert_eq!(registry.get(), None);
    }
}
