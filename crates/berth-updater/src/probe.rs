use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use log::{debug, warn};

use berth_backend::{ClusterVersionReport, ClusterVersionSource, UnreachableCluster};

/// Concurrent fan-out over every known cluster's version endpoint.
///
/// Each query runs under its own timeout, so one hung cluster can never block
/// the whole decision. A timed-out or failed query reclassifies the cluster
/// as unreachable; the probe itself never fails.
#[derive(Clone)]
pub struct ClusterVersionProbe {
    source: Arc<dyn ClusterVersionSource>,
    per_cluster_timeout: Duration,
}

impl ClusterVersionProbe {
    #[must_use]
    pub fn new(source: Arc<dyn ClusterVersionSource>, per_cluster_timeout: Duration) -> Self {
        Self {
            source,
            per_cluster_timeout,
        }
    }

    /// Query all known clusters and partition them into reachable results and
    /// unreachable failures. Output order follows `known_clusters()` order.
    pub async fn probe(&self) -> ClusterVersionReport {
        let clusters = self.source.known_clusters();
        debug!("Probing {} cluster(s) for version info", clusters.len());

        let queries = clusters.iter().map(|uri| async move {
            match tokio::time::timeout(
                self.per_cluster_timeout,
                self.source.fetch_version_info(uri),
            )
            .await
            {
                Ok(Ok(info)) => Ok(info),
                Ok(Err(error)) => Err(UnreachableCluster {
                    cluster_uri: uri.clone(),
                    error_message: error.to_string(),
                }),
                Err(_) => Err(UnreachableCluster {
                    cluster_uri: uri.clone(),
                    error_message: format!(
                        "version query timed out after {}ms",
                        self.per_cluster_timeout.as_millis()
                    ),
                }),
            }
        });

        let mut report = ClusterVersionReport::default();
        for outcome in join_all(queries).await {
            match outcome {
                Ok(info) => report.reachable.push(info),
                Err(unreachable) => {
                    warn!(
                        "Cluster {} unreachable during version probe: {}",
                        unreachable.cluster_uri, unreachable.error_message
                    );
                    report.unreachable.push(unreachable);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use semver::Version;

    use berth_backend::{
        ClusterUri, ClusterVersionInfo, ClusterVersionSource, SourceError,
    };

    use super::ClusterVersionProbe;

    enum Reply {
        Info(ClusterVersionInfo),
        Failure(String),
        Hang,
    }

    struct ScriptedSource {
        order: Vec<ClusterUri>,
        replies: HashMap<ClusterUri, Reply>,
    }

    #[async_trait]
    impl ClusterVersionSource for ScriptedSource {
        fn known_clusters(&self) -> Vec<ClusterUri> {
            self.order.clone()
        }

        async fn fetch_version_info(
            &self,
            cluster: &ClusterUri,
        ) -> Result<ClusterVersionInfo, SourceError> {
            match self.replies.get(cluster) {
                Some(Reply::Info(info)) => Ok(info.clone()),
                Some(Reply::Failure(details)) => Err(SourceError::query(details.clone())),
                Some(Reply::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(SourceError::NotConnected)
                }
                None => Err(SourceError::NotConnected),
            }
        }
    }

    fn uri(raw: &str) -> ClusterUri {
        raw.parse().expect("valid cluster uri in test")
    }

    fn info(raw: &str, tools: &str) -> ClusterVersionInfo {
        ClusterVersionInfo {
            cluster_uri: uri(raw),
            tools_version: Version::parse(tools).expect("valid version in test"),
            min_tools_version: Version::new(1, 0, 0),
            tools_auto_update: true,
        }
    }

    fn probe_for(source: ScriptedSource) -> ClusterVersionProbe {
        ClusterVersionProbe::new(Arc::new(source), Duration::from_millis(200))
    }

    #[tokio::test(start_paused = true)]
    async fn partitions_successes_and_failures_in_known_order() {
        let source = ScriptedSource {
            order: vec![uri("a.example.com"), uri("b.example.com"), uri("c.example.com")],
            replies: HashMap::from([
                (uri("a.example.com"), Reply::Info(info("a.example.com", "16.0.0"))),
                (uri("b.example.com"), Reply::Failure("connection refused".to_string())),
                (uri("c.example.com"), Reply::Info(info("c.example.com", "17.0.0"))),
            ]),
        };

        let report = probe_for(source).probe().await;

        assert_eq!(report.reachable.len(), 2);
        assert_eq!(report.reachable[0].cluster_uri, uri("a.example.com"));
        assert_eq!(report.reachable[1].cluster_uri, uri("c.example.com"));
        assert_eq!(report.unreachable.len(), 1);
        assert_eq!(report.unreachable[0].cluster_uri, uri("b.example.com"));
        assert!(
            report.unreachable[0]
                .error_message
                .contains("connection refused")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hung_cluster_times_out_without_blocking_the_rest() {
        let source = ScriptedSource {
            order: vec![uri("slow.example.com"), uri("fast.example.com")],
            replies: HashMap::from([
                (uri("slow.example.com"), Reply::Hang),
                (
                    uri("fast.example.com"),
                    Reply::Info(info("fast.example.com", "16.0.0")),
                ),
            ]),
        };

        let report = probe_for(source).probe().await;

        assert_eq!(report.reachable.len(), 1);
        assert_eq!(report.reachable[0].cluster_uri, uri("fast.example.com"));
        assert_eq!(report.unreachable.len(), 1);
        assert_eq!(report.unreachable[0].cluster_uri, uri("slow.example.com"));
        assert!(report.unreachable[0].error_message.contains("timed out"));
    }

    #[tokio::test]
    async fn empty_cluster_set_yields_empty_report() {
        let source = ScriptedSource {
            order: Vec::new(),
            replies: HashMap::new(),
        };

        let report = probe_for(source).probe().await;

        assert!(report.reachable.is_empty());
        assert!(report.unreachable.is_empty());
    }
}
