//! The pure compatibility resolver.
//!
//! Reconciles an environment override, the persisted managing-cluster
//! override, and the probe's snapshot into one `AutoUpdatesStatus`. No I/O,
//! no side effects: identical inputs always produce identical output.

use log::debug;
use semver::Version;

use berth_backend::{
    AutoUpdatesStatus, ClusterUri, ClusterVersionReport, DisabledReason, StatusOptions,
    UpdateSource,
};

use crate::env::EnvVersionOverride;

/// Resolve the auto-update decision, in precedence order: environment
/// override, managing-cluster override, then automatic highest-compatible
/// selection.
///
/// The probe report is attached to the outcome's options on every branch, so
/// the UI can explain the decision (including unreachable clusters) without a
/// second query.
#[must_use]
pub fn resolve(
    env_override: Option<&EnvVersionOverride>,
    managing_cluster_uri: Option<&ClusterUri>,
    report: &ClusterVersionReport,
) -> AutoUpdatesStatus {
    let options = build_options(managing_cluster_uri, report);

    // The env var wins over everything; cluster data is display-only here.
    match env_override {
        Some(EnvVersionOverride::Off) => {
            return AutoUpdatesStatus::Disabled {
                reason: DisabledReason::DisabledByEnvVar,
                options,
            };
        }
        Some(EnvVersionOverride::Pinned(version)) => {
            return AutoUpdatesStatus::Enabled {
                version: version.clone(),
                source: UpdateSource::EnvVar,
                options,
            };
        }
        None => {}
    }

    // A recorded managing cluster is authoritative while it exists. It is
    // never silently dropped: if it cannot manage right now, the outcome says
    // so and the user must change or clear the override themselves.
    if let Some(uri) = &options.managing_cluster_uri {
        let uri = uri.clone();
        if let Some(cluster) = report.reachable.iter().find(|c| c.cluster_uri == uri) {
            if cluster.tools_auto_update {
                return AutoUpdatesStatus::Enabled {
                    version: cluster.tools_version.clone(),
                    source: UpdateSource::ManagingCluster {
                        managing_cluster_uri: uri,
                    },
                    options,
                };
            }
            debug!("Managing cluster {uri} does not advertise auto-update");
            return AutoUpdatesStatus::Disabled {
                reason: DisabledReason::ManagingClusterUnableToManage,
                options,
            };
        }
        debug!("Managing cluster {uri} was unreachable during the probe");
        return AutoUpdatesStatus::Disabled {
            reason: DisabledReason::ManagingClusterUnableToManage,
            options,
        };
    }

    // Automatic mode: the newest candidate version that satisfies every
    // reachable cluster's minimum requirement.
    if !report
        .reachable
        .iter()
        .any(|cluster| cluster.tools_auto_update)
    {
        return AutoUpdatesStatus::Disabled {
            reason: DisabledReason::NoClusterWithAutoUpdate,
            options,
        };
    }

    match options.highest_compatible_version.clone() {
        Some(version) => AutoUpdatesStatus::Enabled {
            version,
            source: UpdateSource::HighestCompatible,
            options,
        },
        None => AutoUpdatesStatus::Disabled {
            reason: DisabledReason::NoCompatibleVersion,
            options,
        },
    }
}

fn build_options(
    managing_cluster_uri: Option<&ClusterUri>,
    report: &ClusterVersionReport,
) -> StatusOptions {
    // The options invariant: a managing uri may only be surfaced when the
    // probe saw that cluster, reachable or not. Registry invalidation keeps
    // the override in sync with cluster lifecycle, so a miss here means the
    // override refers to a cluster the client no longer talks to.
    let managing_cluster_uri = managing_cluster_uri
        .filter(|uri| {
            report.reachable.iter().any(|c| c.cluster_uri == **uri)
                || report.unreachable.iter().any(|c| c.cluster_uri == **uri)
        })
        .cloned();

    StatusOptions {
        managing_cluster_uri,
        highest_compatible_version: highest_compatible_version(report),
        clusters: report.reachable.clone(),
        unreachable_clusters: report.unreachable.clone(),
    }
}

/// Highest version offered by any auto-update-capable reachable cluster that
/// satisfies the minimum requirement of every reachable cluster, candidates
/// and non-candidates alike. A cluster that does not offer auto-update may
/// still enforce a minimum client version.
fn highest_compatible_version(report: &ClusterVersionReport) -> Option<Version> {
    let mut candidates: Vec<&Version> = report
        .reachable
        .iter()
        .filter(|cluster| cluster.tools_auto_update)
        .map(|cluster| &cluster.tools_version)
        .collect();

    // Semver total order doubles as the tie-breaker, prerelease tags included.
    candidates.sort_unstable();
    candidates.dedup();

    candidates
        .into_iter()
        .rev()
        .find(|candidate| {
            report
                .reachable
                .iter()
                .all(|cluster| **candidate >= cluster.min_tools_version)
        })
        .cloned()
}
