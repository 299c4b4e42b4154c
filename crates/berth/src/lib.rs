//! Host shell for the auto-update subsystem: settings, logging, and the
//! service facade that desktop frontends embed.

pub mod logging;
pub mod service;
pub mod settings;

pub use service::{ServiceError, UpdaterService};
pub use settings::AppSettings;

pub use berth_backend::{
    AppUpdateEvent, AutoUpdatesStatus, ClusterUri, ClusterVersionSource, UpdateInfo,
};
