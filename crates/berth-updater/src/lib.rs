//! Update decision engine for a client connected to several clusters.
//!
//! This crate turns the version requirements of every connected cluster into
//! one authoritative auto-update decision and drives the resulting
//! download/verify/install lifecycle:
//! - Concurrent, timeout-bounded probing of cluster version requirements.
//! - The pure compatibility resolver that produces an `AutoUpdatesStatus`.
//! - The persisted managing-cluster override and its lifecycle invalidation.
//! - The update lifecycle controller and its event stream.
//! - A reference HTTP updater provider with SHA-512 verification.

pub mod controller;
pub mod env;
pub mod probe;
pub mod provider;
pub mod registry;
pub mod resolver;

pub use controller::{ControllerConfig, ControllerError, UpdateController, UpdateControllerHandle};
pub use env::{EnvOverrideSource, EnvVersionOverride, TOOLS_VERSION_ENV_VAR};
pub use probe::ClusterVersionProbe;
pub use provider::HttpUpdaterProvider;
pub use registry::{ManagingClusterRegistry, RegistryError};
pub use resolver::resolve;
