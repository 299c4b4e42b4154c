use log::warn;
use semver::Version;

/// Environment variable recognized values: unset, `"off"`, or an explicit
/// semantic version. Read once per resolution, never cached across checks.
pub const TOOLS_VERSION_ENV_VAR: &str = "BERTH_TOOLS_VERSION";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvVersionOverride {
    /// Auto-updates are switched off entirely.
    Off,
    /// The client must run exactly this version.
    Pinned(Version),
}

impl EnvVersionOverride {
    /// Parse a raw environment value. Unparseable versions are logged and
    /// treated as unset rather than failing the resolution.
    #[must_use]
    pub fn from_value(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.eq_ignore_ascii_case("off") {
            return Some(Self::Off);
        }
        match Version::parse(raw.strip_prefix('v').unwrap_or(raw)) {
            Ok(version) => Some(Self::Pinned(version)),
            Err(error) => {
                warn!("Ignoring invalid {TOOLS_VERSION_ENV_VAR} value {raw:?}: {error}");
                None
            }
        }
    }

    #[must_use]
    pub fn from_process_env() -> Option<Self> {
        std::env::var(TOOLS_VERSION_ENV_VAR)
            .ok()
            .as_deref()
            .and_then(Self::from_value)
    }
}

/// Where the controller reads the override from at resolution time. Tests
/// inject a fixed value so they never depend on process-global state.
#[derive(Debug, Clone, Default)]
pub enum EnvOverrideSource {
    #[default]
    Process,
    Fixed(Option<EnvVersionOverride>),
}

impl EnvOverrideSource {
    #[must_use]
    pub fn current(&self) -> Option<EnvVersionOverride> {
        match self {
            Self::Process => EnvVersionOverride::from_process_env(),
            Self::Fixed(value) => value.clone(),
        }
    }
}
