use serde::{Deserialize, Serialize};

use berth_platform::AppPaths;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_manifest_base_url")]
    pub update_manifest_base_url: String,

    /// Hosts the user may download update artifacts from. Checked before an
    /// explicit download starts.
    #[serde(default = "default_download_hosts")]
    pub known_download_hosts: Vec<String>,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_manifest_base_url() -> String {
    "https://cdn.berth.dev/tools".to_string()
}

fn default_download_hosts() -> Vec<String> {
    vec!["cdn.berth.dev".to_string()]
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            debug_logging: false,
            probe_timeout_secs: default_probe_timeout(),
            update_manifest_base_url: default_manifest_base_url(),
            known_download_hosts: default_download_hosts(),
            max_log_size_bytes: default_max_log_size_bytes(),
        }
    }
}

impl AppSettings {
    pub fn load() -> Self {
        let Ok(paths) = AppPaths::new() else {
            return Self::default();
        };
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            match std::fs::read_to_string(&settings_path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
                Err(_) => Self::default(),
            }
        } else {
            Self::default()
        }
    }

    /// # Errors
    /// Returns an error when the settings file cannot be written.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let paths = AppPaths::new().map_err(std::io::Error::other)?;
        paths.ensure_dirs()?;

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.settings_file(), content)?;
        Ok(())
    }

    #[must_use]
    pub fn trusts_download_host(&self, host: &str) -> bool {
        self.known_download_hosts
            .iter()
            .any(|known| known.eq_ignore_ascii_case(host))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::AppSettings;

    #[test]
    fn defaults_cover_every_field() {
        let settings = AppSettings::default();

        assert!(!settings.debug_logging);
        assert_eq!(settings.probe_timeout_secs, 10);
        assert_eq!(settings.update_manifest_base_url, "https://cdn.berth.dev/tools");
        assert_eq!(settings.known_download_hosts, vec!["cdn.berth.dev"]);
        assert_eq!(settings.max_log_size_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn partial_settings_file_fills_in_defaults() {
        let value = json!({ "debug_logging": true });

        let settings: AppSettings =
            serde_json::from_value(value).expect("settings JSON should deserialize");

        assert!(settings.debug_logging);
        assert_eq!(settings.probe_timeout_secs, 10);
        assert_eq!(settings.known_download_hosts, vec!["cdn.berth.dev"]);
    }

    #[test]
    fn download_host_trust_is_case_insensitive() {
        let settings = AppSettings {
            known_download_hosts: vec!["CDN.Berth.dev".to_string()],
            ..AppSettings::default()
        };

        assert!(settings.trusts_download_host("cdn.berth.dev"));
        assert!(!settings.trusts_download_host("evil.example.com"));
    }
}
