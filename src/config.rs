use std::{env, fs, path::PathBuf};

use nestify::nest;
use serde::{Deserialize, Serialize};

use crate::prelude::*;

nest! {
    #[derive(Debug, Clone, Deserialize, Serialize)]*
    #[serde(rename_all = "kebab-case")]*
    /// Persistent configuration for the resolver CLI.
    ///
    /// Stored in the filesystem, typically at `~/.config/resolver/config.yaml`,
    /// following the XDG Base Directory Specification. It can be loaded with
    /// [`ResolverConfig::load_with_override`] or persisted with
    /// [`ResolverConfig::persist`].
    pub struct ResolverConfig {
        pub backend: pub struct BackendConfig {
            /// Base URL of the search backend.
            pub url: String,
            /// Index pattern holding current-schema events.
            pub event_index: String,
            /// Index holding legacy-schema events.
            pub legacy_event_index: String,
            pub request_timeout_seconds: u64,
        },
        pub result_list: pub struct ResultListConfig {
            pub default_first_page_index: u64,
            pub default_page_size: u64,
        },
    }
}

/// Get the path to the configuration file, following the XDG Base Directory
/// Specification at
/// https://specifications.freedesktop.org/basedir-spec/basedir-spec-latest.html
///
/// If config_name is None, returns ~/.config/resolver/config.yaml (default)
/// If config_name is Some, returns ~/.config/resolver/{config_name}.yaml
fn get_configuration_file_path(config_name: Option<&str>) -> PathBuf {
    let config_dir = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = env::var("HOME").expect("HOME env variable not set");
            PathBuf::from(home).join(".config")
        });
    let config_dir = config_dir.join("resolver");

    match config_name {
        Some(name) => config_dir.join(format!("{name}.yaml")),
        None => config_dir.join("config.yaml"),
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                url: "http://localhost:9200/".into(),
                event_index: "events-endpoint-*".into(),
                legacy_event_index: "endgame-*".into(),
                request_timeout_seconds: 30,
            },
            result_list: ResultListConfig {
                default_first_page_index: 0,
                default_page_size: 100,
            },
        }
    }
}

impl ResolverConfig {
    /// Load the configuration. If it does not exist, return a default
    /// configuration.
    ///
    /// If backend_url_override is provided, the backend URL from the loaded
    /// configuration will be ignored, and the override will be used instead
    pub fn load_with_override(
        config_name: Option<&str>,
        backend_url_override: Option<&str>,
    ) -> Result<Self> {
        let config_path = get_configuration_file_path(config_name);

        let mut config = match fs::read(&config_path) {
            Ok(config_str) => {
                let config: ResolverConfig = serde_yaml::from_slice(&config_str).context(
                    format!("Failed to parse resolver config at {}", config_path.display()),
                )?;
                debug!("Config loaded from {}", config_path.display());
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Config file not found at {}", config_path.display());
                ResolverConfig::default()
            }
            Err(e) => bail!("Failed to load config: {e}"),
        };

        if let Some(backend_url) = backend_url_override {
            config.backend.url = backend_url.to_owned();
        }

        Ok(config)
    }

    /// Persist changes to the configuration
    pub fn persist(&self, config_name: Option<&str>) -> Result<()> {
        let config_path = get_configuration_file_path(config_name);
        fs::create_dir_all(config_path.parent().context("Invalid config path")?)?;

        let config_str = serde_yaml::to_string(self)?;
        fs::write(&config_path, config_str)?;
        debug!("Config written to {}", config_path.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use temp_env::with_var;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResolverConfig::default();
        assert_eq!(config.backend.url, "http://localhost:9200/");
        assert_eq!(config.backend.event_index, "events-endpoint-*");
        assert_eq!(config.backend.legacy_event_index, "endgame-*");
        assert_eq!(config.result_list.default_first_page_index, 0);
        assert_eq!(config.result_list.default_page_size, 100);
    }

    #[test]
    fn test_load_returns_defaults_when_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        with_var("XDG_CONFIG_HOME", Some(dir.path().as_os_str()), || {
            let config = ResolverConfig::load_with_override(None, None).unwrap();
            assert_eq!(config.backend.url, ResolverConfig::default().backend.url);
        });
    }

    #[test]
    fn test_backend_url_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        with_var("XDG_CONFIG_HOME", Some(dir.path().as_os_str()), || {
            let config =
                ResolverConfig::load_with_override(None, Some("https://search.internal:9200/"))
                    .unwrap();
            assert_eq!(config.backend.url, "https://search.internal:9200/");
        });
    }

    #[test]
    fn test_persist_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        with_var("XDG_CONFIG_HOME", Some(dir.path().as_os_str()), || {
            let mut config = ResolverConfig::default();
            config.backend.event_index = "events-custom-*".into();
            config.persist(Some("staging")).unwrap();

            let loaded = ResolverConfig::load_with_override(Some("staging"), None).unwrap();
            assert_eq!(loaded.backend.event_index, "events-custom-*");
        });
    }
}
