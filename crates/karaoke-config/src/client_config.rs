use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Organization used by a stock Jenkins install.
pub const DEFAULT_ORGANIZATION: &str = "jenkins";

/// Client configuration parsed from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Jenkins root URL (e.g. `https://ci.example.com/jenkins`).
    pub jenkins_url: String,

    /// Blue Ocean organization the pipelines live under.
    #[serde(default = "default_organization")]
    pub organization: String,

    /// Fixed interval between incremental log fetches while following a run.
    #[serde(default = "default_karaoke_speed_ms")]
    pub karaoke_speed_ms: u64,

    /// Transport timeout for every REST request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Optional HTTP basic credentials (user + API token).
    #[serde(default)]
    pub auth: Option<AuthConfig>,

    /// Server-sent event settings.
    #[serde(default)]
    pub events: EventsConfig,
}

/// HTTP basic credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    #[serde(default)]
    pub token: String,
}

/// Settings for the Jenkins SSE gateway connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// When `false`, the follower runs polling-only.
    #[serde(default = "default_events_enabled")]
    pub enabled: bool,

    /// Client id announced to the gateway. A random one is generated when absent.
    #[serde(default)]
    pub client_id: Option<String>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: default_events_enabled(),
            client_id: None,
        }
    }
}

/// Values supplied on the command line that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub jenkins_url: Option<String>,
    pub organization: Option<String>,
    pub karaoke_speed_ms: Option<u64>,
}

fn default_organization() -> String {
    DEFAULT_ORGANIZATION.to_string()
}

fn default_karaoke_speed_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_events_enabled() -> bool {
    true
}

impl ClientConfig {
    /// A config pointing at `jenkins_url` with every other field defaulted.
    pub fn new(jenkins_url: impl Into<String>) -> Self {
        Self {
            jenkins_url: jenkins_url.into(),
            organization: default_organization(),
            karaoke_speed_ms: default_karaoke_speed_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            auth: None,
            events: EventsConfig::default(),
        }
    }

    /// Root of the Blue Ocean application (`{jenkins_url}/blue`).
    pub fn app_url_base(&self) -> String {
        format!("{}/blue", self.jenkins_url.trim_end_matches('/'))
    }

    pub fn karaoke_speed(&self) -> Duration {
        Duration::from_millis(self.karaoke_speed_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Parse a client config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, crate::ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }

    /// Parse a client config from a YAML string and validate it.
    ///
    /// Returns the parsed config along with any validation warnings.
    /// Fails if validation produces errors.
    pub fn from_yaml_validated(yaml: &str) -> Result<(Self, Vec<String>), crate::ConfigError> {
        Self::from_yaml(yaml)?.into_validated()
    }

    /// Load a client config from a YAML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::ConfigError::FileRead {
                path: path.to_path_buf(),
                source: e,
            })?;
        Self::from_yaml(&contents)
    }

    /// Load a client config from a YAML file and validate it.
    pub fn from_file_validated(
        path: &std::path::Path,
    ) -> Result<(Self, Vec<String>), crate::ConfigError> {
        Self::from_file(path)?.into_validated()
    }

    /// Apply command-line overrides.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref url) = overrides.jenkins_url {
            self.jenkins_url = url.clone();
        }
        if let Some(ref org) = overrides.organization {
            self.organization = org.clone();
        }
        if let Some(speed) = overrides.karaoke_speed_ms {
            self.karaoke_speed_ms = speed;
        }
    }

    fn into_validated(self) -> Result<(Self, Vec<String>), crate::ConfigError> {
        let result = crate::validate(&self);
        if !result.is_valid() {
            return Err(crate::ConfigError::Validation {
                errors: result.errors,
                warnings: result.warnings,
            });
        }
        Ok((self, result.warnings))
    }
}
