mod client_config;
mod validation;

pub use client_config::{
    AuthConfig, ClientConfig, ConfigOverrides, EventsConfig, DEFAULT_ORGANIZATION,
};
pub use validation::{validate, ValidationResult};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    YamlParse(#[from] serde_yml::Error),

    #[error("Config validation failed: {}", errors.join("; "))]
    Validation {
        errors: Vec<String>,
        warnings: Vec<String>,
    },
}
