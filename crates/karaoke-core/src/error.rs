#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Request to '{url}' failed: {message}")]
    Network {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Malformed data: {message}")]
    MalformedData { message: String },

    #[error("Event stream error: {message}")]
    Stream { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] karaoke_config::ConfigError),
}

impl CoreError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedData {
            message: message.into(),
        }
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    /// Wrap a transport failure for `url`.
    pub fn network(url: &str, err: reqwest::Error) -> Self {
        Self::Network {
            url: url.to_string(),
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }

    /// Whether retrying the same request could plausibly succeed.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

/// Result type alias for karaoke-core operations.
pub type CoreResult<T> = Result<T, CoreError>;
