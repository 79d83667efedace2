use crate::ClientConfig;

/// Validation result containing all issues found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

const MIN_SENSIBLE_SPEED_MS: u64 = 250;
const MAX_SENSIBLE_SPEED_MS: u64 = 10_000;

/// Validate a client configuration.
pub fn validate(config: &ClientConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    let url = config.jenkins_url.trim();
    if url.is_empty() {
        result.errors.push("jenkins_url must not be empty".to_string());
    } else if !(url.starts_with("http://") || url.starts_with("https://")) {
        result.errors.push(format!(
            "jenkins_url '{url}' must start with http:// or https://"
        ));
    }

    if config.organization.trim().is_empty() {
        result.errors.push("organization must not be empty".to_string());
    }

    if config.karaoke_speed_ms == 0 {
        result
            .errors
            .push("karaoke_speed_ms must be greater than 0".to_string());
    } else if config.karaoke_speed_ms < MIN_SENSIBLE_SPEED_MS {
        result.warnings.push(format!(
            "karaoke_speed_ms {} is below {MIN_SENSIBLE_SPEED_MS}ms and will hammer the server",
            config.karaoke_speed_ms
        ));
    } else if config.karaoke_speed_ms > MAX_SENSIBLE_SPEED_MS {
        result.warnings.push(format!(
            "karaoke_speed_ms {} is above {MAX_SENSIBLE_SPEED_MS}ms; logs will lag noticeably",
            config.karaoke_speed_ms
        ));
    }

    if config.request_timeout_secs == 0 {
        result
            .errors
            .push("request_timeout_secs must be greater than 0".to_string());
    }

    if let Some(ref auth) = config.auth {
        if auth.username.trim().is_empty() {
            result
                .errors
                .push("auth.username must not be empty".to_string());
        }
        if auth.token.is_empty() {
            result
                .warnings
                .push("auth.token is empty; requests will likely be rejected".to_string());
        }
        if url.starts_with("http://") {
            result
                .warnings
                .push("auth is configured over plain http; credentials are sent unencrypted".to_string());
        }
    }

    if let Some(ref client_id) = config.events.client_id {
        if client_id.trim().is_empty() {
            result
                .errors
                .push("events.client_id must not be empty when set".to_string());
        }
    }

    result
}
