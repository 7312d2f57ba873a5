use std::time::Duration;
use thiserror::Error;

pub type AuditResult<T> = Result<T, AuditError>;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("missing API key")]
    MissingApiKey,

    #[error("missing url")]
    MissingUrl,

    #[error("Okta API returned an error payload: {0}")]
    UpstreamCatalog(serde_json::Value),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Unexpected response body: {0}")]
    DecodeError(#[from] serde_json::Error),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    ConfigError(String)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validation_messages_match_wire_text() {
        assert_eq!(AuditError::MissingApiKey.to_string(), "missing API key");
        assert_eq!(AuditError::MissingUrl.to_string(), "missing url");
    }

    #[test]
    fn test_upstream_error_messages() {
        let catalog = AuditError::UpstreamCatalog(json!({"errorCode": "E0000011"}));
        assert_eq!(
            catalog.to_string(),
            r#"Okta API returned an error payload: {"errorCode":"E0000011"}"#
        );

        let timeout = AuditError::Timeout(Duration::from_millis(1500));
        assert_eq!(timeout.to_string(), "Timed out after 1500ms");
    }
}
