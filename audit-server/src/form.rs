//! Review-page form handling.

use policy_audit::AuditRequest;
use serde::Deserialize;
use std::fmt;
use url::Url;

const MIN_API_KEY_LEN: usize = 10;

/// Fields submitted by the review page.
#[derive(Default, Deserialize)]
pub struct ReviewForm {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub api_key: String,
}

impl fmt::Debug for ReviewForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReviewForm")
            .field("server", &self.server)
            .field("api_key", &"[redacted]")
            .finish()
    }
}

/// Per-field messages shown next to the inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors {
    pub server: Option<&'static str>,
    pub api_key: Option<&'static str>,
}

impl ReviewForm {
    /// Normalizes both fields, returning the audit request or every field
    /// error at once.
    pub fn validate(&self) -> Result<AuditRequest, FieldErrors> {
        let server = normalize_server_url(self.server.trim());
        let api_key = validate_api_key(&self.api_key);

        match (server, api_key) {
            (Ok(server), Ok(api_key)) => Ok(AuditRequest::new(server, api_key)),
            (server, api_key) => Err(FieldErrors {
                server: server.err(),
                api_key: api_key.err(),
            }),
        }
    }
}

/// Coerces user input into `https://<host>`.
///
/// Bare hostnames get an `https://` prefix. Anything that is not https or
/// has no host is rejected.
pub fn normalize_server_url(value: &str) -> Result<String, &'static str> {
    let candidate = if value.starts_with("http") {
        value.to_string()
    } else {
        format!("https://{value}")
    };

    let url = Url::parse(&candidate).map_err(|_| "invalid url")?;
    if url.scheme() != "https" {
        return Err("must be https");
    }
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or("invalid url")?;

    Ok(format!("https://{host}"))
}

/// Keys are taken as typed, surrounding whitespace included.
pub fn validate_api_key(value: &str) -> Result<String, &'static str> {
    if value.len() < MIN_API_KEY_LEN {
        Err("invalid key")
    } else {
        Ok(value.to_string())
    }
}
