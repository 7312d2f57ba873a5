use crate::config::AuditConfig;
use crate::error::{AuditError, AuditResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Path of the application catalog, relative to the org URL.
pub const APPS_PATH: &str = "/api/v1/apps";

/// Appended to an access-policy link to reach its rule collection.
pub const RULES_SUFFIX: &str = "/rules";

/// Property present only on Okta error payloads.
pub const ERROR_CODE_FIELD: &str = "errorCode";

/// Raw JSON transport to the Okta management API.
///
/// Implementations send one authenticated GET and hand back the decoded body
/// without looking at the HTTP status; callers decide whether the body is an
/// error payload.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn get_json(&self, path: &str, credential: &str) -> AuditResult<Value>;
}

/// A decoded upstream response: either the expected records or the error
/// payload the API sent instead.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamBody<T> {
    Records(Vec<T>),
    Error(Value)
}

pub async fn fetch_records<T: DeserializeOwned>(
    client: &dyn UpstreamClient,
    path: &str,
    credential: &str
) -> AuditResult<UpstreamBody<T>> {
    let body = client.get_json(path, credential).await?;
    decode_records(body)
}

pub fn decode_records<T: DeserializeOwned>(body: Value) -> AuditResult<UpstreamBody<T>> {
    if is_error_payload(&body) {
        return Ok(UpstreamBody::Error(body));
    }
    Ok(UpstreamBody::Records(serde_json::from_value(body)?))
}

/// True when the body carries a non-empty `errorCode`.
pub fn is_error_payload(body: &Value) -> bool {
    match body.get(ERROR_CODE_FIELD) {
        None | Some(Value::Null | Value::Bool(false)) => false,
        Some(Value::String(code)) => !code.is_empty(),
        Some(_) => true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OktaApplication {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_on_mode: Option<String>,
    #[serde(rename = "_links", default)]
    pub links: AppLinks,
    /// Upstream fields this tool does not interpret, passed through as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>
}

impl OktaApplication {
    pub fn access_policy_href(&self) -> Option<&str> {
        self.links
            .access_policy
            .as_ref()
            .map(|link| link.href.as_str())
            .filter(|href| !href.is_empty())
    }

    /// Rule collection URL for this application's access policy.
    pub fn rules_path(&self) -> Option<String> {
        self.access_policy_href()
            .map(|href| format!("{href}{RULES_SUFFIX}"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_policy: Option<Link>,
    #[serde(flatten)]
    pub other: Map<String, Value>
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>
}

/// One sign-on rule of an access policy. Only `actions` is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub system: Option<bool>,
    #[serde(rename = "type", default)]
    pub rule_type: Option<String>,
    pub actions: RuleActions
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleActions {
    #[serde(default)]
    pub app_sign_on: Value
}

/// `UpstreamClient` backed by reqwest, authenticating with `SSWS` tokens.
pub struct OktaClient {
    client: Client,
    api_server: Option<Url>
}

impl OktaClient {
    pub fn new(config: &AuditConfig) -> AuditResult<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(AuditError::HttpError)?;

        let api_server = config
            .api_server
            .as_deref()
            .map(|server| {
                Url::parse(server).map_err(|e| AuditError::InvalidUrl {
                    url: server.to_string(),
                    reason: e.to_string()
                })
            })
            .transpose()?;

        Ok(Self { client, api_server })
    }

    /// Absolute `http(s)` URLs are used as-is; anything else is joined onto
    /// the configured API server.
    pub fn resolve(&self, path: &str) -> AuditResult<Url> {
        if let Ok(url) = Url::parse(path) {
            if matches!(url.scheme(), "http" | "https") {
                return Ok(url);
            }
        }

        let base = self.api_server.as_ref().ok_or_else(|| {
            AuditError::ConfigError(format!(
                "cannot resolve relative path {path} without OKTA_API_SERVER"
            ))
        })?;

        base.join(path).map_err(|e| AuditError::InvalidUrl {
            url: path.to_string(),
            reason: e.to_string()
        })
    }
}

#[async_trait]
impl UpstreamClient for OktaClient {
    async fn get_json(&self, path: &str, credential: &str) -> AuditResult<Value> {
        let url = self.resolve(path)?;
        debug!(url = %url, "Making Okta API request");

        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("SSWS {credential}"))
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        debug!(status = status.as_u16(), bytes = body.len(), "Okta API responded");

        Ok(serde_json::from_slice(&body)?)
    }
}

pub fn create_okta_client(config: &AuditConfig) -> AuditResult<Arc<dyn UpstreamClient>> {
    Ok(Arc::new(OktaClient::new(config)?))
}
