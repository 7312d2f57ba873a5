use async_trait::async_trait;
use audit_server::{AppState, ServerConfig, create_router};
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header}
};
use policy_audit::{AuditError, AuditResult, UpstreamClient};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{header as header_matcher, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "00test-api-token";

/// Nothing listens on the TCP port 1 of the loopback interface.
const UNREACHABLE: &str = "http://127.0.0.1:1";

fn app() -> Router {
    create_router(AppState::new(ServerConfig::default()).unwrap())
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn post_okta(body: String) -> (StatusCode, Vec<u8>) {
    send(
        app(),
        Request::builder()
            .method("POST")
            .uri("/api/okta")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    )
    .await
}

fn okta_app(id: &str, label: &str, policy_href: &str) -> Value {
    json!({
        "id": id,
        "name": label.to_lowercase(),
        "label": label,
        "status": "ACTIVE",
        "created": "2022-01-04T10:00:00.000Z",
        "lastUpdated": "2022-02-01T08:30:00.000Z",
        "signOnMode": "SAML_2_0",
        "features": [],
        "_links": {"accessPolicy": {"href": policy_href}}
    })
}

async fn mount_catalog(server: &MockServer, apps: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/api/v1/apps"))
        .and(header_matcher("Authorization", format!("SSWS {API_KEY}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(apps)))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_rules(server: &MockServer, policy: &str, app_sign_on: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/policies/{policy}/rules")))
        .and(header_matcher("Authorization", format!("SSWS {API_KEY}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": format!("rul-{policy}"),
                "status": "ACTIVE",
                "name": "Catch-all Rule",
                "priority": 99,
                "system": true,
                "type": "ACCESS_POLICY",
                "actions": {"appSignOn": app_sign_on}
            }
        ])))
        .mount(server)
        .await;
}

/// Canned upstream for the review page, whose form only accepts https orgs.
#[derive(Default)]
struct CannedUpstream {
    replies: HashMap<String, Value>,
    timeout: bool
}

impl CannedUpstream {
    fn reply(mut self, path: &str, body: Value) -> Self {
        self.replies.insert(format!("https://acme.okta.com{path}"), body);
        self
    }

    fn rules(self, policy: &str, app_sign_on: Value) -> Self {
        self.reply(
            &format!("/api/v1/policies/{policy}/rules"),
            json!([{"id": "rul1", "actions": {"appSignOn": app_sign_on}}])
        )
    }
}

#[async_trait]
impl UpstreamClient for CannedUpstream {
    async fn get_json(&self, path: &str, credential: &str) -> AuditResult<Value> {
        assert_eq!(credential, API_KEY);
        if self.timeout {
            return Err(AuditError::Timeout(Duration::from_secs(30)));
        }
        self.replies
            .get(path)
            .cloned()
            .ok_or_else(|| AuditError::ConfigError(format!("no reply for {path}")))
    }
}

async fn submit_review(upstream: CannedUpstream) -> (StatusCode, String) {
    let state = AppState::with_client(Arc::new(upstream), ServerConfig::default());
    let (status, body) = send(
        create_router(state),
        Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("server=acme.okta.com&api_key={API_KEY}")))
            .unwrap()
    )
    .await;
    (status, String::from_utf8(body).unwrap())
}

fn audit_body(url: &str) -> String {
    json!({"url": url, "apiKey": API_KEY}).to_string()
}

#[tokio::test]
async fn test_missing_api_key() {
    let (status, body) = post_okta("{}".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(String::from_utf8(body).unwrap(), "missing API key");
}

#[tokio::test]
async fn test_missing_url() {
    let (status, body) = post_okta(r#"{"apiKey":"abc"}"#.to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(String::from_utf8(body).unwrap(), "missing url");
}

#[tokio::test]
async fn test_non_string_fields_are_missing() {
    let (status, body) = post_okta(r#"{"apiKey":123,"url":"https://acme.okta.com"}"#.to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(String::from_utf8(body).unwrap(), "missing API key");

    let (status, body) = post_okta(r#"{"apiKey":"abc","url":["x"]}"#.to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(String::from_utf8(body).unwrap(), "missing url");
}

#[tokio::test]
async fn test_unparseable_body_treated_as_empty() {
    let (status, body) = post_okta("not json".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(String::from_utf8(body).unwrap(), "missing API key");
}

#[tokio::test]
async fn test_groups_apps_with_identical_policies() {
    let upstream = MockServer::start().await;
    let base = upstream.uri();
    mount_catalog(
        &upstream,
        vec![
            okta_app("0oa1", "Wiki", &format!("{base}/api/v1/policies/rst1")),
            okta_app("0oa2", "Mail", &format!("{base}/api/v1/policies/rst2")),
            okta_app("0oa3", "Chat", &format!("{base}/api/v1/policies/rst3")),
        ]
    )
    .await;
    let shared = json!({"access": "ALLOW", "verificationMethod": {"factorMode": "2FA", "type": "ASSURANCE"}});
    mount_rules(&upstream, "rst1", shared.clone()).await;
    mount_rules(&upstream, "rst2", json!({"access": "DENY"})).await;
    mount_rules(&upstream, "rst3", shared.clone()).await;

    let (status, body) = post_okta(audit_body(&base)).await;
    assert_eq!(status, StatusCode::OK);

    let groups: Value = serde_json::from_slice(&body).unwrap();
    let groups = groups.as_object().unwrap();
    assert_eq!(groups.len(), 2);

    let mut sizes: Vec<usize> = groups
        .values()
        .map(|members| members.as_array().unwrap().len())
        .collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![1, 2]);

    let pair = groups
        .values()
        .find(|members| members.as_array().unwrap().len() == 2)
        .unwrap();
    let mut ids: Vec<&str> = pair
        .as_array()
        .unwrap()
        .iter()
        .map(|member| member["app"]["id"].as_str().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["0oa1", "0oa3"]);

    for member in pair.as_array().unwrap() {
        assert_eq!(member["rules"], shared);
        assert_eq!(member["app"]["signOnMode"], "SAML_2_0");
        assert!(member.get("hash").is_none());
    }
}

#[tokio::test]
async fn test_catalog_error_passed_through() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/apps"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"errorCode": "E0000011"})))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/policies/rst1/rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&upstream)
        .await;

    let (status, body) = post_okta(audit_body(&upstream.uri())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let payload: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload, json!({"errorCode": "E0000011"}));
}

#[tokio::test]
async fn test_failed_rule_fetch_is_dropped() {
    let upstream = MockServer::start().await;
    let base = upstream.uri();
    mount_catalog(
        &upstream,
        vec![
            okta_app("0oa1", "Wiki", &format!("{base}/api/v1/policies/rst1")),
            okta_app("0oa2", "Mail", &format!("{UNREACHABLE}/api/v1/policies/rst2")),
        ]
    )
    .await;
    mount_rules(&upstream, "rst1", json!({"access": "ALLOW"})).await;

    let (status, body) = post_okta(audit_body(&base)).await;
    assert_eq!(status, StatusCode::OK);

    let groups: Value = serde_json::from_slice(&body).unwrap();
    let groups = groups.as_object().unwrap();
    assert_eq!(groups.len(), 1);
    let members = groups.values().next().unwrap().as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["app"]["id"], "0oa1");
    assert!(!String::from_utf8(body.clone()).unwrap().contains("0oa2"));
}

#[tokio::test]
async fn test_empty_catalog_returns_empty_object() {
    let upstream = MockServer::start().await;
    mount_catalog(&upstream, vec![]).await;

    let (status, body) = post_okta(audit_body(&upstream.uri())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap(), "{}");
}

#[tokio::test]
async fn test_unreachable_catalog_is_bad_gateway() {
    let (status, body) = post_okta(audit_body(UNREACHABLE)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let envelope: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(envelope["code"], "UPSTREAM_ERROR");
}

#[tokio::test]
async fn test_health_endpoint() {
    let (status, body) = send(
        app(),
        Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap()
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("healthy"));
}

#[tokio::test]
async fn test_metrics_endpoint_without_recorder() {
    let (status, body) = send(
        app(),
        Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap()
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_review_page_prefills_display_defaults() {
    let config = ServerConfig::builder()
        .default_server("https://acme.okta.com")
        .build()
        .unwrap();
    let router = create_router(AppState::new(config).unwrap());

    let (status, body) = send(
        router,
        Request::builder().uri("/").body(Body::empty()).unwrap()
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("value=\"https://acme.okta.com\""));
    assert!(html.contains("Get app list"));
}

#[tokio::test]
async fn test_review_form_field_errors() {
    let (status, body) = send(
        app(),
        Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("server=http%3A%2F%2Facme.okta.com&api_key=short"))
            .unwrap()
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("must be https"));
    assert!(html.contains("invalid key"));
}

#[tokio::test]
async fn test_review_form_renders_groups() {
    let href = |policy: &str| format!("https://acme.okta.com/api/v1/policies/{policy}");
    let upstream = CannedUpstream::default()
        .reply(
            "/api/v1/apps",
            json!([
                okta_app("0oa1", "Wiki", &href("rst1")),
                okta_app("0oa2", "Mail", &href("rst2")),
                okta_app("0oa3", "Chat", &href("rst3")),
            ])
        )
        .rules("rst1", json!({"access": "ALLOW"}))
        .rules("rst2", json!({"access": "DENY"}))
        .rules("rst3", json!({"access": "ALLOW"}));

    let (status, html) = submit_review(upstream).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(html.matches("<details class=\"group\"").count(), 2);
    assert!(html.contains("Exact policy contents:"));
    assert!(html.contains("2 matching apps:"));
    assert!(html.contains("Single app: Mail"));
    assert!(html.contains("&quot;ALLOW&quot;"));
    assert!(html.contains("value=\"https://acme.okta.com\""));
    assert!(!html.contains("There was an error with the API:"));
}

#[tokio::test]
async fn test_review_form_shows_catalog_error_payload() {
    let upstream = CannedUpstream::default().reply(
        "/api/v1/apps",
        json!({"errorCode": "E0000011", "errorSummary": "Invalid token provided"})
    );

    let (status, html) = submit_review(upstream).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(html.contains("There was an error with the API:"));
    assert!(html.contains("E0000011"));
    assert!(html.contains("Invalid token provided"));
    assert!(!html.contains("<details"));
}

#[tokio::test]
async fn test_review_form_transport_failure_is_bad_gateway() {
    let upstream = CannedUpstream {
        timeout: true,
        ..CannedUpstream::default()
    };

    let (status, html) = submit_review(upstream).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(html.contains("There was an error with the API:"));
    assert!(html.contains("Timed out after 30000ms"));
}
