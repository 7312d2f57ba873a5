//! HTTP request handlers for the audit server.

use axum::{
    Form, Json,
    body::Bytes,
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse},
};
use policy_audit::{AuditError, AuditRequest, GroupedResult};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::Result;
use crate::form::ReviewForm;
use crate::render::{PageView, page};
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Health check endpoint.
pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
        }),
    )
}

/// Prometheus metrics endpoint.
///
/// Empty when no recorder has been installed.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

/// POST /api/okta
///
/// Runs the audit for the `url` and `apiKey` in the JSON body and returns the
/// applications grouped by policy fingerprint. A body that is not a JSON
/// object is treated as empty.
pub async fn audit_okta(State(state): State<AppState>, body: Bytes) -> Result<Json<GroupedResult>> {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let request = AuditRequest::from_json(&body)?;
    tracing::debug!(url = %request.url, "Audit requested");

    let report = state.pipeline.run(&request).await?;
    Ok(Json(report.groups))
}

/// GET /
///
/// Review page with the configured display defaults filled in.
pub async fn index(State(state): State<AppState>) -> Html<String> {
    Html(page(&PageView {
        server: state.config.default_server.clone().unwrap_or_default(),
        api_key: state.config.default_api_key.clone().unwrap_or_default(),
        ..PageView::default()
    }))
}

/// POST /
///
/// Validates the page form, runs the audit, and renders the groups or the
/// error in place.
pub async fn review(
    State(state): State<AppState>,
    Form(form): Form<ReviewForm>,
) -> (StatusCode, Html<String>) {
    let mut view = PageView {
        server: form.server.clone(),
        api_key: form.api_key.clone(),
        ..PageView::default()
    };

    let request = match form.validate() {
        Ok(request) => request,
        Err(field_errors) => {
            view.field_errors = field_errors;
            return (StatusCode::BAD_REQUEST, Html(page(&view)));
        }
    };
    view.server.clone_from(&request.url);

    let status = match state.pipeline.run(&request).await {
        Ok(report) => {
            view.groups = Some(report.groups);
            StatusCode::OK
        }
        Err(AuditError::UpstreamCatalog(payload)) => {
            view.api_error = Some(payload);
            StatusCode::INTERNAL_SERVER_ERROR
        }
        Err(e) => {
            tracing::error!(error = %e, "Audit failed");
            view.api_error = Some(json!({ "error": e.to_string() }));
            StatusCode::BAD_GATEWAY
        }
    };

    (status, Html(page(&view)))
}
