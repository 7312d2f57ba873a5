//! Two-phase audit: fetch the application catalog, fetch each application's
//! access-policy rules, then group applications by rule content.
//!
//! Rule fetches run as independent tasks that each return an immutable
//! [`RuleOutcome`]. Nothing is shared between tasks except the semaphore that
//! bounds how many are in flight; the grouping is a single fold over the
//! outcomes once every task has settled.

use crate::config::AuditConfig;
use crate::error::{AuditError, AuditResult};
use crate::fingerprint::ContentFingerprint;
use crate::group::{AnnotatedApplication, GroupedResult};
use crate::okta::{APPS_PATH, OktaApplication, PolicyRule, UpstreamBody, UpstreamClient, fetch_records};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, error, info, warn};

/// Credentials and org URL for one audit run.
#[derive(Clone, PartialEq, Eq)]
pub struct AuditRequest {
    pub url: String,
    pub api_key: String
}

impl fmt::Debug for AuditRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditRequest")
            .field("url", &self.url)
            .field("api_key", &"[redacted]")
            .finish()
    }
}

impl AuditRequest {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into()
        }
    }

    /// Extracts a request from an untyped JSON body. `apiKey` is checked
    /// before `url`; anything that is not a non-empty string is missing.
    pub fn from_json(body: &Value) -> AuditResult<Self> {
        let api_key = non_empty_str(body, "apiKey").ok_or(AuditError::MissingApiKey)?;
        let url = non_empty_str(body, "url").ok_or(AuditError::MissingUrl)?;
        Ok(Self::new(url, api_key))
    }

    pub fn validate(&self) -> AuditResult<()> {
        if self.api_key.is_empty() {
            return Err(AuditError::MissingApiKey);
        }
        if self.url.is_empty() {
            return Err(AuditError::MissingUrl);
        }
        Ok(())
    }

    pub fn catalog_path(&self) -> String {
        format!("{}{APPS_PATH}", self.url)
    }
}

fn non_empty_str<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

/// Why an application was left out of the grouping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    MissingAccessPolicy,
    NoRules,
    UpstreamError { payload: Value },
    Upstream { message: String },
    TimedOut { after_ms: u64 },
    Aborted { message: String },
    DuplicateApplication
}

impl FailureCause {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingAccessPolicy => "missing_access_policy",
            Self::NoRules => "no_rules",
            Self::UpstreamError { .. } => "upstream_error",
            Self::Upstream { .. } => "upstream",
            Self::TimedOut { .. } => "timed_out",
            Self::Aborted { .. } => "aborted",
            Self::DuplicateApplication => "duplicate_application"
        }
    }

    fn timed_out(after: Duration) -> Self {
        Self::TimedOut {
            after_ms: after.as_millis() as u64
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAccessPolicy => f.write_str("application has no access policy link"),
            Self::NoRules => f.write_str("access policy has no rules"),
            Self::UpstreamError { payload } => write!(f, "Okta API error payload: {payload}"),
            Self::Upstream { message } => write!(f, "rule fetch failed: {message}"),
            Self::TimedOut { after_ms } => write!(f, "timed out after {after_ms}ms"),
            Self::Aborted { message } => write!(f, "rule fetch aborted: {message}"),
            Self::DuplicateApplication => f.write_str("application id already grouped")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchFailure {
    pub app_id: String,
    pub label: String,
    pub cause: FailureCause
}

impl FetchFailure {
    fn new(app: &OktaApplication, cause: FailureCause) -> Self {
        Self {
            app_id: app.id.clone(),
            label: app.label.clone(),
            cause
        }
    }
}

/// Result of resolving one application's rules.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Resolved {
        fingerprint: ContentFingerprint,
        entry: AnnotatedApplication
    },
    Failed(FetchFailure)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditReport {
    pub groups: GroupedResult,
    /// Applications dropped from `groups`. Not part of the HTTP response.
    pub failures: Vec<FetchFailure>,
    pub application_count: usize
}

pub struct AuditPipeline {
    client: Arc<dyn UpstreamClient>,
    config: AuditConfig
}

impl AuditPipeline {
    pub fn new(client: Arc<dyn UpstreamClient>, config: AuditConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub async fn run(&self, request: &AuditRequest) -> AuditResult<AuditReport> {
        request.validate()?;
        let started = std::time::Instant::now();
        metrics::counter!("policy_audit_runs_total").increment(1);

        let apps = self.fetch_catalog(request).await?;
        let application_count = apps.len();
        info!(applications = application_count, "Fetched application catalog");

        let outcomes = self.fetch_rules(apps, &request.api_key).await;
        let (groups, failures) = fold_outcomes(outcomes);

        for failure in &failures {
            warn!(
                app_id = %failure.app_id,
                label = %failure.label,
                cause = failure.cause.kind(),
                error = %failure.cause,
                "Dropping application from audit"
            );
            metrics::counter!(
                "policy_audit_rule_fetch_failures_total",
                "cause" => failure.cause.kind()
            )
            .increment(1);
        }

        metrics::histogram!("policy_audit_run_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        info!(
            applications = application_count,
            groups = groups.len(),
            grouped = groups.application_count(),
            failures = failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Audit completed"
        );

        Ok(AuditReport {
            groups,
            failures,
            application_count
        })
    }

    async fn fetch_catalog(&self, request: &AuditRequest) -> AuditResult<Vec<OktaApplication>> {
        let path = request.catalog_path();
        let limit = self.config.http_timeout();
        let body = timeout(
            limit,
            fetch_records::<OktaApplication>(self.client.as_ref(), &path, &request.api_key)
        )
        .await
        .map_err(|_| AuditError::Timeout(limit))??;

        match body {
            UpstreamBody::Records(apps) => Ok(apps),
            UpstreamBody::Error(payload) => {
                warn!(payload = %payload, "Okta API rejected catalog request");
                Err(AuditError::UpstreamCatalog(payload))
            }
        }
    }

    async fn fetch_rules(&self, apps: Vec<OktaApplication>, credential: &str) -> Vec<RuleOutcome> {
        let per_call = self.config.rule_fetch_timeout();
        let phase = self.config.rules_phase_timeout();
        let phase_deadline = Instant::now() + phase;
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_fetches));
        let credential: Arc<str> = Arc::from(credential);

        let mut unsettled: HashMap<String, Vec<OktaApplication>> = HashMap::new();
        let mut tasks = JoinSet::new();
        for app in apps {
            unsettled.entry(app.id.clone()).or_default().push(app.clone());

            let client = Arc::clone(&self.client);
            let permits = Arc::clone(&permits);
            let credential = Arc::clone(&credential);
            tasks.spawn(async move {
                settle_one(client, app, credential, permits, per_call, phase, phase_deadline).await
            });
        }
        debug!(tasks = tasks.len(), "Spawned rule fetches");

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    let app_id = match &outcome {
                        RuleOutcome::Resolved { entry, .. } => &entry.app.id,
                        RuleOutcome::Failed(failure) => &failure.app_id
                    };
                    if let Some(pending) = unsettled.get_mut(app_id) {
                        pending.pop();
                    }
                    outcomes.push(outcome);
                }
                Err(e) => error!(error = %e, "Rule fetch task did not complete")
            }
        }

        // Tasks that panicked never reported back; record them as aborted.
        for app in unsettled.into_values().flatten() {
            outcomes.push(RuleOutcome::Failed(FetchFailure::new(
                &app,
                FailureCause::Aborted {
                    message: "task did not complete".to_string()
                }
            )));
        }

        outcomes
    }
}

async fn settle_one(
    client: Arc<dyn UpstreamClient>,
    app: OktaApplication,
    credential: Arc<str>,
    permits: Arc<Semaphore>,
    per_call: Duration,
    phase: Duration,
    phase_deadline: Instant
) -> RuleOutcome {
    let attempt = async {
        let Ok(_permit) = permits.acquire_owned().await else {
            return Err(FailureCause::Aborted {
                message: "fetch limiter closed".to_string()
            });
        };
        match timeout(per_call, resolve_rules(client.as_ref(), &app, &credential)).await {
            Ok(result) => result,
            Err(_) => Err(FailureCause::timed_out(per_call))
        }
    };

    let result = match timeout_at(phase_deadline, attempt).await {
        Ok(result) => result,
        Err(_) => Err(FailureCause::timed_out(phase))
    };

    match result {
        Ok((fingerprint, rules)) => RuleOutcome::Resolved {
            fingerprint,
            entry: AnnotatedApplication { app, rules }
        },
        Err(cause) => RuleOutcome::Failed(FetchFailure::new(&app, cause))
    }
}

/// Only the first rule of the policy is considered.
async fn resolve_rules(
    client: &dyn UpstreamClient,
    app: &OktaApplication,
    credential: &str
) -> Result<(ContentFingerprint, Value), FailureCause> {
    let path = app.rules_path().ok_or(FailureCause::MissingAccessPolicy)?;

    let body = fetch_records::<Value>(client, &path, credential)
        .await
        .map_err(|e| FailureCause::Upstream {
            message: e.to_string()
        })?;

    let first = match body {
        UpstreamBody::Records(rules) => rules.into_iter().next().ok_or(FailureCause::NoRules)?,
        UpstreamBody::Error(payload) => return Err(FailureCause::UpstreamError { payload })
    };

    let rule: PolicyRule = serde_json::from_value(first).map_err(|e| FailureCause::Upstream {
        message: format!("unexpected rule shape: {e}")
    })?;

    let rules = rule.actions.app_sign_on;
    Ok((ContentFingerprint::of(&rules), rules))
}

/// Partitions outcomes into the grouping and the dropped applications,
/// preserving the order the outcomes are given in. An application id that
/// resolves more than once is grouped on its first outcome only.
pub fn fold_outcomes(outcomes: Vec<RuleOutcome>) -> (GroupedResult, Vec<FetchFailure>) {
    let mut groups = GroupedResult::new();
    let mut failures = Vec::new();

    for outcome in outcomes {
        match outcome {
            RuleOutcome::Resolved { fingerprint, entry } => {
                if groups.contains_application(&entry.app.id) {
                    failures.push(FetchFailure::new(&entry.app, FailureCause::DuplicateApplication));
                } else {
                    groups.insert(fingerprint, entry);
                }
            }
            RuleOutcome::Failed(failure) => failures.push(failure)
        }
    }

    (groups, failures)
}
