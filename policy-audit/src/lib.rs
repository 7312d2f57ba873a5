//! # Policy Audit
//!
//! Reads an Okta org's application catalog, resolves the sign-on rules of
//! each application's access policy, and groups applications whose rules are
//! identical so they can be reviewed for consolidation.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod group;
pub mod okta;
pub mod pipeline;

pub use config::AuditConfig;
pub use error::{AuditError, AuditResult};
pub use fingerprint::ContentFingerprint;
pub use group::{AnnotatedApplication, GroupedResult, group_title};
pub use okta::{OktaApplication, OktaClient, UpstreamClient, create_okta_client};
pub use pipeline::{AuditPipeline, AuditReport, AuditRequest, FailureCause, FetchFailure};
