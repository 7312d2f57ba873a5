//! # Audit Server
//!
//! HTTP front end for the Okta access-policy consolidation audit.
//!
//! ## Endpoints
//!
//! - `POST /api/okta` - Runs the audit for `{ "url", "apiKey" }` and returns
//!   applications grouped by policy fingerprint
//! - `GET /` - Review page
//! - `POST /` - Review page form submission, renders the groups
//! - `GET /health` - Health check endpoint
//! - `GET /metrics` - Prometheus metrics endpoint
//!
//! Credentials are only ever taken from the request; configured values are
//! display defaults for the review page.

pub mod error;
pub mod form;
pub mod handlers;
pub mod render;
pub mod routes;
pub mod server;
pub mod state;

pub use error::ServerError;
pub use routes::create_router;
pub use server::AuditServer;
pub use state::{AppState, ServerConfig};
