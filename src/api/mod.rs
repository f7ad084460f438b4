//! API layer
//!
//! HTTP handlers for:
//! - WebFinger discovery
//! - ActivityPub (actors, followers, archived messages, inbox)
//! - Local notification announcements
//! - Metrics (Prometheus)

mod activitypub;
pub mod metrics;
mod notifications;
mod wellknown;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, request::Parts},
};

use crate::AppState;
use crate::error::AppError;

pub use activitypub::activitypub_router;
pub use metrics::metrics_router;
pub use notifications::notifications_router;
pub use wellknown::wellknown_router;

/// Media type for ActivityPub documents served by this host
pub const ACTIVITY_JSON: &str = "application/activity+json";

/// Public base URL (`scheme://host[:port]`) the request was addressed to
///
/// Uses `server.public_url` when configured; otherwise derived from
/// `X-Forwarded-Proto` / `X-Forwarded-Host` or the `Host` header.
#[derive(Debug, Clone)]
pub struct PublicHost(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for PublicHost
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        if let Some(base_url) = state.config.server.public_base_url() {
            return Ok(PublicHost(base_url));
        }

        public_host_from_headers(&parts.headers)
            .map(PublicHost)
            .ok_or_else(|| AppError::Validation("Missing Host header".to_string()))
    }
}

fn public_host_from_headers(headers: &HeaderMap) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let scheme = header("x-forwarded-proto").unwrap_or("http");
    let host = header("x-forwarded-host").or_else(|| header("host"))?;
    Some(format!("{}://{}", scheme, host))
}
