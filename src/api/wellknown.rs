//! Well-known endpoints
//!
//! - /.well-known/webfinger

use axum::{Router, extract::Query, response::Json, routing::get};
use serde::Deserialize;

use super::PublicHost;
use crate::AppState;
use crate::error::AppError;
use crate::federation::{WebFingerResponse, generate_webfinger_response};

/// Create well-known router
pub fn wellknown_router() -> Router<AppState> {
    Router::new().route("/.well-known/webfinger", get(webfinger))
}

/// WebFinger query parameters
#[derive(Debug, Deserialize)]
struct WebFingerQuery {
    resource: String,
}

/// GET /.well-known/webfinger
///
/// Query: ?resource=acct:user@domain
///
/// Every well-formed address maps to a local actor; there is no account
/// registry to consult.
async fn webfinger(
    PublicHost(base_url): PublicHost,
    Query(query): Query<WebFingerQuery>,
) -> Result<Json<WebFingerResponse>, AppError> {
    let response = generate_webfinger_response(&query.resource, &base_url)?;
    tracing::debug!(resource = %query.resource, "WebFinger lookup");
    Ok(Json(response))
}
