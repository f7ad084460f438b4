//! WebFinger protocol implementation
//!
//! Used by remote servers to discover the actor URI behind an address.

use serde::{Deserialize, Serialize};

use super::actor::local_actor_id;
use crate::error::AppError;

/// WebFinger JRD response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerResponse {
    pub subject: String,
    pub links: Vec<WebFingerLink>,
}

/// WebFinger link
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// Local actor id named by a WebFinger resource.
///
/// Accepts `acct:user@domain` or bare `user@domain`. The domain part is
/// not checked: the serving host is whatever the request was addressed to.
pub fn resource_username(resource: &str) -> Result<&str, AppError> {
    let acct = resource.strip_prefix("acct:").unwrap_or(resource);
    let (username, domain) = acct
        .split_once('@')
        .ok_or_else(|| AppError::Validation("Invalid acct format".to_string()))?;

    if username.is_empty() || domain.is_empty() || username.contains(['/', ':']) {
        return Err(AppError::Validation("Invalid acct format".to_string()));
    }

    Ok(username)
}

/// Generate WebFinger response for a local actor.
///
/// # Arguments
/// * `resource` - Queried resource, echoed back as the subject
/// * `base_url` - Public base URL (includes protocol)
pub fn generate_webfinger_response(
    resource: &str,
    base_url: &str,
) -> Result<WebFingerResponse, AppError> {
    let username = resource_username(resource)?;

    Ok(WebFingerResponse {
        subject: resource.to_string(),
        links: vec![WebFingerLink {
            rel: "self".to_string(),
            link_type: Some("application/activity+json".to_string()),
            href: Some(local_actor_id(base_url, username)),
        }],
    })
}
