//! Actor documents
//!
//! Local actors are derived from the public host and a path id; remote
//! actors are fetched on demand and never cached beyond one operation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::activity::{ACTIVITY_STREAMS_CONTEXT, SECURITY_CONTEXT};
use super::client::FederationClient;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActorKind {
    Person,
    Service,
    /// Application, Group, ... as published by remote servers
    Other(String),
}

impl From<String> for ActorKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Person" => Self::Person,
            "Service" => Self::Service,
            _ => Self::Other(value),
        }
    }
}

impl From<ActorKind> for String {
    fn from(value: ActorKind) -> Self {
        match value {
            ActorKind::Person => "Person".to_string(),
            ActorKind::Service => "Service".to_string(),
            ActorKind::Other(other) => other,
        }
    }
}

/// ActivityPub actor document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    #[serde(rename = "@context", default, skip_serializing_if = "Value::is_null")]
    pub context: Value,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    pub inbox: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PublicKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub public_key_pem: String,
}

/// `<base>/u/<id>`
pub fn local_actor_id(base_url: &str, id: &str) -> String {
    format!("{}/u/{}", base_url.trim_end_matches('/'), id)
}

/// Inverse of [`local_actor_id`]: the local id when `actor_id` names an
/// actor under `base_url`.
pub fn local_actor_name<'a>(base_url: &str, actor_id: &'a str) -> Option<&'a str> {
    let prefix = format!("{}/u/", base_url.trim_end_matches('/'));
    actor_id
        .strip_prefix(prefix.as_str())
        .filter(|id| !id.is_empty() && !id.contains(['/', '#', '?']))
}

/// Resolves remote actors and describes local ones
pub struct ActorDirectory {
    client: Arc<dyn FederationClient>,
}

impl ActorDirectory {
    pub fn new(client: Arc<dyn FederationClient>) -> Self {
        Self { client }
    }

    /// Actor document for local `id` as seen from `base_url`
    pub fn local_actor(base_url: &str, id: &str, public_key_pem: &str) -> Actor {
        let base_url = base_url.trim_end_matches('/');
        let actor_id = local_actor_id(base_url, id);

        Actor {
            context: serde_json::json!([ACTIVITY_STREAMS_CONTEXT, SECURITY_CONTEXT]),
            id: actor_id.clone(),
            kind: ActorKind::Person,
            preferred_username: Some(id.to_string()),
            inbox: format!("{}/inbox", base_url),
            followers: Some(format!("{}/followers", actor_id)),
            public_key: Some(PublicKey {
                id: format!("{}#main-key", actor_id),
                owner: Some(actor_id),
                public_key_pem: public_key_pem.to_string(),
            }),
        }
    }

    /// Fetch and parse the remote actor at `actor_url`.
    pub async fn resolve(&self, actor_url: &str) -> Result<Actor, AppError> {
        let document = self.client.fetch_json(actor_url).await?;
        let actor: Actor = serde_json::from_value(document).map_err(|e| {
            AppError::Federation(format!("Invalid actor document at {}: {}", actor_url, e))
        })?;

        if actor.inbox.is_empty() {
            return Err(AppError::Federation(format!(
                "Actor {} has no inbox",
                actor_url
            )));
        }

        Ok(actor)
    }

    /// Fetch the PEM published at `key_id` under `publicKey.publicKeyPem`.
    pub async fn fetch_public_key(&self, key_id: &str) -> Result<String, AppError> {
        let document_url = key_id.split('#').next().unwrap_or(key_id);
        let document = self.client.fetch_json(document_url).await?;
        let public_key = document.get("publicKey").ok_or_else(|| {
            AppError::Federation(format!("No publicKey at {}", document_url))
        })?;

        // A fragment keyId must name the key the document advertises
        if key_id.contains('#') {
            let advertised = public_key
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::Federation("Missing publicKey.id in actor".to_string()))?;
            if advertised != key_id {
                return Err(AppError::Validation(
                    "Signature keyId does not match actor public key id".to_string(),
                ));
            }
        }

        public_key
            .get("publicKeyPem")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::Federation(format!("No publicKey.publicKeyPem at {}", key_id))
            })
    }
}
