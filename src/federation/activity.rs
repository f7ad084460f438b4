//! Activity documents
//!
//! Inbound activities are parsed into a closed set of recognized kinds with
//! a catch-all for everything else; outbound messages (Accept, Create) are
//! typed documents built here and archived by id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ACTIVITY_STREAMS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";
pub const SECURITY_CONTEXT: &str = "https://w3id.org/security/v1";
pub const PUBLIC_AUDIENCE: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Activity / object type name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActivityType {
    Follow,
    Accept,
    Create,
    Note,
    Other(String),
}

impl ActivityType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Follow => "Follow",
            Self::Accept => "Accept",
            Self::Create => "Create",
            Self::Note => "Note",
            Self::Other(other) => other,
        }
    }
}

impl From<String> for ActivityType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Follow" => Self::Follow,
            "Accept" => Self::Accept,
            "Create" => Self::Create,
            "Note" => Self::Note,
            _ => Self::Other(value),
        }
    }
}

impl From<ActivityType> for String {
    fn from(value: ActivityType) -> Self {
        value.as_str().to_string()
    }
}

/// A verified inbound activity
#[derive(Debug, Clone)]
pub enum Activity {
    Follow(Follow),
    /// Anything the inbox does not act on, including Follows missing
    /// their actor or object
    Other {
        kind: Option<String>,
        document: Value,
    },
}

/// Follow request from a remote actor
#[derive(Debug, Clone)]
pub struct Follow {
    pub id: Option<String>,
    /// Remote actor asking to follow
    pub actor: String,
    /// Local actor being followed
    pub object: String,
    /// Original document, echoed back inside the Accept
    pub document: Value,
}

impl Activity {
    pub fn from_value(document: Value) -> Self {
        let kind = document
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string);

        if kind.as_deref() == Some("Follow") {
            let actor = reference_id(document.get("actor"));
            let object = reference_id(document.get("object"));
            if let (Some(actor), Some(object)) = (actor, object) {
                return Self::Follow(Follow {
                    id: document.get("id").and_then(Value::as_str).map(str::to_string),
                    actor,
                    object,
                    document,
                });
            }
        }

        Self::Other { kind, document }
    }

    /// Type name as sent, for logs
    pub fn kind(&self) -> &str {
        match self {
            Self::Follow(_) => "Follow",
            Self::Other { kind, .. } => kind.as_deref().unwrap_or("unknown"),
        }
    }
}

/// `"https://..."` or `{"id": "https://..."}`
fn reference_id(value: Option<&Value>) -> Option<String> {
    let value = value?;
    value
        .as_str()
        .or_else(|| value.get("id").and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Build a fresh message id under the public host
pub fn message_id(base_url: &str) -> String {
    format!("{}/m/{}", base_url.trim_end_matches('/'), ulid::Ulid::new())
}

/// Outbound message, immutable once archived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "@context")]
    pub context: Value,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub actor: String,
    pub object: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
}

impl Message {
    /// Accept wrapping the original Follow, sent from the followed actor
    pub fn accept(id: String, follow: &Follow) -> Self {
        Self {
            context: Value::String(ACTIVITY_STREAMS_CONTEXT.to_string()),
            id,
            kind: ActivityType::Accept,
            actor: follow.object.clone(),
            object: follow.document.clone(),
            to: vec![follow.actor.clone()],
            cc: Vec::new(),
            content: None,
            published: None,
        }
    }

    /// Create wrapping a Note, addressed the same way as the Note
    pub fn create(id: String, note: &Note) -> Result<Self, serde_json::Error> {
        Ok(Self {
            context: Value::String(ACTIVITY_STREAMS_CONTEXT.to_string()),
            id,
            kind: ActivityType::Create,
            actor: note.attributed_to.clone(),
            object: serde_json::to_value(note)?,
            to: note.to.clone(),
            cc: note.cc.clone(),
            content: None,
            published: Some(note.published.clone()),
        })
    }
}

/// Note object carried by a Create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub attributed_to: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub published: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
}
