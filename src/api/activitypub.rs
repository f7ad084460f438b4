//! ActivityPub endpoints
//!
//! - Actor documents
//! - Followers collections
//! - Archived messages
//! - Inbox (activity receiving)

use axum::body::Bytes;
use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;

use super::{ACTIVITY_JSON, PublicHost};
use crate::AppState;
use crate::error::AppError;
use crate::federation::{
    ACTIVITY_STREAMS_CONTEXT, ActorDirectory, INBOX_REQUEST_TARGET, InboxOutcome, local_actor_id,
};

/// Create ActivityPub router
///
/// Routes:
/// - GET /u/:id - Actor document
/// - GET /u/:id/followers - Followers collection
/// - GET /m/:id - Archived message
/// - POST /inbox - Shared inbox
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route("/u/:id", get(actor))
        .route("/u/:id/followers", get(followers))
        .route("/m/:id", get(message))
        .route("/inbox", post(inbox))
}

/// Serialize `document` with the ActivityPub media type.
fn activity_json<T: Serialize>(document: &T) -> Result<Response, AppError> {
    let body = serde_json::to_vec(document)?;
    Ok(([(header::CONTENT_TYPE, ACTIVITY_JSON)], body).into_response())
}

/// GET /u/:id
///
/// Any id names an actor; all of them share the service key.
async fn actor(
    State(state): State<AppState>,
    PublicHost(base_url): PublicHost,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let actor = ActorDirectory::local_actor(&base_url, &id, state.keys.public_key_pem());
    activity_json(&actor)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FollowersCollection {
    #[serde(rename = "@context")]
    context: &'static str,
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    total_items: usize,
    items: Vec<String>,
}

/// GET /u/:id/followers
async fn followers(
    State(state): State<AppState>,
    PublicHost(base_url): PublicHost,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let actor_id = local_actor_id(&base_url, &id);
    let items = state.followers.followers(&actor_id).await;

    activity_json(&FollowersCollection {
        context: ACTIVITY_STREAMS_CONTEXT,
        id: format!("{}/followers", actor_id),
        kind: "Collection",
        total_items: items.len(),
        items,
    })
}

/// GET /m/:id
///
/// Messages are archived under their full id, which is minted from the
/// public host.
async fn message(
    State(state): State<AppState>,
    PublicHost(base_url): PublicHost,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let message_id = format!("{}/m/{}", base_url, id);
    let message = state
        .messages
        .get(&message_id)
        .await
        .ok_or(AppError::NotFound)?;
    activity_json(&message)
}

/// POST /inbox
///
/// 201 when a Follow was recorded, an empty 200 for everything else,
/// including requests that failed verification.
async fn inbox(
    State(state): State<AppState>,
    PublicHost(base_url): PublicHost,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let outcome = state
        .inbox
        .handle(&base_url, INBOX_REQUEST_TARGET, &headers, &body)
        .await?;

    match outcome {
        InboxOutcome::Accepted {
            follower, followed, ..
        } => {
            tracing::info!(%follower, %followed, "Follow accepted, handshake in flight");
            Ok(StatusCode::CREATED)
        }
        InboxOutcome::Ignored(reason) => {
            tracing::debug!(?reason, "Inbox delivery ignored");
            Ok(StatusCode::OK)
        }
    }
}
