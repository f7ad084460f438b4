//! Notification trigger
//!
//! Local producers announce a resource here; the announcement is fanned out
//! to the followers of the named actor.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::post,
};

use super::PublicHost;
use crate::AppState;
use crate::error::AppError;
use crate::federation::{Notification, local_actor_id};

pub fn notifications_router() -> Router<AppState> {
    Router::new().route("/notifications/:id", post(notify))
}

/// POST /notifications/:id
///
/// Answers 202 as soon as the broadcast is scheduled; delivery results are
/// only logged.
async fn notify(
    State(state): State<AppState>,
    PublicHost(base_url): PublicHost,
    Path(id): Path<String>,
    Json(notification): Json<Notification>,
) -> Result<StatusCode, AppError> {
    let actor_id = local_actor_id(&base_url, &id);
    let handle = state
        .broadcast
        .broadcast(&base_url, &actor_id, &notification)
        .await?;

    tracing::info!(
        actor = %actor_id,
        activity_id = %handle.activity_id,
        recipients = handle.recipients,
        "Notification scheduled"
    );
    Ok(StatusCode::ACCEPTED)
}
