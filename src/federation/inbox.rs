//! Inbox processing
//!
//! Each inbound activity moves through
//! `RECEIVED -> VERIFIED -> DISPATCHED -> {ACCEPTED_HANDSHAKE | IGNORED}`.
//! Only `Follow` changes state; everything else is acknowledged and
//! dropped. Rejections are never distinguishable by the caller.

use std::sync::Arc;

use http::HeaderMap;
use tokio::task::JoinHandle;

use super::activity::{Activity, Follow, Message, message_id};
use super::actor::local_actor_name;
use super::delivery::ActivityDelivery;
use super::signature::{Verifier, key_id_matches_actor};
use crate::error::AppError;
use crate::metrics::ACTIVITIES_RECEIVED;
use crate::storage::{FollowerStore, MessageStore};

/// Why an activity was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    InvalidSignature,
    MalformedBody,
    /// The signing key belongs to someone other than `activity.actor`
    ActorMismatch,
    /// The Follow targets an actor this instance does not host
    NotLocal(String),
    Unhandled(String),
}

/// Metric label for an inbound activity. Remote senders choose the type,
/// so anything unhandled collapses into one series.
fn activity_label(activity: &Activity) -> &'static str {
    match activity {
        Activity::Follow(_) => "Follow",
        Activity::Other { .. } => "other",
    }
}

/// Terminal state of an inbound activity
#[derive(Debug)]
pub enum InboxOutcome {
    /// Follower persisted; the Accept is being delivered in the background
    Accepted {
        follower: String,
        followed: String,
        handshake: JoinHandle<HandshakeOutcome>,
    },
    Ignored(IgnoreReason),
}

/// Result of the detached Accept delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Delivered { accept_id: String },
    /// Accept could not be delivered; `compensated` tells whether the
    /// follower added by this Follow was removed again
    Failed {
        accept_id: String,
        compensated: bool,
        error: String,
    },
}

/// Inbox state machine
#[derive(Clone)]
pub struct InboxHandler {
    verifier: Verifier,
    followers: Arc<FollowerStore>,
    messages: Arc<MessageStore>,
    delivery: Arc<ActivityDelivery>,
}

impl InboxHandler {
    pub fn new(
        verifier: Verifier,
        followers: Arc<FollowerStore>,
        messages: Arc<MessageStore>,
        delivery: Arc<ActivityDelivery>,
    ) -> Self {
        Self {
            verifier,
            followers,
            messages,
            delivery,
        }
    }

    /// Process one inbound delivery.
    ///
    /// # Arguments
    /// * `base_url` - Public base URL, used to mint the Accept id
    /// * `request_target` - `(request-target)` value to verify against
    /// * `headers` - Request headers (Signature, Host, Date, ...)
    /// * `body` - Raw activity document
    ///
    /// # Errors
    /// Only storage failures while recording a follower; every protocol
    /// failure ends in [`InboxOutcome::Ignored`].
    pub async fn handle(
        &self,
        base_url: &str,
        request_target: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<InboxOutcome, AppError> {
        let Some(key_id) = self.verifier.verify(request_target, headers).await else {
            return Ok(InboxOutcome::Ignored(IgnoreReason::InvalidSignature));
        };

        let document: serde_json::Value = match serde_json::from_slice(body) {
            Ok(document) => document,
            Err(error) => {
                tracing::warn!(%error, "Dropping verified activity with unparsable body");
                return Ok(InboxOutcome::Ignored(IgnoreReason::MalformedBody));
            }
        };

        let activity = Activity::from_value(document);
        tracing::debug!(activity_type = %activity.kind(), "Activity received");
        ACTIVITIES_RECEIVED
            .with_label_values(&[activity_label(&activity)])
            .inc();

        match activity {
            Activity::Follow(follow) => self.handle_follow(base_url, &key_id, follow).await,
            Activity::Other { kind, .. } => {
                let kind = kind.unwrap_or_else(|| "unknown".to_string());
                tracing::warn!(activity_type = %kind, "Unhandled activity type");
                Ok(InboxOutcome::Ignored(IgnoreReason::Unhandled(kind)))
            }
        }
    }

    /// Record the follower, then reply with an Accept in the background.
    async fn handle_follow(
        &self,
        base_url: &str,
        key_id: &str,
        follow: Follow,
    ) -> Result<InboxOutcome, AppError> {
        if !key_id_matches_actor(key_id, &follow.actor) {
            tracing::warn!(
                key_id = %key_id,
                actor = %follow.actor,
                "Follow signed by a key not owned by its actor"
            );
            return Ok(InboxOutcome::Ignored(IgnoreReason::ActorMismatch));
        }

        if local_actor_name(base_url, &follow.object).is_none() {
            tracing::warn!(object = %follow.object, "Follow for an actor not hosted here");
            return Ok(InboxOutcome::Ignored(IgnoreReason::NotLocal(follow.object)));
        }

        let newly_added = self.followers.add(&follow.object, &follow.actor).await?;
        tracing::info!(
            actor = %follow.object,
            follower = %follow.actor,
            newly_added,
            "Follow recorded"
        );

        let accept = Message::accept(message_id(base_url), &follow);
        let follower = follow.actor.clone();
        let followed = follow.object.clone();

        let handler = self.clone();
        let handshake = tokio::spawn(async move {
            handler.complete_handshake(follow, accept, newly_added).await
        });

        Ok(InboxOutcome::Accepted {
            follower,
            followed,
            handshake,
        })
    }

    async fn complete_handshake(
        &self,
        follow: Follow,
        accept: Message,
        newly_added: bool,
    ) -> HandshakeOutcome {
        let result = self
            .delivery
            .deliver_to_actor(&follow.object, &follow.actor, &accept)
            .await;

        if let Err(error) = self.messages.put(&accept).await {
            tracing::error!(message_id = %accept.id, %error, "Failed to archive Accept");
        }

        let error = match result {
            Ok(()) => {
                return HandshakeOutcome::Delivered {
                    accept_id: accept.id,
                };
            }
            Err(error) => error,
        };

        tracing::warn!(
            actor = %follow.object,
            follower = %follow.actor,
            %error,
            "Accept delivery failed, rolling back follow"
        );

        let compensated = if newly_added {
            match self.followers.remove(&follow.object, &follow.actor).await {
                Ok(removed) => removed,
                Err(remove_error) => {
                    tracing::error!(
                        follower = %follow.actor,
                        error = %remove_error,
                        "Failed to remove follower after failed handshake"
                    );
                    false
                }
            }
        } else {
            false
        };

        HandshakeOutcome::Failed {
            accept_id: accept.id,
            compensated,
            error: error.to_string(),
        }
    }
}
