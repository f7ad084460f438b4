//! Notification fan-out
//!
//! Turns an announced notification into a `Create(Note)` and delivers it to
//! every follower of the local actor. Deliveries are independent: one slow
//! or failing follower never blocks or fails the others.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tokio::task::JoinHandle;

use super::activity::{ActivityType, Message, Note, PUBLIC_AUDIENCE, message_id};
use super::delivery::ActivityDelivery;
use crate::error::AppError;
use crate::storage::{FollowerStore, MessageStore};

/// Notification announced by a local producer
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    /// Canonical URL of the announced resource
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Per-broadcast delivery tally
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: Vec<String>,
}

/// A broadcast in flight
#[derive(Debug)]
pub struct BroadcastHandle {
    pub activity_id: String,
    pub recipients: usize,
    pub task: JoinHandle<BroadcastReport>,
}

/// Fans a Create out to a follower snapshot
pub struct BroadcastEngine {
    followers: Arc<FollowerStore>,
    messages: Arc<MessageStore>,
    delivery: Arc<ActivityDelivery>,
    max_concurrent: usize,
}

impl BroadcastEngine {
    pub fn new(
        followers: Arc<FollowerStore>,
        messages: Arc<MessageStore>,
        delivery: Arc<ActivityDelivery>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            followers,
            messages,
            delivery,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Announce `notification` on behalf of `local_actor_id`.
    ///
    /// Recipients are the followers at call time. Deliveries run in the
    /// background; the Create is archived regardless of their outcome.
    pub async fn broadcast(
        &self,
        base_url: &str,
        local_actor_id: &str,
        notification: &Notification,
    ) -> Result<BroadcastHandle, AppError> {
        let recipients = self.followers.followers(local_actor_id).await;
        let create_id = message_id(base_url);
        let note = build_note(&create_id, local_actor_id, notification, &recipients);
        let create = Message::create(create_id, &note)?;

        tracing::info!(
            actor = %local_actor_id,
            activity_id = %create.id,
            recipients = recipients.len(),
            "Broadcasting notification"
        );

        let activity_id = create.id.clone();
        let count = recipients.len();
        let task = tokio::spawn(fan_out(
            self.delivery.clone(),
            local_actor_id.to_string(),
            create.clone(),
            recipients,
            self.max_concurrent,
        ));

        if let Err(error) = self.messages.put(&create).await {
            tracing::error!(activity_id = %create.id, %error, "Failed to archive Create");
        }

        Ok(BroadcastHandle {
            activity_id,
            recipients: count,
            task,
        })
    }
}

/// The Note is only reachable through its Create, so its id is a fragment
/// of the Create id and dereferences to the archived Create.
fn build_note(
    create_id: &str,
    local_actor_id: &str,
    notification: &Notification,
    recipients: &[String],
) -> Note {
    let content = format!(
        "<p>{}</p><p>{}</p>",
        html_escape::encode_text(&notification.name),
        html_escape::encode_text(&notification.description)
    );

    Note {
        id: format!("{}#note", create_id),
        kind: ActivityType::Note,
        attributed_to: local_actor_id.to_string(),
        content,
        url: Some(notification.id.clone()),
        published: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        to: vec![PUBLIC_AUDIENCE.to_string()],
        cc: recipients.to_vec(),
    }
}

async fn fan_out(
    delivery: Arc<ActivityDelivery>,
    from_actor_id: String,
    create: Message,
    recipients: Vec<String>,
    max_concurrent: usize,
) -> BroadcastReport {
    let results: Vec<(String, Result<(), AppError>)> = stream::iter(recipients)
        .map(|follower| {
            let delivery = delivery.clone();
            let from_actor_id = from_actor_id.as_str();
            let create = &create;
            async move {
                let result = delivery
                    .deliver_to_actor(from_actor_id, &follower, create)
                    .await;
                (follower, result)
            }
        })
        .buffer_unordered(max_concurrent)
        .collect()
        .await;

    let mut report = BroadcastReport::default();
    for (follower, result) in results {
        match result {
            Ok(()) => report.delivered += 1,
            Err(error) => {
                tracing::warn!(
                    activity_id = %create.id,
                    follower = %follower,
                    %error,
                    "Broadcast delivery failed"
                );
                report.failed.push(follower);
            }
        }
    }

    tracing::info!(
        activity_id = %create.id,
        delivered = report.delivered,
        failed = report.failed.len(),
        "Broadcast finished"
    );
    report
}
