//! Activity delivery
//!
//! Handles delivering activities to remote inboxes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use http::{HeaderMap, HeaderValue, header};

use super::activity::Message;
use super::actor::ActorDirectory;
use super::client::{ACTIVITY_CONTENT_TYPE, FederationClient};
use super::signature::{Signer, http_date, signing_host};
use crate::error::AppError;
use crate::metrics::{ACTIVITIES_SENT, DELIVERIES_TOTAL, DELIVERY_DURATION_SECONDS};

/// Activity delivery service
///
/// Signs messages with the service key and POSTs them to remote inboxes.
#[derive(Clone)]
pub struct ActivityDelivery {
    client: Arc<dyn FederationClient>,
    directory: Arc<ActorDirectory>,
    signer: Signer,
    /// Deadline for one resolve + sign + POST
    timeout: Duration,
}

impl ActivityDelivery {
    pub fn new(
        client: Arc<dyn FederationClient>,
        directory: Arc<ActorDirectory>,
        signer: Signer,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            directory,
            signer,
            timeout,
        }
    }

    /// Resolve `actor_url` and deliver `message` to its inbox.
    ///
    /// The whole attempt is bounded by the configured delivery deadline.
    pub async fn deliver_to_actor(
        &self,
        from_actor_id: &str,
        actor_url: &str,
        message: &Message,
    ) -> Result<(), AppError> {
        let attempt = async {
            let actor = self.directory.resolve(actor_url).await?;
            self.deliver_to_inbox(from_actor_id, &actor.inbox, message)
                .await
        };

        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => {
                DELIVERIES_TOTAL
                    .with_label_values(&[message.kind.as_str(), "timeout"])
                    .inc();
                Err(AppError::Federation(format!(
                    "Delivery to {} timed out after {:?}",
                    actor_url, self.timeout
                )))
            }
        }
    }

    /// Deliver `message` to a single inbox
    ///
    /// # Errors
    /// Returns error if delivery fails (network, signature, rejection)
    pub async fn deliver_to_inbox(
        &self,
        from_actor_id: &str,
        inbox_url: &str,
        message: &Message,
    ) -> Result<(), AppError> {
        let kind = message.kind.as_str();
        let _timer = DELIVERY_DURATION_SECONDS
            .with_label_values(&[kind])
            .start_timer();

        let body = serde_json::to_vec(message)?;
        let headers = self.signed_headers(from_actor_id, inbox_url)?;

        let status = match self.client.post_activity(inbox_url, headers, body).await {
            Ok(status) => status,
            Err(error) => {
                DELIVERIES_TOTAL.with_label_values(&[kind, "error"]).inc();
                return Err(error);
            }
        };

        if !status.is_success() {
            DELIVERIES_TOTAL.with_label_values(&[kind, "rejected"]).inc();
            return Err(AppError::Federation(format!(
                "Inbox {} rejected {}: HTTP {}",
                inbox_url, kind, status
            )));
        }

        DELIVERIES_TOTAL.with_label_values(&[kind, "delivered"]).inc();
        ACTIVITIES_SENT.with_label_values(&[kind]).inc();
        tracing::info!(
            inbox = %inbox_url,
            message_id = %message.id,
            status = %status,
            "Delivered {}",
            kind
        );
        Ok(())
    }

    fn signed_headers(&self, from_actor_id: &str, inbox_url: &str) -> Result<HeaderMap, AppError> {
        let target = url::Url::parse(inbox_url)
            .map_err(|e| AppError::Validation(format!("Invalid inbox URL: {}", e)))?;
        let host = signing_host(&target)?;
        let date = http_date(Utc::now());
        let signature = self.signer.sign(from_actor_id, inbox_url, &date)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(ACTIVITY_CONTENT_TYPE),
        );
        headers.insert(header::HOST, header_value(&host)?);
        headers.insert(header::DATE, header_value(&date)?);
        headers.insert("signature", header_value(&signature.to_header_value())?);
        Ok(headers)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(value)
        .map_err(|e| AppError::Validation(format!("Invalid header value: {}", e)))
}
