//! Archived outbound messages
//!
//! Maps a message id to its document. Documents are immutable: a second
//! `put` under the same id only succeeds if the content is identical.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use super::document;
use crate::error::AppError;
use crate::federation::Message;
use crate::metrics::MESSAGES_TOTAL;

/// Result of archiving a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// New id, document persisted
    Inserted,
    /// Same id and identical content, nothing written
    Unchanged,
    /// Same id with different content, stored document kept
    Conflict,
}

/// Persistent message archive
pub struct MessageStore {
    path: PathBuf,
    messages: Mutex<BTreeMap<String, Message>>,
}

impl MessageStore {
    /// Load the messages document at `path` (missing file = empty archive).
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        let messages: BTreeMap<String, Message> = document::load(&path).await?;

        MESSAGES_TOTAL.set(messages.len() as i64);
        tracing::info!(path = %path.display(), messages = messages.len(), "Message store loaded");

        Ok(Self {
            path,
            messages: Mutex::new(messages),
        })
    }

    /// Archive `message` under its id.
    pub async fn put(&self, message: &Message) -> Result<PutOutcome, AppError> {
        let mut messages = self.messages.lock().await;

        if let Some(existing) = messages.get(&message.id) {
            if existing == message {
                return Ok(PutOutcome::Unchanged);
            }
            tracing::warn!(
                message_id = %message.id,
                "Refusing to overwrite archived message with different content"
            );
            return Ok(PutOutcome::Conflict);
        }

        messages.insert(message.id.clone(), message.clone());
        if let Err(error) = document::persist(&self.path, &*messages).await {
            messages.remove(&message.id);
            return Err(error);
        }

        MESSAGES_TOTAL.set(messages.len() as i64);
        tracing::debug!(message_id = %message.id, kind = %message.kind.as_str(), "Message archived");
        Ok(PutOutcome::Inserted)
    }

    /// Look up a message; an unknown id is simply `None`.
    pub async fn get(&self, id: &str) -> Option<Message> {
        self.messages.lock().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }
}
