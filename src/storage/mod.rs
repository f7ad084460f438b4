//! Durable JSON document stores
//!
//! Handles:
//! - Follower relations (local actor -> follower actor URLs)
//! - Archived outbound messages (message id -> document)
//!
//! Both stores keep the whole document in memory and rewrite the full
//! snapshot on every mutation.

mod document;
mod followers;
mod messages;

pub use followers::FollowerStore;
pub use messages::{MessageStore, PutOutcome};
