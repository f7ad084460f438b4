//! ActivityPub federation module
//!
//! Handles:
//! - Service key material and HTTP Signatures
//! - Actor documents (local description, remote resolution)
//! - Inbox processing (Follow -> Accept handshake)
//! - Signed delivery and follower fan-out
//! - WebFinger

mod activity;
mod actor;
mod broadcast;
mod client;
mod delivery;
mod inbox;
mod keys;
mod signature;
mod webfinger;

pub use activity::{
    ACTIVITY_STREAMS_CONTEXT, Activity, ActivityType, Follow, Message, Note, PUBLIC_AUDIENCE,
    SECURITY_CONTEXT, message_id,
};
pub use actor::{Actor, ActorDirectory, ActorKind, PublicKey, local_actor_id, local_actor_name};
pub use broadcast::{BroadcastEngine, BroadcastHandle, BroadcastReport, Notification};
pub use client::{ACTIVITY_CONTENT_TYPE, FederationClient, HttpFederationClient};
pub use delivery::ActivityDelivery;
pub use inbox::{HandshakeOutcome, IgnoreReason, InboxHandler, InboxOutcome};
pub use keys::KeyStore;
pub use signature::{
    INBOX_REQUEST_TARGET, SignatureHeader, Signer, Verifier, http_date, key_id_matches_actor,
    outbound_signing_string, reconstruct_signing_string, signing_host, verify_signature,
};
pub use webfinger::{
    WebFingerLink, WebFingerResponse, generate_webfinger_response, resource_username,
};
