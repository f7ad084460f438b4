//! inboxd - A small ActivityPub inbox
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - WebFinger, actor / followers / message documents          │
//! │  - POST /inbox, POST /notifications/:id                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Federation Layer                          │
//! │  - HTTP Signatures (sign / verify)                           │
//! │  - Follow -> Accept handshake, broadcast fan-out             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Storage Layer                            │
//! │  - followers.json, messages.json (atomic rewrites)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `federation`: ActivityPub protocol engine
//! - `storage`: Follower and message documents
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus collectors

pub mod api;
pub mod config;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod storage;

use std::sync::Arc;

use federation::{
    ActivityDelivery, ActorDirectory, BroadcastEngine, FederationClient, HttpFederationClient,
    InboxHandler, KeyStore, Signer, Verifier,
};
use storage::{FollowerStore, MessageStore};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Service key pair
    pub keys: Arc<KeyStore>,

    /// Local actor -> follower set
    pub followers: Arc<FollowerStore>,

    /// Archived outbound messages
    pub messages: Arc<MessageStore>,

    /// Inbound activity processing
    pub inbox: Arc<InboxHandler>,

    /// Notification fan-out
    pub broadcast: Arc<BroadcastEngine>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Load the service key pair
    /// 2. Build the outbound HTTP client
    /// 3. Open follower and message stores
    ///
    /// # Errors
    /// Returns error if the keys are missing or invalid, or a store
    /// document cannot be read
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let keys = KeyStore::load(&config.keys.private_key_path, &config.keys.public_key_path)?;
        tracing::info!(
            path = %config.keys.public_key_path.display(),
            "Service keys loaded"
        );

        if config.federation.allow_private_hosts {
            tracing::warn!("Outbound requests to private and loopback hosts are allowed");
        }
        let client: Arc<dyn FederationClient> =
            Arc::new(HttpFederationClient::new(&config.federation)?);

        Self::with_client(config, keys, client).await
    }

    /// Assemble state around an explicit transport.
    pub async fn with_client(
        config: config::AppConfig,
        keys: KeyStore,
        client: Arc<dyn FederationClient>,
    ) -> Result<Self, error::AppError> {
        let followers = Arc::new(FollowerStore::open(&config.storage.followers_path).await?);
        let messages = Arc::new(MessageStore::open(&config.storage.messages_path).await?);

        let directory = Arc::new(ActorDirectory::new(client.clone()));
        let delivery = Arc::new(ActivityDelivery::new(
            client,
            directory.clone(),
            Signer::new(&keys),
            config.federation.delivery_timeout(),
        ));

        let inbox = InboxHandler::new(
            Verifier::new(directory),
            followers.clone(),
            messages.clone(),
            delivery.clone(),
        );
        let broadcast = BroadcastEngine::new(
            followers.clone(),
            messages.clone(),
            delivery,
            config.federation.max_concurrent_deliveries,
        );

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            keys: Arc::new(keys),
            followers,
            messages,
            inbox: Arc::new(inbox),
            broadcast: Arc::new(broadcast),
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower::ServiceBuilder;
    use tower_http::trace::TraceLayer;

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::wellknown_router())
        .merge(api::activitypub_router())
        .merge(api::notifications_router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
        .merge(api::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}
