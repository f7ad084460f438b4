//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use http::{HeaderMap, StatusCode};
use inboxd::error::AppError;
use inboxd::federation::{FederationClient, KeyStore, Signer, http_date};
use inboxd::{AppState, config};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Generate a throwaway key pair (small modulus keeps tests fast)
pub fn generate_keys() -> KeyStore {
    let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let public_pem = RsaPublicKey::from(&private_key)
        .to_public_key_pem(LineEnding::LF)
        .unwrap();
    let private_pem = private_key.to_pkcs8_pem(LineEnding::LF).unwrap();
    KeyStore::from_pem(&private_pem, &public_pem).unwrap()
}

/// One outbound POST captured by [`RecordingFederation`]
#[derive(Debug, Clone)]
pub struct RecordedDelivery {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Value,
}

/// In-memory stand-in for the remote fediverse
///
/// Serves registered documents and records every delivery. Inboxes marked
/// as failing answer 500.
#[derive(Default)]
pub struct RecordingFederation {
    documents: Mutex<HashMap<String, Value>>,
    failing_inboxes: Mutex<HashSet<String>>,
    deliveries: Mutex<Vec<RecordedDelivery>>,
}

impl RecordingFederation {
    pub fn serve(&self, url: &str, document: Value) {
        self.documents
            .lock()
            .unwrap()
            .insert(url.to_string(), document);
    }

    pub fn fail_inbox(&self, inbox: &str) {
        self.failing_inboxes
            .lock()
            .unwrap()
            .insert(inbox.to_string());
    }

    pub fn deliveries(&self) -> Vec<RecordedDelivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl FederationClient for RecordingFederation {
    async fn fetch_json(&self, url: &str) -> Result<Value, AppError> {
        self.documents
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::Federation(format!("{} not found", url)))
    }

    async fn post_activity(
        &self,
        url: &str,
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> Result<StatusCode, AppError> {
        self.deliveries.lock().unwrap().push(RecordedDelivery {
            url: url.to_string(),
            headers,
            body: serde_json::from_slice(&body)?,
        });

        if self.failing_inboxes.lock().unwrap().contains(url) {
            Ok(StatusCode::INTERNAL_SERVER_ERROR)
        } else {
            Ok(StatusCode::ACCEPTED)
        }
    }
}

/// A remote actor published through [`RecordingFederation`]
pub struct RemoteActor {
    pub id: String,
    pub inbox: String,
    pub keys: KeyStore,
}

impl RemoteActor {
    pub fn key_id(&self) -> String {
        format!("{}#main-key", self.id)
    }
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub federation: Arc<RecordingFederation>,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();

        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                public_url: None,
            },
            keys: config::KeysConfig {
                private_key_path: temp_dir.path().join("private.pem"),
                public_key_path: temp_dir.path().join("public.pem"),
            },
            storage: config::StorageConfig {
                followers_path: temp_dir.path().join("followers.json"),
                messages_path: temp_dir.path().join("messages.json"),
            },
            federation: config::FederationConfig {
                delivery_timeout_seconds: 5,
                ..Default::default()
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        let federation = Arc::new(RecordingFederation::default());
        let transport: Arc<dyn FederationClient> = federation.clone();
        let state = AppState::with_client(config, generate_keys(), transport)
            .await
            .unwrap();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = inboxd::build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            federation,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get URL for a path on this server (also its public base URL)
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Id of local actor `id` as served by this instance
    pub fn local_actor(&self, id: &str) -> String {
        self.url(&format!("/u/{}", id))
    }

    /// Publish a remote actor with its own key pair.
    pub fn remote_actor(&self, name: &str) -> RemoteActor {
        let keys = generate_keys();
        let id = format!("https://{}.example/users/{}", name, name);
        let inbox = format!("{}/inbox", id);

        self.federation.serve(
            &id,
            json!({
                "@context": ["https://www.w3.org/ns/activitystreams", "https://w3id.org/security/v1"],
                "id": id,
                "type": "Person",
                "preferredUsername": name,
                "inbox": inbox,
                "publicKey": {
                    "id": format!("{}#main-key", id),
                    "owner": id,
                    "publicKeyPem": keys.public_key_pem()
                }
            }),
        );

        RemoteActor { id, inbox, keys }
    }

    /// POST `activity` to /inbox signed by `signer`.
    pub async fn post_signed(&self, signer: &RemoteActor, activity: &Value) -> reqwest::Response {
        let inbox_url = self.url("/inbox");
        let date = http_date(Utc::now());
        let signature = Signer::new(&signer.keys)
            .sign(&signer.id, &inbox_url, &date)
            .unwrap();

        self.client
            .post(&inbox_url)
            .header("content-type", "application/activity+json")
            .header("date", date)
            .header("signature", signature.to_header_value())
            .body(serde_json::to_vec(activity).unwrap())
            .send()
            .await
            .unwrap()
    }

    /// Wait for the background work behind a response to settle.
    pub async fn wait_until<F>(&self, mut condition: F)
    where
        F: FnMut() -> bool,
    {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("condition not reached within 5s");
    }

    /// Wait until `local_actor` has exactly `expected` followers.
    pub async fn wait_for_follower_count(&self, local_actor: &str, expected: usize) {
        for _ in 0..100 {
            if self.state.followers.count(local_actor).await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("{} never reached {} followers", local_actor, expected);
    }
}
