//! HTTP Signatures for ActivityPub
//!
//! Implements signing and verification per:
//! https://docs.joinmastodon.org/spec/security/
//!
//! Outbound requests always sign `(request-target) host date`. Inbound
//! requests are checked against whatever header list the sender declared.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use http::HeaderMap;
use rsa::pkcs1v15::{Signature as Pkcs1v15Signature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier as _};
use sha2::Sha256;

use super::actor::ActorDirectory;
use super::keys::{KeyStore, parse_public_key_pem};
use crate::error::AppError;
use crate::metrics::SIGNATURE_VERIFICATIONS_TOTAL;

/// Header list of every signature this service produces, in signing order
pub const SIGNED_HEADERS: [&str; 3] = ["(request-target)", "host", "date"];

/// Algorithm name written into outbound signatures
pub const DEFAULT_ALGORITHM: &str = "rsa-sha256";

/// Request target reconstructed for inbound deliveries
pub const INBOX_REQUEST_TARGET: &str = "post /inbox";

/// Parsed `Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Signed header names, in signing order
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
    /// Algorithm (rsa-sha256 or hs2019)
    pub algorithm: String,
}

impl SignatureHeader {
    /// Render as a `Signature` header value
    ///
    /// # Format
    /// ```text
    /// keyId="...",algorithm="...",headers="...",signature="..."
    /// ```
    pub fn to_header_value(&self) -> String {
        format!(
            "keyId=\"{}\",algorithm=\"{}\",headers=\"{}\",signature=\"{}\"",
            self.key_id,
            self.algorithm,
            self.headers.join(" "),
            self.signature
        )
    }

    /// Parse a `Signature` header value.
    ///
    /// Every comma-separated part must be a `key="value"` pair; `keyId` and
    /// `signature` are required. A missing `headers` parameter means
    /// `date` and a missing `algorithm` means RSA-SHA256.
    pub fn parse(header: &str) -> Result<Self, AppError> {
        let mut key_id = None;
        let mut algorithm = None;
        let mut headers = None;
        let mut signature = None;

        for part in split_params(header) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part.split_once('=').ok_or_else(|| {
                AppError::InvalidSignature(format!("Malformed signature parameter: {}", part))
            })?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);

            match key.trim() {
                "keyId" => key_id = Some(value.to_string()),
                "algorithm" => algorithm = Some(value.to_ascii_lowercase()),
                "headers" => {
                    headers = Some(
                        value
                            .split_whitespace()
                            .map(|s| s.to_ascii_lowercase())
                            .collect::<Vec<_>>(),
                    )
                }
                "signature" => signature = Some(value.to_string()),
                _ => {} // created, expires, ...
            }
        }

        Ok(Self {
            key_id: key_id
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AppError::InvalidSignature("Missing keyId".to_string()))?,
            headers: headers
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| vec!["date".to_string()]),
            signature: signature
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AppError::InvalidSignature("Missing signature".to_string()))?,
            algorithm: algorithm.unwrap_or_else(|| DEFAULT_ALGORITHM.to_string()),
        })
    }
}

/// Split on commas that are not inside a quoted value
fn split_params(header: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (index, ch) in header.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&header[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&header[start..]);
    parts
}

/// Date header value in RFC 1123 format
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Value of the `host` pseudo-header for a target URL.
///
/// This is also the `Host` header sent with the request, so an explicit
/// non-default port is kept.
pub fn signing_host(url: &url::Url) -> Result<String, AppError> {
    let host = url
        .host_str()
        .ok_or_else(|| AppError::Validation("Missing host in URL".to_string()))?;

    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Canonical string for the fixed outbound header list
pub fn outbound_signing_string(path: &str, host: &str, date: &str) -> String {
    [
        format!("(request-target): post {}", path),
        format!("host: {}", host),
        format!("date: {}", date),
    ]
    .join("\n")
}

/// Signs outbound deliveries with the service key
#[derive(Clone)]
pub struct Signer {
    signing_key: SigningKey<Sha256>,
}

impl Signer {
    pub fn new(keys: &KeyStore) -> Self {
        Self {
            signing_key: SigningKey::<Sha256>::new(keys.private_key().clone()),
        }
    }

    /// Sign a POST of `from_actor_id`'s activity to `target_inbox_url`.
    ///
    /// `date` must be the exact value sent in the `Date` header.
    pub fn sign(
        &self,
        from_actor_id: &str,
        target_inbox_url: &str,
        date: &str,
    ) -> Result<SignatureHeader, AppError> {
        let target = url::Url::parse(target_inbox_url)
            .map_err(|e| AppError::Validation(format!("Invalid inbox URL: {}", e)))?;
        let host = signing_host(&target)?;
        let signing_string = outbound_signing_string(target.path(), &host, date);

        let mut rng = rand::thread_rng();
        let signature = self
            .signing_key
            .sign_with_rng(&mut rng, signing_string.as_bytes());

        Ok(SignatureHeader {
            key_id: format!("{}#main-key", from_actor_id),
            headers: SIGNED_HEADERS.iter().map(|h| h.to_string()).collect(),
            signature: BASE64.encode(signature.to_bytes()),
            algorithm: DEFAULT_ALGORITHM.to_string(),
        })
    }
}

/// Checks inbound signatures against the sender's published key
#[derive(Clone)]
pub struct Verifier {
    directory: Arc<ActorDirectory>,
}

impl Verifier {
    pub fn new(directory: Arc<ActorDirectory>) -> Self {
        Self { directory }
    }

    /// Verify the `Signature` header of an inbound request and return the
    /// keyId that signed it.
    ///
    /// Never fails past this boundary: any problem (missing or malformed
    /// header, unreachable key, bad signature) is logged and yields `None`.
    pub async fn verify(&self, request_target: &str, headers: &HeaderMap) -> Option<String> {
        match self.try_verify(request_target, headers).await {
            Ok(key_id) => {
                SIGNATURE_VERIFICATIONS_TOTAL
                    .with_label_values(&["valid"])
                    .inc();
                tracing::debug!(key_id = %key_id, "Signature verified");
                Some(key_id)
            }
            Err(error) => {
                SIGNATURE_VERIFICATIONS_TOTAL
                    .with_label_values(&["invalid"])
                    .inc();
                tracing::warn!(%error, "Signature verification failed");
                None
            }
        }
    }

    async fn try_verify(
        &self,
        request_target: &str,
        headers: &HeaderMap,
    ) -> Result<String, AppError> {
        let header_value = headers
            .get("signature")
            .ok_or_else(|| AppError::InvalidSignature("Missing Signature header".to_string()))?
            .to_str()
            .map_err(|_| AppError::InvalidSignature("Invalid Signature header".to_string()))?;

        let parsed = SignatureHeader::parse(header_value)?;
        check_algorithm(&parsed.algorithm)?;

        let signing_string = reconstruct_signing_string(&parsed.headers, request_target, headers)?;
        let public_key_pem = self.directory.fetch_public_key(&parsed.key_id).await?;

        verify_signature(&signing_string, &parsed.signature, &public_key_pem)?;
        Ok(parsed.key_id)
    }
}

/// Whether `key_id` belongs to `actor_id`, ignoring fragments.
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    let key_actor = key_id.split('#').next().unwrap_or(key_id);
    let actor = actor_id.split('#').next().unwrap_or(actor_id);
    key_actor == actor
}

fn check_algorithm(algorithm: &str) -> Result<(), AppError> {
    match algorithm {
        "rsa-sha256" | "hs2019" => Ok(()),
        other => Err(AppError::InvalidSignature(format!(
            "Unsupported signature algorithm: {}",
            other
        ))),
    }
}

/// Rebuild the signed string from the runtime values of `names`.
///
/// `(request-target)` is taken from the caller, not from the request URI,
/// so that signatures survive path rewriting by a reverse proxy.
pub fn reconstruct_signing_string(
    names: &[String],
    request_target: &str,
    headers: &HeaderMap,
) -> Result<String, AppError> {
    let mut signing_parts = Vec::with_capacity(names.len());

    for name in names {
        let value = if name == "(request-target)" {
            request_target.to_string()
        } else {
            let values = headers
                .get_all(name.as_str())
                .iter()
                .map(|value| {
                    value.to_str().map(str::trim).map_err(|_| {
                        AppError::InvalidSignature(format!("Invalid {} header", name))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if values.is_empty() {
                return Err(AppError::InvalidSignature(format!(
                    "Missing signed header: {}",
                    name
                )));
            }
            values.join(", ")
        };

        signing_parts.push(format!("{}: {}", name, value));
    }

    Ok(signing_parts.join("\n"))
}

/// Verify a base64 RSA-SHA256 signature over `signing_string`.
pub fn verify_signature(
    signing_string: &str,
    signature_b64: &str,
    public_key_pem: &str,
) -> Result<(), AppError> {
    let signature_bytes = BASE64
        .decode(signature_b64)
        .map_err(|_| AppError::InvalidSignature("Invalid signature encoding".to_string()))?;

    let public_key = parse_public_key_pem(public_key_pem)
        .map_err(|e| AppError::InvalidSignature(e.to_string()))?;
    let verifier = VerifyingKey::<Sha256>::new(public_key);

    let signature = Pkcs1v15Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| AppError::InvalidSignature(format!("Invalid signature format: {}", e)))?;

    verifier
        .verify(signing_string.as_bytes(), &signature)
        .map_err(|_| AppError::InvalidSignature("Signature does not match".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::client::MockFederationClient;
    use http::HeaderValue;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
    use rsa::{RsaPrivateKey, RsaPublicKey};

    const BOB: &str = "https://remote.example/users/bob";

    fn generate_test_keys() -> KeyStore {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 1024).expect("key generation should work");
        let public_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .expect("public key pem");
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("private key pem");
        KeyStore::from_pem(&private_pem, &public_pem).expect("key store")
    }

    /// Headers as the inbox would observe them for a signed delivery
    fn signed_inbox_headers(keys: &KeyStore, inbox_url: &str) -> HeaderMap {
        let date = http_date(Utc::now());
        let signature = Signer::new(keys).sign(BOB, inbox_url, &date).expect("signed");
        let host = signing_host(&url::Url::parse(inbox_url).unwrap()).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_str(&host).unwrap());
        headers.insert("date", HeaderValue::from_str(&date).unwrap());
        headers.insert(
            "signature",
            HeaderValue::from_str(&signature.to_header_value()).unwrap(),
        );
        headers
    }

    fn verifier_serving(keys: &KeyStore, expected_fetches: usize) -> Verifier {
        let actor = serde_json::json!({
            "id": BOB,
            "type": "Person",
            "inbox": format!("{BOB}/inbox"),
            "publicKey": {
                "id": format!("{BOB}#main-key"),
                "owner": BOB,
                "publicKeyPem": keys.public_key_pem()
            }
        });
        let mut client = MockFederationClient::new();
        client
            .expect_fetch_json()
            .withf(|url| url == BOB)
            .times(expected_fetches)
            .returning(move |_| Ok(actor.clone()));
        Verifier::new(Arc::new(ActorDirectory::new(Arc::new(client))))
    }

    #[test]
    fn sign_produces_fixed_header_list_and_key_id() {
        let keys = generate_test_keys();
        let signature = Signer::new(&keys)
            .sign(BOB, "https://inbox.example/inbox", "Sun, 06 Nov 1994 08:49:37 GMT")
            .unwrap();

        assert_eq!(signature.key_id, format!("{BOB}#main-key"));
        assert_eq!(signature.headers, vec!["(request-target)", "host", "date"]);
        assert_eq!(signature.algorithm, "rsa-sha256");
    }

    #[test]
    fn signature_verifies_against_canonical_string() {
        let keys = generate_test_keys();
        let date = "Sun, 06 Nov 1994 08:49:37 GMT";
        let signature = Signer::new(&keys)
            .sign(BOB, "https://inbox.example:8443/inbox", date)
            .unwrap();

        let canonical = outbound_signing_string("/inbox", "inbox.example:8443", date);
        assert!(verify_signature(&canonical, &signature.signature, keys.public_key_pem()).is_ok());

        let wrong_host = outbound_signing_string("/inbox", "inbox.example", date);
        assert!(verify_signature(&wrong_host, &signature.signature, keys.public_key_pem()).is_err());
    }

    #[test]
    fn parse_round_trips_rendered_header() {
        let header = SignatureHeader {
            key_id: format!("{BOB}#main-key"),
            headers: SIGNED_HEADERS.iter().map(|h| h.to_string()).collect(),
            signature: "ZmFrZQ==".to_string(),
            algorithm: "rsa-sha256".to_string(),
        };
        assert_eq!(SignatureHeader::parse(&header.to_header_value()).unwrap(), header);
    }

    #[test]
    fn parse_applies_defaults_and_rejects_malformed() {
        let parsed = SignatureHeader::parse("keyId=\"k\",signature=\"c2ln\"").unwrap();
        assert_eq!(parsed.headers, vec!["date"]);
        assert_eq!(parsed.algorithm, "rsa-sha256");

        assert!(SignatureHeader::parse("keyId=\"k\",garbage,signature=\"c2ln\"").is_err());
        assert!(SignatureHeader::parse("headers=\"date\",signature=\"c2ln\"").is_err());
        assert!(SignatureHeader::parse("").is_err());
    }

    #[test]
    fn reconstruct_requires_every_signed_header() {
        let names = vec!["(request-target)".to_string(), "digest".to_string()];
        let result = reconstruct_signing_string(&names, INBOX_REQUEST_TARGET, &HeaderMap::new());
        assert!(matches!(result, Err(AppError::InvalidSignature(msg)) if msg.contains("digest")));
    }

    #[test]
    fn key_id_owner_must_be_the_actor() {
        assert!(key_id_matches_actor(&format!("{BOB}#main-key"), BOB));
        assert!(key_id_matches_actor(BOB, BOB));
        assert!(!key_id_matches_actor(
            &format!("{BOB}#main-key"),
            "https://remote.example/users/mallory"
        ));
        assert!(!key_id_matches_actor(
            "https://evil.example/users/bob#main-key",
            BOB
        ));
    }

    #[tokio::test]
    async fn verify_accepts_signed_request() {
        let keys = generate_test_keys();
        let headers = signed_inbox_headers(&keys, "https://inbox.example/inbox");

        let key_id = verifier_serving(&keys, 1)
            .verify(INBOX_REQUEST_TARGET, &headers)
            .await;
        assert_eq!(key_id, Some(format!("{BOB}#main-key")));
    }

    #[tokio::test]
    async fn verify_rejects_tampered_date() {
        let keys = generate_test_keys();
        let mut headers = signed_inbox_headers(&keys, "https://inbox.example/inbox");
        headers.insert(
            "date",
            HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"),
        );

        assert!(
            verifier_serving(&keys, 1)
                .verify(INBOX_REQUEST_TARGET, &headers)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn verify_rejects_missing_signature_without_fetching() {
        let keys = generate_test_keys();
        let mut headers = signed_inbox_headers(&keys, "https://inbox.example/inbox");
        headers.remove("signature");

        assert!(
            verifier_serving(&keys, 0)
                .verify(INBOX_REQUEST_TARGET, &headers)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn verify_rejects_unsupported_algorithm() {
        let keys = generate_test_keys();
        let mut headers = signed_inbox_headers(&keys, "https://inbox.example/inbox");
        let parsed =
            SignatureHeader::parse(headers.get("signature").unwrap().to_str().unwrap()).unwrap();
        let tampered = SignatureHeader {
            algorithm: "ed25519".to_string(),
            ..parsed
        };
        headers.insert(
            "signature",
            HeaderValue::from_str(&tampered.to_header_value()).unwrap(),
        );

        assert!(
            verifier_serving(&keys, 0)
                .verify(INBOX_REQUEST_TARGET, &headers)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn verify_fails_when_key_cannot_be_fetched() {
        let keys = generate_test_keys();
        let headers = signed_inbox_headers(&keys, "https://inbox.example/inbox");

        let mut client = MockFederationClient::new();
        client
            .expect_fetch_json()
            .returning(|_| Err(AppError::Federation("connection refused".to_string())));
        let verifier = Verifier::new(Arc::new(ActorDirectory::new(Arc::new(client))));

        assert!(
            verifier
                .verify(INBOX_REQUEST_TARGET, &headers)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn verify_fails_when_document_has_no_key() {
        let keys = generate_test_keys();
        let headers = signed_inbox_headers(&keys, "https://inbox.example/inbox");

        let mut client = MockFederationClient::new();
        client.expect_fetch_json().returning(|_| {
            Ok(serde_json::json!({ "id": BOB, "type": "Person", "inbox": "x" }))
        });
        let verifier = Verifier::new(Arc::new(ActorDirectory::new(Arc::new(client))));

        assert!(
            verifier
                .verify(INBOX_REQUEST_TARGET, &headers)
                .await
                .is_none()
        );
    }
}
