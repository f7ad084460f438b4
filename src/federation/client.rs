//! Outbound HTTP for federation
//!
//! Every remote fetch (actor documents, public keys) and every delivery goes
//! through [`FederationClient`], so the protocol engine can be exercised
//! without a network.

use std::net::IpAddr;

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use serde_json::Value;

use crate::config::FederationConfig;
use crate::error::AppError;

/// Content type used both to request and to deliver activities
pub const ACTIVITY_CONTENT_TYPE: &str =
    "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

/// Transport used by the protocol engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FederationClient: Send + Sync {
    /// GET `url` asking for an ActivityStreams document
    async fn fetch_json(&self, url: &str) -> Result<Value, AppError>;

    /// POST a serialized activity to `url` with the given (signed) headers
    async fn post_activity(
        &self,
        url: &str,
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> Result<StatusCode, AppError>;
}

/// `reqwest`-backed client used in production
pub struct HttpFederationClient {
    http_client: reqwest::Client,
    allow_private_hosts: bool,
}

impl HttpFederationClient {
    pub fn new(config: &FederationConfig) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http_client,
            allow_private_hosts: config.allow_private_hosts,
        })
    }

    async fn check_target(&self, target: &str) -> Result<(), AppError> {
        let parsed = url::Url::parse(target)
            .map_err(|e| AppError::Validation(format!("Invalid URL {}: {}", target, e)))?;

        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(AppError::Validation(format!(
                    "Unsupported URL scheme: {}",
                    scheme
                )));
            }
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| AppError::Validation("Missing host in URL".to_string()))?;

        if self.allow_private_hosts {
            return Ok(());
        }

        if is_disallowed_host(host) {
            return Err(AppError::Forbidden);
        }

        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| AppError::Validation("Missing port in URL".to_string()))?;
        validate_resolved_host_ips(host, port).await
    }
}

#[async_trait]
impl FederationClient for HttpFederationClient {
    async fn fetch_json(&self, url: &str) -> Result<Value, AppError> {
        self.check_target(url).await?;

        let response = self
            .http_client
            .get(url)
            .header(http::header::ACCEPT, ACTIVITY_CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to fetch {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(AppError::Federation(format!(
                "Failed to fetch {}: HTTP {}",
                url,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to parse {}: {}", url, e)))
    }

    async fn post_activity(
        &self,
        url: &str,
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> Result<StatusCode, AppError> {
        self.check_target(url).await?;

        let response = self
            .http_client
            .post(url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to deliver to {}: {}", url, e)))?;

        Ok(response.status())
    }
}

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

/// Resolve `host` and reject it if any address is internal.
///
/// Catches public-looking names that resolve to private networks.
async fn validate_resolved_host_ips(host: &str, port: u16) -> Result<(), AppError> {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();

    let lookup = tokio::net::lookup_host((normalized.as_str(), port))
        .await
        .map_err(|e| AppError::Federation(format!("Failed to resolve {}: {}", host, e)))?;

    let mut resolved_any = false;
    for addr in lookup {
        resolved_any = true;
        if is_disallowed_ip(addr.ip()) {
            return Err(AppError::Forbidden);
        }
    }

    if !resolved_any {
        return Err(AppError::Federation(format!("No DNS records for {}", host)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(allow_private_hosts: bool) -> HttpFederationClient {
        HttpFederationClient::new(&FederationConfig {
            allow_private_hosts,
            ..FederationConfig::default()
        })
        .expect("client builds")
    }

    #[test]
    fn disallowed_hosts() {
        assert!(is_disallowed_host("localhost"));
        assert!(is_disallowed_host("api.localhost."));
        assert!(is_disallowed_host("192.168.1.10"));
        assert!(is_disallowed_host("[::1]"));
        assert!(!is_disallowed_host("example.com"));
        assert!(!is_disallowed_host("93.184.216.34"));
    }

    #[tokio::test]
    async fn rejects_loopback_targets_by_default() {
        match client(false).fetch_json("http://127.0.0.1:9/u/alice").await {
            Err(AppError::Forbidden) => {}
            other => panic!("expected forbidden, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        match client(true).fetch_json("ftp://example.com/u/alice").await {
            Err(AppError::Validation(message)) => assert!(message.contains("scheme")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_json_sends_activity_accept_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/bob"))
            .and(header("accept", ACTIVITY_CONTENT_TYPE))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "https://remote.example/users/bob",
                "type": "Person"
            })))
            .mount(&server)
            .await;

        let document = client(true)
            .fetch_json(&format!("{}/users/bob", server.uri()))
            .await
            .expect("fetch succeeds");
        assert_eq!(document["type"], "Person");
    }

    #[tokio::test]
    async fn fetch_json_reports_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let result = client(true)
            .fetch_json(&format!("{}/users/gone", server.uri()))
            .await;
        assert!(matches!(result, Err(AppError::Federation(_))));
    }

    #[tokio::test]
    async fn post_activity_returns_remote_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/inbox"))
            .and(header("signature", "keyId=\"k\""))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("signature", http::HeaderValue::from_static("keyId=\"k\""));
        let status = client(true)
            .post_activity(&format!("{}/inbox", server.uri()), headers, b"{}".to_vec())
            .await
            .expect("post succeeds");
        assert_eq!(status, StatusCode::ACCEPTED);
    }
}
