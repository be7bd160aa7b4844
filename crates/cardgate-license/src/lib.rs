#![warn(missing_docs)]
//! # cardgate-license
//!
//! ## Purpose
//! Implements the license verification contract used when an analysis engine
//! is constructed.
//!
//! ## Responsibilities
//! - Define the [`LicenseVerifier`] contract and its [`VerificationOutcome`].
//! - Validate verification endpoint policy (HTTPS, `/license/verify`).
//! - Execute REST verification through an injectable [`LicenseTransport`],
//!   retrying transient failures per [`RetryPolicy`].
//!
//! ## Data flow
//! Engine factory -> [`LicenseVerifier::verify`] -> [`RestLicenseVerifier`]
//! sends [`VerifyRequest`] through [`LicenseTransport`] -> [`VerifyResponse`]
//! is mapped into a [`VerificationOutcome`].
//!
//! ## Ownership and lifetimes
//! The HTTP client is owned by [`ReqwestTransport`] and injected by the caller,
//! so one connection pool can be shared without process-wide globals.
//!
//! ## Error model
//! Transport-level failures are [`LicenseError`] values. The verifier never
//! returns them directly: every call resolves to a [`VerificationOutcome`] that
//! separates a rejected key from an unreachable service.
//!
//! ## Security and privacy notes
//! Keys are only logged through their fingerprint. Request bodies are never
//! logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cardgate_core::LicenseKey;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Required verification path suffix.
pub const REQUIRED_VERIFY_PATH: &str = "/license/verify";

/// Result of verifying one license key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Key is valid.
    Valid,
    /// Service rejected the key.
    Invalid(String),
    /// Service could not be reached or answered unusably.
    TransportError(String),
}

impl VerificationOutcome {
    /// Returns `true` for [`VerificationOutcome::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Returns a message suitable for the status line.
    pub fn user_message(&self) -> String {
        match self {
            Self::Valid => "License verified.".to_string(),
            Self::Invalid(reason) => format!("The license key was rejected: {reason}"),
            Self::TransportError(_) => {
                "Could not reach the license service. Check your network connection.".to_string()
            }
        }
    }
}

/// Contract for verifying license keys.
///
/// Implementations must be safe to call repeatedly and concurrently with
/// different keys.
#[async_trait]
pub trait LicenseVerifier: Send + Sync {
    /// Verifies one key.
    async fn verify(&self, key: &LicenseKey) -> VerificationOutcome;
}

/// Verification request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRequest {
    /// Key being verified.
    pub license_key: String,
}

/// Verification response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    /// Whether the key is valid.
    pub valid: bool,
    /// Optional rejection reason.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Abstract transport used by [`RestLicenseVerifier`].
#[async_trait]
pub trait LicenseTransport: Send + Sync {
    /// Sends one verification request.
    async fn post_verify(
        &self,
        endpoint: &Url,
        request: &VerifyRequest,
    ) -> Result<VerifyResponse, LicenseError>;
}

/// Retry policy for transient verification failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound for the exponential delay.
    pub max_delay_ms: u64,
    /// Random extra delay added to each retry.
    pub jitter_ms: u64,
}

impl RetryPolicy {
    /// Computes the delay before retry number `retry` (1-based).
    pub fn delay_for_retry(&self, retry: u32, rng: &mut impl Rng) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let backoff = self
            .base_delay_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.max_delay_ms);
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rng.random_range(0..=self.jitter_ms)
        };
        Duration::from_millis(backoff.saturating_add(jitter))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 250,
            max_delay_ms: 2_000,
            jitter_ms: 100,
        }
    }
}

/// REST-backed license verifier.
#[derive(Clone)]
pub struct RestLicenseVerifier {
    endpoint: Url,
    policy: RetryPolicy,
    transport: Arc<dyn LicenseTransport>,
}

impl RestLicenseVerifier {
    /// Creates a verifier for a validated endpoint.
    ///
    /// # Errors
    /// Returns [`LicenseError::InvalidEndpoint`] when the URL is not HTTPS or
    /// does not end with `/license/verify`.
    pub fn new(
        endpoint: &str,
        policy: RetryPolicy,
        transport: Arc<dyn LicenseTransport>,
    ) -> Result<Self, LicenseError> {
        let endpoint = validate_verify_endpoint(endpoint)?;
        Ok(Self {
            endpoint,
            policy,
            transport,
        })
    }

    /// Returns the configured endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl LicenseVerifier for RestLicenseVerifier {
    async fn verify(&self, key: &LicenseKey) -> VerificationOutcome {
        let request = VerifyRequest {
            license_key: key.as_str().to_string(),
        };
        let mut rng = StdRng::from_os_rng();
        let mut retry = 0;

        loop {
            let attempt = retry + 1;
            debug!(%key, attempt, "sending license verification request");
            match self.transport.post_verify(&self.endpoint, &request).await {
                Ok(response) => return outcome_from_response(response),
                Err(LicenseError::Rejected { status, reason }) => {
                    debug!(%key, status, "license service rejected key");
                    return VerificationOutcome::Invalid(reason);
                }
                Err(error) if error.is_retriable() && retry < self.policy.max_retries => {
                    retry += 1;
                    let delay = self.policy.delay_for_retry(retry, &mut rng);
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    warn!(%key, retry, delay_ms, %error, "retrying license verification");
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    warn!(%key, %error, "license verification transport failed");
                    return VerificationOutcome::TransportError(error.to_string());
                }
            }
        }
    }
}

fn outcome_from_response(response: VerifyResponse) -> VerificationOutcome {
    if response.valid {
        return VerificationOutcome::Valid;
    }
    let reason = response
        .reason
        .filter(|reason| !reason.trim().is_empty())
        .unwrap_or_else(|| "license rejected".to_string());
    VerificationOutcome::Invalid(reason)
}

/// HTTP transport built on an injected [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Wraps a shared client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LicenseTransport for ReqwestTransport {
    async fn post_verify(
        &self,
        endpoint: &Url,
        request: &VerifyRequest,
    ) -> Result<VerifyResponse, LicenseError> {
        let response = self
            .client
            .post(endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|error| LicenseError::Network(error.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(LicenseError::Server(status.as_u16()));
        }
        if matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
        ) {
            return Err(LicenseError::Throttled(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|error| LicenseError::Network(error.to_string()))?;

        if status.is_client_error() {
            let reason = serde_json::from_str::<VerifyResponse>(&body)
                .ok()
                .and_then(|parsed| parsed.reason)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(LicenseError::Rejected {
                status: status.as_u16(),
                reason,
            });
        }

        serde_json::from_str(&body).map_err(|error| LicenseError::InvalidResponse(error.to_string()))
    }
}

/// Validates verification endpoint constraints.
///
/// # Errors
/// Returns [`LicenseError::InvalidEndpoint`] for non-HTTPS or path mismatch.
pub fn validate_verify_endpoint(endpoint: &str) -> Result<Url, LicenseError> {
    let parsed = Url::parse(endpoint)
        .map_err(|error| LicenseError::InvalidEndpoint(format!("invalid license url: {error}")))?;

    if parsed.scheme() != "https" {
        return Err(LicenseError::InvalidEndpoint(
            "license endpoint must use https".to_string(),
        ));
    }

    if !parsed.path().ends_with(REQUIRED_VERIFY_PATH) {
        return Err(LicenseError::InvalidEndpoint(format!(
            "license endpoint path must end with {REQUIRED_VERIFY_PATH}"
        )));
    }

    Ok(parsed)
}

/// Errors produced by license transport and endpoint policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LicenseError {
    /// Endpoint violates security or contract requirements.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// Service answered with a client error for this key.
    #[error("license rejected (HTTP {status}): {reason}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Rejection reason reported by the service.
        reason: String,
    },
    /// Service answered with a server error.
    #[error("license service error: HTTP {0}")]
    Server(u16),
    /// Service asked the client to back off (HTTP 408 or 429).
    #[error("license service busy: HTTP {0}")]
    Throttled(u16),
    /// Connection-level failure.
    #[error("network failure: {0}")]
    Network(String),
    /// Response payload violated the verification contract.
    #[error("invalid verification response: {0}")]
    InvalidResponse(String),
}

impl LicenseError {
    /// Returns `true` when a retry may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Server(_) | Self::Throttled(_) | Self::Network(_)
        )
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for endpoint policy, retry, status mapping, and outcome mapping.

    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::Mutex;

    use super::*;

    struct ScriptedTransport {
        replies: Mutex<Vec<Result<VerifyResponse, LicenseError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn new(mut replies: Vec<Result<VerifyResponse, LicenseError>>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().expect("calls lock should work")
        }
    }

    #[async_trait]
    impl LicenseTransport for ScriptedTransport {
        async fn post_verify(
            &self,
            _endpoint: &Url,
            _request: &VerifyRequest,
        ) -> Result<VerifyResponse, LicenseError> {
            *self.calls.lock().expect("calls lock should work") += 1;
            self.replies
                .lock()
                .expect("replies lock should work")
                .pop()
                .unwrap_or(Err(LicenseError::Network("script exhausted".to_string())))
        }
    }

    const ENDPOINT: &str = "https://license.example.test/license/verify";

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 4,
            jitter_ms: 0,
        }
    }

    fn key() -> LicenseKey {
        LicenseKey::parse("GOOD").expect("key should parse")
    }

    #[test]
    fn validates_expected_endpoint_policy() {
        validate_verify_endpoint(ENDPOINT).expect("endpoint should pass");
        assert!(validate_verify_endpoint("http://license.example.test/license/verify").is_err());
        assert!(validate_verify_endpoint("https://license.example.test/other").is_err());
        assert!(validate_verify_endpoint("not a url").is_err());
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay_ms: 100,
            max_delay_ms: 300,
            jitter_ms: 0,
        };
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(policy.delay_for_retry(1, &mut rng), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(2, &mut rng), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(5, &mut rng), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_from_transient_failures() {
        let transport = ScriptedTransport::new(vec![
            Err(LicenseError::Server(503)),
            Err(LicenseError::Network("reset".to_string())),
            Ok(VerifyResponse {
                valid: true,
                reason: None,
            }),
        ]);
        let verifier = RestLicenseVerifier::new(ENDPOINT, fast_policy(3), transport.clone())
            .expect("verifier should build");

        assert_eq!(verifier.verify(&key()).await, VerificationOutcome::Valid);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_become_transport_error() {
        let transport = ScriptedTransport::new(vec![
            Err(LicenseError::Server(502)),
            Err(LicenseError::Server(502)),
        ]);
        let verifier = RestLicenseVerifier::new(ENDPOINT, fast_policy(1), transport.clone())
            .expect("verifier should build");

        let outcome = verifier.verify(&key()).await;
        assert!(matches!(outcome, VerificationOutcome::TransportError(_)));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(LicenseError::Rejected {
            status: 403,
            reason: "expired".to_string(),
        })]);
        let verifier = RestLicenseVerifier::new(ENDPOINT, fast_policy(3), transport.clone())
            .expect("verifier should build");

        assert_eq!(
            verifier.verify(&key()).await,
            VerificationOutcome::Invalid("expired".to_string())
        );
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_body_without_reason_gets_default_reason() {
        let transport = ScriptedTransport::new(vec![Ok(VerifyResponse {
            valid: false,
            reason: Some("  ".to_string()),
        })]);
        let verifier = RestLicenseVerifier::new(ENDPOINT, fast_policy(0), transport)
            .expect("verifier should build");

        assert_eq!(
            verifier.verify(&key()).await,
            VerificationOutcome::Invalid("license rejected".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_replies_are_retried() {
        let transport = ScriptedTransport::new(vec![
            Err(LicenseError::Throttled(429)),
            Err(LicenseError::Throttled(408)),
            Ok(VerifyResponse {
                valid: true,
                reason: None,
            }),
        ]);
        let verifier = RestLicenseVerifier::new(ENDPOINT, fast_policy(2), transport.clone())
            .expect("verifier should build");

        assert_eq!(verifier.verify(&key()).await, VerificationOutcome::Valid);
        assert_eq!(transport.calls(), 3);
    }

    /// Serves one canned HTTP reply on a loopback port and returns its URL.
    fn serve_once(status_line: &str, body: &str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let addr = listener.local_addr().expect("listener should have an address");
        let reply = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("client should connect");
            read_request(&mut stream);
            stream
                .write_all(reply.as_bytes())
                .expect("reply should be written");
        });
        Url::parse(&format!("http://{addr}{REQUIRED_VERIFY_PATH}")).expect("url should parse")
    }

    fn read_request(stream: &mut TcpStream) {
        let mut received = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let read = stream.read(&mut chunk).expect("request should be readable");
            if read == 0 {
                return;
            }
            received.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&received);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        if name.eq_ignore_ascii_case("content-length") {
                            value.trim().parse::<usize>().ok()
                        } else {
                            None
                        }
                    })
                    .unwrap_or(0);
                if received.len() >= header_end + 4 + content_length {
                    return;
                }
            }
        }
    }

    async fn post(endpoint: &Url) -> Result<VerifyResponse, LicenseError> {
        let request = VerifyRequest {
            license_key: "GOOD".to_string(),
        };
        ReqwestTransport::new(reqwest::Client::new())
            .post_verify(endpoint, &request)
            .await
    }

    #[tokio::test]
    async fn transport_parses_success_body() {
        let endpoint = serve_once("200 OK", r#"{"valid":true}"#);
        let response = post(&endpoint).await.expect("valid reply should parse");
        assert!(response.valid);
        assert_eq!(response.reason, None);
    }

    #[tokio::test]
    async fn transport_maps_server_errors() {
        let endpoint = serve_once("503 Service Unavailable", "");
        let error = post(&endpoint).await.expect_err("5xx should fail");
        assert_eq!(error, LicenseError::Server(503));
        assert!(error.is_retriable());
    }

    #[tokio::test]
    async fn transport_uses_reason_from_client_error_body() {
        let endpoint = serve_once("403 Forbidden", r#"{"valid":false,"reason":"expired"}"#);
        let error = post(&endpoint).await.expect_err("4xx should fail");
        assert_eq!(
            error,
            LicenseError::Rejected {
                status: 403,
                reason: "expired".to_string(),
            }
        );
        assert!(!error.is_retriable());
    }

    #[tokio::test]
    async fn transport_falls_back_to_status_reason() {
        let endpoint = serve_once("404 Not Found", "not json");
        let error = post(&endpoint).await.expect_err("4xx should fail");
        assert_eq!(
            error,
            LicenseError::Rejected {
                status: 404,
                reason: "HTTP 404".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn transport_marks_throttling_as_retriable() {
        for (status_line, code) in [("429 Too Many Requests", 429), ("408 Request Timeout", 408)] {
            let endpoint = serve_once(status_line, "");
            let error = post(&endpoint).await.expect_err("throttling should fail");
            assert_eq!(error, LicenseError::Throttled(code));
            assert!(error.is_retriable(), "HTTP {code} should be retriable");
        }
    }

    #[tokio::test]
    async fn transport_rejects_malformed_success_body() {
        let endpoint = serve_once("200 OK", "<html>maintenance</html>");
        let error = post(&endpoint).await.expect_err("malformed body should fail");
        assert!(matches!(error, LicenseError::InvalidResponse(_)));
        assert!(!error.is_retriable());
    }

    #[tokio::test]
    async fn transport_maps_refused_connection_to_network() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let addr = listener.local_addr().expect("listener should have an address");
        drop(listener);
        let endpoint =
            Url::parse(&format!("http://{addr}{REQUIRED_VERIFY_PATH}")).expect("url should parse");

        let error = post(&endpoint).await.expect_err("closed port should fail");
        assert!(matches!(error, LicenseError::Network(_)));
        assert!(error.is_retriable());
    }
}
