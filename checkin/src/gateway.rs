//! Validation gateway: the two HTTP calls of the token-swap protocol.
//!
//! ```text
//! POST /session/validate   Authorization: Bearer <operator token>   {}
//! POST /tickets/scan       Authorization: Bearer <decoded code>     {"dispositiveToken": <session token>}
//! ```
//!
//! The session token authenticates the device once. Each scan is authenticated by
//! the decoded ticket code, with the session token in the body. A leaked session
//! token alone therefore cannot mark arbitrary tickets as used. The header/body
//! placement of the two tokens must never be swapped.

use crate::error::{CheckInError, ValidationError};
use crate::types::{AdmissionResult, DecodedCode, OperatorToken, ValidationSession};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Start of the authentication message shown when the backend cannot be reached.
pub const UNREACHABLE_PREFIX: &str = "Could not reach the server";

/// Boxed future returned by gateway calls.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Backend calls made by a check-in device.
pub trait CheckInGateway: Send + Sync {
    /// Exchange an operator token for a session token scoped to one event.
    ///
    /// # Errors
    ///
    /// Returns [`CheckInError::Auth`] carrying the backend's message when the token
    /// is refused. An unreachable backend is also reported as
    /// [`CheckInError::Auth`], with a message starting with [`UNREACHABLE_PREFIX`]
    /// so the operator can tell it apart from a bad token.
    fn exchange_operator_token<'a>(
        &'a self,
        operator_token: &'a OperatorToken,
    ) -> GatewayFuture<'a, Result<String, CheckInError>>;

    /// Submit a decoded ticket code for admission.
    ///
    /// On success the backend marks the ticket used and publishes an arrival.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Rejected`] with the backend message for any non-2xx
    /// answer, and [`ValidationError::NetworkFailure`] for transport failures,
    /// timeouts and unreadable bodies.
    fn validate<'a>(
        &'a self,
        code: &'a DecodedCode,
        session: &'a ValidationSession,
    ) -> GatewayFuture<'a, Result<AdmissionResult, ValidationError>>;
}

/// Body of `POST /tickets/scan`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanRequest<'a> {
    dispositive_token: &'a str,
}

/// Response of `POST /session/validate`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    #[serde(default)]
    validated: bool,
    #[serde(default)]
    validation_token: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Error body returned with 4xx/5xx answers.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Pull `{"message": ...}` out of an error body, falling back to the status.
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .map(|body| body.message)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| format!("Request refused (HTTP {})", status.as_u16()))
}

/// HTTP implementation of [`CheckInGateway`] over `reqwest`.
///
/// Every request carries a bounded timeout; expiry is reported as a network failure.
#[derive(Clone, Debug)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpGateway {
    /// Create a gateway for the backend at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the HTTP client cannot be built (TLS backend
    /// initialisation).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn describe(&self, error: &reqwest::Error) -> String {
        if error.is_timeout() {
            format!("no answer within {} ms", self.timeout.as_millis())
        } else if error.is_connect() {
            "connection refused".to_string()
        } else {
            error.to_string()
        }
    }

    async fn exchange(&self, operator_token: &OperatorToken) -> Result<String, CheckInError> {
        let response = self
            .client
            .post(format!("{}/session/validate", self.base_url))
            .bearer_auth(operator_token.as_str())
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| CheckInError::Auth {
                message: format!("{UNREACHABLE_PREFIX} ({})", self.describe(&e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CheckInError::Auth {
                message: error_message(status, &body),
            });
        }

        let body: SessionResponse = response.json().await.map_err(|e| CheckInError::Auth {
            message: format!("Unreadable answer from the server ({e})"),
        })?;

        match body.validation_token {
            Some(token) if body.validated && !token.is_empty() => Ok(token),
            _ => Err(CheckInError::Auth {
                message: body
                    .message
                    .unwrap_or_else(|| "Operator token not accepted".to_string()),
            }),
        }
    }

    async fn scan(
        &self,
        code: &DecodedCode,
        session: &ValidationSession,
    ) -> Result<AdmissionResult, ValidationError> {
        let response = self
            .client
            .post(format!("{}/tickets/scan", self.base_url))
            .bearer_auth(code.as_str())
            .json(&ScanRequest {
                dispositive_token: &session.session_token,
            })
            .send()
            .await
            .map_err(|e| ValidationError::NetworkFailure {
                reason: self.describe(&e),
            })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<AdmissionResult>()
                .await
                .map_err(|e| ValidationError::NetworkFailure {
                    reason: format!("unreadable answer: {}", self.describe(&e)),
                });
        }

        let body = response.text().await.unwrap_or_default();
        Err(ValidationError::Rejected {
            message: error_message(status, &body),
        })
    }
}

impl CheckInGateway for HttpGateway {
    fn exchange_operator_token<'a>(
        &'a self,
        operator_token: &'a OperatorToken,
    ) -> GatewayFuture<'a, Result<String, CheckInError>> {
        Box::pin(self.exchange(operator_token))
    }

    fn validate<'a>(
        &'a self,
        code: &'a DecodedCode,
        session: &'a ValidationSession,
    ) -> GatewayFuture<'a, Result<AdmissionResult, ValidationError>> {
        Box::pin(self.scan(code, session))
    }
}
