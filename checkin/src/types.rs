//! Domain types for door-side check-in.
//!
//! Credentials are newtypes whose `Debug` output never contains the full secret:
//! operator tokens, session tokens and decoded ticket codes all authenticate a
//! call somewhere in the flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Show only the first few characters of a credential.
fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    if prefix.len() == secret.len() {
        "****".to_string()
    } else {
        format!("{prefix}****")
    }
}

/// Long-lived secret typed by a door operator to start a shift.
///
/// Lives only as long as the input that produced it; never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct OperatorToken(String);

impl OperatorToken {
    /// Wraps raw operator input. Surrounding whitespace is trimmed.
    #[must_use]
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_string())
    }

    /// The token as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if there is nothing to send.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for OperatorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OperatorToken").field(&redact(&self.0)).finish()
    }
}

/// Short-lived credential issued for one event after operator authentication.
///
/// Attached to every scan submission until logout.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSession {
    /// Token issued by `/session/validate`
    pub session_token: String,
    /// Event this device is bound to
    pub event_id: String,
    /// When the token was obtained
    pub issued_at: DateTime<Utc>,
}

impl fmt::Debug for ValidationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationSession")
            .field("session_token", &redact(&self.session_token))
            .field("event_id", &self.event_id)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Opaque string extracted from a ticket's QR payload.
///
/// Never interpreted locally. It is forwarded verbatim as the bearer credential
/// of the scan call.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DecodedCode(String);

impl DecodedCode {
    /// Wraps a decoder emission as-is.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The code as read from the ticket.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DecodedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DecodedCode").field(&redact(&self.0)).finish()
    }
}

/// Reference to the ticket holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    /// Backend user id
    pub id: String,
}

/// Reference to the event a ticket belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRef {
    /// Backend event id
    pub event_id: String,
}

/// The backend's verdict on an accepted scan submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionResult {
    /// Human-readable message shown at the door
    pub message: String,
    /// Ticket holder, when the backend includes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,
    /// Ticket details, when the backend includes them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<TicketRef>,
}

impl AdmissionResult {
    /// Result carrying only a message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            user: None,
            ticket: None,
        }
    }
}

/// One admission as published on an event's arrivals channel.
///
/// Immutable once received. Carries no unique id, so redeliveries cannot be told apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalRecord {
    /// Registration form fields of the attendee
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// When the attendee registered
    pub subscribed_at: DateTime<Utc>,
    /// When the ticket was accepted at the door
    pub arrival_time: DateTime<Utc>,
    /// Attendee, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,
}

/// Identifies one acquisition of the capture device.
///
/// Allocated in increasing order, so a lower id always refers to an older capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CaptureId(u64);

impl CaptureId {
    /// Wraps a raw capture number.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw capture number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CaptureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "capture-{}", self.0)
    }
}
