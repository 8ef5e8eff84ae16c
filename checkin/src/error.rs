//! Error taxonomy for check-in.
//!
//! Every failure the operator can hit is one [`CheckInError`] variant, and every
//! variant renders to the single free-text message shown at the door via
//! [`CheckInError::display_message`]. Nothing here is allowed to escape the state
//! machine as a panic.

use thiserror::Error;

/// Message shown for any camera or reader failure.
pub const DEVICE_ADVISORY: &str =
    "Camera unavailable. Allow camera access or connect a scanner, then try again.";

/// Failures detected before any network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocalValidationError {
    /// The operator submitted an empty token
    #[error("Enter the operator token")]
    EmptyToken,

    /// A session is already active on this device
    ///
    /// Changing operator identity requires logging out first.
    #[error("Log out before signing in with another operator token")]
    SessionActive,
}

/// Failures of a scan submission.
///
/// Both variants end in the same settled state; only the message differs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The backend could not be reached or answered unintelligibly
    #[error("Network failure: {reason}")]
    NetworkFailure {
        /// Transport-level description
        reason: String,
    },

    /// The backend refused the ticket (already used, wrong event, expired session)
    #[error("{message}")]
    Rejected {
        /// Backend message, verbatim
        message: String,
    },
}

/// Every error the check-in flow can surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckInError {
    /// Rejected locally before any network call
    #[error(transparent)]
    LocalValidation(#[from] LocalValidationError),

    /// The backend did not accept the operator token
    #[error("Authentication failed: {message}")]
    Auth {
        /// Backend message, verbatim
        message: String,
    },

    /// The capture device could not be acquired or stopped delivering
    #[error("Capture device error: {reason}")]
    Device {
        /// Device-level description, for logs only
        reason: String,
    },

    /// A scan submission failed
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl CheckInError {
    /// Convenience constructor for [`CheckInError::Device`].
    #[must_use]
    pub fn device(reason: impl Into<String>) -> Self {
        Self::Device {
            reason: reason.into(),
        }
    }

    /// The string shown to the operator.
    ///
    /// Backend messages pass through verbatim. Device failures always show
    /// [`DEVICE_ADVISORY`].
    #[must_use]
    pub fn display_message(&self) -> String {
        match self {
            Self::LocalValidation(error) => error.to_string(),
            Self::Auth { message } => message.clone(),
            Self::Device { .. } => DEVICE_ADVISORY.to_string(),
            Self::Validation(error) => error.display_message(),
        }
    }
}

impl ValidationError {
    /// The string shown to the operator for a failed scan.
    #[must_use]
    pub fn display_message(&self) -> String {
        match self {
            Self::NetworkFailure { reason } => {
                format!("Could not reach the validation server ({reason})")
            },
            Self::Rejected { message } => message.clone(),
        }
    }
}

/// Errors from tab-scoped session storage.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Reading or writing the backing file failed
    #[error("Session storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The stored session could not be decoded
    #[error("Stored session is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Errors from an arrivals channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Could not open the connection
    #[error("Channel connection failed: {0}")]
    Connect(String),

    /// Could not send the register message
    #[error("Channel registration failed: {0}")]
    Register(String),

    /// The connection broke while receiving
    #[error("Channel transport error: {0}")]
    Transport(String),
}
