//! # Door-side Ticket Check-in
//!
//! Scanner and live roster for event check-in, built as reducers on the Turnstile
//! runtime.
//!
//! ## Components
//!
//! - **Capture**: a camera or QR reader behind [`capture::CaptureDevice`], held at
//!   most once per scanner through a [`capture::CaptureSlot`]
//! - **Scanner**: [`scanner::ScannerReducer`] latches the first decode of each
//!   presentation, stops the decode loop and submits the code exactly once
//! - **Sessions**: [`session::SessionManager`] swaps an operator token for a
//!   validation session scoped to one event and one scanner
//! - **Gateway**: [`gateway::CheckInGateway`] performs the token swap. The session
//!   token authenticates the operator once; each scan then authenticates with the
//!   decoded code as bearer and carries the session token in the body
//! - **Roster**: [`roster::RosterReducer`] tails the event's arrivals channel and
//!   appends every admission in delivery order, reconnecting with backoff
//!
//! ## Flow
//!
//! ```text
//! Authenticate → Starting → Capturing → Decoded → Submitting → Settled
//!                              ↑                                  │
//!                              └──────────── ScanAgain ───────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use checkin::{ScannerAction, ScannerEnvironment, ScannerReducer, ScannerState};
//! use turnstile_runtime::Store;
//!
//! let store = Store::new(ScannerState::new(), ScannerReducer::new(), env);
//! store
//!     .send(ScannerAction::Authenticate { operator_token: OperatorToken::new("VALID123") })
//!     .await?;
//! ```

pub mod capture;
pub mod config;
pub mod error;
pub mod gateway;
pub mod mocks;
pub mod roster;
pub mod scanner;
pub mod session;
pub mod types;

pub use capture::{CaptureDevice, CaptureSession, CaptureSlot, LineCaptureDevice};
pub use config::Config;
pub use error::{CheckInError, LocalValidationError, ValidationError};
pub use gateway::{CheckInGateway, HttpGateway};
pub use roster::{
    ArrivalChannel, RosterAction, RosterEnvironment, RosterReducer, RosterState, RosterStatus,
    WebSocketChannel,
};
pub use scanner::{
    ScanPhase, ScannerAction, ScannerEnvironment, ScannerReducer, ScannerState, Settlement,
};
pub use session::{FileSessionStorage, MemorySessionStorage, SessionManager, SessionStorage};
pub use types::{
    AdmissionResult, ArrivalRecord, CaptureId, DecodedCode, OperatorToken, ValidationSession,
};
