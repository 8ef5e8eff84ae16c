//! Scan state machine.
//!
//! ```text
//! Idle ─Authenticate→ Authenticating ─Authenticated→ Starting ─CaptureStarted→ Capturing
//!   Capturing ─CodeDecoded (latched)→ Decoded ─CaptureReleased→ Submitting ─AdmissionSettled→ Settled
//!   Settled ─ScanAgain→ Resetting ─CaptureStarted→ Capturing
//!   Starting/Resetting/Capturing ─CaptureFailed→ CaptureFailed ─RetryCapture→ Starting
//!   any ─Logout→ Idle
//! ```
//!
//! The decode loop runs as a cancellable stream registered under [`DECODE_LOOP`].
//! The first decode of a capture sets the latch in the same `reduce` call that
//! observes it and cancels the loop before anything else happens; every later
//! emission (same code, other code, stragglers from an aborted loop) fails the
//! latch/phase/capture guard and is dropped.
//!
//! Results of async work carry the `epoch` they were started in. `Logout` bumps
//! the epoch, so a validation still in flight at logout is discarded on arrival.

use crate::capture::{CaptureDevice, CaptureSlot};
use crate::error::{CheckInError, LocalValidationError, ValidationError};
use crate::gateway::CheckInGateway;
use crate::session::{SessionManager, SessionStorage};
use crate::types::{AdmissionResult, CaptureId, DecodedCode, OperatorToken, ValidationSession};
use futures::StreamExt;
use std::sync::Arc;
use turnstile_core::{
    async_effect, cancellable_stream,
    effect::{Effect, EffectId},
    environment::Clock,
    reducer::Reducer,
    smallvec, SmallVec,
};

/// Cancellation id of the running decode loop.
pub const DECODE_LOOP: EffectId = EffectId::new("scanner.decode_loop");

/// How a submission ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The backend accepted the ticket
    Admitted(AdmissionResult),
    /// The submission failed or the ticket was refused
    Refused(ValidationError),
}

impl Settlement {
    /// The message shown at the door.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Admitted(result) => result.message.clone(),
            Self::Refused(error) => error.display_message(),
        }
    }

    /// Returns `true` if the ticket was accepted.
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }

    const fn outcome(&self) -> &'static str {
        match self {
            Self::Admitted(_) => "admitted",
            Self::Refused(ValidationError::Rejected { .. }) => "rejected",
            Self::Refused(ValidationError::NetworkFailure { .. }) => "network_failure",
        }
    }
}

/// Operational phase of the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScanPhase {
    /// No session; waiting for an operator token
    #[default]
    Idle,
    /// Exchanging an operator token, or restoring a stored session
    Authenticating,
    /// Acquiring the capture device
    Starting,
    /// Decode loop running
    Capturing,
    /// First decode latched; waiting for the device to be released
    Decoded {
        /// The latched code
        code: DecodedCode,
    },
    /// Validation call in flight
    Submitting {
        /// The code being validated
        code: DecodedCode,
    },
    /// Result on display until the operator scans again
    Settled(Settlement),
    /// Re-acquiring the capture device after a settled scan
    Resetting,
    /// The device could not be acquired; retry does not need re-authentication
    CaptureFailed(CheckInError),
    /// Capture stopped while keeping the session
    Stopped,
}

impl ScanPhase {
    /// Short name for logs and status lines.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Authenticating => "authenticating",
            Self::Starting => "starting",
            Self::Capturing => "capturing",
            Self::Decoded { .. } => "decoded",
            Self::Submitting { .. } => "submitting",
            Self::Settled(_) => "settled",
            Self::Resetting => "resetting",
            Self::CaptureFailed(_) => "capture_failed",
            Self::Stopped => "stopped",
        }
    }
}

/// State of one scanner (one tab, one device).
#[derive(Debug, Clone, Default)]
pub struct ScannerState {
    /// Current phase
    pub phase: ScanPhase,
    /// Active validation session, attached to every submission until logout
    pub session: Option<ValidationSession>,
    /// Capture the scanner is currently driving
    pub capture: Option<CaptureId>,
    /// Set by the first decode of a capture, cleared when a new capture starts
    pub latched: bool,
    /// Bumped by every logout
    pub epoch: u64,
    /// The single operator-visible message
    pub message: Option<String>,
    last_capture: u64,
}

impl ScannerState {
    /// Fresh, unauthenticated scanner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while a validation session is active.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    /// Most recently allocated capture id.
    #[must_use]
    pub const fn latest_capture(&self) -> CaptureId {
        CaptureId::new(self.last_capture)
    }

    fn next_capture(&mut self) -> CaptureId {
        self.last_capture += 1;
        CaptureId::new(self.last_capture)
    }
}

/// Inputs of the scanner.
#[derive(Debug, Clone)]
pub enum ScannerAction {
    // Operator commands
    /// Sign in with an operator token
    Authenticate {
        /// Token typed by the operator
        operator_token: OperatorToken,
    },
    /// Resume a session stored by an earlier run
    RestoreSession,
    /// Acquire a fresh capture after a settled result (or after a stop)
    ScanAgain,
    /// Re-attempt device acquisition after a device error
    RetryCapture,
    /// Stop capturing and release the device, keeping the session
    StopScanning,
    /// End the session from any state
    Logout,

    // Session results
    /// Operator token accepted
    Authenticated {
        /// Epoch the exchange started in
        epoch: u64,
        /// Issued session
        session: ValidationSession,
    },
    /// Operator token refused (or blank)
    AuthenticationFailed {
        /// Epoch the exchange started in
        epoch: u64,
        /// Why
        error: CheckInError,
    },
    /// Stored session lookup finished
    SessionRestored {
        /// Epoch the lookup started in
        epoch: u64,
        /// Stored session for this event, if any
        session: Option<ValidationSession>,
    },
    /// Logout finished releasing the device and clearing storage
    LoggedOut,

    // Capture device events
    /// Device acquired, decode loop running
    CaptureStarted {
        /// Capture that started
        capture: CaptureId,
    },
    /// Device could not be acquired or stopped delivering
    CaptureFailed {
        /// Capture that failed
        capture: CaptureId,
        /// Why
        error: CheckInError,
    },
    /// The decode loop reported a string
    CodeDecoded {
        /// Capture that produced it
        capture: CaptureId,
        /// The decoded string
        code: DecodedCode,
    },
    /// The device of a latched capture has been released
    CaptureReleased {
        /// Capture that was released
        capture: CaptureId,
    },

    // Validation result
    /// The validation call returned
    AdmissionSettled {
        /// Epoch the submission started in
        epoch: u64,
        /// Backend verdict
        result: Result<AdmissionResult, ValidationError>,
    },
}

/// Dependencies of the scanner.
#[derive(Clone)]
pub struct ScannerEnvironment {
    /// Session exchange and storage
    pub sessions: Arc<SessionManager>,
    /// Backend used for scan submissions
    pub gateway: Arc<dyn CheckInGateway>,
    /// The scanner's single capture device
    pub capture: CaptureSlot,
}

impl ScannerEnvironment {
    /// Wire a scanner bound to `event_id`.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn CheckInGateway>,
        storage: Arc<dyn SessionStorage>,
        device: Arc<dyn CaptureDevice>,
        clock: Arc<dyn Clock>,
        event_id: impl Into<String>,
    ) -> Self {
        Self {
            sessions: Arc::new(SessionManager::new(
                Arc::clone(&gateway),
                storage,
                clock,
                event_id,
            )),
            gateway,
            capture: CaptureSlot::new(device),
        }
    }
}

/// Reducer for the scan state machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScannerReducer;

impl ScannerReducer {
    /// Creates a new scanner reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

type Effects = SmallVec<[Effect<ScannerAction>; 4]>;

fn nothing() -> Effects {
    smallvec![Effect::None]
}

/// Acquire the device for `capture`, then forward its decodes.
fn decode_loop(env: &ScannerEnvironment, capture: CaptureId) -> Effect<ScannerAction> {
    let slot = env.capture.clone();
    cancellable_stream! {
        id: DECODE_LOOP,
        stream: async_stream::stream! {
            match slot.acquire(capture).await {
                Ok(mut decodes) => {
                    yield ScannerAction::CaptureStarted { capture };
                    while let Some(code) = decodes.next().await {
                        yield ScannerAction::CodeDecoded {
                            capture,
                            code: DecodedCode::new(code),
                        };
                    }
                    yield ScannerAction::CaptureFailed {
                        capture,
                        error: CheckInError::device("decode loop ended"),
                    };
                },
                Err(error) => {
                    yield ScannerAction::CaptureFailed { capture, error };
                },
            }
        }
    }
}

/// Release the device held by `capture` (or any older capture).
fn release(
    env: &ScannerEnvironment,
    capture: CaptureId,
    then: Option<ScannerAction>,
) -> Effect<ScannerAction> {
    let slot = env.capture.clone();
    async_effect! {
        slot.release_through(capture).await;
        then
    }
}

/// Allocate a capture, enter `phase` and start its decode loop.
fn start_capture(state: &mut ScannerState, env: &ScannerEnvironment, phase: ScanPhase) -> Effects {
    let capture = state.next_capture();
    state.phase = phase;
    state.capture = Some(capture);
    state.latched = false;
    tracing::debug!(capture = %capture, phase = state.phase.name(), "Starting capture");
    smallvec![Effect::Cancel(DECODE_LOOP), decode_loop(env, capture)]
}

fn ignore(state: &ScannerState, what: &'static str) -> Effects {
    tracing::debug!(phase = state.phase.name(), what, "Ignoring action");
    nothing()
}

impl Reducer for ScannerReducer {
    type State = ScannerState;
    type Action = ScannerAction;
    type Environment = ScannerEnvironment;

    #[allow(clippy::too_many_lines)] // One arm per transition
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Effects {
        match action {
            ScannerAction::Authenticate { operator_token } => {
                if state.is_authenticated() {
                    tracing::warn!("Authenticate refused: a session is already active");
                    state.message = Some(
                        CheckInError::from(LocalValidationError::SessionActive).display_message(),
                    );
                    return nothing();
                }
                if state.phase != ScanPhase::Idle {
                    return ignore(state, "authenticate");
                }

                state.phase = ScanPhase::Authenticating;
                state.message = None;
                let epoch = state.epoch;
                let sessions = Arc::clone(&env.sessions);

                smallvec![async_effect! {
                    match sessions.open_session(&operator_token).await {
                        Ok(session) => Some(ScannerAction::Authenticated { epoch, session }),
                        Err(error) => Some(ScannerAction::AuthenticationFailed { epoch, error }),
                    }
                }]
            },

            ScannerAction::Authenticated { epoch, session } => {
                if epoch != state.epoch || state.phase != ScanPhase::Authenticating {
                    tracing::debug!(epoch, current = state.epoch, "Discarding stale authentication");
                    return nothing();
                }

                tracing::info!(event_id = %session.event_id, "Scanner authenticated");
                state.session = Some(session.clone());
                let sessions = Arc::clone(&env.sessions);

                let mut effects = start_capture(state, env, ScanPhase::Starting);
                effects.push(async_effect! {
                    sessions.persist(&session, epoch).await;
                    None
                });
                effects
            },

            ScannerAction::AuthenticationFailed { epoch, error } => {
                if epoch != state.epoch || state.phase != ScanPhase::Authenticating {
                    return nothing();
                }

                tracing::warn!(error = %error, "Authentication failed");
                state.phase = ScanPhase::Idle;
                state.message = Some(error.display_message());
                nothing()
            },

            ScannerAction::RestoreSession => {
                if state.is_authenticated() || state.phase != ScanPhase::Idle {
                    return ignore(state, "restore");
                }

                state.phase = ScanPhase::Authenticating;
                let epoch = state.epoch;
                let sessions = Arc::clone(&env.sessions);

                smallvec![async_effect! {
                    let session = sessions.restore().await;
                    Some(ScannerAction::SessionRestored { epoch, session })
                }]
            },

            ScannerAction::SessionRestored { epoch, session } => {
                if epoch != state.epoch || state.phase != ScanPhase::Authenticating {
                    return nothing();
                }

                match session {
                    Some(session) => {
                        tracing::info!(event_id = %session.event_id, "Scanner resumed stored session");
                        state.session = Some(session);
                        start_capture(state, env, ScanPhase::Starting)
                    },
                    None => {
                        state.phase = ScanPhase::Idle;
                        nothing()
                    },
                }
            },

            ScannerAction::LoggedOut => {
                tracing::info!("Logout complete");
                nothing()
            },

            ScannerAction::CaptureStarted { capture } => {
                let starting = matches!(state.phase, ScanPhase::Starting | ScanPhase::Resetting);
                if !starting || state.capture != Some(capture) {
                    return ignore(state, "capture started");
                }

                state.phase = ScanPhase::Capturing;
                state.latched = false;
                tracing::info!(capture = %capture, "Capturing");
                nothing()
            },

            ScannerAction::CaptureFailed { capture, error } => {
                let live = matches!(
                    state.phase,
                    ScanPhase::Starting | ScanPhase::Resetting | ScanPhase::Capturing
                );
                if !live || state.capture != Some(capture) {
                    return ignore(state, "capture failed");
                }

                tracing::warn!(capture = %capture, error = %error, "Capture failed");
                state.message = Some(error.display_message());
                state.phase = ScanPhase::CaptureFailed(error);
                state.capture = None;
                smallvec![Effect::Cancel(DECODE_LOOP), release(env, capture, None)]
            },

            ScannerAction::CodeDecoded { capture, code } => {
                let accepted = state.phase == ScanPhase::Capturing
                    && !state.latched
                    && state.capture == Some(capture);
                if !accepted {
                    tracing::debug!(
                        phase = state.phase.name(),
                        latched = state.latched,
                        capture = %capture,
                        "Ignoring decode"
                    );
                    metrics::counter!("checkin.decodes.ignored").increment(1);
                    return nothing();
                }

                // Latch before anything async can observe this capture again.
                state.latched = true;
                state.phase = ScanPhase::Decoded { code };
                tracing::info!(capture = %capture, "Code decoded");

                smallvec![
                    Effect::Cancel(DECODE_LOOP),
                    release(env, capture, Some(ScannerAction::CaptureReleased { capture })),
                ]
            },

            ScannerAction::CaptureReleased { capture } => {
                let code = match &state.phase {
                    ScanPhase::Decoded { code } if state.capture == Some(capture) => code.clone(),
                    _ => return ignore(state, "capture released"),
                };
                let Some(session) = state.session.clone() else {
                    state.phase = ScanPhase::Idle;
                    return nothing();
                };

                state.phase = ScanPhase::Submitting { code: code.clone() };
                state.capture = None;
                metrics::counter!("checkin.scans.submitted").increment(1);

                let epoch = state.epoch;
                let gateway = Arc::clone(&env.gateway);
                smallvec![async_effect! {
                    let result = gateway.validate(&code, &session).await;
                    Some(ScannerAction::AdmissionSettled { epoch, result })
                }]
            },

            ScannerAction::AdmissionSettled { epoch, result } => {
                let submitting = matches!(state.phase, ScanPhase::Submitting { .. });
                if epoch != state.epoch || !submitting {
                    tracing::info!(epoch, current = state.epoch, "Discarding stale admission result");
                    return nothing();
                }

                let settlement = match result {
                    Ok(result) => Settlement::Admitted(result),
                    Err(error) => Settlement::Refused(error),
                };
                metrics::counter!("checkin.admissions.settled", "outcome" => settlement.outcome())
                    .increment(1);
                tracing::info!(outcome = settlement.outcome(), "Admission settled");

                state.message = Some(settlement.message());
                state.phase = ScanPhase::Settled(settlement);
                nothing()
            },

            ScannerAction::ScanAgain => match state.phase {
                ScanPhase::Settled(_) => start_capture(state, env, ScanPhase::Resetting),
                ScanPhase::Stopped => start_capture(state, env, ScanPhase::Starting),
                _ => ignore(state, "scan again"),
            },

            ScannerAction::RetryCapture => match state.phase {
                ScanPhase::CaptureFailed(_) => {
                    state.message = None;
                    start_capture(state, env, ScanPhase::Starting)
                },
                _ => ignore(state, "retry capture"),
            },

            ScannerAction::StopScanning => match state.phase {
                ScanPhase::Idle
                | ScanPhase::Authenticating
                | ScanPhase::Submitting { .. }
                | ScanPhase::Stopped => ignore(state, "stop scanning"),
                _ => {
                    let capture = state.latest_capture();
                    state.phase = ScanPhase::Stopped;
                    state.capture = None;
                    state.latched = false;
                    tracing::info!("Scanning stopped");
                    smallvec![Effect::Cancel(DECODE_LOOP), release(env, capture, None)]
                },
            },

            ScannerAction::Logout => {
                let revoked_epoch = state.epoch;
                let capture = state.latest_capture();
                *state = ScannerState {
                    epoch: state.epoch + 1,
                    last_capture: state.last_capture,
                    ..ScannerState::default()
                };
                tracing::info!(epoch = state.epoch, "Logging out");

                let slot = env.capture.clone();
                let sessions = Arc::clone(&env.sessions);
                smallvec![
                    Effect::Cancel(DECODE_LOOP),
                    async_effect! {
                        slot.release_through(capture).await;
                        if let Err(error) = sessions.logout(revoked_epoch).await {
                            tracing::warn!(error = %error, "Could not clear stored session");
                        }
                        Some(ScannerAction::LoggedOut)
                    },
                ]
            },
        }
    }
}
