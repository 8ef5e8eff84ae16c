//! In-process collaborators for development and testing.
//!
//! - [`MockBackend`]: both HTTP contracts of the token-swap protocol, with ticket
//!   marking, duplicate rejection and arrival publishing
//! - [`ScriptedCaptureDevice`]: a camera whose frames are injected by the caller
//! - [`InMemoryArrivalChannel`]: per-event broadcast channel with forced disconnects

use crate::capture::{broadcast_decodes, CaptureDevice, CaptureFuture, CaptureSession, DecodeStream};
use crate::error::{ChannelError, CheckInError, ValidationError};
use crate::gateway::{CheckInGateway, GatewayFuture, UNREACHABLE_PREFIX};
use crate::roster::{ArrivalChannel, SubscribeFuture};
use crate::types::{
    AdmissionResult, ArrivalRecord, DecodedCode, OperatorToken, TicketRef, UserRef,
    ValidationSession,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use turnstile_core::environment::{Clock, SystemClock};

/// Message for an accepted ticket.
pub const ADMITTED: &str = "Entrada confirmada";
/// Message for a ticket presented twice.
pub const ALREADY_USED: &str = "Ticket já utilizado";
/// Message for an unknown ticket code.
pub const UNKNOWN_TICKET: &str = "Ticket inválido";
/// Message for a ticket of another event.
pub const WRONG_EVENT: &str = "Ticket de outro evento";
/// Message for an unknown or expired session token.
pub const INVALID_SESSION: &str = "Sessão inválida ou expirada";
/// Message for a refused operator token.
pub const INVALID_OPERATOR: &str = "Token de operador inválido";

/// One scan submission as seen by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCall {
    /// `Authorization: Bearer` value
    pub bearer: String,
    /// `dispositiveToken` body field
    pub dispositive_token: String,
}

#[derive(Debug)]
struct Ticket {
    event_id: String,
    holder: UserRef,
    fields: BTreeMap<String, String>,
    subscribed_at: DateTime<Utc>,
    used: bool,
}

#[derive(Debug, Default)]
struct Ledger {
    operators: HashMap<String, (String, String)>,
    sessions: HashMap<String, String>,
    tickets: HashMap<String, Ticket>,
    scans: Vec<ScanCall>,
}

/// In-process backend implementing [`CheckInGateway`].
///
/// Successful admissions are published to the attached [`InMemoryArrivalChannel`]
/// while the ledger is locked, so channel order equals admission order.
pub struct MockBackend {
    ledger: Mutex<Ledger>,
    arrivals: Option<Arc<InMemoryArrivalChannel>>,
    clock: Arc<dyn Clock>,
    latency: Duration,
    offline: AtomicBool,
    exchange_calls: AtomicUsize,
    validate_calls: AtomicUsize,
}

impl MockBackend {
    /// Creates an empty backend with no operators and no tickets
    #[must_use]
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            arrivals: None,
            clock: Arc::new(SystemClock),
            latency: Duration::ZERO,
            offline: AtomicBool::new(false),
            exchange_calls: AtomicUsize::new(0),
            validate_calls: AtomicUsize::new(0),
        }
    }

    /// Accept `operator_token` for `event_id`, issuing `session_token`
    #[must_use]
    pub fn with_operator(self, operator_token: &str, event_id: &str, session_token: &str) -> Self {
        self.add_operator(operator_token, event_id, session_token);
        self
    }

    /// Know `session_token` for `event_id`, as if issued before this process started
    #[must_use]
    pub fn with_session(self, session_token: &str, event_id: &str) -> Self {
        self.ledger()
            .sessions
            .insert(session_token.to_string(), event_id.to_string());
        self
    }

    /// Register a valid, unused ticket
    #[must_use]
    pub fn with_ticket(self, code: &str, event_id: &str, holder: &str) -> Self {
        self.add_ticket(code, event_id, holder);
        self
    }

    /// Publish admissions to `channel`
    #[must_use]
    pub fn with_arrivals(mut self, channel: Arc<InMemoryArrivalChannel>) -> Self {
        self.arrivals = Some(channel);
        self
    }

    /// Delay every answer by `latency`
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Timestamp arrivals with `clock`
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept another operator token
    pub fn add_operator(&self, operator_token: &str, event_id: &str, session_token: &str) {
        self.ledger().operators.insert(
            operator_token.to_string(),
            (event_id.to_string(), session_token.to_string()),
        );
    }

    /// Register another valid, unused ticket
    pub fn add_ticket(&self, code: &str, event_id: &str, holder: &str) {
        let ticket = Ticket {
            event_id: event_id.to_string(),
            holder: UserRef {
                id: format!("user-{code}"),
            },
            fields: [("name".to_string(), holder.to_string())].into_iter().collect(),
            subscribed_at: self.clock.now(),
            used: false,
        };
        self.ledger().tickets.insert(code.to_string(), ticket);
    }

    /// Make every call fail as if the network were down
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of `/session/validate` calls received
    #[must_use]
    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    /// Number of `/tickets/scan` calls received
    #[must_use]
    pub fn validate_calls(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }

    /// Scan submissions in arrival order
    #[must_use]
    pub fn scans(&self) -> Vec<ScanCall> {
        self.ledger().scans.clone()
    }

    /// Returns `true` once `code` has been admitted
    #[must_use]
    pub fn is_used(&self, code: &str) -> bool {
        self.ledger().tickets.get(code).is_some_and(|t| t.used)
    }

    async fn answer_after_latency(&self) -> bool {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        !self.offline.load(Ordering::SeqCst)
    }

    fn exchange(&self, operator_token: &str) -> Result<String, CheckInError> {
        let mut ledger = self.ledger();
        let Some((event_id, session_token)) = ledger.operators.get(operator_token).cloned() else {
            return Err(CheckInError::Auth {
                message: INVALID_OPERATOR.to_string(),
            });
        };
        ledger.sessions.insert(session_token.clone(), event_id);
        Ok(session_token)
    }

    fn admit(&self, code: &str, session_token: &str) -> Result<AdmissionResult, ValidationError> {
        let rejected = |message: &str| ValidationError::Rejected {
            message: message.to_string(),
        };

        let mut ledger = self.ledger();
        ledger.scans.push(ScanCall {
            bearer: code.to_string(),
            dispositive_token: session_token.to_string(),
        });

        let Some(session_event) = ledger.sessions.get(session_token).cloned() else {
            return Err(rejected(INVALID_SESSION));
        };
        let Some(ticket) = ledger.tickets.get_mut(code) else {
            return Err(rejected(UNKNOWN_TICKET));
        };
        if ticket.event_id != session_event {
            return Err(rejected(WRONG_EVENT));
        }
        if ticket.used {
            return Err(rejected(ALREADY_USED));
        }

        ticket.used = true;
        let record = ArrivalRecord {
            fields: ticket.fields.clone(),
            subscribed_at: ticket.subscribed_at,
            arrival_time: self.clock.now(),
            user: Some(ticket.holder.clone()),
        };
        let result = AdmissionResult {
            message: ADMITTED.to_string(),
            user: Some(ticket.holder.clone()),
            ticket: Some(TicketRef {
                event_id: ticket.event_id.clone(),
            }),
        };

        if let Some(channel) = &self.arrivals {
            channel.publish(&session_event, record);
        }
        Ok(result)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckInGateway for MockBackend {
    fn exchange_operator_token<'a>(
        &'a self,
        operator_token: &'a OperatorToken,
    ) -> GatewayFuture<'a, Result<String, CheckInError>> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if !self.answer_after_latency().await {
                return Err(CheckInError::Auth {
                    message: format!("{UNREACHABLE_PREFIX} (offline)"),
                });
            }
            self.exchange(operator_token.as_str())
        })
    }

    fn validate<'a>(
        &'a self,
        code: &'a DecodedCode,
        session: &'a ValidationSession,
    ) -> GatewayFuture<'a, Result<AdmissionResult, ValidationError>> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if !self.answer_after_latency().await {
                return Err(ValidationError::NetworkFailure {
                    reason: "offline".to_string(),
                });
            }
            self.admit(code.as_str(), &session.session_token)
        })
    }
}

/// Camera whose frames are injected with [`ScriptedCaptureDevice::present`].
///
/// Refuses to open while a previous session is still live, like real hardware
/// whose handle was never released.
pub struct ScriptedCaptureDevice {
    frames: broadcast::Sender<String>,
    failures: Mutex<VecDeque<String>>,
    opened: AtomicUsize,
    live: Arc<AtomicUsize>,
    stop_delay: Mutex<Duration>,
}

impl ScriptedCaptureDevice {
    /// Creates a device with no queued failures
    #[must_use]
    pub fn new() -> Self {
        let (frames, _) = broadcast::channel(1024);
        Self {
            frames,
            failures: Mutex::new(VecDeque::new()),
            opened: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            stop_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make the next `open` fail with `reason`
    pub fn fail_next_open(&self, reason: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reason.to_string());
    }

    /// Make sessions opened from now on take `delay` to stop
    pub fn set_stop_delay(&self, delay: Duration) {
        *self.stop_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Put `code` in front of the camera for one frame.
    ///
    /// Returns the number of running decode loops that saw it.
    pub fn present(&self, code: &str) -> usize {
        self.frames.send(code.to_string()).unwrap_or(0)
    }

    /// Successful `open` calls so far
    #[must_use]
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Sessions opened and not yet stopped
    #[must_use]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedCaptureDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice for ScriptedCaptureDevice {
    fn open(&self) -> CaptureFuture<'_, Result<Box<dyn CaptureSession>, CheckInError>> {
        let failure = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        let result = if let Some(reason) = failure {
            Err(CheckInError::device(reason))
        } else if self.live() > 0 {
            Err(CheckInError::device("camera busy"))
        } else {
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            let (stop, _) = watch::channel(false);
            let session: Box<dyn CaptureSession> = Box::new(ScriptedSession {
                frames: Some(self.frames.subscribe()),
                stop,
                live: Arc::clone(&self.live),
                stopped: false,
                stop_delay: *self.stop_delay.lock().unwrap_or_else(PoisonError::into_inner),
            });
            Ok(session)
        };

        Box::pin(async move { result })
    }
}

struct ScriptedSession {
    frames: Option<broadcast::Receiver<String>>,
    stop: watch::Sender<bool>,
    live: Arc<AtomicUsize>,
    stopped: bool,
    stop_delay: Duration,
}

impl CaptureSession for ScriptedSession {
    fn decodes(&mut self) -> Option<DecodeStream> {
        let frames = self.frames.take()?;
        Some(broadcast_decodes(frames, self.stop.subscribe()))
    }

    fn stop(&mut self) -> CaptureFuture<'_, ()> {
        let delay = if self.stopped {
            Duration::ZERO
        } else {
            self.stopped = true;
            self.frames = None;
            self.stop.send_replace(true);
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.stop_delay
        };
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        })
    }
}

#[derive(Default)]
struct Topics {
    senders: HashMap<String, broadcast::Sender<ArrivalRecord>>,
    refuse: usize,
    subscriptions: usize,
}

/// Per-event arrivals channel living in the same process.
///
/// Records published while nobody is subscribed are lost, as with a live tail.
#[derive(Default)]
pub struct InMemoryArrivalChannel {
    topics: Mutex<Topics>,
}

impl InMemoryArrivalChannel {
    /// Creates a channel with no topics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn topics(&self) -> std::sync::MutexGuard<'_, Topics> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `record` to every subscriber of `event_id`, returning how many got it
    pub fn publish(&self, event_id: &str, record: ArrivalRecord) -> usize {
        self.topics()
            .senders
            .get(event_id)
            .map_or(0, |sender| sender.send(record).unwrap_or(0))
    }

    /// End every current subscription to `event_id`
    pub fn disconnect(&self, event_id: &str) {
        self.topics().senders.remove(event_id);
    }

    /// Refuse the next `count` subscription attempts
    pub fn refuse_next(&self, count: usize) {
        self.topics().refuse = count;
    }

    /// Current subscribers of `event_id`
    #[must_use]
    pub fn listeners(&self, event_id: &str) -> usize {
        self.topics()
            .senders
            .get(event_id)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Successful subscriptions so far
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.topics().subscriptions
    }
}

impl ArrivalChannel for InMemoryArrivalChannel {
    fn subscribe<'a>(&'a self, event_id: &'a str) -> SubscribeFuture<'a> {
        let subscribed = {
            let mut topics = self.topics();
            if topics.refuse > 0 {
                topics.refuse -= 1;
                Err(ChannelError::Connect("connection refused".to_string()))
            } else {
                topics.subscriptions += 1;
                Ok(topics
                    .senders
                    .entry(event_id.to_string())
                    .or_insert_with(|| broadcast::channel(256).0)
                    .subscribe())
            }
        };

        Box::pin(async move {
            let mut receiver = subscribed?;
            let records: crate::roster::ArrivalStream = Box::pin(async_stream::stream! {
                loop {
                    match receiver.recv().await {
                        Ok(record) => {
                            yield Ok(record);
                        },
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Roster lagged behind the channel");
                        },
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            Ok(records)
        })
    }
}
