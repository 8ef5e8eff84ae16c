//! Roster broadcast consumer.
//!
//! Subscribes to an event's arrivals channel and appends every record it delivers
//! to a live roster. Append order is the channel's delivery order; records are
//! never re-sorted and never deduplicated (they carry no stable id). On disconnect
//! the consumer resubscribes with exponential backoff and resumes the live tail;
//! records published during the gap are not replayed.
//!
//! The roster does not depend on any scanner: any number of devices may be
//! admitting tickets into the same event while it runs.

use crate::error::ChannelError;
use crate::types::ArrivalRecord;
use futures::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use turnstile_core::{
    cancellable_stream, delay,
    effect::{Effect, EffectId},
    reducer::Reducer,
    smallvec, SmallVec,
};
use turnstile_runtime::retry::RetryPolicy;

/// Cancellation id of the channel feed and any pending reconnect.
pub const ROSTER_FEED: EffectId = EffectId::new("roster.feed");

/// Records delivered by one subscription. An `Err` item ends the subscription.
pub type ArrivalStream = Pin<Box<dyn Stream<Item = Result<ArrivalRecord, ChannelError>> + Send>>;

/// Boxed future returned by [`ArrivalChannel::subscribe`].
pub type SubscribeFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ArrivalStream, ChannelError>> + Send + 'a>>;

/// A per-event broadcast channel of arrivals.
pub trait ArrivalChannel: Send + Sync {
    /// Connect, register for `event_id` and return the live tail.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the connection or registration fails.
    fn subscribe<'a>(&'a self, event_id: &'a str) -> SubscribeFuture<'a>;
}

/// Connection status of the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RosterStatus {
    /// Not subscribed
    #[default]
    Closed,
    /// Subscription in progress
    Connecting,
    /// Receiving the live tail
    Live,
    /// Waiting to resubscribe after a disconnect
    Reconnecting {
        /// Reconnect attempt, starting at 1
        attempt: usize,
    },
}

/// Live roster for one event.
#[derive(Debug, Clone, Default)]
pub struct RosterState {
    /// Event whose arrivals are shown
    pub event_id: String,
    /// Arrivals in delivery order
    pub arrivals: Vec<ArrivalRecord>,
    /// Channel status
    pub status: RosterStatus,
    /// Consecutive failed connections
    pub failures: usize,
}

impl RosterState {
    /// Empty roster for `event_id`.
    #[must_use]
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            ..Self::default()
        }
    }
}

/// Inputs of the roster.
#[derive(Debug, Clone)]
pub enum RosterAction {
    /// Start (or restart) the subscription
    Subscribe,
    /// The channel accepted the registration
    Connected,
    /// An arrival was delivered
    ArrivalReceived {
        /// The record, as delivered
        record: ArrivalRecord,
    },
    /// The subscription ended or could not be opened
    Disconnected {
        /// Why
        reason: String,
    },
    /// Backoff elapsed; subscribe again
    Resubscribe,
    /// Stop listening
    StopRoster,
}

/// Dependencies of the roster.
#[derive(Clone)]
pub struct RosterEnvironment {
    /// Arrivals channel
    pub channel: Arc<dyn ArrivalChannel>,
    /// Reconnect backoff
    pub retry: RetryPolicy,
}

impl RosterEnvironment {
    /// Wire a roster over `channel`.
    #[must_use]
    pub fn new(channel: Arc<dyn ArrivalChannel>, retry: RetryPolicy) -> Self {
        Self { channel, retry }
    }
}

/// Reducer for the arrivals roster.
#[derive(Debug, Clone, Copy, Default)]
pub struct RosterReducer;

impl RosterReducer {
    /// Creates a new roster reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn feed(env: &RosterEnvironment, event_id: String) -> Effect<RosterAction> {
    let channel = Arc::clone(&env.channel);
    cancellable_stream! {
        id: ROSTER_FEED,
        stream: async_stream::stream! {
            match channel.subscribe(&event_id).await {
                Ok(mut records) => {
                    yield RosterAction::Connected;
                    let mut reason = "channel closed".to_string();
                    while let Some(item) = records.next().await {
                        match item {
                            Ok(record) => {
                                yield RosterAction::ArrivalReceived { record };
                            },
                            Err(error) => {
                                reason = error.to_string();
                                break;
                            },
                        }
                    }
                    yield RosterAction::Disconnected { reason };
                },
                Err(error) => {
                    yield RosterAction::Disconnected { reason: error.to_string() };
                },
            }
        }
    }
}

impl Reducer for RosterReducer {
    type State = RosterState;
    type Action = RosterAction;
    type Environment = RosterEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            RosterAction::Subscribe => {
                state.status = RosterStatus::Connecting;
                state.failures = 0;
                tracing::info!(event_id = %state.event_id, "Subscribing to arrivals");
                smallvec![
                    Effect::Cancel(ROSTER_FEED),
                    feed(env, state.event_id.clone())
                ]
            },

            RosterAction::Resubscribe => {
                if !matches!(state.status, RosterStatus::Reconnecting { .. }) {
                    return smallvec![Effect::None];
                }
                smallvec![feed(env, state.event_id.clone())]
            },

            RosterAction::Connected => {
                if state.status == RosterStatus::Closed {
                    return smallvec![Effect::None];
                }
                if state.failures > 0 {
                    metrics::counter!("checkin.roster.reconnects").increment(1);
                }
                tracing::info!(event_id = %state.event_id, "Arrivals feed live");
                state.status = RosterStatus::Live;
                state.failures = 0;
                smallvec![Effect::None]
            },

            RosterAction::ArrivalReceived { record } => {
                if state.status == RosterStatus::Closed {
                    return smallvec![Effect::None];
                }
                metrics::counter!("checkin.roster.arrivals").increment(1);
                state.arrivals.push(record);
                smallvec![Effect::None]
            },

            RosterAction::Disconnected { reason } => {
                if state.status == RosterStatus::Closed {
                    return smallvec![Effect::None];
                }

                if !env.retry.should_retry(state.failures) {
                    tracing::warn!(reason = %reason, failures = state.failures, "Arrivals feed closed for good");
                    state.status = RosterStatus::Closed;
                    return smallvec![Effect::None];
                }

                let wait = env.retry.jittered_delay_for_attempt(state.failures);
                state.failures += 1;
                state.status = RosterStatus::Reconnecting {
                    attempt: state.failures,
                };
                tracing::warn!(
                    reason = %reason,
                    attempt = state.failures,
                    delay_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "Arrivals feed disconnected, resubscribing"
                );

                let resubscribe = delay! {
                    duration: wait,
                    action: RosterAction::Resubscribe
                };
                smallvec![resubscribe.cancellable(ROSTER_FEED)]
            },

            RosterAction::StopRoster => {
                tracing::info!(event_id = %state.event_id, "Roster stopped");
                state.status = RosterStatus::Closed;
                smallvec![Effect::Cancel(ROSTER_FEED)]
            },
        }
    }
}

/// Client to server messages.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientMessage<'a> {
    Register {
        #[serde(rename = "eventId")]
        event_id: &'a str,
    },
}

/// Server to client messages.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ServerMessage {
    Arrival { record: ArrivalRecord },
    Registered,
    #[serde(other)]
    Unknown,
}

/// [`ArrivalChannel`] over a WebSocket connection.
///
/// Every connection sends `{"type":"register","eventId":..}` before reading.
#[derive(Debug, Clone)]
pub struct WebSocketChannel {
    url: String,
}

impl WebSocketChannel {
    /// Channel served at `url` (`ws://` or `wss://`).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    async fn open(&self, event_id: &str) -> Result<ArrivalStream, ChannelError> {
        let (mut socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        let register = serde_json::to_string(&ClientMessage::Register { event_id })
            .map_err(|e| ChannelError::Register(e.to_string()))?;
        socket
            .send(Message::Text(register))
            .await
            .map_err(|e| ChannelError::Register(e.to_string()))?;
        tracing::debug!(url = %self.url, event_id, "Registered for arrivals");

        Ok(Box::pin(async_stream::stream! {
            while let Some(message) = socket.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(ServerMessage::Arrival { record }) => {
                            yield Ok(record);
                        },
                        Ok(ServerMessage::Registered | ServerMessage::Unknown) => {},
                        Err(error) => {
                            tracing::debug!(error = %error, "Skipping unreadable channel message");
                        },
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {},
                    Err(error) => {
                        yield Err(ChannelError::Transport(error.to_string()));
                        break;
                    },
                }
            }
        }))
    }
}

impl ArrivalChannel for WebSocketChannel {
    fn subscribe<'a>(&'a self, event_id: &'a str) -> SubscribeFuture<'a> {
        Box::pin(self.open(event_id))
    }
}
