//! Capture device adapter.
//!
//! A [`CaptureDevice`] opens a [`CaptureSession`]: a live camera (or reader) plus
//! its decode loop, delivered as a stream of decoded strings. The loop is
//! continuous: it keeps emitting the same code many times a second while a ticket
//! stays in frame. Turning that into one event per presentation is the scanner's
//! job, not the device's.
//!
//! The hardware handle cannot be shared, so a scanner holds at most one session at
//! a time through a [`CaptureSlot`].

use crate::error::CheckInError;
use crate::types::CaptureId;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};

/// Decoded strings emitted by a running decode loop.
pub type DecodeStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Boxed future returned by capture calls.
pub type CaptureFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A camera (or reader) that can be opened for scanning.
pub trait CaptureDevice: Send + Sync {
    /// Acquire the hardware and start decoding.
    ///
    /// # Errors
    ///
    /// Returns [`CheckInError::Device`] if the device is missing, busy or
    /// permission was denied.
    fn open(&self) -> CaptureFuture<'_, Result<Box<dyn CaptureSession>, CheckInError>>;
}

/// An acquired device with a running decode loop.
pub trait CaptureSession: Send {
    /// Take the decode stream. Returns `None` after the first call.
    fn decodes(&mut self) -> Option<DecodeStream>;

    /// Stop decoding and release the hardware. Idempotent.
    fn stop(&mut self) -> CaptureFuture<'_, ()>;
}

struct ActiveCapture {
    id: CaptureId,
    session: Box<dyn CaptureSession>,
}

#[derive(Default)]
struct SlotState {
    active: Option<ActiveCapture>,
    released_through: Option<CaptureId>,
}

/// Holder of the single capture session a scanner may own.
///
/// Acquiring stops and clears the previous session before opening the next one.
/// Releasing is fenced by capture id: once capture `n` has been released, a late
/// attempt to acquire any capture `<= n` is refused, so a cancelled start can never
/// leave a dangling handle behind.
#[derive(Clone)]
pub struct CaptureSlot {
    device: Arc<dyn CaptureDevice>,
    state: Arc<Mutex<SlotState>>,
}

impl CaptureSlot {
    /// Create an empty slot for `device`.
    #[must_use]
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            device,
            state: Arc::new(Mutex::new(SlotState::default())),
        }
    }

    /// Open the device for capture `id` and return its decode stream.
    ///
    /// # Errors
    ///
    /// Returns [`CheckInError::Device`] if the device cannot be opened, or if
    /// capture `id` was already released.
    pub async fn acquire(&self, id: CaptureId) -> Result<DecodeStream, CheckInError> {
        let mut state = self.state.lock().await;

        if state.released_through.is_some_and(|through| id <= through) {
            return Err(CheckInError::device(format!("{id} was released before it started")));
        }

        if let Some(previous) = state.active.as_mut() {
            tracing::debug!(capture = %previous.id, "Stopping previous capture");
            previous.session.stop().await;
        }
        state.active = None;

        let mut session = self.device.open().await?;
        let Some(decodes) = session.decodes() else {
            session.stop().await;
            return Err(CheckInError::device("device returned no decode stream"));
        };

        tracing::debug!(capture = %id, "Capture acquired");
        state.active = Some(ActiveCapture { id, session });
        Ok(decodes)
    }

    /// Stop and clear the held session if it belongs to capture `id` or older.
    ///
    /// Returns `true` if a session was stopped.
    pub async fn release_through(&self, id: CaptureId) -> bool {
        let mut state = self.state.lock().await;
        state.released_through = Some(state.released_through.map_or(id, |through| through.max(id)));

        let held = state.active.as_ref().map(|active| active.id);
        match held {
            Some(held) if held <= id => {
                if let Some(active) = state.active.as_mut() {
                    active.session.stop().await;
                }
                state.active = None;
                tracing::debug!(capture = %held, "Capture released");
                true
            },
            _ => false,
        }
    }

    /// Capture currently holding the device, if any.
    pub async fn current(&self) -> Option<CaptureId> {
        self.state.lock().await.active.as_ref().map(|active| active.id)
    }
}

impl std::fmt::Debug for CaptureSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSlot").finish_non_exhaustive()
    }
}

/// Line-oriented capture device for keyboard-wedge QR readers.
///
/// The reader types one line per decode, repeating while a code stays in front of
/// it. Lines are fed in with [`LineCaptureDevice::feed`]; lines that arrive while
/// no session is open are dropped, like frames of a closed camera.
#[derive(Clone)]
pub struct LineCaptureDevice {
    lines: broadcast::Sender<String>,
}

impl LineCaptureDevice {
    /// Create a device buffering up to `capacity` unread lines per session.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (lines, _) = broadcast::channel(capacity.max(1));
        Self { lines }
    }

    /// Deliver one line from the reader.
    pub fn feed(&self, line: &str) {
        let line = line.trim();
        if !line.is_empty() {
            let _ = self.lines.send(line.to_string());
        }
    }
}

impl CaptureDevice for LineCaptureDevice {
    fn open(&self) -> CaptureFuture<'_, Result<Box<dyn CaptureSession>, CheckInError>> {
        let receiver = self.lines.subscribe();
        let (stop, _) = watch::channel(false);
        Box::pin(async move {
            let session: Box<dyn CaptureSession> = Box::new(LineSession {
                receiver: Some(receiver),
                stop,
            });
            Ok(session)
        })
    }
}

struct LineSession {
    receiver: Option<broadcast::Receiver<String>>,
    stop: watch::Sender<bool>,
}

impl CaptureSession for LineSession {
    fn decodes(&mut self) -> Option<DecodeStream> {
        let receiver = self.receiver.take()?;
        Some(broadcast_decodes(receiver, self.stop.subscribe()))
    }

    fn stop(&mut self) -> CaptureFuture<'_, ()> {
        self.receiver = None;
        self.stop.send_replace(true);
        Box::pin(async {})
    }
}

/// Decode stream fed by a broadcast of decoded strings, ending once `stopped` flips.
pub(crate) fn broadcast_decodes(
    mut receiver: broadcast::Receiver<String>,
    mut stopped: watch::Receiver<bool>,
) -> DecodeStream {
    Box::pin(async_stream::stream! {
        loop {
            let next = tokio::select! {
                _ = stopped.changed() => None,
                line = receiver.recv() => Some(line),
            };
            match next {
                Some(Ok(line)) => {
                    yield line;
                },
                Some(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::debug!(skipped, "Decodes dropped");
                },
                None | Some(Err(broadcast::error::RecvError::Closed)) => break,
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::ScriptedCaptureDevice;
    use futures::StreamExt;

    #[tokio::test]
    async fn acquire_stops_previous_session_first() {
        let device = ScriptedCaptureDevice::shared();
        let slot = CaptureSlot::new(device.clone());

        let _first = slot.acquire(CaptureId::new(1)).await.unwrap();
        let _second = slot.acquire(CaptureId::new(2)).await.unwrap();

        assert_eq!(device.opened(), 2);
        assert_eq!(device.live(), 1);
        assert_eq!(slot.current().await, Some(CaptureId::new(2)));
    }

    #[tokio::test]
    async fn release_fences_older_captures() {
        let device = ScriptedCaptureDevice::shared();
        let slot = CaptureSlot::new(device.clone());

        let _decodes = slot.acquire(CaptureId::new(3)).await.unwrap();
        assert!(slot.release_through(CaptureId::new(3)).await);
        assert_eq!(device.live(), 0);

        let late = slot.acquire(CaptureId::new(2)).await;
        assert!(matches!(late, Err(CheckInError::Device { .. })));
        assert_eq!(device.opened(), 1);

        assert!(slot.acquire(CaptureId::new(4)).await.is_ok());
        assert!(!slot.release_through(CaptureId::new(3)).await);
        assert_eq!(device.live(), 1);
    }

    #[tokio::test]
    async fn open_failure_leaves_slot_empty() {
        let device = ScriptedCaptureDevice::shared();
        device.fail_next_open("permission denied");
        let slot = CaptureSlot::new(device.clone());

        let result = slot.acquire(CaptureId::new(1)).await;
        assert!(matches!(result, Err(CheckInError::Device { .. })));
        assert_eq!(slot.current().await, None);
        assert_eq!(device.live(), 0);
    }

    #[tokio::test]
    async fn line_device_delivers_only_while_open() {
        let device = LineCaptureDevice::new(16);
        device.feed("ignored while closed");

        let mut session = device.open().await.unwrap();
        let mut decodes = session.decodes().unwrap();
        assert!(session.decodes().is_none());

        device.feed("  TICKET-001 \n");
        device.feed("");
        device.feed("TICKET-001");

        assert_eq!(decodes.next().await.unwrap(), "TICKET-001");
        assert_eq!(decodes.next().await.unwrap(), "TICKET-001");

        session.stop().await;
        assert!(decodes.next().await.is_none());
    }
}
