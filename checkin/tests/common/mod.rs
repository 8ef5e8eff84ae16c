//! Helpers shared by the check-in integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use checkin::mocks::{InMemoryArrivalChannel, MockBackend, ScriptedCaptureDevice};
use checkin::{
    MemorySessionStorage, OperatorToken, RosterAction, RosterEnvironment, RosterReducer,
    RosterState, ScannerAction, ScannerEnvironment, ScannerReducer, ScannerState,
};
use std::sync::Arc;
use std::time::Duration;
use turnstile_runtime::retry::RetryPolicy;
use turnstile_runtime::Store;
use turnstile_testing::test_clock;

pub const EVENT: &str = "evt-1";

pub type ScannerStore = Store<ScannerState, ScannerAction, ScannerEnvironment, ScannerReducer>;
pub type RosterStore = Store<RosterState, RosterAction, RosterEnvironment, RosterReducer>;

/// One scanner with its own storage and camera.
pub struct Door {
    pub store: ScannerStore,
    pub device: Arc<ScriptedCaptureDevice>,
    pub storage: Arc<MemorySessionStorage>,
}

impl Door {
    pub fn new(backend: &Arc<MockBackend>) -> Self {
        Self::with_storage(backend, MemorySessionStorage::shared())
    }

    pub fn with_storage(backend: &Arc<MockBackend>, storage: Arc<MemorySessionStorage>) -> Self {
        let device = ScriptedCaptureDevice::shared();
        let env = ScannerEnvironment::new(
            backend.clone(),
            storage.clone(),
            device.clone(),
            Arc::new(test_clock()),
            EVENT,
        );
        Self {
            store: Store::new(ScannerState::new(), ScannerReducer::new(), env),
            device,
            storage,
        }
    }

    pub async fn phase(&self) -> &'static str {
        self.store.state(|s| s.phase.name()).await
    }

    pub async fn message(&self) -> Option<String> {
        self.store.state(|s| s.message.clone()).await
    }

    pub async fn wait_for_phase(&self, phase: &str) {
        let store = &self.store;
        wait_until(&format!("phase {phase}"), || async move {
            store.state(|s| s.phase.name()).await == phase
        })
        .await;
    }

    /// Authenticate and wait until the camera is decoding.
    pub async fn login(&self, operator_token: &str) {
        self.store
            .send(ScannerAction::Authenticate {
                operator_token: OperatorToken::new(operator_token),
            })
            .await
            .unwrap();
        self.wait_for_phase("capturing").await;
        let storage = &self.storage;
        wait_until("stored session", || async move { storage.peek().is_some() }).await;
    }

    /// Hold `code` in front of the camera for a few frames and wait for the verdict.
    pub async fn scan(&self, code: &str) -> String {
        for _ in 0..5 {
            self.device.present(code);
        }
        self.wait_for_phase("settled").await;
        self.message().await.unwrap()
    }

    /// Confirm the result and wait until the camera is decoding again.
    pub async fn scan_again(&self) {
        self.store.send(ScannerAction::ScanAgain).await.unwrap();
        self.wait_for_phase("capturing").await;
    }

    pub async fn logout(&self) {
        self.store
            .send_and_wait_for(
                ScannerAction::Logout,
                |a| matches!(a, ScannerAction::LoggedOut),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
    }
}

/// Roster over `channel` with a short reconnect backoff.
pub fn roster(channel: &Arc<InMemoryArrivalChannel>) -> RosterStore {
    let retry = RetryPolicy::builder()
        .initial_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(50))
        .build();
    Store::new(
        RosterState::new(EVENT),
        RosterReducer::new(),
        RosterEnvironment::new(channel.clone(), retry),
    )
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}
