//! Device session management.
//!
//! A [`SessionManager`] turns an operator token into a [`ValidationSession`] for
//! one event, keeps it in tab-scoped [`SessionStorage`], and clears it on logout.
//! The session survives a restart of the same scanner (same storage) but is never
//! shared with another one.

use crate::error::{CheckInError, LocalValidationError, StorageError};
use crate::gateway::CheckInGateway;
use crate::types::{OperatorToken, ValidationSession};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use turnstile_core::environment::Clock;

/// Boxed future returned by storage calls.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Key/value storage scoped to one scanner instance.
pub trait SessionStorage: Send + Sync {
    /// Load the stored session, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backing store cannot be read or decoded.
    fn load(&self) -> StorageFuture<'_, Option<ValidationSession>>;

    /// Replace the stored session.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backing store cannot be written.
    fn save<'a>(&'a self, session: &'a ValidationSession) -> StorageFuture<'a, ()>;

    /// Remove the stored session. Clearing empty storage succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backing store cannot be written.
    fn clear(&self) -> StorageFuture<'_, ()>;
}

/// Storage that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    slot: Mutex<Option<ValidationSession>>,
}

impl MemorySessionStorage {
    /// Creates empty storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Current contents, without going through the async interface
    #[must_use]
    pub fn peek(&self) -> Option<ValidationSession> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> StorageFuture<'_, Option<ValidationSession>> {
        let session = self.peek();
        Box::pin(async move { Ok(session) })
    }

    fn save<'a>(&'a self, session: &'a ValidationSession) -> StorageFuture<'a, ()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Box::pin(async { Ok(()) })
    }

    fn clear(&self) -> StorageFuture<'_, ()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Box::pin(async { Ok(()) })
    }
}

/// Storage backed by a JSON file.
///
/// Point one scanner at one file; two scanners sharing a file share a session.
#[derive(Debug, Clone)]
pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    /// Store the session at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionStorage for FileSessionStorage {
    fn load(&self) -> StorageFuture<'_, Option<ValidationSession>> {
        Box::pin(async move {
            match tokio::fs::read(&self.path).await {
                Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn save<'a>(&'a self, session: &'a ValidationSession) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let bytes = serde_json::to_vec(session)?;
            tokio::fs::write(&self.path, bytes).await?;
            Ok(())
        })
    }

    fn clear(&self) -> StorageFuture<'_, ()> {
        Box::pin(async move {
            match tokio::fs::remove_file(&self.path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            }
        })
    }
}

/// Epochs guarding the stored session.
#[derive(Debug, Default)]
struct EpochFence {
    /// Every epoch up to this one has been logged out.
    revoked_through: Option<u64>,
    /// Epoch of the session currently in storage, if persisted through the fence.
    stored: Option<u64>,
}

/// Exchanges operator tokens for validation sessions and owns their storage.
///
/// Sessions opened before a logout are *revoked*: persisting one after the
/// logout's clear is a no-op, so a slow token exchange cannot resurrect a
/// cleared session. A logout that runs late leaves a session stored by a
/// newer epoch alone.
pub struct SessionManager {
    gateway: Arc<dyn CheckInGateway>,
    storage: Arc<dyn SessionStorage>,
    clock: Arc<dyn Clock>,
    event_id: String,
    fence: tokio::sync::Mutex<EpochFence>,
}

impl SessionManager {
    /// Create a manager for devices bound to `event_id`.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn CheckInGateway>,
        storage: Arc<dyn SessionStorage>,
        clock: Arc<dyn Clock>,
        event_id: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            storage,
            clock,
            event_id: event_id.into(),
            fence: tokio::sync::Mutex::new(EpochFence::default()),
        }
    }

    /// Event this manager issues sessions for.
    #[must_use]
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Authenticate an operator and store the resulting session.
    ///
    /// # Errors
    ///
    /// - [`LocalValidationError::EmptyToken`] for a blank token, without any network call
    /// - [`CheckInError::Auth`] with the backend message if the token is refused
    pub async fn authenticate(
        &self,
        operator_token: &OperatorToken,
    ) -> Result<ValidationSession, CheckInError> {
        let session = self.open_session(operator_token).await?;
        if let Err(error) = self.storage.save(&session).await {
            tracing::warn!(error = %error, "Could not persist validation session");
        }
        Ok(session)
    }

    /// Exchange an operator token for a session without storing it.
    ///
    /// # Errors
    ///
    /// Same as [`SessionManager::authenticate`].
    pub async fn open_session(
        &self,
        operator_token: &OperatorToken,
    ) -> Result<ValidationSession, CheckInError> {
        if operator_token.is_blank() {
            return Err(LocalValidationError::EmptyToken.into());
        }

        let session_token = self.gateway.exchange_operator_token(operator_token).await?;
        tracing::info!(event_id = %self.event_id, "Operator authenticated");

        Ok(ValidationSession {
            session_token,
            event_id: self.event_id.clone(),
            issued_at: self.clock.now(),
        })
    }

    /// Store a session opened during `epoch`, unless that epoch has been logged out.
    ///
    /// Returns whether the session was stored.
    pub async fn persist(&self, session: &ValidationSession, epoch: u64) -> bool {
        let mut fence = self.fence.lock().await;
        if fence.revoked_through.is_some_and(|through| epoch <= through) {
            tracing::debug!(epoch, "Not persisting a session from a logged-out epoch");
            return false;
        }

        match self.storage.save(session).await {
            Ok(()) => {
                fence.stored = Some(fence.stored.map_or(epoch, |stored| stored.max(epoch)));
                true
            },
            Err(error) => {
                tracing::warn!(error = %error, "Could not persist validation session");
                false
            },
        }
    }

    /// Load a previously stored session for this event.
    ///
    /// Sessions for another event and unreadable storage are treated as absent.
    pub async fn restore(&self) -> Option<ValidationSession> {
        match self.storage.load().await {
            Ok(Some(session)) if session.event_id == self.event_id => {
                tracing::info!(event_id = %session.event_id, "Validation session restored");
                Some(session)
            },
            Ok(Some(session)) => {
                tracing::info!(
                    stored_event = %session.event_id,
                    event_id = %self.event_id,
                    "Ignoring session stored for another event"
                );
                None
            },
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(error = %error, "Could not read stored session");
                None
            },
        }
    }

    /// Revoke every session opened up to `epoch` and clear the stored one.
    ///
    /// Storage holding a session persisted by a later epoch is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the storage cannot be cleared.
    pub async fn logout(&self, epoch: u64) -> Result<(), StorageError> {
        let mut fence = self.fence.lock().await;
        let through = fence.revoked_through.map_or(epoch, |through| through.max(epoch));
        fence.revoked_through = Some(through);
        if fence.stored.is_some_and(|stored| stored > epoch) {
            tracing::debug!(epoch, stored = ?fence.stored, "Keeping session stored after this logout");
            return Ok(());
        }
        fence.stored = None;
        self.storage.clear().await
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("event_id", &self.event_id)
            .finish_non_exhaustive()
    }
}
