#![warn(missing_docs)]
//! # cardgate-session
//!
//! ## Purpose
//! Owns the license-verified analysis engine for one window session and keeps
//! the engine, the applied key, and the published [`SessionState`] consistent
//! under overlapping asynchronous calls.
//!
//! ## Responsibilities
//! - Apply license keys by constructing a candidate engine before replacing the
//!   current one (construct-then-swap).
//! - Order overlapping key applications by sequence number so an older
//!   completion never overwrites a newer committed key.
//! - Admit at most one analysis per engine instance and pin that engine for the
//!   duration of the call.
//! - Shut down idempotently, deferring physical engine release to the last
//!   in-flight user.
//!
//! ## Data flow
//! UI -> [`SessionManager::apply_key`] -> [`EngineFactory::construct`] (license
//! verification) -> [`EngineHandle`] installed. UI ->
//! [`SessionManager::analyze`] -> pinned [`EngineHandle::analyze`] -> result.
//! Every mutation publishes a fresh [`SessionState`] snapshot.
//!
//! ## Ownership and lifetimes
//! The manager holds one `Arc<EngineHandle>` in its current slot; each
//! in-flight analysis holds another. The engine is released when the last
//! `Arc` drops, never while a caller is still using it.
//!
//! ## Error model
//! Every failure is a [`SessionError`]. The only terminal state is
//! [`SessionState::Disposed`], reached solely through
//! [`SessionManager::shutdown`].
//!
//! ## Concurrency notes
//! One mutex guards the slot and bookkeeping. It is held only for swaps and is
//! never held across verification or analysis. Displaced engines are dropped
//! after the guard is released. Readers use the published snapshot and never
//! touch the mutex.
//!
//! ## Example
//! ```rust,ignore
//! let session = SessionManager::new(factory, EngineOptions::default());
//! session.apply_key("LICENSE-KEY").await?;
//! let result = session.analyze(&ImageRef::new("card.png")?).await?;
//! session.shutdown();
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cardgate_analysis_contract::CardAnalysisResult;
use cardgate_core::{EngineOptions, ImageRef, LicenseKey};
use cardgate_engine::{AnalysisEngine, AnalysisError, ConstructError, EngineFactory};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Why a key application left the session without a usable engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    /// The license service rejected the key.
    Invalid(String),
    /// The license service could not be reached.
    Unreachable(String),
    /// The engine failed to initialize after verification.
    EngineInit(String),
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(reason) => write!(f, "{reason}"),
            Self::Unreachable(detail) => write!(f, "license service unreachable: {detail}"),
            Self::EngineInit(detail) => write!(f, "engine initialization failed: {detail}"),
        }
    }
}

impl From<ConstructError> for RejectionReason {
    fn from(error: ConstructError) -> Self {
        match error {
            ConstructError::Rejected(reason) => Self::Invalid(reason),
            ConstructError::Transport(detail) => Self::Unreachable(detail),
            ConstructError::Build(detail) => Self::EngineInit(detail),
        }
    }
}

/// Published session state. Exactly one variant holds at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No key has been applied successfully and none is being verified.
    Uninitialized,
    /// A key is being verified.
    KeyPending(LicenseKey),
    /// An engine bound to this key is idle and usable.
    Ready(LicenseKey),
    /// The last key failed and no earlier engine exists.
    KeyRejected(LicenseKey, RejectionReason),
    /// The engine bound to this key is analyzing.
    AnalysisInFlight(LicenseKey),
    /// The session was shut down.
    Disposed,
}

impl SessionState {
    /// Returns the key carried by the state, if any.
    pub fn key(&self) -> Option<&LicenseKey> {
        match self {
            Self::KeyPending(key)
            | Self::Ready(key)
            | Self::KeyRejected(key, _)
            | Self::AnalysisInFlight(key) => Some(key),
            Self::Uninitialized | Self::Disposed => None,
        }
    }

    /// Returns `true` when `analyze` would be accepted.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Returns a short state name for logs and status projection.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::KeyPending(_) => "key_pending",
            Self::Ready(_) => "ready",
            Self::KeyRejected(..) => "key_rejected",
            Self::AnalysisInFlight(_) => "analysis_in_flight",
            Self::Disposed => "disposed",
        }
    }
}

/// Result of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The key is now the applied key.
    Applied(LicenseKey),
    /// The key verified, but a newer key had already been applied. The
    /// candidate engine was released and the session is unchanged.
    Superseded(LicenseKey),
}

/// Live engine plus the key it was built with.
///
/// Dropping the last `Arc<EngineHandle>` releases the engine.
pub struct EngineHandle {
    id: u64,
    key: LicenseKey,
    engine: Option<Box<dyn AnalysisEngine>>,
}

impl EngineHandle {
    fn new(id: u64, key: LicenseKey, engine: Box<dyn AnalysisEngine>) -> Self {
        Self {
            id,
            key,
            engine: Some(engine),
        }
    }

    /// Session-unique engine id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Key this engine was built with.
    pub fn key(&self) -> &LicenseKey {
        &self.key
    }

    /// Runs the engine's analysis.
    pub async fn analyze(&self, image: &ImageRef) -> Result<CardAnalysisResult, AnalysisError> {
        // Only `Drop` takes the engine, so a reachable handle always holds one.
        match &self.engine {
            Some(engine) => engine.analyze(image).await,
            None => Err(AnalysisError::Engine("engine already released".to_string())),
        }
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            engine.release();
            debug!(engine_id = self.id, key = %self.key, "analysis engine released");
        }
    }
}

/// Why `analyze` was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReadyReason {
    /// No key has been applied.
    NoKeyApplied,
    /// The last key was rejected and no earlier engine exists.
    KeyRejected,
    /// The engine is already analyzing.
    AlreadyAnalyzing,
    /// A key is being verified.
    VerificationPending,
}

impl fmt::Display for NotReadyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoKeyApplied => "no license key applied",
            Self::KeyRejected => "license key rejected",
            Self::AlreadyAnalyzing => "analysis already in progress",
            Self::VerificationPending => "license verification in progress",
        };
        f.write_str(text)
    }
}

/// Session operation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Key input was empty or whitespace.
    #[error("license key is empty")]
    EmptyKey,
    /// The license service rejected the key.
    #[error("license verification failed: {0}")]
    VerificationFailed(String),
    /// The license service could not be reached.
    #[error("license service unreachable: {0}")]
    TransportError(String),
    /// The engine failed to initialize after the key verified.
    #[error("engine initialization failed: {0}")]
    EngineInitFailed(String),
    /// The operation's precondition does not hold.
    #[error("session not ready: {0}")]
    NotReady(NotReadyReason),
    /// The engine failed to analyze the image.
    #[error("analysis failed: {0}")]
    AnalysisFailed(String),
    /// The session was shut down.
    #[error("session is closed")]
    SessionClosed,
}

impl SessionError {
    /// Returns a message suitable for the status line.
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyKey => "Enter a license key.".to_string(),
            Self::VerificationFailed(reason) => format!("License verification failed: {reason}"),
            Self::TransportError(_) => {
                "License verification failed: the license service is unreachable.".to_string()
            }
            Self::EngineInitFailed(_) => {
                "License verified, but the analysis engine could not start.".to_string()
            }
            Self::NotReady(NotReadyReason::NoKeyApplied) => {
                "Apply a license key first.".to_string()
            }
            Self::NotReady(NotReadyReason::KeyRejected) => {
                "The license key was rejected. Apply a valid key.".to_string()
            }
            Self::NotReady(NotReadyReason::AlreadyAnalyzing) => {
                "An analysis is already running.".to_string()
            }
            Self::NotReady(NotReadyReason::VerificationPending) => {
                "Verifying license...".to_string()
            }
            Self::AnalysisFailed(_) => "Analysis failed.".to_string(),
            Self::SessionClosed => "The session is closed.".to_string(),
        }
    }
}

impl From<ConstructError> for SessionError {
    fn from(error: ConstructError) -> Self {
        match error {
            ConstructError::Rejected(reason) => Self::VerificationFailed(reason),
            ConstructError::Transport(detail) => Self::TransportError(detail),
            ConstructError::Build(detail) => Self::EngineInitFailed(detail),
        }
    }
}

#[derive(Debug)]
struct Rejection {
    seq: u64,
    key: LicenseKey,
    reason: RejectionReason,
}

#[derive(Debug, Default)]
struct Inner {
    current: Option<Arc<EngineHandle>>,
    pending: BTreeMap<u64, LicenseKey>,
    rejection: Option<Rejection>,
    in_flight: Option<u64>,
    issued_seq: u64,
    committed_seq: u64,
    disposed: bool,
}

impl Inner {
    fn derive_state(&self) -> SessionState {
        if self.disposed {
            return SessionState::Disposed;
        }
        if let Some(handle) = &self.current
            && self.in_flight == Some(handle.id())
        {
            return SessionState::AnalysisInFlight(handle.key().clone());
        }
        if let Some((_, key)) = self.pending.last_key_value() {
            return SessionState::KeyPending(key.clone());
        }
        if let Some(handle) = &self.current {
            return SessionState::Ready(handle.key().clone());
        }
        if let Some(rejection) = &self.rejection {
            return SessionState::KeyRejected(rejection.key.clone(), rejection.reason.clone());
        }
        SessionState::Uninitialized
    }
}

/// License-gated engine lifecycle manager for one session.
pub struct SessionManager {
    factory: Arc<dyn EngineFactory>,
    options: EngineOptions,
    inner: Mutex<Inner>,
    snapshot: watch::Sender<SessionState>,
    next_engine_id: AtomicU64,
}

impl SessionManager {
    /// Creates an `Uninitialized` session.
    pub fn new(factory: Arc<dyn EngineFactory>, options: EngineOptions) -> Self {
        let (snapshot, _) = watch::channel(SessionState::Uninitialized);
        Self {
            factory,
            options,
            inner: Mutex::new(Inner::default()),
            snapshot,
            next_engine_id: AtomicU64::new(1),
        }
    }

    /// Returns the latest published state without taking the session lock.
    pub fn current_state(&self) -> SessionState {
        self.snapshot.borrow().clone()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.snapshot.subscribe()
    }

    /// Returns `true` when the published state is `Ready`.
    pub fn is_ready(&self) -> bool {
        self.snapshot.borrow().is_ready()
    }

    /// Returns the key bound to the engine in the current slot.
    pub fn applied_key(&self) -> Option<LicenseKey> {
        self.lock()
            .current
            .as_ref()
            .map(|handle| handle.key().clone())
    }

    /// Returns the id of the engine in the current slot.
    pub fn engine_id(&self) -> Option<u64> {
        self.lock().current.as_ref().map(|handle| handle.id())
    }

    /// Verifies `raw_key` by constructing an engine and installs it on success.
    ///
    /// The previous engine stays installed until the new one is live. A failed
    /// verification leaves it untouched.
    ///
    /// # Errors
    /// - [`SessionError::SessionClosed`] after shutdown.
    /// - [`SessionError::EmptyKey`] for blank input; the verifier is not called.
    /// - [`SessionError::VerificationFailed`], [`SessionError::TransportError`],
    ///   [`SessionError::EngineInitFailed`] when construction fails.
    pub async fn apply_key(&self, raw_key: &str) -> Result<ApplyOutcome, SessionError> {
        let (key, seq) = {
            let mut inner = self.lock();
            if inner.disposed {
                return Err(SessionError::SessionClosed);
            }
            let key = LicenseKey::parse(raw_key).map_err(|_| SessionError::EmptyKey)?;
            inner.issued_seq += 1;
            let seq = inner.issued_seq;
            inner.pending.insert(seq, key.clone());
            self.publish(&inner);
            (key, seq)
        };
        let _pending = PendingGuard { session: self, seq };
        debug!(%key, seq, "applying license key");

        match self.factory.construct(self.options.with_key(key.clone())).await {
            Ok(engine) => {
                let id = self.next_engine_id.fetch_add(1, Ordering::Relaxed);
                let handle = Arc::new(EngineHandle::new(id, key.clone(), engine));
                self.commit(seq, handle)
            }
            Err(error) => Err(self.reject(seq, key, error)),
        }
    }

    fn commit(&self, seq: u64, handle: Arc<EngineHandle>) -> Result<ApplyOutcome, SessionError> {
        let key = handle.key().clone();
        let engine_id = handle.id();
        let displaced = {
            let mut inner = self.lock();
            inner.pending.remove(&seq);
            if inner.disposed {
                drop(inner);
                drop(handle);
                info!(%key, seq, "verification finished after shutdown; candidate released");
                return Err(SessionError::SessionClosed);
            }
            if inner.committed_seq > seq {
                self.publish(&inner);
                drop(inner);
                drop(handle);
                info!(%key, seq, "verification superseded by a newer key; candidate released");
                return Ok(ApplyOutcome::Superseded(key));
            }

            inner.committed_seq = seq;
            inner.pending.retain(|pending_seq, _| *pending_seq > seq);
            inner.rejection = None;
            let displaced = inner.current.replace(handle);
            if inner.in_flight != Some(engine_id) {
                inner.in_flight = None;
            }
            self.publish(&inner);
            displaced
        };

        if let Some(old) = displaced {
            debug!(
                engine_id = old.id(),
                in_use = Arc::strong_count(&old) > 1,
                "previous engine left the current slot"
            );
        }
        info!(%key, seq, engine_id, "license key applied");
        Ok(ApplyOutcome::Applied(key))
    }

    fn reject(&self, seq: u64, key: LicenseKey, error: ConstructError) -> SessionError {
        let session_error = SessionError::from(error.clone());
        let mut inner = self.lock();
        inner.pending.remove(&seq);
        if inner.disposed {
            return SessionError::SessionClosed;
        }

        let newer_than_recorded = inner
            .rejection
            .as_ref()
            .is_none_or(|rejection| rejection.seq < seq);
        if seq > inner.committed_seq && newer_than_recorded {
            inner.rejection = Some(Rejection {
                seq,
                key: key.clone(),
                reason: RejectionReason::from(error),
            });
        }
        self.publish(&inner);
        let kept_previous = inner.current.is_some();
        drop(inner);

        warn!(%key, seq, kept_previous, error = %session_error, "license key not applied");
        session_error
    }

    /// Analyzes `image` with the current engine.
    ///
    /// The engine is pinned for the whole call; a concurrent key change does
    /// not affect it.
    ///
    /// # Errors
    /// - [`SessionError::SessionClosed`] after shutdown.
    /// - [`SessionError::NotReady`] unless the state is `Ready`.
    /// - [`SessionError::AnalysisFailed`] when the engine fails; the engine
    ///   stays installed.
    pub async fn analyze(&self, image: &ImageRef) -> Result<CardAnalysisResult, SessionError> {
        let engine = {
            let mut inner = self.lock();
            let engine = match (inner.derive_state(), inner.current.clone()) {
                (SessionState::Ready(_), Some(engine)) => engine,
                (SessionState::Disposed, _) => return Err(SessionError::SessionClosed),
                (SessionState::AnalysisInFlight(_), _) => {
                    return Err(SessionError::NotReady(NotReadyReason::AlreadyAnalyzing));
                }
                (SessionState::KeyPending(_), _) => {
                    return Err(SessionError::NotReady(NotReadyReason::VerificationPending));
                }
                (SessionState::KeyRejected(..), _) => {
                    return Err(SessionError::NotReady(NotReadyReason::KeyRejected));
                }
                _ => return Err(SessionError::NotReady(NotReadyReason::NoKeyApplied)),
            };
            inner.in_flight = Some(engine.id());
            self.publish(&inner);
            engine
        };
        let _in_flight = InFlightGuard {
            session: self,
            engine_id: engine.id(),
        };
        debug!(engine_id = engine.id(), image = %image.file_name(), "analysis started");

        engine.analyze(image).await.map_err(|error| {
            warn!(engine_id = engine.id(), %error, "analysis failed");
            SessionError::AnalysisFailed(error.to_string())
        })
    }

    /// Shuts the session down. Idempotent.
    ///
    /// The current slot is emptied immediately; an engine still pinned by an
    /// in-flight analysis is released when that analysis returns.
    pub fn shutdown(&self) {
        let displaced = {
            let mut inner = self.lock();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner.pending.clear();
            inner.rejection = None;
            inner.in_flight = None;
            self.publish(&inner);
            inner.current.take()
        };
        let deferred = displaced
            .as_ref()
            .is_some_and(|handle| Arc::strong_count(handle) > 1);
        drop(displaced);
        info!(deferred_release = deferred, "session shut down");
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        let next = inner.derive_state();
        self.snapshot.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                debug!(from = state.name(), to = next.name(), "session state changed");
                *state = next;
                true
            }
        });
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.current_state())
            .finish_non_exhaustive()
    }
}

/// Removes a pending key application if its future is dropped early.
struct PendingGuard<'a> {
    session: &'a SessionManager,
    seq: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.session.lock();
        if inner.pending.remove(&self.seq).is_some() {
            self.session.publish(&inner);
        }
    }
}

/// Clears the in-flight marker when an analysis returns or is dropped.
struct InFlightGuard<'a> {
    session: &'a SessionManager,
    engine_id: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.session.lock();
        if inner.in_flight == Some(self.engine_id) {
            inner.in_flight = None;
            self.session.publish(&inner);
        }
    }
}
