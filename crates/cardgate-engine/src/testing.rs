//! Deterministic collaborators for session and app tests.
//!
//! [`ScriptedVerifier`] answers from a key table and can hold individual keys
//! until a test releases them. [`FakeEngineBuilder`] builds engines whose
//! lifecycle is recorded in an [`EngineLedger`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use cardgate_analysis_contract::{CardAnalysisResult, TextLine};
use cardgate_core::{EngineConfig, ImageRef, LicenseKey};
use cardgate_license::{LicenseVerifier, VerificationOutcome};
use tokio::sync::Notify;

use crate::{AnalysisEngine, AnalysisError, ConstructError, EngineBuilder};

/// File name prefix that makes fake engines fail analysis.
pub const CORRUPT_IMAGE_PREFIX: &str = "corrupt";

/// Verifier answering from a fixed key table.
#[derive(Debug, Default)]
pub struct ScriptedVerifier {
    outcomes: Mutex<HashMap<String, VerificationOutcome>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    calls: AtomicUsize,
}

impl ScriptedVerifier {
    /// Creates a verifier accepting exactly `valid_keys`.
    pub fn new(valid_keys: &[&str]) -> Arc<Self> {
        let outcomes = valid_keys
            .iter()
            .map(|key| ((*key).to_string(), VerificationOutcome::Valid))
            .collect();
        Arc::new(Self {
            outcomes: Mutex::new(outcomes),
            ..Self::default()
        })
    }

    /// Overrides the outcome for `key`.
    pub fn set_outcome(&self, key: &str, outcome: VerificationOutcome) {
        lock(&self.outcomes).insert(key.to_string(), outcome);
    }

    /// Holds verification of `key` until the returned gate is notified.
    pub fn hold(&self, key: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        lock(&self.gates).insert(key.to_string(), gate.clone());
        gate
    }

    /// Number of verify calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LicenseVerifier for ScriptedVerifier {
    async fn verify(&self, key: &LicenseKey) -> VerificationOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.gates).get(key.as_str()).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        lock(&self.outcomes)
            .get(key.as_str())
            .cloned()
            .unwrap_or_else(|| VerificationOutcome::Invalid("unknown license key".to_string()))
    }
}

/// Records engine construction and release.
#[derive(Debug, Default)]
pub struct EngineLedger {
    next_id: AtomicU64,
    live: AtomicUsize,
    released: Mutex<Vec<u64>>,
}

impl EngineLedger {
    /// Creates an empty ledger.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of engines built so far.
    pub fn built(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Number of engines built and not yet released.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Ids of released engines in release order.
    pub fn released(&self) -> Vec<u64> {
        lock(&self.released).clone()
    }

    fn register(&self) -> u64 {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn release(&self, id: u64) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        lock(&self.released).push(id);
    }
}

/// Builder producing [`FakeEngine`] instances.
#[derive(Debug)]
pub struct FakeEngineBuilder {
    ledger: Arc<EngineLedger>,
    analysis_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeEngineBuilder {
    /// Creates a builder recording into `ledger`.
    pub fn new(ledger: Arc<EngineLedger>) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            analysis_gate: Mutex::new(None),
        })
    }

    /// Makes engines built from now on wait on the returned gate before each
    /// analysis completes. Each `notify_one` releases one analysis.
    pub fn hold_analyses(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.analysis_gate) = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl EngineBuilder for FakeEngineBuilder {
    async fn build(&self, config: &EngineConfig) -> Result<Box<dyn AnalysisEngine>, ConstructError> {
        Ok(Box::new(FakeEngine {
            id: self.ledger.register(),
            key: config.license_key.as_str().to_string(),
            ledger: self.ledger.clone(),
            gate: lock(&self.analysis_gate).clone(),
        }))
    }
}

/// Engine whose result echoes its own id and license key.
///
/// `lines[0]` holds the bound key and `lines[1]` holds `engine:<id>`.
#[derive(Debug)]
pub struct FakeEngine {
    id: u64,
    key: String,
    ledger: Arc<EngineLedger>,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl AnalysisEngine for FakeEngine {
    async fn analyze(&self, image: &ImageRef) -> Result<CardAnalysisResult, AnalysisError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if image.file_name().starts_with(CORRUPT_IMAGE_PREFIX) {
            return Err(AnalysisError::Engine("unreadable card".to_string()));
        }

        let mut result = CardAnalysisResult::empty(image.path().display().to_string());
        result.lines = vec![
            TextLine {
                text: self.key.clone(),
                confidence: 1.0,
            },
            TextLine {
                text: format!("engine:{}", self.id),
                confidence: 1.0,
            },
        ];
        Ok(result)
    }

    fn release(self: Box<Self>) {
        self.ledger.release(self.id);
    }
}

/// Reads the engine id echoed by a [`FakeEngine`] result.
pub fn engine_id_of(result: &CardAnalysisResult) -> Option<u64> {
    result
        .lines
        .get(1)
        .and_then(|line| line.text.strip_prefix("engine:"))
        .and_then(|id| id.parse().ok())
}

/// Reads the license key echoed by a [`FakeEngine`] result.
pub fn engine_key_of(result: &CardAnalysisResult) -> Option<&str> {
    result.lines.first().map(|line| line.text.as_str())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
