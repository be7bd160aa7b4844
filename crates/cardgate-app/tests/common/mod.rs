//! Shared fixtures for app integration tests.

use std::path::PathBuf;
use std::sync::Arc;

use cardgate_app::session_with;
use cardgate_core::EngineOptions;
use cardgate_engine::testing::{EngineLedger, FakeEngineBuilder, ScriptedVerifier};
use cardgate_session::SessionManager;

/// Session over scripted collaborators.
#[allow(dead_code)]
pub struct FakeSession {
    pub session: Arc<SessionManager>,
    pub verifier: Arc<ScriptedVerifier>,
    pub builder: Arc<FakeEngineBuilder>,
    pub ledger: Arc<EngineLedger>,
}

/// Creates a session whose verifier accepts exactly `valid_keys`.
#[allow(dead_code)]
pub fn fake_session(valid_keys: &[&str]) -> FakeSession {
    let ledger = EngineLedger::new();
    let verifier = ScriptedVerifier::new(valid_keys);
    let builder = FakeEngineBuilder::new(ledger.clone());
    let session = Arc::new(session_with(
        verifier.clone(),
        builder.clone(),
        EngineOptions::default(),
    ));
    FakeSession {
        session,
        verifier,
        builder,
        ledger,
    }
}

/// Writes `bytes` to a per-test temp file and returns its path.
#[allow(dead_code)]
pub fn temp_image(test_name: &str, file_name: &str, bytes: &[u8]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "cardgate-app-{test_name}-{}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    let path = dir.join(file_name);
    std::fs::write(&path, bytes).expect("fixture image should write");
    path
}

/// Minimal PNG signature followed by filler bytes.
#[allow(dead_code)]
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfixture";
