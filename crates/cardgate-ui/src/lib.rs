#![warn(missing_docs)]
//! # cardgate-ui
//!
//! ## Purpose
//! Defines the UI-facing state model for the card analysis window.
//!
//! ## Responsibilities
//! - Mirror the published session state and the selected image.
//! - Project session events into status-line text.
//! - Expose the analyze-button gate.
//!
//! ## Data flow
//! App orchestration events and session snapshots mutate [`UiState`], which
//! drives rendered status in the desktop shell.
//!
//! ## Ownership and lifetimes
//! `UiState` owns all string/status values so reducers never borrow from the
//! session.
//!
//! ## Error model
//! This crate favors explicit state over recoverable errors. Session errors are
//! projected into status text.
//!
//! ## Security and privacy notes
//! UI state never holds the raw license key; session states carry only the
//! fingerprinted [`cardgate_core::LicenseKey`].

use cardgate_analysis_contract::DocumentClassification;
use cardgate_core::ImageRef;
use cardgate_session::{SessionError, SessionState};

/// Initial status line.
pub const STATUS_LOAD_IMAGE: &str = "Load an image to analyze.";

/// Aggregate UI runtime state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiState {
    /// App version string sourced from root `VERSION`.
    pub version: String,
    /// Last session state snapshot.
    pub session: SessionState,
    /// Image chosen by the user.
    pub selected_image: Option<ImageRef>,
    /// Status line text.
    pub status_text: String,
    /// Classification JSON of the last successful analysis.
    pub result_json: Option<String>,
}

impl UiState {
    /// Creates default UI state.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            session: SessionState::Uninitialized,
            selected_image: None,
            status_text: STATUS_LOAD_IMAGE.to_string(),
            result_json: None,
        }
    }

    /// Returns `true` when the analyze button should be enabled.
    pub fn can_analyze(&self) -> bool {
        self.selected_image.is_some() && self.session.is_ready()
    }

    /// Stores a new session snapshot.
    pub fn sync_session(&mut self, state: SessionState) {
        self.session = state;
    }

    /// Records a loaded image and clears the previous result.
    pub fn image_loaded(&mut self, image: ImageRef) {
        self.status_text = format!("Image loaded: {}", image.file_name());
        self.selected_image = Some(image);
        self.result_json = None;
    }

    /// Records a failed image load.
    pub fn image_load_failed(&mut self) {
        self.selected_image = None;
        self.status_text = "Failed to load the image.".to_string();
    }

    /// Records the start of license verification.
    pub fn key_verification_started(&mut self) {
        self.status_text = "Verifying license...".to_string();
    }

    /// Records a successfully applied key.
    pub fn key_applied(&mut self) {
        self.result_json = None;
        self.status_text = "License verified. Analysis is available.".to_string();
    }

    /// Records a key that verified after a newer key was already applied.
    pub fn key_superseded(&mut self) {
        self.status_text = "A newer license key is already active.".to_string();
    }

    /// Records a failed key application.
    pub fn key_failed(&mut self, error: &SessionError) {
        self.status_text = error.user_message();
    }

    /// Records the start of an analysis.
    pub fn analysis_started(&mut self) {
        self.result_json = None;
        self.status_text = "Analyzing...".to_string();
    }

    /// Records a finished analysis and its JSON rendering.
    pub fn analysis_succeeded(&mut self, classification: &DocumentClassification, json: String) {
        self.status_text = classification.summary();
        self.result_json = Some(json);
    }

    /// Records a refused or failed analysis.
    pub fn analysis_failed(&mut self, error: &SessionError) {
        self.status_text = error.user_message();
    }

    /// Records a missing image at analyze time.
    pub fn no_image(&mut self) {
        self.status_text = "No image to analyze.".to_string();
    }

    /// Returns the JSON to copy out, updating the status line.
    pub fn copy_result(&mut self) -> Option<String> {
        match self.result_json.as_deref().map(str::trim) {
            Some(json) if !json.is_empty() => {
                self.status_text = "Copied JSON to the clipboard.".to_string();
                self.result_json.clone()
            }
            _ => {
                self.status_text = "No JSON to copy.".to_string();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for UI state gates.

    use cardgate_analysis_contract::{CardAnalysisResult, DocumentType, classify};
    use cardgate_core::LicenseKey;
    use cardgate_session::NotReadyReason;

    use super::*;

    fn ready() -> SessionState {
        SessionState::Ready(LicenseKey::parse("GOOD").expect("key should parse"))
    }

    #[test]
    fn analyze_gate_requires_image_and_ready_session() {
        let mut state = UiState::new("v0.1.0");
        assert!(!state.can_analyze());
        assert_eq!(state.status_text, STATUS_LOAD_IMAGE);

        state.image_loaded(ImageRef::new("card.png").expect("path should validate"));
        assert!(!state.can_analyze());
        assert_eq!(state.status_text, "Image loaded: card.png");

        state.sync_session(ready());
        assert!(state.can_analyze());

        state.sync_session(SessionState::Disposed);
        assert!(!state.can_analyze());
    }

    #[test]
    fn analysis_success_stores_json_and_summary() {
        let mut state = UiState::new("v0.1.0");
        state.analysis_started();
        assert_eq!(state.status_text, "Analyzing...");

        let mut result = CardAnalysisResult::empty("card.png");
        result.detected_type = Some(DocumentType::Passport);
        let classification = classify(&result);
        state.analysis_succeeded(&classification, "{}".to_string());

        assert_eq!(
            state.status_text,
            "Analysis complete - document type: passport"
        );
        assert_eq!(state.copy_result().as_deref(), Some("{}"));
    }

    #[test]
    fn failures_project_user_messages() {
        let mut state = UiState::new("v0.1.0");
        state.key_failed(&SessionError::VerificationFailed("expired".to_string()));
        assert_eq!(state.status_text, "License verification failed: expired");

        state.analysis_failed(&SessionError::NotReady(NotReadyReason::NoKeyApplied));
        assert_eq!(state.status_text, "Apply a license key first.");

        assert_eq!(state.copy_result(), None);
        assert_eq!(state.status_text, "No JSON to copy.");
    }

    #[test]
    fn superseded_key_keeps_result_and_reports_newer_key() {
        let mut state = UiState::new("v0.1.0");
        state.result_json = Some("{}".to_string());
        state.key_verification_started();
        state.key_superseded();
        assert_eq!(state.status_text, "A newer license key is already active.");
        assert_eq!(state.result_json.as_deref(), Some("{}"));
    }
}
