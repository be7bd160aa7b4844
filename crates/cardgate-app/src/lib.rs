#![warn(missing_docs)]
//! # cardgate-app
//!
//! ## Purpose
//! Wires configuration, license verification, the analysis session, and UI
//! state together for the cardgate desktop shell.
//!
//! ## Responsibilities
//! - Load [`AppConfig`] and install logging.
//! - Build a [`SessionManager`] over the REST verifier with an injected HTTP
//!   client.
//! - Impose the caller-side verification timeout.
//! - Run analyze-and-classify and project outcomes into [`UiState`].
//!
//! ## Data flow
//! Config -> verifier + engine factory -> session. Key entry ->
//! [`apply_key_with_timeout`] -> UI status. Image selection ->
//! [`analyze_and_classify`] -> classification JSON -> UI result.
//!
//! ## Ownership and lifetimes
//! The binary owns one `SessionManager` for the window's lifetime and calls
//! [`SessionManager::shutdown`] when the window closes.
//!
//! ## Error model
//! Subsystem failures are wrapped in [`AppError`]. Session outcomes that only
//! change status text stay [`SessionError`] values.
//!
//! ## Security and privacy notes
//! - Raw license keys are never logged; sessions log fingerprints.
//! - [`redact_sensitive`] strips key and credential values from free text.
//! - The verification endpoint must be HTTPS.

pub mod config;
pub mod logging;

use std::sync::Arc;
use std::time::Duration;

use cardgate_analysis_contract::{AnalysisContractError, DocumentClassification, classify};
use cardgate_core::{CoreError, EngineOptions, ImageRef};
use cardgate_engine::{EngineBuilder, ImageProbeBuilder, VerifyingEngineFactory};
use cardgate_license::{LicenseError, LicenseVerifier, ReqwestTransport, RestLicenseVerifier};
use cardgate_session::{ApplyOutcome, SessionError, SessionManager};
use cardgate_ui::UiState;
use thiserror::Error;
use tracing::{info, warn};

pub use config::AppConfig;

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("CARDGATE_VERSION");

/// Reason reported when the caller-side verification timeout expires.
pub const VERIFICATION_TIMEOUT_REASON: &str = "verification timed out";

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// Classification and its display JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    /// Projected classification.
    pub classification: DocumentClassification,
    /// Pretty JSON shown in the result pane.
    pub json: String,
}

/// Builds a session whose engines are verified against the configured REST
/// endpoint using `client`.
///
/// # Errors
/// Returns [`AppError::License`] when the endpoint violates endpoint policy.
pub fn build_session(config: &AppConfig, client: reqwest::Client) -> Result<SessionManager, AppError> {
    let transport = Arc::new(ReqwestTransport::new(client));
    let verifier = RestLicenseVerifier::new(&config.license_endpoint, config.retry, transport)?;
    info!(endpoint = %verifier.endpoint(), "license verifier configured");
    Ok(session_with(
        Arc::new(verifier),
        Arc::new(ImageProbeBuilder),
        config.engine_options(),
    ))
}

/// Builds a session from explicit collaborators.
pub fn session_with(
    verifier: Arc<dyn LicenseVerifier>,
    builder: Arc<dyn EngineBuilder>,
    options: EngineOptions,
) -> SessionManager {
    let factory = VerifyingEngineFactory::new(verifier, builder);
    SessionManager::new(Arc::new(factory), options)
}

/// Applies `key`, giving up after `timeout`.
///
/// Expiry drops the pending application, so the session keeps its previous
/// state, and is reported as [`SessionError::VerificationFailed`].
///
/// # Errors
/// Any [`SessionError`] from [`SessionManager::apply_key`], or
/// `VerificationFailed("verification timed out")` on expiry.
pub async fn apply_key_with_timeout(
    session: &SessionManager,
    key: &str,
    timeout: Duration,
) -> Result<ApplyOutcome, SessionError> {
    match tokio::time::timeout(timeout, session.apply_key(key)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            warn!(timeout_ms, "license verification timed out");
            Err(SessionError::VerificationFailed(
                VERIFICATION_TIMEOUT_REASON.to_string(),
            ))
        }
    }
}

/// Applies the configured startup key without touching UI status.
///
/// Failures are logged and returned; the session stays usable for a manual key.
pub async fn apply_default_key(
    session: &SessionManager,
    config: &AppConfig,
) -> Result<ApplyOutcome, SessionError> {
    let outcome =
        apply_key_with_timeout(session, &config.default_license_key, config.verify_timeout()).await;
    if let Err(error) = &outcome {
        warn!(%error, "startup license key not applied");
    }
    outcome
}

/// Analyzes `image` and projects the result into a classification.
///
/// # Errors
/// Returns [`AppError::Core`] when the image no longer exists,
/// [`AppError::Session`] when the session refuses or the engine fails, and
/// [`AppError::Analysis`] when JSON rendering fails.
pub async fn analyze_and_classify(
    session: &SessionManager,
    image: &ImageRef,
) -> Result<AnalysisReport, AppError> {
    image.ensure_readable()?;
    let result = session.analyze(image).await?;
    let classification = classify(&result);
    let json = classification.to_json()?;
    info!(
        document_type = classification
            .document_type
            .as_ref()
            .map_or("none", |kind| kind.as_str()),
        identified = classification.result,
        "analysis classified"
    );
    Ok(AnalysisReport {
        classification,
        json,
    })
}

/// Applies a user-entered key and updates `ui` status.
pub async fn apply_key_to_ui(
    session: &SessionManager,
    ui: &mut UiState,
    key: &str,
    timeout: Duration,
) -> Result<ApplyOutcome, SessionError> {
    ui.key_verification_started();
    let outcome = apply_key_with_timeout(session, key, timeout).await;
    match &outcome {
        Ok(ApplyOutcome::Applied(_)) => ui.key_applied(),
        Ok(ApplyOutcome::Superseded(_)) => ui.key_superseded(),
        Err(error) => ui.key_failed(error),
    }
    ui.sync_session(session.current_state());
    outcome
}

/// Analyzes the image selected in `ui` and updates status and result text.
pub async fn analyze_to_ui(session: &SessionManager, ui: &mut UiState) {
    let Some(image) = ui.selected_image.clone() else {
        ui.no_image();
        return;
    };
    if image.ensure_readable().is_err() {
        ui.no_image();
        return;
    }

    ui.analysis_started();
    match analyze_and_classify(session, &image).await {
        Ok(report) => ui.analysis_succeeded(&report.classification, report.json),
        Err(AppError::Session(error)) => ui.analysis_failed(&error),
        Err(AppError::Core(_)) => ui.no_image(),
        Err(error) => {
            warn!(%error, "analysis result could not be rendered");
            ui.analysis_failed(&SessionError::AnalysisFailed(error.to_string()));
        }
    }
    ui.sync_session(session.current_state());
}

/// Redacts license key and credential values in log-safe output.
pub fn redact_sensitive(input: &str) -> String {
    const MARKERS: [&str; 6] = [
        "license_key",
        "licensekey",
        "license-key",
        "authorization",
        "bearer",
        "token",
    ];

    let lower = input.to_ascii_lowercase();
    let mut redacted = String::with_capacity(input.len());
    let mut cursor = 0;

    while let Some((start, marker)) = MARKERS
        .iter()
        .filter_map(|marker| lower[cursor..].find(marker).map(|at| (cursor + at, *marker)))
        .min_by_key(|(at, _)| *at)
    {
        let mut value_start = skip_separators(&lower, start + marker.len());
        if marker == "authorization" && lower[value_start..].starts_with("bearer ") {
            value_start = skip_separators(&lower, value_start + "bearer".len());
        }
        let value_end = lower[value_start..]
            .find(|ch: char| ch.is_whitespace() || matches!(ch, ',' | ';' | '&' | '"' | '}'))
            .map_or(lower.len(), |offset| value_start + offset);

        redacted.push_str(&input[cursor..value_start]);
        redacted.push_str("<redacted>");
        cursor = value_end;
    }

    redacted.push_str(&input[cursor..]);
    redacted
}

fn skip_separators(text: &str, from: usize) -> usize {
    text[from..]
        .find(|ch: char| !matches!(ch, '=' | ':' | ' ' | '"'))
        .map_or(text.len(), |offset| from + offset)
}

/// App integration error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),
    /// Logging could not be installed.
    #[error("logging error: {0}")]
    Logging(String),
    /// HTTP client could not be built.
    #[error("http client error: {0}")]
    Http(String),
    /// Core model error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    /// License endpoint or transport error.
    #[error("license error: {0}")]
    License(#[from] LicenseError),
    /// Session operation error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    /// Analysis contract error.
    #[error("analysis error: {0}")]
    Analysis(#[from] AnalysisContractError),
}
