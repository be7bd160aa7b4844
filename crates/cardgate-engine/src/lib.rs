#![warn(missing_docs)]
//! # cardgate-engine
//!
//! ## Purpose
//! Defines the analysis engine contract and the factory that makes engine
//! construction the license verification boundary.
//!
//! ## Responsibilities
//! - Define [`AnalysisEngine`], [`EngineBuilder`], and [`EngineFactory`].
//! - Verify the license before building an engine ([`VerifyingEngineFactory`]).
//! - Provide [`ImageProbeBuilder`], a metadata-only engine for the desktop
//!   binary when no OCR backend is linked.
//!
//! ## Data flow
//! Session -> [`EngineFactory::construct`] -> [`LicenseVerifier::verify`] ->
//! [`EngineBuilder::build`] -> boxed engine owned by the session.
//!
//! ## Ownership and lifetimes
//! Engines are returned boxed and are released by consuming the box
//! ([`AnalysisEngine::release`]), so one instance cannot be released twice.
//!
//! ## Error model
//! Construction failures are [`ConstructError`] values that keep a rejected
//! key apart from an unreachable license service. Analysis failures are
//! [`AnalysisError`] values.
//!
//! ## Security and privacy notes
//! Only key fingerprints are logged.

use std::sync::Arc;

use async_trait::async_trait;
use cardgate_analysis_contract::CardAnalysisResult;
use cardgate_core::{CoreError, EngineConfig, ImageRef};
use cardgate_license::{LicenseVerifier, VerificationOutcome};
use thiserror::Error;
use tracing::{debug, info};

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

/// A live analysis engine.
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    /// Analyzes one image.
    async fn analyze(&self, image: &ImageRef) -> Result<CardAnalysisResult, AnalysisError>;

    /// Releases engine resources. Consumes the engine.
    fn release(self: Box<Self>);
}

/// Builds an engine once the license has been verified.
#[async_trait]
pub trait EngineBuilder: Send + Sync {
    /// Builds one engine from `config`.
    async fn build(&self, config: &EngineConfig) -> Result<Box<dyn AnalysisEngine>, ConstructError>;
}

/// Constructs engines. Construction performs license verification.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Constructs one engine bound to `config.license_key`.
    async fn construct(&self, config: EngineConfig)
    -> Result<Box<dyn AnalysisEngine>, ConstructError>;
}

/// Factory that verifies the key through a [`LicenseVerifier`] and then builds.
#[derive(Clone)]
pub struct VerifyingEngineFactory {
    verifier: Arc<dyn LicenseVerifier>,
    builder: Arc<dyn EngineBuilder>,
}

impl VerifyingEngineFactory {
    /// Creates a factory from its collaborators.
    pub fn new(verifier: Arc<dyn LicenseVerifier>, builder: Arc<dyn EngineBuilder>) -> Self {
        Self { verifier, builder }
    }
}

#[async_trait]
impl EngineFactory for VerifyingEngineFactory {
    async fn construct(
        &self,
        config: EngineConfig,
    ) -> Result<Box<dyn AnalysisEngine>, ConstructError> {
        let key = &config.license_key;
        debug!(%key, "verifying license before engine construction");
        match self.verifier.verify(key).await {
            VerificationOutcome::Valid => {}
            VerificationOutcome::Invalid(reason) => return Err(ConstructError::Rejected(reason)),
            VerificationOutcome::TransportError(detail) => {
                return Err(ConstructError::Transport(detail));
            }
        }

        let engine = self.builder.build(&config).await?;
        info!(%key, "analysis engine constructed");
        Ok(engine)
    }
}

/// Builder for [`ImageProbeEngine`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageProbeBuilder;

#[async_trait]
impl EngineBuilder for ImageProbeBuilder {
    async fn build(&self, config: &EngineConfig) -> Result<Box<dyn AnalysisEngine>, ConstructError> {
        debug!(
            tessdata = %config.tessdata_path.display(),
            auto_rotate_180 = config.enable_auto_rotate_180,
            "building image probe engine"
        );
        Ok(Box::new(ImageProbeEngine))
    }
}

/// Metadata-only engine: validates the image container and reports no text.
#[derive(Debug)]
pub struct ImageProbeEngine;

#[async_trait]
impl AnalysisEngine for ImageProbeEngine {
    async fn analyze(&self, image: &ImageRef) -> Result<CardAnalysisResult, AnalysisError> {
        image.ensure_readable()?;
        let bytes = tokio::fs::read(image.path())
            .await
            .map_err(|error| AnalysisError::Io(error.to_string()))?;

        let format = sniff_image_format(&bytes).ok_or_else(|| {
            AnalysisError::UnsupportedContent(format!(
                "{} is not a PNG, JPEG or BMP file",
                image.file_name()
            ))
        })?;
        debug!(format, size = bytes.len(), "probed image");

        Ok(CardAnalysisResult::empty(image.path().display().to_string()))
    }

    fn release(self: Box<Self>) {
        debug!("image probe engine released");
    }
}

/// Detects the image container from magic bytes.
pub fn sniff_image_format(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpeg")
    } else if bytes.starts_with(b"BM") {
        Some("bmp")
    } else {
        None
    }
}

/// Engine construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructError {
    /// The license service rejected the key.
    #[error("license rejected: {0}")]
    Rejected(String),
    /// The license service could not be reached.
    #[error("license service unreachable: {0}")]
    Transport(String),
    /// The engine failed to initialize after verification.
    #[error("engine initialization failed: {0}")]
    Build(String),
}

/// Engine analysis errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// Image reference failed validation.
    #[error("image error: {0}")]
    Image(#[from] CoreError),
    /// Image could not be read.
    #[error("image read failed: {0}")]
    Io(String),
    /// Image content is not a supported container.
    #[error("unsupported image content: {0}")]
    UnsupportedContent(String),
    /// Engine-internal failure.
    #[error("engine failure: {0}")]
    Engine(String),
}
