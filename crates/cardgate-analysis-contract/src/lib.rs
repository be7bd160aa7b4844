#![warn(missing_docs)]
//! # cardgate-analysis-contract
//!
//! ## Purpose
//! Defines the analysis result schema produced by engines and the document
//! classification projection shown to the user.
//!
//! ## Responsibilities
//! - Model engine output ([`CardAnalysisResult`]).
//! - Project results into a [`DocumentClassification`].
//! - Encode/decode classification JSON for display and copy-out.
//! - Preserve unknown document type names for forward compatibility.
//!
//! ## Data flow
//! Engine output -> [`classify`] -> [`DocumentClassification::to_json`] ->
//! UI result text.
//!
//! ## Ownership and lifetimes
//! Results are owned structs so they can outlive the engine that produced them.
//!
//! ## Error model
//! Invalid JSON or blank mandatory fields return [`AnalysisContractError`].
//!
//! ## Security and privacy notes
//! Recognized text lines may contain personal data. This crate never logs them.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical schema version for analysis results.
pub const ANALYSIS_SCHEMA_VERSION_V1: &str = "v1";

/// Document families recognized by analysis engines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DocumentType {
    /// National identity card.
    IdCard,
    /// Driver license.
    DriverLicense,
    /// Passport.
    Passport,
    /// Business registration certificate.
    BusinessRegistration,
    /// Type name not known to this client.
    Unknown(String),
}

impl DocumentType {
    /// Returns the wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::IdCard => "id_card",
            Self::DriverLicense => "driver_license",
            Self::Passport => "passport",
            Self::BusinessRegistration => "business_registration",
            Self::Unknown(name) => name,
        }
    }

    /// Returns `true` for types this client knows.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<String> for DocumentType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "id_card" => Self::IdCard,
            "driver_license" => Self::DriverLicense,
            "passport" => Self::Passport,
            "business_registration" => Self::BusinessRegistration,
            _ => Self::Unknown(value),
        }
    }
}

impl From<DocumentType> for String {
    fn from(value: DocumentType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recognized text line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    /// Recognized text.
    pub text: String,
    /// Recognition confidence in [0.0, 1.0].
    pub confidence: f32,
}

/// Raw output of one engine analysis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardAnalysisResult {
    /// Result schema version.
    pub schema_version: String,
    /// Analyzed image path.
    pub image_path: String,
    /// Recognized text lines.
    #[serde(default)]
    pub lines: Vec<TextLine>,
    /// Document type detected by the engine, if any.
    #[serde(default)]
    pub detected_type: Option<DocumentType>,
    /// Whether the engine rotated the image by 180 degrees.
    #[serde(default)]
    pub rotated_180: bool,
}

impl CardAnalysisResult {
    /// Creates an empty v1 result for `image_path`.
    pub fn empty(image_path: impl Into<String>) -> Self {
        Self {
            schema_version: ANALYSIS_SCHEMA_VERSION_V1.to_string(),
            image_path: image_path.into(),
            lines: Vec::new(),
            detected_type: None,
            rotated_180: false,
        }
    }
}

/// Classification projected for the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentClassification {
    /// Classification schema version.
    pub schema_version: String,
    /// `true` when a known document type was identified.
    pub result: bool,
    /// Identified type, known or not.
    #[serde(rename = "type")]
    pub document_type: Option<DocumentType>,
    /// Mean line confidence in [0.0, 1.0].
    pub confidence: f32,
    /// Number of recognized lines.
    pub line_count: usize,
}

impl DocumentClassification {
    /// Serializes to pretty JSON for display.
    ///
    /// # Errors
    /// Returns [`AnalysisContractError::Decode`] when serialization fails.
    pub fn to_json(&self) -> Result<String, AnalysisContractError> {
        serde_json::to_string_pretty(self).map_err(AnalysisContractError::Decode)
    }

    /// Returns the status-line summary.
    pub fn summary(&self) -> String {
        match (&self.document_type, self.result) {
            (Some(document_type), true) => {
                format!("Analysis complete - document type: {document_type}")
            }
            _ => "Analysis complete - document type not identified".to_string(),
        }
    }
}

/// Projects an engine result into a classification.
pub fn classify(result: &CardAnalysisResult) -> DocumentClassification {
    let confidence = if result.lines.is_empty() {
        0.0
    } else {
        let total: f32 = result
            .lines
            .iter()
            .map(|line| line.confidence.clamp(0.0, 1.0))
            .sum();
        total / result.lines.len() as f32
    };

    DocumentClassification {
        schema_version: ANALYSIS_SCHEMA_VERSION_V1.to_string(),
        result: result
            .detected_type
            .as_ref()
            .is_some_and(DocumentType::is_known),
        document_type: result.detected_type.clone(),
        confidence,
        line_count: result.lines.len(),
    }
}

/// Parses classification JSON.
///
/// # Errors
/// Returns [`AnalysisContractError::Decode`] for invalid JSON.
/// Returns [`AnalysisContractError::InvalidContract`] when `schema_version` is
/// blank or `confidence` is outside [0.0, 1.0].
pub fn parse_classification(raw: &str) -> Result<DocumentClassification, AnalysisContractError> {
    let parsed: DocumentClassification =
        serde_json::from_str(raw).map_err(AnalysisContractError::Decode)?;

    if parsed.schema_version.trim().is_empty() {
        return Err(AnalysisContractError::InvalidContract(
            "schema_version is empty".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&parsed.confidence) {
        return Err(AnalysisContractError::InvalidContract(format!(
            "confidence {} is outside [0, 1]",
            parsed.confidence
        )));
    }

    Ok(parsed)
}

/// Analysis contract errors.
#[derive(Debug, Error)]
pub enum AnalysisContractError {
    /// JSON encode/decode failure.
    #[error("analysis decode failure: {0}")]
    Decode(#[from] serde_json::Error),
    /// Parsed payload violates contract invariants.
    #[error("analysis contract violation: {0}")]
    InvalidContract(String),
}
