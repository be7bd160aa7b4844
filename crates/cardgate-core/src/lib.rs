#![warn(missing_docs)]
//! # cardgate-core
//!
//! ## Purpose
//! Defines the pure data model shared across the `cardgate` workspace.
//!
//! ## Responsibilities
//! - Represent license keys as validated, log-safe values.
//! - Represent image references submitted for analysis.
//! - Describe engine construction options and the per-key engine config.
//!
//! ## Data flow
//! UI text input -> [`LicenseKey::parse`] -> [`EngineOptions::with_key`] ->
//! [`EngineConfig`] handed to the engine factory. Selected files become
//! [`ImageRef`] values submitted to the session.
//!
//! ## Ownership and lifetimes
//! All values own their strings/paths so they can move freely into async
//! verification and analysis tasks.
//!
//! ## Error model
//! Validation failures (blank key, blank path, unsupported extension, missing
//! file) return [`CoreError`] variants.
//!
//! ## Security and privacy notes
//! [`LicenseKey`] never prints its raw value through `Debug` or `Display`.
//! Logs use [`LicenseKey::fingerprint`] instead.
//!
//! ## Example
//! ```rust
//! use cardgate_core::{EngineOptions, LicenseKey};
//!
//! let key = LicenseKey::parse("  ABCD-1234  ").unwrap();
//! assert_eq!(key.as_str(), "ABCD-1234");
//! let config = EngineOptions::default().with_key(key.clone());
//! assert_eq!(config.license_key, key);
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Image file extensions accepted for analysis (case-insensitive).
pub const SUPPORTED_IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Default tessdata directory name, resolved next to the executable.
pub const DEFAULT_TESSDATA_DIR: &str = "tessdata";

const FINGERPRINT_HEX_LEN: usize = 12;

/// Opaque, non-empty license credential.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LicenseKey(String);

impl LicenseKey {
    /// Parses user input into a license key.
    ///
    /// Surrounding whitespace is trimmed.
    ///
    /// # Errors
    /// Returns [`CoreError::EmptyLicenseKey`] for empty or whitespace-only input.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::EmptyLicenseKey);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the raw key. Callers must not log this value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short SHA-256 fingerprint that is safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        let mut encoded = hex::encode(digest);
        encoded.truncate(FINGERPRINT_HEX_LEN);
        encoded
    }
}

impl fmt::Debug for LicenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LicenseKey({})", self.fingerprint())
    }
}

impl fmt::Display for LicenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key:{}", self.fingerprint())
    }
}

/// Reference to an image file submitted for analysis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    path: PathBuf,
}

impl ImageRef {
    /// Creates a validated image reference.
    ///
    /// # Errors
    /// Returns [`CoreError::EmptyImagePath`] for an empty path.
    /// Returns [`CoreError::UnsupportedImageFormat`] when the extension is not
    /// one of [`SUPPORTED_IMAGE_EXTENSIONS`].
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(CoreError::EmptyImagePath);
        }

        let extension = path
            .extension()
            .and_then(|value| value.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !SUPPORTED_IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            return Err(CoreError::UnsupportedImageFormat(extension));
        }

        Ok(Self { path })
    }

    /// Returns the referenced path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the file name component for status display.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Checks that the referenced file still exists.
    ///
    /// # Errors
    /// Returns [`CoreError::ImageNotFound`] when the path is not a file.
    pub fn ensure_readable(&self) -> Result<(), CoreError> {
        if self.path.is_file() {
            Ok(())
        } else {
            Err(CoreError::ImageNotFound(self.path.display().to_string()))
        }
    }
}

/// Key-independent engine construction options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Directory holding OCR language data.
    pub tessdata_path: PathBuf,
    /// Whether the engine retries upside-down images rotated by 180 degrees.
    #[serde(default)]
    pub enable_auto_rotate_180: bool,
}

impl EngineOptions {
    /// Binds these options to a license key.
    pub fn with_key(&self, license_key: LicenseKey) -> EngineConfig {
        EngineConfig {
            license_key,
            tessdata_path: self.tessdata_path.clone(),
            enable_auto_rotate_180: self.enable_auto_rotate_180,
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        let base = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        Self {
            tessdata_path: base.join(DEFAULT_TESSDATA_DIR),
            enable_auto_rotate_180: false,
        }
    }
}

/// Full configuration for constructing one engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// License key the engine is bound to.
    pub license_key: LicenseKey,
    /// Directory holding OCR language data.
    pub tessdata_path: PathBuf,
    /// Whether 180 degree auto-rotation is enabled.
    pub enable_auto_rotate_180: bool,
}

/// Error type for core validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// License key input was empty or whitespace.
    #[error("license key is empty")]
    EmptyLicenseKey,
    /// Image path was empty.
    #[error("image path is empty")]
    EmptyImagePath,
    /// Image extension is not supported.
    #[error("unsupported image format: '{0}'")]
    UnsupportedImageFormat(String),
    /// Image file does not exist.
    #[error("image not found: {0}")]
    ImageNotFound(String),
}

#[cfg(test)]
mod tests {
    //! Unit tests for key and image validation.

    use super::*;

    #[test]
    fn rejects_blank_license_keys() {
        assert_eq!(LicenseKey::parse(""), Err(CoreError::EmptyLicenseKey));
        assert_eq!(LicenseKey::parse(" \t\n"), Err(CoreError::EmptyLicenseKey));
    }

    #[test]
    fn debug_output_hides_raw_key() {
        let key = LicenseKey::parse("SUPER-SECRET-KEY").expect("key should parse");
        let rendered = format!("{key:?} {key}");
        assert!(!rendered.contains("SUPER-SECRET-KEY"));
        assert!(rendered.contains(&key.fingerprint()));
        assert_eq!(key.fingerprint().len(), 12);
    }

    #[test]
    fn accepts_supported_extensions_case_insensitively() {
        assert!(ImageRef::new("scan.PNG").is_ok());
        assert!(ImageRef::new("dir/card.jpeg").is_ok());
        assert_eq!(
            ImageRef::new("notes.txt"),
            Err(CoreError::UnsupportedImageFormat("txt".to_string()))
        );
        assert_eq!(ImageRef::new(""), Err(CoreError::EmptyImagePath));
    }

    #[test]
    fn missing_image_is_not_readable() {
        let image = ImageRef::new("/definitely/not/here.png").expect("path should validate");
        assert!(matches!(
            image.ensure_readable(),
            Err(CoreError::ImageNotFound(_))
        ));
        assert_eq!(image.file_name(), "here.png");
    }
}
