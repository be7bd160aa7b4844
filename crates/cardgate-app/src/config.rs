//! Runtime configuration.
//!
//! Values come from an optional JSON file named by `CARDGATE_CONFIG`, then
//! individual `CARDGATE_*` variables override single fields.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cardgate_core::EngineOptions;
use cardgate_license::{RetryPolicy, validate_verify_endpoint};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::AppError;
use crate::logging::LogFormat;

/// Env var naming a JSON config file.
pub const ENV_CONFIG_FILE: &str = "CARDGATE_CONFIG";
/// Env var overriding the license verification endpoint.
pub const ENV_LICENSE_ENDPOINT: &str = "CARDGATE_LICENSE_ENDPOINT";
/// Env var overriding the key applied at startup.
pub const ENV_LICENSE_KEY: &str = "CARDGATE_LICENSE_KEY";
/// Env var overriding the OCR data directory.
pub const ENV_TESSDATA_PATH: &str = "CARDGATE_TESSDATA_PATH";
/// Env var toggling 180 degree auto-rotation.
pub const ENV_AUTO_ROTATE_180: &str = "CARDGATE_AUTO_ROTATE_180";
/// Env var overriding the verification timeout in milliseconds.
pub const ENV_VERIFY_TIMEOUT_MS: &str = "CARDGATE_VERIFY_TIMEOUT_MS";
/// Env var overriding the per-request HTTP timeout in milliseconds.
pub const ENV_REQUEST_TIMEOUT_MS: &str = "CARDGATE_REQUEST_TIMEOUT_MS";
/// Env var selecting the log format.
pub const ENV_LOG_FORMAT: &str = "CARDGATE_LOG_FORMAT";

/// Key applied silently at startup when none is configured.
pub const DEFAULT_LICENSE_KEY: &str = "LICENS_EKEY";
/// Verification endpoint used when none is configured.
pub const DEFAULT_LICENSE_ENDPOINT: &str = "https://license.cardgate.local/license/verify";
/// Caller-side verification timeout used when none is configured.
pub const DEFAULT_VERIFY_TIMEOUT_MS: u64 = 15_000;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTPS endpoint ending in `/license/verify`.
    pub license_endpoint: String,
    /// Key applied at startup without status updates.
    pub default_license_key: String,
    /// OCR data directory; `None` uses `tessdata` next to the executable.
    pub tessdata_path: Option<PathBuf>,
    /// Whether engines retry upside-down images.
    pub enable_auto_rotate_180: bool,
    /// Timeout the app imposes on each key application.
    pub verify_timeout_ms: u64,
    /// Timeout for one HTTP attempt; `None` splits `verify_timeout_ms` evenly
    /// across the first attempt and every retry.
    pub request_timeout_ms: Option<u64>,
    /// Retry policy for transient verification failures.
    pub retry: RetryPolicy,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            license_endpoint: DEFAULT_LICENSE_ENDPOINT.to_string(),
            default_license_key: DEFAULT_LICENSE_KEY.to_string(),
            tessdata_path: None,
            enable_auto_rotate_180: false,
            verify_timeout_ms: DEFAULT_VERIFY_TIMEOUT_MS,
            request_timeout_ms: None,
            retry: RetryPolicy::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    /// See [`AppConfig::from_lookup`].
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, which resolves env var names.
    ///
    /// # Errors
    /// Returns [`AppError::Config`] when the config file cannot be read or
    /// parsed, or an override is malformed. Returns [`AppError::License`] when
    /// the resulting endpoint violates endpoint policy.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let mut config = match lookup(ENV_CONFIG_FILE) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(endpoint) = lookup(ENV_LICENSE_ENDPOINT) {
            config.license_endpoint = endpoint.trim().to_string();
        }
        if let Some(key) = lookup(ENV_LICENSE_KEY) {
            config.default_license_key = key;
        }
        if let Some(path) = lookup(ENV_TESSDATA_PATH) {
            config.tessdata_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup(ENV_AUTO_ROTATE_180) {
            match parse_flag(&raw) {
                Some(enabled) => config.enable_auto_rotate_180 = enabled,
                None => warn!(value = %raw, "ignoring unrecognized auto-rotate flag"),
            }
        }
        if let Some(raw) = lookup(ENV_VERIFY_TIMEOUT_MS) {
            config.verify_timeout_ms = raw.trim().parse().map_err(|_| {
                AppError::Config(format!("{ENV_VERIFY_TIMEOUT_MS} must be an integer, got {raw:?}"))
            })?;
        }
        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            let timeout_ms = raw.trim().parse().map_err(|_| {
                AppError::Config(format!("{ENV_REQUEST_TIMEOUT_MS} must be an integer, got {raw:?}"))
            })?;
            config.request_timeout_ms = Some(timeout_ms);
        }
        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            config.log_format = raw.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            AppError::Config(format!("unable to read {}: {error}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|error| {
            AppError::Config(format!("invalid config file {}: {error}", path.display()))
        })
    }

    /// Checks endpoint policy and timeout bounds.
    ///
    /// # Errors
    /// Returns [`AppError::License`] for an invalid endpoint and
    /// [`AppError::Config`] for a zero timeout or a request timeout longer
    /// than the verification timeout.
    pub fn validate(&self) -> Result<(), AppError> {
        validate_verify_endpoint(&self.license_endpoint)?;
        if self.verify_timeout_ms == 0 {
            return Err(AppError::Config(
                "verify_timeout_ms must be greater than zero".to_string(),
            ));
        }
        match self.request_timeout_ms {
            Some(0) => Err(AppError::Config(
                "request_timeout_ms must be greater than zero".to_string(),
            )),
            Some(timeout_ms) if timeout_ms > self.verify_timeout_ms => Err(AppError::Config(
                format!(
                    "request_timeout_ms ({timeout_ms}) must not exceed verify_timeout_ms ({})",
                    self.verify_timeout_ms
                ),
            )),
            _ => Ok(()),
        }
    }

    /// Timeout the app imposes on each key application.
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    /// Timeout for a single HTTP verification attempt.
    ///
    /// Kept below [`AppConfig::verify_timeout`] so retries fit inside it.
    pub fn request_timeout(&self) -> Duration {
        let timeout_ms = self.request_timeout_ms.unwrap_or_else(|| {
            let attempts = u64::from(self.retry.max_retries).saturating_add(1);
            (self.verify_timeout_ms / attempts).max(1)
        });
        Duration::from_millis(timeout_ms)
    }

    /// Key-independent engine options.
    pub fn engine_options(&self) -> EngineOptions {
        let mut options = EngineOptions::default();
        if let Some(path) = &self.tessdata_path {
            options.tessdata_path = path.clone();
        }
        options.enable_auto_rotate_180 = self.enable_auto_rotate_180;
        options
    }
}

/// Parses an on/off env value.
///
/// `1`, `true`, `on`, `yes` enable; `0`, `false`, `off`, `no` disable
/// (case-insensitive). Anything else is `None`.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for flag parsing, timeouts, and engine option projection.

    use super::*;

    #[test]
    fn parses_flags() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" off "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn engine_options_follow_overrides() {
        let config = AppConfig {
            tessdata_path: Some(PathBuf::from("/opt/ocr/tessdata")),
            enable_auto_rotate_180: true,
            ..AppConfig::default()
        };
        let options = config.engine_options();
        assert_eq!(options.tessdata_path, PathBuf::from("/opt/ocr/tessdata"));
        assert!(options.enable_auto_rotate_180);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn request_timeout_leaves_room_for_retries() {
        let config = AppConfig::default();
        let attempts = config.retry.max_retries + 1;
        assert_eq!(
            config.request_timeout(),
            Duration::from_millis(DEFAULT_VERIFY_TIMEOUT_MS / u64::from(attempts))
        );
        assert!(config.request_timeout() < config.verify_timeout());
    }

    #[test]
    fn explicit_request_timeout_is_bounded() {
        let config = AppConfig {
            request_timeout_ms: Some(3_000),
            ..AppConfig::default()
        };
        assert_eq!(config.request_timeout(), Duration::from_millis(3_000));
        assert!(config.validate().is_ok());

        let too_long = AppConfig {
            request_timeout_ms: Some(DEFAULT_VERIFY_TIMEOUT_MS + 1),
            ..AppConfig::default()
        };
        assert!(matches!(too_long.validate(), Err(AppError::Config(_))));

        let zero = AppConfig {
            request_timeout_ms: Some(0),
            ..AppConfig::default()
        };
        assert!(matches!(zero.validate(), Err(AppError::Config(_))));
    }
}
