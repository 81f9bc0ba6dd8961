//! Configuration for the fetch layer.
//!
//! [`FetcherConfig`] carries the connection and scheduling settings shared
//! by the transport and the orchestrator. All fields have documented
//! defaults suitable for a locally-running console backend.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Configuration for a fetcher instance.
///
/// # Examples
///
/// ```
/// use fc_core::FetcherConfig;
///
/// let config = FetcherConfig::default();
/// assert_eq!(config.version_header, "x-console-version");
/// assert_eq!(config.debounce_ms, 0);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Absolute base URL of the console backend.
    ///
    /// Endpoint strings are joined onto this URL for every request.
    pub base_url: String,

    /// The build version of this client.
    ///
    /// Compared against the version response header on every response; a
    /// mismatch triggers the refresh signal.
    pub client_version: String,

    /// Name of the response header carrying the server build version.
    pub version_header: String,

    /// Debounce window in milliseconds.
    ///
    /// Interest registrations within this window are batched into a single
    /// flush. `0` still batches everything scheduled before the flush task
    /// gets to run.
    pub debounce_ms: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/".to_owned(),
            client_version: env!("CARGO_PKG_VERSION").to_owned(),
            version_header: "x-console-version".to_owned(),
            debounce_ms: 0,
        }
    }
}

impl FetcherConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the base URL is not an absolute URL
    /// or when the version fields are empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match Url::parse(&self.base_url) {
            Ok(url) if url.cannot_be_a_base() => {
                return Err(ConfigError::InvalidBaseUrl {
                    url: self.base_url.clone(),
                    reason: "URL cannot serve as a base".to_owned(),
                });
            }
            Ok(_) => {}
            Err(err) => {
                return Err(ConfigError::InvalidBaseUrl {
                    url: self.base_url.clone(),
                    reason: err.to_string(),
                });
            }
        }

        if self.client_version.is_empty() {
            return Err(ConfigError::EmptyClientVersion);
        }
        if self.version_header.is_empty() {
            return Err(ConfigError::EmptyVersionHeader);
        }

        Ok(())
    }

    /// The debounce window as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(FetcherConfig::default().validate().is_ok());
    }

    #[test]
    fn test_relative_base_url_rejected() {
        let config = FetcherConfig {
            base_url: "/just/a/path".to_owned(),
            ..FetcherConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn test_empty_client_version_rejected() {
        let config = FetcherConfig {
            client_version: String::new(),
            ..FetcherConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyClientVersion)
        ));
    }

    #[test]
    fn test_empty_version_header_rejected() {
        let config = FetcherConfig {
            version_header: String::new(),
            ..FetcherConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyVersionHeader)
        ));
    }

    #[test]
    fn test_debounce_duration() {
        let config = FetcherConfig {
            debounce_ms: 25,
            ..FetcherConfig::default()
        };
        assert_eq!(config.debounce(), Duration::from_millis(25));
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = FetcherConfig {
            base_url: "https://console.example.com/".to_owned(),
            client_version: "2.4.0".to_owned(),
            version_header: "x-console-version".to_owned(),
            debounce_ms: 10,
        };
        let json = serde_json::to_string(&config).expect("serialize");
        let back: FetcherConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, config);
    }
}
