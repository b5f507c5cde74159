//! Configuration for the validation engine.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the validation engine.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Base URL of the distribution service.
    pub endpoint: String,
    /// Request timeout. An expired timeout is reported as no network.
    pub timeout: Duration,
    /// Directory for persisted packages; memory only when unset.
    pub cache_dir: Option<PathBuf>,
    /// Hex-encoded SEC1 P-256 public keys trusted to sign packages.
    pub trust_anchors: Vec<String>,
    /// Language segment of the value-set endpoint.
    pub value_set_language: String,
    /// Serve cached packages when the service is unreachable or failing.
    pub offline_fallback: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://distribution.dcc-rules.example.eu".into(),
            timeout: Duration::from_secs(30),
            cache_dir: None,
            trust_anchors: Vec::new(),
            value_set_language: "en".into(),
            offline_fallback: false,
        }
    }
}

impl ValidationConfig {
    /// Configuration for `endpoint` with defaults otherwise.
    #[must_use]
    pub fn for_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }
}
