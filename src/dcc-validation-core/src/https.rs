//! HTTPS client for the certificate distribution service.
//!
//! ## Endpoints
//!
//! - `GET version/v1/ehn-dgc/acceptance-rules` - Acceptance rules package
//! - `GET version/v1/ehn-dgc/invalidation-rules` - Invalidation rules package
//! - `GET version/v1/booster-notification-rules` - Booster rules package
//! - `GET version/v1/ehn-dgc/{lang}/value-sets` - Value sets package
//! - `GET version/v1/ehn-dgc/onboarded-countries` - Onboarded countries package
//!
//! Every request is conditional: the cached ETag is sent as `If-None-Match`
//! and a `304 Not Modified` answer is reported as [`HttpFailure::NotModified`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::{ClientBuilder, StatusCode};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::error::ConfigError;
use crate::package::SignedPackage;
use crate::rules::RuleCategory;

/// Successful (non-304) response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageDownloadResponse {
    /// `ETag` response header.
    pub etag: Option<String>,
    /// Package read from the body.
    pub package: Option<SignedPackage>,
}

impl PackageDownloadResponse {
    /// Build a response from raw header and body.
    #[must_use]
    pub fn from_body(etag: Option<String>, body: &[u8]) -> Self {
        Self {
            etag: etag.filter(|e| !e.is_empty()),
            package: SignedPackage::from_zip(body),
        }
    }

    /// Whether the response carried no package.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.package.is_none()
    }
}

/// Transport-level outcome other than a fresh package.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpFailure {
    /// `304 Not Modified`.
    #[error("not modified")]
    NotModified,

    /// No connectivity or request timed out.
    #[error("no network connection")]
    NoNetworkConnection,

    /// Non-success HTTP status.
    #[error("server answered HTTP {0}")]
    ServerError(u16),

    /// Any other failure.
    #[error("request failed")]
    Other,
}

/// Access to the distribution service.
#[async_trait]
pub trait Client: Send + Sync {
    /// Fetch the rules package of a category.
    async fn get_rules(
        &self,
        etag: Option<&str>,
        category: RuleCategory,
    ) -> Result<PackageDownloadResponse, HttpFailure>;

    /// Fetch the value sets package.
    async fn get_value_sets(&self, etag: Option<&str>)
        -> Result<PackageDownloadResponse, HttpFailure>;

    /// Fetch the onboarded countries package.
    async fn get_onboarded_countries(
        &self,
        etag: Option<&str>,
    ) -> Result<PackageDownloadResponse, HttpFailure>;
}

/// `reqwest`-backed [`Client`].
pub struct HttpsClient {
    client: reqwest::Client,
    base_url: String,
    value_set_language: String,
}

impl HttpsClient {
    /// Create a new client.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        value_set_language: &str,
    ) -> Result<Self, ConfigError> {
        let connect_timeout = timeout.min(Duration::from_secs(5));

        let client = ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .user_agent(format!("dcc-validation/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::HttpClient {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            value_set_language: value_set_language.to_string(),
        })
    }

    /// Base URL without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn value_sets_path(&self) -> String {
        format!("version/v1/ehn-dgc/{}/value-sets", self.value_set_language)
    }

    #[instrument(skip(self, etag), fields(conditional = etag.is_some()))]
    async fn fetch(
        &self,
        path: &str,
        etag: Option<&str>,
    ) -> Result<PackageDownloadResponse, HttpFailure> {
        let url = self.url(path);
        debug!(url = %url, "HTTPS: Fetching package...");

        let mut request = self.client.get(&url);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "HTTPS request failed");
            map_transport_error(&e)
        })?;

        let status = response.status();
        info!(url = %url, status = %status, "HTTPS: Response received");

        if status == StatusCode::NOT_MODIFIED {
            return Err(HttpFailure::NotModified);
        }
        if !status.is_success() {
            warn!(url = %url, status = %status, "HTTPS: Non-success status");
            return Err(HttpFailure::ServerError(status.as_u16()));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().await.map_err(|e| {
            warn!(url = %url, error = %e, "HTTPS: Failed to read response body");
            map_transport_error(&e)
        })?;

        debug!(url = %url, bytes = body.len(), has_etag = etag.is_some(), "HTTPS: Body received");
        Ok(PackageDownloadResponse::from_body(etag, &body))
    }
}

fn map_transport_error(error: &reqwest::Error) -> HttpFailure {
    if error.is_timeout() || error.is_connect() {
        HttpFailure::NoNetworkConnection
    } else if let Some(status) = error.status() {
        HttpFailure::ServerError(status.as_u16())
    } else {
        HttpFailure::Other
    }
}

#[async_trait]
impl Client for HttpsClient {
    async fn get_rules(
        &self,
        etag: Option<&str>,
        category: RuleCategory,
    ) -> Result<PackageDownloadResponse, HttpFailure> {
        self.fetch(category.endpoint_path(), etag).await
    }

    async fn get_value_sets(
        &self,
        etag: Option<&str>,
    ) -> Result<PackageDownloadResponse, HttpFailure> {
        let path = self.value_sets_path();
        self.fetch(&path, etag).await
    }

    async fn get_onboarded_countries(
        &self,
        etag: Option<&str>,
    ) -> Result<PackageDownloadResponse, HttpFailure> {
        self.fetch("version/v1/ehn-dgc/onboarded-countries", etag).await
    }
}
