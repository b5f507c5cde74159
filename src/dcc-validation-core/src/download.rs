//! Conditional download of signed packages.
//!
//! Every package goes through the same pipeline:
//!
//! 1. Read the cached ETag (if any) and issue a conditional request
//! 2. `304 Not Modified`: serve the cached payload, or fail with
//!    `MISSING_CACHE` when nothing is cached
//! 3. Fresh response: require an ETag, require a package, verify the
//!    signature, decode the payload
//! 4. Replace the cached `{etag, payload}` pair in one store write
//!
//! The store write happens after the last await point, so a download that is
//! dropped mid-flight leaves the cache untouched. The `stage_*` variants hand
//! the write back as a [`Staged`] value so a caller spanning several downloads
//! can commit them together once nothing is left to await. Concurrent
//! downloads of the same package are serialised; the later caller re-requests
//! with the ETag the earlier one cached.
//!
//! A cached rule list that is empty counts as missing: a `304` over it fails
//! with `MISSING_CACHE`, and offline fallback does not serve it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{DownloadError, PackageError, PackageErrorKind, PackageOrigin};
use crate::https::{Client, HttpFailure};
use crate::package::SignatureVerification;
use crate::rules::{Rule, RuleCategory};
use crate::store::{OnboardedCountriesCache, RuleCategoryCache, Store, ValueSetsCache};
use crate::value_sets::ValueSets;

/// Outcome of a conditional fetch.
enum Fetched<T> {
    NotModified,
    Fresh { etag: String, payload: T },
}

/// Verified package whose cache write has not happened yet.
///
/// `value` is what the caller works with; `commit` replaces the cached
/// `{etag, payload}` document when the package was fresh.
#[derive(Debug)]
#[must_use]
pub struct Staged<T> {
    value: T,
    write: Option<CacheWrite>,
}

impl<T> Staged<T> {
    fn cached(value: T) -> Self {
        Self { value, write: None }
    }

    fn fresh(value: T, write: CacheWrite) -> Self {
        Self {
            value,
            write: Some(write),
        }
    }

    /// Whether committing would write to the store.
    pub fn is_fresh(&self) -> bool {
        self.write.is_some()
    }

    /// Write the package to `store` (if fresh) and return the value.
    pub fn commit(self, store: &dyn Store) -> T {
        if let Some(write) = self.write {
            write.apply(store);
        }
        self.value
    }
}

/// Pending replacement of one cached document.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheWrite {
    /// Rules of a category.
    Rules(RuleCategory, RuleCategoryCache),
    /// Value sets.
    ValueSets(ValueSetsCache),
}

impl CacheWrite {
    /// Write to `store`.
    ///
    /// A non-empty booster notification list also records the execution date.
    pub fn apply(self, store: &dyn Store) {
        match self {
            Self::Rules(category, cache) => {
                let record_booster =
                    category == RuleCategory::BoosterNotification && !cache.rules.is_empty();
                debug!(category = %category, etag = %cache.last_etag, "Caching rules");
                store.set_rules_cache(category, &cache);
                if record_booster {
                    store.set_last_booster_notifications_execution_date(Utc::now());
                }
            },
            Self::ValueSets(cache) => {
                debug!(etag = %cache.last_etag, "Caching value sets");
                store.set_value_sets_cache(&cache);
            },
        }
    }
}

/// Shared download pipeline behind the per-package services.
pub struct PackageDownloader {
    client: Arc<dyn Client>,
    store: Arc<dyn Store>,
    verifier: Arc<dyn SignatureVerification>,
    offline_fallback: bool,
    locks: StdMutex<HashMap<PackageOrigin, Arc<Mutex<()>>>>,
}

impl PackageDownloader {
    /// Create a downloader.
    pub fn new(
        client: Arc<dyn Client>,
        store: Arc<dyn Store>,
        verifier: Arc<dyn SignatureVerification>,
        offline_fallback: bool,
    ) -> Self {
        Self {
            client,
            store,
            verifier,
            offline_fallback,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Store backing this downloader.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn lock_for(&self, origin: PackageOrigin) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(origin).or_default().clone()
    }

    /// Download (or revalidate) the rules of a category and cache the result.
    #[instrument(skip(self), fields(category = %category))]
    pub async fn download_rules(&self, category: RuleCategory) -> Result<Vec<Rule>, DownloadError> {
        let lock = self.lock_for(PackageOrigin::Rules(category));
        let _guard = lock.lock().await;
        Ok(self.resolve_rules(category).await?.commit(self.store.as_ref()))
    }

    /// Download (or revalidate) the rules of a category, leaving the cache
    /// write to the caller.
    #[instrument(skip(self), fields(category = %category))]
    pub async fn stage_rules(&self, category: RuleCategory) -> Result<Staged<Vec<Rule>>, DownloadError> {
        let lock = self.lock_for(PackageOrigin::Rules(category));
        let _guard = lock.lock().await;
        self.resolve_rules(category).await
    }

    async fn resolve_rules(&self, category: RuleCategory) -> Result<Staged<Vec<Rule>>, DownloadError> {
        let origin = PackageOrigin::Rules(category);
        let cached = self.store.rules_cache(category);
        let etag = cached.as_ref().map(|c| c.last_etag.clone());
        // An empty rule list is never served from the cache.
        let cached = cached.map(|c| c.rules).filter(|rules| !rules.is_empty());

        match self.fetch::<Vec<Rule>>(origin, etag.as_deref()).await {
            Ok(Fetched::NotModified) => serve_cached(origin, cached).map(Staged::cached),
            Ok(Fetched::Fresh { etag, payload }) => {
                info!(etag = %etag, rules = payload.len(), "Rules downloaded");
                let write = CacheWrite::Rules(
                    category,
                    RuleCategoryCache {
                        last_etag: etag,
                        rules: payload.clone(),
                    },
                );
                Ok(Staged::fresh(payload, write))
            },
            Err(e) => self.fall_back(origin, e, cached).map(Staged::cached),
        }
    }

    /// Download (or revalidate) the value sets and cache the result.
    #[instrument(skip(self))]
    pub async fn download_value_sets(&self) -> Result<ValueSets, DownloadError> {
        let lock = self.lock_for(PackageOrigin::ValueSets);
        let _guard = lock.lock().await;
        Ok(self.resolve_value_sets().await?.commit(self.store.as_ref()))
    }

    /// Download (or revalidate) the value sets, leaving the cache write to
    /// the caller.
    #[instrument(skip(self))]
    pub async fn stage_value_sets(&self) -> Result<Staged<ValueSets>, DownloadError> {
        let lock = self.lock_for(PackageOrigin::ValueSets);
        let _guard = lock.lock().await;
        self.resolve_value_sets().await
    }

    async fn resolve_value_sets(&self) -> Result<Staged<ValueSets>, DownloadError> {
        let origin = PackageOrigin::ValueSets;
        let cached = self.store.value_sets_cache();
        let etag = cached.as_ref().map(|c| c.last_etag.clone());
        let cached = cached.map(|c| c.value_sets);

        match self.fetch::<ValueSets>(origin, etag.as_deref()).await {
            Ok(Fetched::NotModified) => serve_cached(origin, cached).map(Staged::cached),
            Ok(Fetched::Fresh { etag, payload }) => {
                info!(etag = %etag, "Value sets downloaded");
                let write = CacheWrite::ValueSets(ValueSetsCache {
                    last_etag: etag,
                    value_sets: payload.clone(),
                });
                Ok(Staged::fresh(payload, write))
            },
            Err(e) => self.fall_back(origin, e, cached).map(Staged::cached),
        }
    }

    /// Download (or revalidate) the onboarded countries, sorted and
    /// de-duplicated.
    #[instrument(skip(self))]
    pub async fn download_onboarded_countries(&self) -> Result<Vec<String>, DownloadError> {
        let origin = PackageOrigin::OnboardedCountries;
        let lock = self.lock_for(origin);
        let _guard = lock.lock().await;

        let cached = self.store.onboarded_countries_cache();
        let etag = cached.as_ref().map(|c| c.last_etag.clone());

        match self.fetch::<Vec<String>>(origin, etag.as_deref()).await {
            Ok(Fetched::NotModified) => serve_cached(origin, cached.map(|c| c.countries)),
            Ok(Fetched::Fresh { etag, payload }) => {
                let mut countries: Vec<String> =
                    payload.into_iter().map(|c| c.to_ascii_uppercase()).collect();
                countries.sort();
                countries.dedup();
                info!(etag = %etag, countries = countries.len(), "Onboarded countries updated");
                self.store
                    .set_onboarded_countries_cache(&OnboardedCountriesCache {
                        last_etag: etag,
                        countries: countries.clone(),
                    });
                Ok(countries)
            },
            Err(e) => self.fall_back(origin, e, cached.map(|c| c.countries)),
        }
    }

    async fn request(
        &self,
        origin: PackageOrigin,
        etag: Option<&str>,
    ) -> Result<crate::https::PackageDownloadResponse, HttpFailure> {
        match origin {
            PackageOrigin::Rules(category) => self.client.get_rules(etag, category).await,
            PackageOrigin::ValueSets => self.client.get_value_sets(etag).await,
            PackageOrigin::OnboardedCountries => self.client.get_onboarded_countries(etag).await,
        }
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        origin: PackageOrigin,
        etag: Option<&str>,
    ) -> Result<Fetched<T>, DownloadError> {
        let response = match self.request(origin, etag).await {
            Ok(response) => response,
            Err(HttpFailure::NotModified) => {
                debug!(origin = %origin, "Not modified");
                return Ok(Fetched::NotModified);
            },
            Err(failure) => {
                warn!(origin = %origin, "Download failed: {}", failure);
                return Err(map_failure(origin, &failure));
            },
        };

        let etag = response
            .etag
            .ok_or_else(|| integrity(origin, PackageErrorKind::JsonArchiveEtagError))?;
        let package = response
            .package
            .ok_or_else(|| integrity(origin, PackageErrorKind::JsonArchiveFileMissing))?;

        if !self.verifier.verify(&package) {
            return Err(integrity(origin, PackageErrorKind::JsonArchiveSignatureInvalid));
        }

        let payload = serde_json::from_slice(&package.bin).map_err(|e| {
            integrity(
                origin,
                PackageErrorKind::DecodingError {
                    message: e.to_string(),
                },
            )
        })?;
        Ok(Fetched::Fresh { etag, payload })
    }

    fn fall_back<T>(
        &self,
        origin: PackageOrigin,
        error: DownloadError,
        cached: Option<T>,
    ) -> Result<T, DownloadError> {
        if !self.offline_fallback || !error.is_retryable() {
            return Err(error);
        }
        match cached {
            Some(cached) => {
                warn!(origin = %origin, code = %error.code(), "Serving cached package");
                Ok(cached)
            },
            None => Err(error),
        }
    }
}

fn serve_cached<T>(origin: PackageOrigin, cached: Option<T>) -> Result<T, DownloadError> {
    cached.ok_or_else(|| {
        warn!(origin = %origin, "Not modified but nothing cached");
        DownloadError::Package(PackageError::new(origin, PackageErrorKind::MissingCache))
    })
}

fn integrity(origin: PackageOrigin, kind: PackageErrorKind) -> DownloadError {
    warn!(origin = %origin, "Package rejected: {}", kind);
    DownloadError::Package(PackageError::new(origin, kind))
}

/// Map a transport failure to the download taxonomy.
///
/// HTTP 400–409 are client errors; every other failure is a server error.
fn map_failure(origin: PackageOrigin, failure: &HttpFailure) -> DownloadError {
    let kind = match failure {
        HttpFailure::NoNetworkConnection => return DownloadError::NoNetwork,
        HttpFailure::ServerError(status) if (400..=409).contains(status) => {
            PackageErrorKind::ClientError
        },
        HttpFailure::NotModified | HttpFailure::ServerError(_) | HttpFailure::Other => {
            PackageErrorKind::ServerError
        },
    };
    DownloadError::Package(PackageError::new(origin, kind))
}

/// Downloads business rules per category.
#[derive(Clone)]
pub struct RulesDownloadService {
    downloader: Arc<PackageDownloader>,
}

impl RulesDownloadService {
    /// Create a service on a shared downloader.
    #[must_use]
    pub fn new(downloader: Arc<PackageDownloader>) -> Self {
        Self { downloader }
    }

    /// Current rules of a category.
    pub async fn download_rules(&self, category: RuleCategory) -> Result<Vec<Rule>, DownloadError> {
        self.downloader.download_rules(category).await
    }

    /// Current rules of a category, cache write deferred.
    pub async fn stage_rules(&self, category: RuleCategory) -> Result<Staged<Vec<Rule>>, DownloadError> {
        self.downloader.stage_rules(category).await
    }
}

/// Supplies value sets.
#[derive(Clone)]
pub struct ValueSetProvider {
    downloader: Arc<PackageDownloader>,
}

impl ValueSetProvider {
    /// Create a provider on a shared downloader.
    #[must_use]
    pub fn new(downloader: Arc<PackageDownloader>) -> Self {
        Self { downloader }
    }

    /// Current value sets.
    pub async fn value_sets(&self) -> Result<ValueSets, DownloadError> {
        self.downloader.download_value_sets().await
    }

    /// Current value sets, cache write deferred.
    pub async fn stage_value_sets(&self) -> Result<Staged<ValueSets>, DownloadError> {
        self.downloader.stage_value_sets().await
    }
}
