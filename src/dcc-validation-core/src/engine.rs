//! Certificate validation orchestrator.
//!
//! This module sequences one validation call:
//! 1. Technical check (certificate expiry against the validation clock)
//! 2. Value-set refresh
//! 3. Acceptance-rule refresh
//! 4. Invalidation-rule refresh
//! 5. Parameter assembly
//! 6. Evaluation of acceptance and invalidation rules together
//! 7. Interpretation into a [`HealthCertificateValidationReport`]
//!
//! Steps run strictly one after another; the first failure ends the call.
//! Fresh packages from steps 2-4 are cached together once all three have
//! arrived, so a call that fails or is dropped before then writes nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::certificate::HealthCertificate;
use crate::config::ValidationConfig;
use crate::download::{PackageDownloader, RulesDownloadService, ValueSetProvider};
use crate::error::{
    ConfigError, DownloadError, OnboardedCountriesError, RuleValidationError, ValidationError,
};
use crate::evaluation::{interpret, HealthCertificateValidationReport, RuleEvaluationEngine};
use crate::https::{Client, HttpsClient};
use crate::package::{SignatureVerification, TrustAnchorVerifier};
use crate::rules::{ExternalParameter, FilterParameter, Rule, RuleCategory};
use crate::store::{FileStore, MemoryStore, Store};

/// The certificate validation engine.
///
/// This is the primary entry point for validation.
pub struct ValidationOrchestrator {
    config: ValidationConfig,
    downloader: Arc<PackageDownloader>,
    rules_service: RulesDownloadService,
    value_set_provider: ValueSetProvider,
    evaluation_engine: RuleEvaluationEngine,
}

impl ValidationOrchestrator {
    /// Create an orchestrator with the default configuration.
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_config(ValidationConfig::default())
    }

    /// Create an orchestrator from configuration.
    ///
    /// Uses [`HttpsClient`], [`TrustAnchorVerifier`] and a [`FileStore`] when
    /// `cache_dir` is set (a [`MemoryStore`] otherwise).
    pub fn with_config(config: ValidationConfig) -> Result<Self, ConfigError> {
        info!(
            endpoint = %config.endpoint,
            anchors = config.trust_anchors.len(),
            offline_fallback = config.offline_fallback,
            "Initializing validation engine"
        );

        let client = HttpsClient::new(
            &config.endpoint,
            config.timeout,
            &config.value_set_language,
        )?;

        let verifier = TrustAnchorVerifier::from_hex(&config.trust_anchors).map_err(|e| {
            ConfigError::InvalidTrustAnchor {
                reason: e.to_string(),
            }
        })?;
        if verifier.anchor_count() == 0 {
            warn!("No trust anchors configured; every package will be rejected");
        }

        let store: Arc<dyn Store> = match &config.cache_dir {
            Some(dir) => {
                debug!(cache_dir = %dir.display(), "Using file-backed store");
                Arc::new(FileStore::new(dir.clone()))
            },
            None => Arc::new(MemoryStore::new()),
        };

        Ok(Self::with_dependencies(
            Arc::new(client),
            store,
            Arc::new(verifier),
            config,
        ))
    }

    /// Create an orchestrator with explicit collaborators.
    ///
    /// Used by tests and by hosts that bring their own transport or storage.
    pub fn with_dependencies(
        client: Arc<dyn Client>,
        store: Arc<dyn Store>,
        verifier: Arc<dyn SignatureVerification>,
        config: ValidationConfig,
    ) -> Self {
        let downloader = Arc::new(PackageDownloader::new(
            client,
            store,
            verifier,
            config.offline_fallback,
        ));
        Self {
            rules_service: RulesDownloadService::new(downloader.clone()),
            value_set_provider: ValueSetProvider::new(downloader.clone()),
            downloader,
            evaluation_engine: RuleEvaluationEngine::new(),
            config,
        }
    }

    /// Validate a certificate for entry into `arrival_country` at
    /// `validation_clock`.
    #[instrument(skip(self, certificate), fields(issuer = %certificate.issuer))]
    pub async fn validate(
        &self,
        certificate: &HealthCertificate,
        arrival_country: &str,
        validation_clock: DateTime<Utc>,
    ) -> Result<HealthCertificateValidationReport, ValidationError> {
        // Step 1: technical check, before any network access
        if is_expired(certificate.expiration_time, validation_clock) {
            warn!(
                expiration_time = certificate.expiration_time,
                "Certificate expired"
            );
            return Err(ValidationError::TechnicalValidationFailed {
                expiration_time: certificate.expiration_time,
                validation_clock: validation_clock.timestamp(),
            });
        }

        // Step 2: value sets
        let value_sets = self
            .value_set_provider
            .stage_value_sets()
            .await
            .map_err(ValidationError::from_value_set_failure)?;

        // Steps 3-4: rules, acceptance first so its errors surface first
        let acceptance = self
            .rules_service
            .stage_rules(RuleCategory::Acceptance)
            .await
            .map_err(ValidationError::from_rule_failure)?;
        let invalidation = self
            .rules_service
            .stage_rules(RuleCategory::Invalidation)
            .await
            .map_err(ValidationError::from_rule_failure)?;

        // Nothing is awaited past this point; a cancelled validation never
        // reaches the cache.
        let store = self.downloader.store().as_ref();
        let value_sets = value_sets.commit(store);
        let mut rules = acceptance.commit(store);
        let invalidation = invalidation.commit(store);
        debug!(
            acceptance = rules.len(),
            invalidation = invalidation.len(),
            "Rules available"
        );
        rules.extend(invalidation);

        // Step 5: parameters
        let filter = FilterParameter {
            validation_clock,
            country_code: arrival_country.to_string(),
            certificate_type: certificate.certificate_type(),
            region: None,
        };
        let external = ExternalParameter {
            validation_clock,
            value_sets: value_sets.mapped(),
            expiration_time: certificate.expiration_time,
            issued_at: certificate.issued_at,
            issuer_country_code: certificate.issuer.clone(),
            key_identifier: certificate.key_identifier.clone(),
        };

        // Step 6: evaluation
        let claims = certificate
            .claims_json()
            .map_err(|e| RuleValidationError::InvalidEvaluationData {
                reason: e.to_string(),
            })?;
        let results = self
            .evaluation_engine
            .apply_rules(&rules, &claims, &filter, &external)?;

        // Step 7: interpretation
        let report = interpret(results);
        info!(
            status = report.status(),
            results = report.results().len(),
            "Validation complete"
        );
        Ok(report)
    }

    /// Countries that publish rules, sorted and de-duplicated.
    pub async fn onboarded_countries(&self) -> Result<Vec<String>, OnboardedCountriesError> {
        self.downloader.download_onboarded_countries().await
    }

    /// Current rules of a category.
    pub async fn rules(&self, category: RuleCategory) -> Result<Vec<Rule>, DownloadError> {
        self.rules_service.download_rules(category).await
    }

    /// When booster notification rules were last refreshed with content.
    #[must_use]
    pub fn last_booster_notifications_execution_date(&self) -> Option<DateTime<Utc>> {
        self.downloader
            .store()
            .last_booster_notifications_execution_date()
    }

    /// Get the engine configuration.
    #[must_use]
    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }
}

/// Whether a certificate expiring at `expiration_time` (Unix seconds) has
/// expired at `validation_clock`.
#[must_use]
pub fn is_expired(expiration_time: i64, validation_clock: DateTime<Utc>) -> bool {
    match DateTime::from_timestamp(expiration_time, 0) {
        Some(expiry) => expiry < validation_clock,
        None => expiration_time < 0,
    }
}
