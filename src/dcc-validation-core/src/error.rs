//! Error types for download and validation operations.
//!
//! Download failures share one shape, [`PackageError`], parameterised by the
//! package that failed ([`PackageOrigin`]) and what went wrong
//! ([`PackageErrorKind`]). Callers that need the stable identifiers shown to
//! users (`ACCEPTANCE_RULE_SERVER_ERROR`, `VALUE_SET_CLIENT_ERROR`, ...) use
//! the `code()` accessors.

use std::fmt;

use thiserror::Error;

use crate::rules::RuleCategory;

/// Which distribution package a download error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageOrigin {
    /// Value sets (code lists).
    ValueSets,
    /// One of the rule categories.
    Rules(RuleCategory),
    /// Onboarded countries list.
    OnboardedCountries,
}

impl PackageOrigin {
    /// Prefix used when building stable error codes.
    #[must_use]
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            Self::ValueSets => "VALUE_SET",
            Self::Rules(RuleCategory::Acceptance) => "ACCEPTANCE_RULE",
            Self::Rules(RuleCategory::Invalidation) => "INVALIDATION_RULE",
            Self::Rules(RuleCategory::BoosterNotification) => "BOOSTER_NOTIFICATION_RULE",
            Self::OnboardedCountries => "ONBOARDED_COUNTRIES",
        }
    }
}

impl fmt::Display for PackageOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValueSets => f.write_str("value sets"),
            Self::Rules(category) => write!(f, "{category} rules"),
            Self::OnboardedCountries => f.write_str("onboarded countries"),
        }
    }
}

/// What went wrong while obtaining a package.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PackageErrorKind {
    /// Server answered "not modified" but nothing is cached.
    #[error("not modified but no cached copy exists")]
    MissingCache,

    /// Fresh response carried no ETag.
    #[error("response is missing an ETag")]
    JsonArchiveEtagError,

    /// Fresh response carried no package.
    #[error("response package is missing or empty")]
    JsonArchiveFileMissing,

    /// Package signature did not verify against any trust anchor.
    #[error("package signature is invalid")]
    JsonArchiveSignatureInvalid,

    /// Verified payload could not be decoded.
    #[error("payload decoding failed: {message}")]
    DecodingError {
        /// Decoder message.
        message: String,
    },

    /// HTTP 400–409.
    #[error("client error")]
    ClientError,

    /// Any other HTTP or transport failure.
    #[error("server error")]
    ServerError,
}

impl PackageErrorKind {
    /// Suffix used when building stable error codes.
    #[must_use]
    pub const fn code_suffix(&self) -> &'static str {
        match self {
            Self::MissingCache => "MISSING_CACHE",
            Self::JsonArchiveEtagError => "JSON_ARCHIVE_ETAG_ERROR",
            Self::JsonArchiveFileMissing => "JSON_ARCHIVE_FILE_MISSING",
            Self::JsonArchiveSignatureInvalid => "JSON_ARCHIVE_SIGNATURE_INVALID",
            Self::DecodingError { .. } => "DECODING_ERROR",
            Self::ClientError => "CLIENT_ERROR",
            Self::ServerError => "SERVER_ERROR",
        }
    }

    /// Integrity failures indicate a compromised or malformed response and
    /// must never be answered with stale cached data.
    #[must_use]
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::JsonArchiveEtagError
                | Self::JsonArchiveFileMissing
                | Self::JsonArchiveSignatureInvalid
                | Self::DecodingError { .. }
        )
    }

    /// Client and server errors can be retried after backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ClientError | Self::ServerError)
    }
}

/// A download failure for a specific package.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{origin}: {kind}")]
pub struct PackageError {
    /// Package that failed.
    pub origin: PackageOrigin,
    /// Failure kind.
    pub kind: PackageErrorKind,
}

impl PackageError {
    /// Create a new package error.
    #[must_use]
    pub fn new(origin: PackageOrigin, kind: PackageErrorKind) -> Self {
        Self { origin, kind }
    }

    /// Stable identifier, e.g. `INVALIDATION_RULE_JSON_ARCHIVE_SIGNATURE_INVALID`.
    #[must_use]
    pub fn code(&self) -> String {
        format!("{}_{}", self.origin.code_prefix(), self.kind.code_suffix())
    }
}

/// Errors returned by the download services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    /// No connectivity (including request timeouts).
    #[error("No network connection")]
    NoNetwork,

    /// Package-specific failure.
    #[error(transparent)]
    Package(#[from] PackageError),
}

impl DownloadError {
    /// Stable identifier.
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            Self::NoNetwork => "NO_NETWORK".to_string(),
            Self::Package(e) => e.code(),
        }
    }

    /// Whether a later retry may succeed without user intervention.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NoNetwork => true,
            Self::Package(e) => e.kind.is_retryable(),
        }
    }
}

/// Errors raised while assembling the engine from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A trust anchor is not valid hex.
    #[error("Invalid trust anchor: {reason}")]
    InvalidTrustAnchor {
        /// Decoder message.
        reason: String,
    },

    /// The HTTP client could not be built.
    #[error("HTTP client error: {message}")]
    HttpClient {
        /// Error message.
        message: String,
    },
}

/// The onboarded-countries query shares the package download taxonomy.
pub type OnboardedCountriesError = DownloadError;

/// Failure of the rule interpreter itself.
///
/// Individual rules that merely fail or stay open are data, not errors; only a
/// structurally malformed rule aborts the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleValidationError {
    /// Rule logic does not form a valid expression.
    #[error("Malformed logic in rule {rule_identifier}: {reason}")]
    MalformedLogic {
        /// Offending rule.
        rule_identifier: String,
        /// What was wrong.
        reason: String,
    },

    /// Certificate claims could not be turned into evaluation data.
    #[error("Invalid evaluation data: {reason}")]
    InvalidEvaluationData {
        /// What was wrong.
        reason: String,
    },
}

/// Errors returned by [`crate::engine::ValidationOrchestrator::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Certificate expired before the validation clock.
    #[error("Certificate expired at {expiration_time}, validation clock is {validation_clock}")]
    TechnicalValidationFailed {
        /// Certificate expiry (Unix seconds).
        expiration_time: i64,
        /// Validation instant (Unix seconds).
        validation_clock: i64,
    },

    /// No connectivity.
    #[error("No network connection")]
    NoNetwork,

    /// Value-set download was rejected with HTTP 400–409.
    #[error("Value set client error")]
    ValueSetClientError,

    /// Any other value-set download failure.
    #[error("Value set server error: {cause}")]
    ValueSetServerError {
        /// Underlying package failure.
        cause: PackageErrorKind,
    },

    /// Acceptance or invalidation rule download failure.
    #[error("Rule download failed: {0}")]
    Rule(PackageError),

    /// Rule interpreter failure.
    #[error("Rules validation error: {0}")]
    RulesValidationError(#[from] RuleValidationError),
}

impl ValidationError {
    /// Stable identifier.
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            Self::TechnicalValidationFailed { .. } => "TECHNICAL_VALIDATION_FAILED".to_string(),
            Self::NoNetwork => "NO_NETWORK".to_string(),
            Self::ValueSetClientError => "VALUE_SET_CLIENT_ERROR".to_string(),
            Self::ValueSetServerError { .. } => "VALUE_SET_SERVER_ERROR".to_string(),
            Self::Rule(e) => e.code(),
            Self::RulesValidationError(_) => "RULES_VALIDATION_ERROR".to_string(),
        }
    }

    /// Network, client and server errors invite a retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NoNetwork | Self::ValueSetClientError => true,
            Self::ValueSetServerError { cause } => !cause.is_integrity_failure(),
            Self::Rule(e) => e.kind.is_retryable(),
            Self::TechnicalValidationFailed { .. } | Self::RulesValidationError(_) => false,
        }
    }

    /// Integrity and technical errors block validation outright.
    #[must_use]
    pub fn is_hard_block(&self) -> bool {
        !self.is_retryable()
    }

    /// Map a value-set download failure.
    #[must_use]
    pub fn from_value_set_failure(error: DownloadError) -> Self {
        match error {
            DownloadError::NoNetwork => Self::NoNetwork,
            DownloadError::Package(PackageError {
                kind: PackageErrorKind::ClientError,
                ..
            }) => Self::ValueSetClientError,
            DownloadError::Package(e) => Self::ValueSetServerError { cause: e.kind },
        }
    }

    /// Map a rule download failure.
    #[must_use]
    pub fn from_rule_failure(error: DownloadError) -> Self {
        match error {
            DownloadError::NoNetwork => Self::NoNetwork,
            DownloadError::Package(e) => Self::Rule(e),
        }
    }
}
