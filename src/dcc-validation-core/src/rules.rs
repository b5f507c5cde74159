//! Business-rule data model.
//!
//! Rules are delivered by the distribution service in the EU DCC business
//! rule schema (PascalCase field names). They are immutable once downloaded;
//! a category's rule set is replaced as a whole.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::certificate::CertificateType;

/// Rule categories, each downloaded and cached separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleCategory {
    /// Rules of the arrival country.
    Acceptance,
    /// Rules of the issuing country.
    Invalidation,
    /// Booster notification rules.
    BoosterNotification,
}

impl RuleCategory {
    /// All categories.
    pub const ALL: [RuleCategory; 3] = [
        RuleCategory::Acceptance,
        RuleCategory::Invalidation,
        RuleCategory::BoosterNotification,
    ];

    /// Path segment of the distribution endpoint.
    #[must_use]
    pub const fn endpoint_path(&self) -> &'static str {
        match self {
            Self::Acceptance => "version/v1/ehn-dgc/acceptance-rules",
            Self::Invalidation => "version/v1/ehn-dgc/invalidation-rules",
            Self::BoosterNotification => "version/v1/booster-notification-rules",
        }
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Acceptance => "acceptance",
            Self::Invalidation => "invalidation",
            Self::BoosterNotification => "booster-notification",
        })
    }
}

/// Rule type as carried in the `Type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleType {
    /// Acceptance rule.
    Acceptance,
    /// Invalidation rule.
    Invalidation,
    /// Booster notification rule.
    BoosterNotification,
}

/// Certificate types a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleCertificateType {
    /// Applies to every certificate type.
    General,
    /// Vaccination certificates only.
    Vaccination,
    /// Test certificates only.
    Test,
    /// Recovery certificates only.
    Recovery,
}

impl RuleCertificateType {
    /// Check whether a certificate of the given type is covered.
    #[must_use]
    pub fn covers(&self, certificate_type: CertificateType) -> bool {
        matches!(
            (self, certificate_type),
            (Self::General, _)
                | (Self::Vaccination, CertificateType::Vaccination)
                | (Self::Test, CertificateType::Test)
                | (Self::Recovery, CertificateType::Recovery)
        )
    }
}

/// Localised rule description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDescription {
    /// Language code.
    pub lang: String,
    /// Description text.
    pub desc: String,
}

/// A single business rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Rule {
    /// Rule identifier, e.g. `VR-DE-0001`.
    pub identifier: String,
    /// Acceptance, invalidation or booster notification.
    #[serde(rename = "Type")]
    pub rule_type: RuleType,
    /// Rule version (semver).
    pub version: String,
    /// Schema version of the rule format (semver).
    pub schema_version: String,
    /// Interpreter the logic targets.
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Interpreter version.
    #[serde(default)]
    pub engine_version: String,
    /// Certificate types covered.
    pub certificate_type: RuleCertificateType,
    /// Descriptions for display.
    #[serde(default)]
    pub description: Vec<RuleDescription>,
    /// Start of applicability (inclusive).
    pub valid_from: DateTime<Utc>,
    /// End of applicability (exclusive).
    pub valid_to: DateTime<Utc>,
    /// Claim paths the rule reads.
    #[serde(default)]
    pub affected_fields: Vec<String>,
    /// CertLogic expression.
    pub logic: serde_json::Value,
    /// ISO 3166 alpha-2 country code.
    #[serde(rename = "Country")]
    pub country_code: String,
    /// Optional region within the country.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

fn default_engine() -> String {
    "CERTLOGIC".to_string()
}

impl Rule {
    /// Compare rule versions, semantically when both parse.
    pub fn compare_version(&self, other: &Rule) -> Ordering {
        match (
            semver::Version::parse(&self.version),
            semver::Version::parse(&other.version),
        ) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => self.version.cmp(&other.version),
        }
    }

    /// Major component of the schema version, if parseable.
    #[must_use]
    pub fn schema_major(&self) -> Option<u64> {
        semver::Version::parse(&self.schema_version)
            .ok()
            .map(|v| v.major)
    }

    /// Description in the requested language, falling back to English.
    #[must_use]
    pub fn description_for(&self, lang: &str) -> Option<&str> {
        self.description
            .iter()
            .find(|d| d.lang.eq_ignore_ascii_case(lang))
            .or_else(|| self.description.iter().find(|d| d.lang == "en"))
            .map(|d| d.desc.as_str())
    }

    /// Whether `instant` lies within `[valid_from, valid_to)`.
    #[must_use]
    pub fn is_valid_at(&self, instant: DateTime<Utc>) -> bool {
        self.valid_from <= instant && instant < self.valid_to
    }
}

/// Selects which downloaded rules are in scope for one validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParameter {
    /// Validation instant.
    pub validation_clock: DateTime<Utc>,
    /// Arrival country (ISO alpha-2).
    pub country_code: String,
    /// Type of the certificate being validated.
    pub certificate_type: CertificateType,
    /// Optional region of the arrival country.
    pub region: Option<String>,
}

/// Everything beyond the claims that rule logic may reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalParameter {
    /// Validation instant.
    pub validation_clock: DateTime<Utc>,
    /// Code list name to codes.
    pub value_sets: HashMap<String, Vec<String>>,
    /// Certificate expiry (Unix seconds).
    pub expiration_time: i64,
    /// Certificate issuance (Unix seconds).
    pub issued_at: i64,
    /// Issuer country (ISO alpha-2).
    pub issuer_country_code: String,
    /// Signing key identifier.
    pub key_identifier: Vec<u8>,
}

/// Per-rule verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleOutcome {
    /// Rule logic evaluated to true.
    Passed,
    /// Rule logic could not be conclusively evaluated.
    Open,
    /// Rule logic evaluated to false.
    Failed,
}

/// Verdict of one rule against one certificate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// The evaluated rule.
    pub rule: Rule,
    /// Verdict.
    pub outcome: RuleOutcome,
    /// Why the rule stayed open, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ValidationResult {
    /// Identifier of the evaluated rule.
    #[must_use]
    pub fn rule_identifier(&self) -> &str {
        &self.rule.identifier
    }
}
