//! Rule application and result interpretation.
//!
//! ## Applicability
//!
//! A rule is evaluated only when all of the following hold; otherwise it is
//! left out of the results entirely:
//!
//! - **Country**: acceptance and booster rules must belong to the arrival
//!   country, invalidation rules to the issuing country
//! - **Certificate type**: the rule covers the certificate type
//! - **Window**: the validation clock lies in `[valid_from, valid_to)`
//! - **Region**: the rule carries no region, or the same region as the filter
//!
//! Of several applicable versions of one rule identifier only the highest is
//! evaluated.
//!
//! ## Interpretation
//!
//! Any failed result fails the report; otherwise any open result makes it
//! open; otherwise it passes. An empty result list passes.

use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value as Json};
use tracing::{debug, instrument, warn};

use crate::certlogic;
use crate::error::RuleValidationError;
use crate::rules::{ExternalParameter, FilterParameter, Rule, RuleOutcome, RuleType, ValidationResult};

/// Interpreter name rules must declare.
pub const SUPPORTED_ENGINE: &str = "CERTLOGIC";

/// Highest supported rule schema major version.
pub const SUPPORTED_SCHEMA_MAJOR: u64 = 1;

/// Overall verdict for one certificate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "results", rename_all = "camelCase")]
pub enum HealthCertificateValidationReport {
    /// Every result passed.
    ValidationPassed(Vec<ValidationResult>),
    /// Some result is open and none failed.
    ValidationOpen(Vec<ValidationResult>),
    /// At least one result failed.
    ValidationFailed(Vec<ValidationResult>),
}

impl HealthCertificateValidationReport {
    /// All per-rule results carried by the report.
    #[must_use]
    pub fn results(&self) -> &[ValidationResult] {
        match self {
            Self::ValidationPassed(r) | Self::ValidationOpen(r) | Self::ValidationFailed(r) => r,
        }
    }

    /// Short status label.
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            Self::ValidationPassed(_) => "passed",
            Self::ValidationOpen(_) => "open",
            Self::ValidationFailed(_) => "failed",
        }
    }

    /// Whether the certificate passed.
    #[must_use]
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::ValidationPassed(_))
    }
}

/// Reduce per-rule results to a report.
#[must_use]
pub fn interpret(results: Vec<ValidationResult>) -> HealthCertificateValidationReport {
    if results.iter().any(|r| r.outcome == RuleOutcome::Failed) {
        HealthCertificateValidationReport::ValidationFailed(results)
    } else if results.iter().any(|r| r.outcome == RuleOutcome::Open) {
        HealthCertificateValidationReport::ValidationOpen(results)
    } else {
        HealthCertificateValidationReport::ValidationPassed(results)
    }
}

/// Evaluates business rules against certificate claims.
#[derive(Debug, Clone, Default)]
pub struct RuleEvaluationEngine;

impl RuleEvaluationEngine {
    /// Create a new engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Evaluate every applicable rule.
    ///
    /// Results follow the order of `rules`. A rule whose logic is not a valid
    /// expression aborts the whole batch.
    #[instrument(skip_all, fields(rules = rules.len(), country = %filter.country_code))]
    pub fn apply_rules(
        &self,
        rules: &[Rule],
        claims: &Json,
        filter: &FilterParameter,
        external: &ExternalParameter,
    ) -> Result<Vec<ValidationResult>, RuleValidationError> {
        let applicable = select_applicable(rules, filter, external);
        debug!(
            "{} of {} rules applicable",
            applicable.len(),
            rules.len()
        );
        if applicable.is_empty() {
            return Ok(Vec::new());
        }

        let data = evaluation_data(claims, filter, external)?;
        applicable
            .into_iter()
            .map(|rule| evaluate_rule(rule, &data))
            .collect()
    }
}

/// Whether `rule` is in scope for the given parameters.
#[must_use]
pub fn is_applicable(rule: &Rule, filter: &FilterParameter, external: &ExternalParameter) -> bool {
    let country = match rule.rule_type {
        RuleType::Invalidation => &external.issuer_country_code,
        RuleType::Acceptance | RuleType::BoosterNotification => &filter.country_code,
    };
    let region_matches = match (&rule.region, &filter.region) {
        (None, _) => true,
        (Some(rule_region), Some(region)) => rule_region.eq_ignore_ascii_case(region),
        (Some(_), None) => false,
    };

    rule.country_code.eq_ignore_ascii_case(country)
        && rule.certificate_type.covers(filter.certificate_type)
        && rule.is_valid_at(filter.validation_clock)
        && region_matches
}

fn select_applicable<'a>(
    rules: &'a [Rule],
    filter: &FilterParameter,
    external: &ExternalParameter,
) -> Vec<&'a Rule> {
    let mut selected: Vec<&Rule> = Vec::new();
    for rule in rules.iter().filter(|r| is_applicable(r, filter, external)) {
        match selected.iter_mut().find(|s| s.identifier == rule.identifier) {
            Some(existing) => {
                if rule.compare_version(*existing).is_gt() {
                    *existing = rule;
                }
            },
            None => selected.push(rule),
        }
    }
    selected
}

fn evaluate_rule(rule: &Rule, data: &Json) -> Result<ValidationResult, RuleValidationError> {
    if !rule.engine.eq_ignore_ascii_case(SUPPORTED_ENGINE) {
        return Ok(open(rule, format!("unsupported engine {}", rule.engine)));
    }
    match rule.schema_major() {
        Some(major) if major <= SUPPORTED_SCHEMA_MAJOR => {},
        _ => {
            return Ok(open(
                rule,
                format!("unsupported schema version {}", rule.schema_version),
            ))
        },
    }

    let expr = certlogic::parse(&rule.logic).map_err(|e| RuleValidationError::MalformedLogic {
        rule_identifier: rule.identifier.clone(),
        reason: e.reason,
    })?;

    let result = match certlogic::evaluate(&expr, data) {
        Ok(value) => match value.truthiness() {
            Some(true) => ValidationResult {
                rule: rule.clone(),
                outcome: RuleOutcome::Passed,
                detail: None,
            },
            Some(false) => ValidationResult {
                rule: rule.clone(),
                outcome: RuleOutcome::Failed,
                detail: None,
            },
            None => open(rule, "result is neither true nor false".to_string()),
        },
        Err(e) => {
            warn!(rule = %rule.identifier, "Rule evaluation inconclusive: {}", e);
            open(rule, e.reason)
        },
    };
    debug!(rule = %rule.identifier, outcome = ?result.outcome, "Rule evaluated");
    Ok(result)
}

fn open(rule: &Rule, detail: String) -> ValidationResult {
    ValidationResult {
        rule: rule.clone(),
        outcome: RuleOutcome::Open,
        detail: Some(detail),
    }
}

/// Assemble the `{payload, external}` object rule logic is evaluated on.
pub fn evaluation_data(
    claims: &Json,
    filter: &FilterParameter,
    external: &ExternalParameter,
) -> Result<Json, RuleValidationError> {
    if !claims.is_object() {
        return Err(RuleValidationError::InvalidEvaluationData {
            reason: "claims must be a JSON object".to_string(),
        });
    }

    Ok(json!({
        "payload": claims,
        "external": {
            "validationClock": format_instant(external.validation_clock),
            "valueSets": external.value_sets,
            "countryCode": filter.country_code,
            "exp": unix_to_rfc3339(external.expiration_time, "expiration time")?,
            "iat": unix_to_rfc3339(external.issued_at, "issuance time")?,
            "issuerCountryCode": external.issuer_country_code,
            "kid": base64::engine::general_purpose::STANDARD.encode(&external.key_identifier),
            "region": filter.region,
        }
    }))
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn unix_to_rfc3339(seconds: i64, what: &str) -> Result<String, RuleValidationError> {
    DateTime::from_timestamp(seconds, 0)
        .map(format_instant)
        .ok_or_else(|| RuleValidationError::InvalidEvaluationData {
            reason: format!("{what} {seconds} is out of range"),
        })
}
