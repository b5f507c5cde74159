//! End-to-end validation through the orchestrator.

use std::time::Duration;

use dcc_validation_core::store::Store;
use dcc_validation_core::{
    HealthCertificateValidationReport, HttpFailure, PackageOrigin, RuleCategory, RuleOutcome,
    ValidationConfig, ValidationError,
};
use serde_json::json;

use crate::support::{
    approved_product_rule, certificate, clock, complete_series_rule, rule_json, valid_certificate,
    value_sets, Harness,
};

fn outcomes(report: &HealthCertificateValidationReport) -> Vec<RuleOutcome> {
    report.results().iter().map(|r| r.outcome).collect()
}

#[tokio::test]
async fn two_passing_rules_pass() {
    let harness = Harness::new();
    harness.publish_standard(json!([
        complete_series_rule("VR-DE-0001"),
        approved_product_rule("VR-DE-0002", "vaccines-covid-19-names"),
    ]));

    let report = harness
        .orchestrator(ValidationConfig::default())
        .validate(&valid_certificate(), "DE", clock())
        .await
        .unwrap();

    assert!(matches!(report, HealthCertificateValidationReport::ValidationPassed(_)));
    assert_eq!(outcomes(&report), vec![RuleOutcome::Passed, RuleOutcome::Passed]);
    assert_eq!(harness.store.writes(), 3);
}

#[tokio::test]
async fn unknown_value_set_makes_report_open() {
    let harness = Harness::new();
    harness.publish_standard(json!([
        complete_series_rule("VR-DE-0001"),
        approved_product_rule("VR-DE-0002", "vaccines-not-published"),
    ]));

    let report = harness
        .orchestrator(ValidationConfig::default())
        .validate(&valid_certificate(), "DE", clock())
        .await
        .unwrap();

    assert!(matches!(report, HealthCertificateValidationReport::ValidationOpen(_)));
    assert_eq!(outcomes(&report), vec![RuleOutcome::Passed, RuleOutcome::Open]);
}

#[tokio::test]
async fn rules_of_other_countries_are_ignored() {
    let harness = Harness::new();
    harness.publish_standard(json!([
        complete_series_rule("VR-DE-0001"),
        rule_json("VR-FR-0001", "Acceptance", "FR", json!(false)),
    ]));

    let report = harness
        .orchestrator(ValidationConfig::default())
        .validate(&valid_certificate(), "DE", clock())
        .await
        .unwrap();

    assert!(report.is_passed());
    assert_eq!(report.results().len(), 1);
}

#[tokio::test]
async fn issuer_invalidation_rule_fails_report() {
    let harness = Harness::new();
    harness.publish(PackageOrigin::ValueSets, "\"vs-1\"", &value_sets());
    harness.publish(
        PackageOrigin::Rules(RuleCategory::Acceptance),
        "\"ar-1\"",
        &json!([complete_series_rule("VR-DE-0001")]),
    );
    harness.publish(
        PackageOrigin::Rules(RuleCategory::Invalidation),
        "\"ir-1\"",
        &json!([rule_json(
            "IR-NL-0001",
            "Invalidation",
            "NL",
            json!({"!==": [{"extractFromUVCI": [{"var": "payload.v.0.ci"}, 2]}, "187"]})
        )]),
    );

    let report = harness
        .orchestrator(ValidationConfig::default())
        .validate(&valid_certificate(), "DE", clock())
        .await
        .unwrap();

    assert_eq!(report.status(), "failed");
    let ids: Vec<_> = report.results().iter().map(|r| r.rule_identifier()).collect();
    assert_eq!(ids, vec!["VR-DE-0001", "IR-NL-0001"]);
}

#[tokio::test]
async fn expired_certificate_fails_without_network() {
    let harness = Harness::new();
    harness.publish_standard(json!([complete_series_rule("VR-DE-0001")]));

    let expired = certificate(clock().timestamp() - 1);
    let err = harness
        .orchestrator(ValidationConfig::default())
        .validate(&expired, "DE", clock())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "TECHNICAL_VALIDATION_FAILED");
    assert!(harness.client.requests().is_empty());
}

#[tokio::test]
async fn certificate_expiring_at_clock_is_still_valid() {
    let harness = Harness::new();
    harness.publish_standard(json!([]));

    let report = harness
        .orchestrator(ValidationConfig::default())
        .validate(&certificate(clock().timestamp()), "DE", clock())
        .await
        .unwrap();
    assert!(report.is_passed());
    assert!(report.results().is_empty());
}

#[tokio::test]
async fn value_set_failure_stops_before_rules() {
    let harness = Harness::new();
    harness
        .client
        .push(PackageOrigin::ValueSets, Err(HttpFailure::ServerError(403)));

    let err = harness
        .orchestrator(ValidationConfig::default())
        .validate(&valid_certificate(), "DE", clock())
        .await
        .unwrap_err();

    assert_eq!(err, ValidationError::ValueSetClientError);
    assert_eq!(harness.client.requests().len(), 1);
}

#[tokio::test]
async fn value_set_integrity_failure_is_server_error() {
    let harness = Harness::new();
    let forged = harness.publisher.publish_forged("\"vs-1\"", &value_sets());
    harness.client.push(PackageOrigin::ValueSets, forged);

    let err = harness
        .orchestrator(ValidationConfig::default())
        .validate(&valid_certificate(), "DE", clock())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "VALUE_SET_SERVER_ERROR");
    assert!(err.is_hard_block());
}

#[tokio::test]
async fn acceptance_failure_masks_nothing() {
    let harness = Harness::new();
    harness.publish(PackageOrigin::ValueSets, "\"vs-1\"", &value_sets());
    harness.client.push(
        PackageOrigin::Rules(RuleCategory::Acceptance),
        Err(HttpFailure::NoNetworkConnection),
    );

    let err = harness
        .orchestrator(ValidationConfig::default())
        .validate(&valid_certificate(), "DE", clock())
        .await
        .unwrap_err();

    assert_eq!(err, ValidationError::NoNetwork);
    assert!(harness
        .client
        .requests_for(PackageOrigin::Rules(RuleCategory::Invalidation))
        .is_empty());
    assert_eq!(harness.store.writes(), 0);
    assert_eq!(harness.store.value_sets_cache(), None);
}

#[tokio::test]
async fn invalidation_missing_cache_is_reported() {
    let harness = Harness::new();
    harness.publish(PackageOrigin::ValueSets, "\"vs-1\"", &value_sets());
    harness.publish(
        PackageOrigin::Rules(RuleCategory::Acceptance),
        "\"ar-1\"",
        &json!([complete_series_rule("VR-DE-0001")]),
    );

    let err = harness
        .orchestrator(ValidationConfig::default())
        .validate(&valid_certificate(), "DE", clock())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "INVALIDATION_RULE_MISSING_CACHE");
}

#[tokio::test]
async fn malformed_rule_aborts_validation() {
    let harness = Harness::new();
    harness.publish_standard(json!([
        complete_series_rule("VR-DE-0001"),
        rule_json("VR-DE-0002", "Acceptance", "DE", json!({"if": [true]})),
    ]));

    let err = harness
        .orchestrator(ValidationConfig::default())
        .validate(&valid_certificate(), "DE", clock())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "RULES_VALIDATION_ERROR");
}

#[tokio::test]
async fn repeated_validation_revalidates_without_writes() {
    let harness = Harness::new();
    harness.publish(PackageOrigin::ValueSets, "\"vs-1\"", &value_sets());
    harness.publish(
        PackageOrigin::Rules(RuleCategory::Acceptance),
        "\"ar-1\"",
        &json!([complete_series_rule("VR-DE-0001")]),
    );
    harness.publish(
        PackageOrigin::Rules(RuleCategory::Invalidation),
        "\"ir-1\"",
        &json!([rule_json("IR-NL-0001", "Invalidation", "NL", json!(true))]),
    );
    for origin in [
        PackageOrigin::ValueSets,
        PackageOrigin::Rules(RuleCategory::Acceptance),
        PackageOrigin::Rules(RuleCategory::Invalidation),
    ] {
        harness.client.push(origin, Err(HttpFailure::NotModified));
    }
    let orchestrator = harness.orchestrator(ValidationConfig::default());

    let first = orchestrator
        .validate(&valid_certificate(), "DE", clock())
        .await
        .unwrap();
    let writes = harness.store.writes();
    assert_eq!(writes, 3);
    let second = orchestrator
        .validate(&valid_certificate(), "DE", clock())
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(harness.store.writes(), writes);
    assert_eq!(
        harness
            .client
            .requests_for(PackageOrigin::Rules(RuleCategory::Acceptance)),
        vec![None, Some("\"ar-1\"".to_string())]
    );
}

#[tokio::test]
async fn cancelled_validation_writes_nothing() {
    let harness = Harness::new();
    harness.publish(PackageOrigin::ValueSets, "\"vs-1\"", &value_sets());
    harness.publish(
        PackageOrigin::Rules(RuleCategory::Acceptance),
        "\"ar-1\"",
        &json!([complete_series_rule("VR-DE-0001")]),
    );
    harness.client.hang(PackageOrigin::Rules(RuleCategory::Acceptance));
    let orchestrator = harness.orchestrator(ValidationConfig::default());

    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        orchestrator.validate(&valid_certificate(), "DE", clock()),
    )
    .await;

    assert!(outcome.is_err());
    assert_eq!(harness.store.value_sets_cache(), None);
    assert_eq!(harness.store.rules_cache(RuleCategory::Acceptance), None);
    assert_eq!(harness.store.writes(), 0);
}

#[tokio::test]
async fn cancelled_during_invalidation_writes_nothing() {
    let harness = Harness::new();
    harness.publish_standard(json!([complete_series_rule("VR-DE-0001")]));
    harness.client.hang(PackageOrigin::Rules(RuleCategory::Invalidation));
    let orchestrator = harness.orchestrator(ValidationConfig::default());

    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        orchestrator.validate(&valid_certificate(), "DE", clock()),
    )
    .await;

    assert!(outcome.is_err());
    assert_eq!(harness.store.writes(), 0);
}

#[tokio::test]
async fn empty_invalidation_cache_is_missing_on_revalidation() {
    let harness = Harness::new();
    harness.publish_standard(json!([complete_series_rule("VR-DE-0001")]));
    harness.client.push(
        PackageOrigin::Rules(RuleCategory::Invalidation),
        Err(HttpFailure::NotModified),
    );
    let orchestrator = harness.orchestrator(ValidationConfig::default());

    assert!(orchestrator
        .validate(&valid_certificate(), "DE", clock())
        .await
        .unwrap()
        .is_passed());
    let err = orchestrator
        .validate(&valid_certificate(), "DE", clock())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALIDATION_RULE_MISSING_CACHE");
}

#[tokio::test]
async fn onboarded_countries_through_orchestrator() {
    let harness = Harness::new();
    harness.publish(
        PackageOrigin::OnboardedCountries,
        "\"c1\"",
        &json!(["IT", "DE"]),
    );

    let countries = harness
        .orchestrator(ValidationConfig::default())
        .onboarded_countries()
        .await
        .unwrap();
    assert_eq!(countries, vec!["DE", "IT"]);
}
