//! Download pipeline: conditional fetch, integrity checks, cache behavior.

use dcc_validation_core::{
    DownloadError, HttpFailure, PackageDownloadResponse, PackageErrorKind, PackageOrigin,
    RuleCategory, RuleCategoryCache,
};
use dcc_validation_core::store::Store;
use serde_json::json;

use crate::support::{complete_series_rule, value_sets, Harness};

const ACCEPTANCE: PackageOrigin = PackageOrigin::Rules(RuleCategory::Acceptance);

fn kind_of(error: DownloadError) -> PackageErrorKind {
    match error {
        DownloadError::Package(e) => e.kind,
        DownloadError::NoNetwork => panic!("expected a package error"),
    }
}

// =============================================================================
// Fresh downloads and revalidation
// =============================================================================

#[tokio::test]
async fn fresh_download_caches_etag_with_rules() {
    let harness = Harness::new();
    harness.publish(ACCEPTANCE, "\"v1\"", &json!([complete_series_rule("VR-DE-0001")]));
    let downloader = harness.downloader(false);

    let rules = downloader.download_rules(RuleCategory::Acceptance).await.unwrap();

    assert_eq!(rules.len(), 1);
    assert_eq!(
        harness.store.rules_cache(RuleCategory::Acceptance),
        Some(RuleCategoryCache {
            last_etag: "\"v1\"".to_string(),
            rules,
        })
    );
    assert_eq!(harness.client.requests_for(ACCEPTANCE), vec![None]);
}

#[tokio::test]
async fn not_modified_serves_cache_without_writing() {
    let harness = Harness::new();
    harness.publish(ACCEPTANCE, "\"v1\"", &json!([complete_series_rule("VR-DE-0001")]));
    harness.client.push(ACCEPTANCE, Err(HttpFailure::NotModified));
    let downloader = harness.downloader(false);

    let first = downloader.download_rules(RuleCategory::Acceptance).await.unwrap();
    let writes = harness.store.writes();
    let second = downloader.download_rules(RuleCategory::Acceptance).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(harness.store.writes(), writes);
    assert_eq!(
        harness.client.requests_for(ACCEPTANCE),
        vec![None, Some("\"v1\"".to_string())]
    );
}

#[tokio::test]
async fn not_modified_without_cache_is_missing_cache() {
    let harness = Harness::new();
    harness
        .client
        .push(PackageOrigin::Rules(RuleCategory::Invalidation), Err(HttpFailure::NotModified));

    let err = harness
        .downloader(false)
        .download_rules(RuleCategory::Invalidation)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "INVALIDATION_RULE_MISSING_CACHE");
    assert_eq!(harness.store.writes(), 0);
}

#[tokio::test]
async fn not_modified_over_empty_rules_is_missing_cache() {
    let harness = Harness::new();
    harness.publish(ACCEPTANCE, "\"v1\"", &json!([]));
    harness.client.push(ACCEPTANCE, Err(HttpFailure::NotModified));
    let downloader = harness.downloader(false);

    assert!(downloader
        .download_rules(RuleCategory::Acceptance)
        .await
        .unwrap()
        .is_empty());
    let err = downloader.download_rules(RuleCategory::Acceptance).await.unwrap_err();

    assert_eq!(err.code(), "ACCEPTANCE_RULE_MISSING_CACHE");
    assert_eq!(
        harness.client.requests_for(ACCEPTANCE),
        vec![None, Some("\"v1\"".to_string())]
    );
}

// =============================================================================
// Deferred cache writes
// =============================================================================

#[tokio::test]
async fn staged_rules_are_written_on_commit() {
    let harness = Harness::new();
    harness.publish(ACCEPTANCE, "\"v1\"", &json!([complete_series_rule("VR-DE-0001")]));
    harness.client.push(ACCEPTANCE, Err(HttpFailure::NotModified));
    let downloader = harness.downloader(false);

    let staged = downloader.stage_rules(RuleCategory::Acceptance).await.unwrap();
    assert!(staged.is_fresh());
    assert_eq!(harness.store.writes(), 0);

    let rules = staged.commit(&*harness.store);
    assert_eq!(rules.len(), 1);
    assert_eq!(harness.store.writes(), 1);

    let revalidated = downloader.stage_rules(RuleCategory::Acceptance).await.unwrap();
    assert!(!revalidated.is_fresh());
    assert_eq!(revalidated.commit(&*harness.store), rules);
    assert_eq!(harness.store.writes(), 1);
}

#[tokio::test]
async fn dropped_stage_leaves_cache_untouched() {
    let harness = Harness::new();
    harness.publish(PackageOrigin::ValueSets, "\"vs-1\"", &value_sets());
    let downloader = harness.downloader(false);

    drop(downloader.stage_value_sets().await.unwrap());

    assert_eq!(harness.store.value_sets_cache(), None);
    assert_eq!(harness.store.writes(), 0);
}

// =============================================================================
// Integrity failures
// =============================================================================

#[tokio::test]
async fn forged_signature_leaves_cache_unchanged() {
    let harness = Harness::new();
    harness.publish(ACCEPTANCE, "\"v1\"", &json!([complete_series_rule("VR-DE-0001")]));
    let forged = harness
        .publisher
        .publish_forged("\"v2\"", &json!([complete_series_rule("VR-DE-0666")]));
    harness.client.push(ACCEPTANCE, forged);
    let downloader = harness.downloader(false);

    downloader.download_rules(RuleCategory::Acceptance).await.unwrap();
    let before = harness.store.rules_cache(RuleCategory::Acceptance);

    let err = downloader.download_rules(RuleCategory::Acceptance).await.unwrap_err();

    assert_eq!(err.code(), "ACCEPTANCE_RULE_JSON_ARCHIVE_SIGNATURE_INVALID");
    assert_eq!(harness.store.rules_cache(RuleCategory::Acceptance), before);
}

#[tokio::test]
async fn missing_etag_is_rejected() {
    let harness = Harness::new();
    let mut response = harness
        .publisher
        .publish("\"v1\"", &json!([complete_series_rule("VR-DE-0001")]))
        .unwrap();
    response.etag = None;
    harness.client.push(ACCEPTANCE, Ok(response));

    let err = harness
        .downloader(false)
        .download_rules(RuleCategory::Acceptance)
        .await
        .unwrap_err();
    assert_eq!(kind_of(err), PackageErrorKind::JsonArchiveEtagError);
    assert_eq!(harness.store.writes(), 0);
}

#[tokio::test]
async fn empty_body_is_file_missing() {
    let harness = Harness::new();
    harness.client.push(
        PackageOrigin::ValueSets,
        Ok(PackageDownloadResponse::from_body(Some("\"v1\"".to_string()), &[])),
    );

    let err = harness.downloader(false).download_value_sets().await.unwrap_err();
    assert_eq!(err.code(), "VALUE_SET_JSON_ARCHIVE_FILE_MISSING");
}

#[tokio::test]
async fn undecodable_payload_is_decoding_error() {
    let harness = Harness::new();
    harness.publish(ACCEPTANCE, "\"v1\"", &json!({"not": "a rule list"}));

    let err = harness
        .downloader(false)
        .download_rules(RuleCategory::Acceptance)
        .await
        .unwrap_err();
    assert!(matches!(kind_of(err), PackageErrorKind::DecodingError { .. }));
    assert_eq!(harness.store.writes(), 0);
}

// =============================================================================
// Transport failures and offline fallback
// =============================================================================

#[tokio::test]
async fn transport_failures_map_to_codes() {
    let cases = [
        (HttpFailure::NoNetworkConnection, "NO_NETWORK"),
        (HttpFailure::ServerError(404), "ACCEPTANCE_RULE_CLIENT_ERROR"),
        (HttpFailure::ServerError(502), "ACCEPTANCE_RULE_SERVER_ERROR"),
        (HttpFailure::Other, "ACCEPTANCE_RULE_SERVER_ERROR"),
    ];
    for (failure, code) in cases {
        let harness = Harness::new();
        harness.client.push(ACCEPTANCE, Err(failure));
        let err = harness
            .downloader(false)
            .download_rules(RuleCategory::Acceptance)
            .await
            .unwrap_err();
        assert_eq!(err.code(), code);
    }
}

#[tokio::test]
async fn offline_fallback_serves_cache_on_server_error() {
    let harness = Harness::new();
    harness.publish(ACCEPTANCE, "\"v1\"", &json!([complete_series_rule("VR-DE-0001")]));
    harness.client.push(ACCEPTANCE, Err(HttpFailure::ServerError(503)));

    let strict = harness.downloader(false);
    let cached = strict.download_rules(RuleCategory::Acceptance).await.unwrap();
    assert!(strict.download_rules(RuleCategory::Acceptance).await.is_err());

    let lenient = harness.downloader(true);
    assert_eq!(
        lenient.download_rules(RuleCategory::Acceptance).await.unwrap(),
        cached
    );
}

#[tokio::test]
async fn offline_fallback_never_masks_integrity_failures() {
    let harness = Harness::new();
    harness.publish(ACCEPTANCE, "\"v1\"", &json!([complete_series_rule("VR-DE-0001")]));
    let forged = harness
        .publisher
        .publish_forged("\"v2\"", &json!([complete_series_rule("VR-DE-0001")]));
    harness.client.push(ACCEPTANCE, forged);
    let downloader = harness.downloader(true);

    downloader.download_rules(RuleCategory::Acceptance).await.unwrap();
    let err = downloader.download_rules(RuleCategory::Acceptance).await.unwrap_err();
    assert_eq!(kind_of(err), PackageErrorKind::JsonArchiveSignatureInvalid);
}

#[tokio::test]
async fn offline_fallback_never_serves_empty_rules() {
    let harness = Harness::new();
    harness.publish(ACCEPTANCE, "\"v1\"", &json!([]));
    harness.client.push(ACCEPTANCE, Err(HttpFailure::NoNetworkConnection));
    let downloader = harness.downloader(true);

    downloader.download_rules(RuleCategory::Acceptance).await.unwrap();
    let err = downloader.download_rules(RuleCategory::Acceptance).await.unwrap_err();
    assert_eq!(err, DownloadError::NoNetwork);
}

#[tokio::test]
async fn offline_fallback_without_cache_reports_error() {
    let harness = Harness::new();
    harness.client.push(PackageOrigin::ValueSets, Err(HttpFailure::NoNetworkConnection));

    let err = harness.downloader(true).download_value_sets().await.unwrap_err();
    assert_eq!(err, DownloadError::NoNetwork);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn concurrent_downloads_are_coalesced() {
    let harness = Harness::new();
    harness.publish(ACCEPTANCE, "\"v1\"", &json!([complete_series_rule("VR-DE-0001")]));
    harness.client.push(ACCEPTANCE, Err(HttpFailure::NotModified));
    let downloader = harness.downloader(false);

    let (a, b) = tokio::join!(
        downloader.download_rules(RuleCategory::Acceptance),
        downloader.download_rules(RuleCategory::Acceptance),
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(
        harness.client.requests_for(ACCEPTANCE),
        vec![None, Some("\"v1\"".to_string())]
    );
}

// =============================================================================
// Booster notifications and onboarded countries
// =============================================================================

#[tokio::test]
async fn booster_execution_date_needs_fresh_non_empty_rules() {
    let booster = PackageOrigin::Rules(RuleCategory::BoosterNotification);

    let harness = Harness::new();
    harness.publish(booster, "\"b1\"", &json!([]));
    harness
        .downloader(false)
        .download_rules(RuleCategory::BoosterNotification)
        .await
        .unwrap();
    assert_eq!(harness.store.last_booster_notifications_execution_date(), None);

    let harness = Harness::new();
    let mut rule = complete_series_rule("BNR-DE-0001");
    rule["Type"] = json!("BoosterNotification");
    harness.publish(booster, "\"b1\"", &json!([rule]));
    harness.client.push(booster, Err(HttpFailure::NotModified));
    let downloader = harness.downloader(false);

    downloader
        .download_rules(RuleCategory::BoosterNotification)
        .await
        .unwrap();
    let recorded = harness.store.last_booster_notifications_execution_date();
    assert!(recorded.is_some());

    downloader
        .download_rules(RuleCategory::BoosterNotification)
        .await
        .unwrap();
    assert_eq!(harness.store.last_booster_notifications_execution_date(), recorded);
}

#[tokio::test]
async fn onboarded_countries_are_sorted_and_unique() {
    let harness = Harness::new();
    harness.publish(
        PackageOrigin::OnboardedCountries,
        "\"c1\"",
        &json!(["NL", "DE", "at", "DE"]),
    );
    harness
        .client
        .push(PackageOrigin::OnboardedCountries, Err(HttpFailure::NotModified));
    let downloader = harness.downloader(false);

    let countries = downloader.download_onboarded_countries().await.unwrap();
    assert_eq!(countries, vec!["AT", "DE", "NL"]);

    let again = downloader.download_onboarded_countries().await.unwrap();
    assert_eq!(again, countries);
}
