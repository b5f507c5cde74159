//! Shared fixtures: a scripted distribution service, a write-counting store
//! and certificate/rule builders.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use dcc_crypto::{P256Signer, PackageSigner};
use serde_json::{json, Value as Json};

use dcc_validation_core::store::{MemoryStore, Store};
use dcc_validation_core::{
    Client, HealthCertificate, HttpFailure, PackageDownloadResponse, PackageDownloader,
    PackageOrigin, RuleCategory, SignedPackage, TrustAnchorVerifier, ValidationConfig, ValidationOrchestrator,
};

pub type Response = Result<PackageDownloadResponse, HttpFailure>;

/// Distribution service that replays scripted responses.
///
/// Each origin has a queue; the last queued response repeats. An origin with
/// nothing queued answers "not modified". Origins marked as hanging never
/// answer.
#[derive(Default)]
pub struct ScriptedClient {
    responses: Mutex<HashMap<PackageOrigin, VecDeque<Response>>>,
    requests: Mutex<Vec<(PackageOrigin, Option<String>)>>,
    hanging: Mutex<HashSet<PackageOrigin>>,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, origin: PackageOrigin, response: Response) {
        self.responses
            .lock()
            .unwrap()
            .entry(origin)
            .or_default()
            .push_back(response);
    }

    pub fn hang(&self, origin: PackageOrigin) {
        self.hanging.lock().unwrap().insert(origin);
    }

    pub fn requests(&self) -> Vec<(PackageOrigin, Option<String>)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, origin: PackageOrigin) -> Vec<Option<String>> {
        self.requests()
            .into_iter()
            .filter(|(o, _)| *o == origin)
            .map(|(_, etag)| etag)
            .collect()
    }

    async fn respond(&self, origin: PackageOrigin, etag: Option<&str>) -> Response {
        self.requests
            .lock()
            .unwrap()
            .push((origin, etag.map(str::to_string)));
        // Yield so concurrent callers interleave.
        tokio::task::yield_now().await;

        let hanging = self.hanging.lock().unwrap().contains(&origin);
        if hanging {
            return std::future::pending().await;
        }

        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(&origin) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Err(HttpFailure::NotModified),
        }
    }
}

#[async_trait]
impl Client for ScriptedClient {
    async fn get_rules(&self, etag: Option<&str>, category: RuleCategory) -> Response {
        self.respond(PackageOrigin::Rules(category), etag).await
    }

    async fn get_value_sets(&self, etag: Option<&str>) -> Response {
        self.respond(PackageOrigin::ValueSets, etag).await
    }

    async fn get_onboarded_countries(&self, etag: Option<&str>) -> Response {
        self.respond(PackageOrigin::OnboardedCountries, etag).await
    }
}

/// Memory store that counts writes.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    writes: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Store for CountingStore {
    fn load(&self, key: &str) -> Option<Json> {
        self.inner.load(key)
    }

    fn save(&self, key: &str, value: Json) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.save(key, value);
    }
}

/// Signing side of the distribution service.
pub struct Publisher {
    signer: P256Signer,
}

impl Publisher {
    pub fn new() -> Self {
        Self {
            signer: P256Signer::random(),
        }
    }

    pub fn verifier(&self) -> Arc<TrustAnchorVerifier> {
        Arc::new(TrustAnchorVerifier::new(vec![self.signer.public_key().unwrap()]))
    }

    /// Fresh response carrying a signed, zipped payload.
    pub fn publish(&self, etag: &str, payload: &Json) -> Response {
        let bin = serde_json::to_vec(payload).unwrap();
        let package = SignedPackage::sign(bin, &self.signer).unwrap();
        Ok(PackageDownloadResponse::from_body(
            Some(etag.to_string()),
            &package.to_zip().unwrap(),
        ))
    }

    /// Fresh response whose payload was signed by somebody else.
    pub fn publish_forged(&self, etag: &str, payload: &Json) -> Response {
        let bin = serde_json::to_vec(payload).unwrap();
        let package = SignedPackage::sign(bin, &P256Signer::random()).unwrap();
        Ok(PackageDownloadResponse {
            etag: Some(etag.to_string()),
            package: Some(package),
        })
    }
}

pub struct Harness {
    pub client: Arc<ScriptedClient>,
    pub store: Arc<CountingStore>,
    pub publisher: Publisher,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            client: ScriptedClient::new(),
            store: CountingStore::new(),
            publisher: Publisher::new(),
        }
    }

    pub fn orchestrator(&self, config: ValidationConfig) -> ValidationOrchestrator {
        ValidationOrchestrator::with_dependencies(
            self.client.clone(),
            self.store.clone(),
            self.publisher.verifier(),
            config,
        )
    }

    pub fn downloader(&self, offline_fallback: bool) -> PackageDownloader {
        PackageDownloader::new(
            self.client.clone(),
            self.store.clone(),
            self.publisher.verifier(),
            offline_fallback,
        )
    }

    pub fn publish(&self, origin: PackageOrigin, etag: &str, payload: &Json) {
        self.client.push(origin, self.publisher.publish(etag, payload));
    }

    /// Publish value sets, the given acceptance rules and no invalidation rules.
    pub fn publish_standard(&self, acceptance: Json) {
        self.publish(PackageOrigin::ValueSets, "\"vs-1\"", &value_sets());
        self.publish(
            PackageOrigin::Rules(RuleCategory::Acceptance),
            "\"ar-1\"",
            &acceptance,
        );
        self.publish(
            PackageOrigin::Rules(RuleCategory::Invalidation),
            "\"ir-1\"",
            &json!([]),
        );
    }
}

pub fn clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 8, 1, 12, 0, 0).unwrap()
}

pub fn value_sets() -> Json {
    json!({
        "vp": {"items": [{"key": "1119349007", "displayText": "SARS-CoV-2 mRNA vaccine"}]},
        "mp": {"items": [{"key": "EU/1/20/1528", "displayText": "Comirnaty"}]},
        "ma": {"items": [{"key": "ORG-100030215", "displayText": "Biontech Manufacturing GmbH"}]},
        "tg": {"items": [{"key": "840539006", "displayText": "COVID-19"}]},
        "tcTt": {"items": []},
        "tcMa": {"items": []},
        "tcTr": {"items": []}
    })
}

pub fn rule_json(identifier: &str, rule_type: &str, country: &str, logic: Json) -> Json {
    json!({
        "Identifier": identifier,
        "Type": rule_type,
        "Country": country,
        "Version": "1.0.0",
        "SchemaVersion": "1.0.0",
        "Engine": "CERTLOGIC",
        "EngineVersion": "0.7.5",
        "CertificateType": "Vaccination",
        "Description": [{"lang": "en", "desc": identifier}],
        "ValidFrom": "2021-06-01T00:00:00Z",
        "ValidTo": "2030-06-01T00:00:00Z",
        "AffectedFields": [],
        "Logic": logic
    })
}

/// Full vaccination series.
pub fn complete_series_rule(identifier: &str) -> Json {
    rule_json(
        identifier,
        "Acceptance",
        "DE",
        json!({">=": [{"var": "payload.v.0.dn"}, {"var": "payload.v.0.sd"}]}),
    )
}

/// Vaccine product is an approved one.
pub fn approved_product_rule(identifier: &str, value_set: &str) -> Json {
    rule_json(
        identifier,
        "Acceptance",
        "DE",
        json!({"in": [{"var": "payload.v.0.mp"}, {"var": format!("external.valueSets.{value_set}")}]}),
    )
}

pub fn certificate(expiration_time: i64) -> HealthCertificate {
    serde_json::from_value(json!({
        "claims": {
            "ver": "1.3.0",
            "nam": {"fn": "Musterfrau", "fnt": "MUSTERFRAU", "gn": "Erika", "gnt": "ERIKA"},
            "dob": "1964-08-12",
            "v": [{
                "tg": "840539006", "vp": "1119349007", "mp": "EU/1/20/1528",
                "ma": "ORG-100030215", "dn": 2, "sd": 2, "dt": "2021-05-29",
                "co": "NL", "is": "Ministry of Health Welfare and Sport",
                "ci": "URN:UVCI:01:NL:187/37512422923"
            }]
        },
        "issuedAt": (clock() - Duration::days(30)).timestamp(),
        "expirationTime": expiration_time,
        "issuer": "NL",
        "keyIdentifier": "DEsVUSvpFAE="
    }))
    .unwrap()
}

/// Certificate expiring one year after the test clock.
pub fn valid_certificate() -> HealthCertificate {
    certificate((clock() + Duration::days(365)).timestamp())
}
