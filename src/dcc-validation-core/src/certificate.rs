//! Decoded health certificates.
//!
//! Certificates reach the engine already decoded and schema-validated; the
//! engine only reads them. The payload mirrors the EU DCC JSON schema so it
//! can be handed to rule logic unchanged.

use std::fmt;

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as Json};

/// Kind of certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CertificateType {
    /// Vaccination certificate.
    Vaccination,
    /// Test certificate.
    Test,
    /// Recovery certificate.
    Recovery,
}

impl fmt::Display for CertificateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vaccination => "vaccination",
            Self::Test => "test",
            Self::Recovery => "recovery",
        })
    }
}

/// A decoded certificate with its signed header fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCertificate {
    /// Decoded payload (the `hcert` claim).
    pub claims: DigitalCovidCertificate,
    /// Issuance time (Unix seconds).
    pub issued_at: i64,
    /// Expiry time (Unix seconds).
    pub expiration_time: i64,
    /// Issuing country (ISO alpha-2).
    pub issuer: String,
    /// Identifier of the signing key.
    #[serde(
        serialize_with = "serialize_base64",
        deserialize_with = "deserialize_base64"
    )]
    pub key_identifier: Vec<u8>,
}

impl HealthCertificate {
    /// Certificate type derived from which entry list is present.
    #[must_use]
    pub fn certificate_type(&self) -> CertificateType {
        self.claims.certificate_type()
    }

    /// Claims as JSON, the shape rule logic addresses via `payload.*`.
    pub fn claims_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&self.claims)
    }
}

/// EU Digital Covid Certificate payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitalCovidCertificate {
    /// Schema version.
    #[serde(rename = "ver")]
    pub version: String,
    /// Holder name.
    #[serde(rename = "nam")]
    pub name: Name,
    /// Date of birth (`YYYY`, `YYYY-MM` or `YYYY-MM-DD`).
    #[serde(rename = "dob")]
    pub date_of_birth: String,
    /// Vaccination entries.
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub vaccination_entries: Option<Vec<VaccinationEntry>>,
    /// Test entries.
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub test_entries: Option<Vec<TestEntry>>,
    /// Recovery entries.
    #[serde(rename = "r", default, skip_serializing_if = "Option::is_none")]
    pub recovery_entries: Option<Vec<RecoveryEntry>>,
    /// Fields not modelled above, kept so rule logic sees the whole payload.
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

impl DigitalCovidCertificate {
    /// Certificate type implied by the populated entry list.
    ///
    /// Schema validation guarantees exactly one list is present; test and
    /// recovery take priority only when vaccination is absent.
    #[must_use]
    pub fn certificate_type(&self) -> CertificateType {
        if has_entries(&self.vaccination_entries) {
            CertificateType::Vaccination
        } else if has_entries(&self.test_entries) {
            CertificateType::Test
        } else if has_entries(&self.recovery_entries) {
            CertificateType::Recovery
        } else {
            CertificateType::Vaccination
        }
    }

    /// Unique certificate identifier of the first entry.
    #[must_use]
    pub fn unique_certificate_identifier(&self) -> Option<&str> {
        first(&self.vaccination_entries)
            .map(|e| e.unique_certificate_identifier.as_str())
            .or_else(|| first(&self.test_entries).map(|e| e.unique_certificate_identifier.as_str()))
            .or_else(|| {
                first(&self.recovery_entries).map(|e| e.unique_certificate_identifier.as_str())
            })
    }
}

fn has_entries<T>(entries: &Option<Vec<T>>) -> bool {
    entries.as_ref().is_some_and(|e| !e.is_empty())
}

fn first<T>(entries: &Option<Vec<T>>) -> Option<&T> {
    entries.as_ref().and_then(|e| e.first())
}

/// Holder name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name {
    /// Family name.
    #[serde(rename = "fn", default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    /// Standardised family name.
    #[serde(rename = "fnt")]
    pub standardized_family_name: String,
    /// Given name.
    #[serde(rename = "gn", default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    /// Standardised given name.
    #[serde(rename = "gnt", default, skip_serializing_if = "Option::is_none")]
    pub standardized_given_name: Option<String>,
    /// Fields not modelled above, kept so rule logic sees the whole payload.
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

/// Vaccination entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaccinationEntry {
    /// Disease or agent targeted.
    #[serde(rename = "tg")]
    pub disease_or_agent_targeted: String,
    /// Vaccine or prophylaxis.
    #[serde(rename = "vp")]
    pub vaccine_or_prophylaxis: String,
    /// Vaccine medicinal product.
    #[serde(rename = "mp")]
    pub vaccine_medicinal_product: String,
    /// Marketing authorisation holder or manufacturer.
    #[serde(rename = "ma")]
    pub marketing_authorization_holder: String,
    /// Dose number.
    #[serde(rename = "dn")]
    pub dose_number: u32,
    /// Total series of doses.
    #[serde(rename = "sd")]
    pub total_series_of_doses: u32,
    /// Date of vaccination.
    #[serde(rename = "dt")]
    pub date_of_vaccination: String,
    /// Country of vaccination.
    #[serde(rename = "co")]
    pub country_of_vaccination: String,
    /// Certificate issuer.
    #[serde(rename = "is")]
    pub certificate_issuer: String,
    /// Unique certificate identifier.
    #[serde(rename = "ci")]
    pub unique_certificate_identifier: String,
    /// Fields not modelled above, kept for rule logic.
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

/// Test entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestEntry {
    /// Disease or agent targeted.
    #[serde(rename = "tg")]
    pub disease_or_agent_targeted: String,
    /// Type of test.
    #[serde(rename = "tt")]
    pub type_of_test: String,
    /// NAA test name.
    #[serde(rename = "nm", default, skip_serializing_if = "Option::is_none")]
    pub naa_test_name: Option<String>,
    /// RAT test name and manufacturer.
    #[serde(rename = "ma", default, skip_serializing_if = "Option::is_none")]
    pub rat_test_name_and_manufacturer: Option<String>,
    /// Sample collection time.
    #[serde(rename = "sc")]
    pub date_time_of_sample_collection: String,
    /// Test result.
    #[serde(rename = "tr")]
    pub test_result: String,
    /// Testing centre.
    #[serde(rename = "tc", default, skip_serializing_if = "Option::is_none")]
    pub testing_centre: Option<String>,
    /// Country of test.
    #[serde(rename = "co")]
    pub country_of_test: String,
    /// Certificate issuer.
    #[serde(rename = "is")]
    pub certificate_issuer: String,
    /// Unique certificate identifier.
    #[serde(rename = "ci")]
    pub unique_certificate_identifier: String,
    /// Fields not modelled above, kept for rule logic.
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

/// Recovery entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryEntry {
    /// Disease or agent targeted.
    #[serde(rename = "tg")]
    pub disease_or_agent_targeted: String,
    /// Date of first positive test.
    #[serde(rename = "fr")]
    pub date_of_first_positive_naa_result: String,
    /// Country of test.
    #[serde(rename = "co")]
    pub country_of_test: String,
    /// Certificate issuer.
    #[serde(rename = "is")]
    pub certificate_issuer: String,
    /// Certificate valid from.
    #[serde(rename = "df")]
    pub certificate_valid_from: String,
    /// Certificate valid until.
    #[serde(rename = "du")]
    pub certificate_valid_until: String,
    /// Unique certificate identifier.
    #[serde(rename = "ci")]
    pub unique_certificate_identifier: String,
    /// Fields not modelled above, kept for rule logic.
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn deserialize_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(serde::de::Error::custom)
}
