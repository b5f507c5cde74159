//! # dcc-validation-core
//!
//! Business-rule validation for EU Digital Covid Certificates.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ValidationOrchestrator                      │
//! │                                                              │
//! │  ┌──────────────────┐  ┌──────────────────────────────┐     │
//! │  │ ValueSetProvider │  │ RulesDownloadService (x2)    │     │
//! │  └──────────────────┘  └──────────────────────────────┘     │
//! │            │                        │                        │
//! │            ▼                        ▼                        │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │              PackageDownloader                    │      │
//! │  │  (conditional GET, signature check, Store)       │      │
//! │  └──────────────────────────────────────────────────┘      │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │              RuleEvaluationEngine                 │      │
//! │  │    (applicability filter, CertLogic evaluator)   │      │
//! │  └──────────────────────────────────────────────────┘      │
//! │                           │                                  │
//! │                           ▼                                  │
//! │            HealthCertificateValidationReport                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Integrity Properties
//!
//! - **Verify before decode**: payloads are parsed only after their signature
//!   verified against a configured trust anchor
//! - **Atomic cache**: an ETag and its payload are always replaced together
//! - **No silent downgrade**: integrity failures are never answered with
//!   cached data

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod certificate;
pub mod certlogic;
pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod https;
pub mod package;
pub mod rules;
pub mod store;
pub mod value_sets;

pub use certificate::{CertificateType, DigitalCovidCertificate, HealthCertificate};
pub use config::ValidationConfig;
pub use download::{CacheWrite, PackageDownloader, RulesDownloadService, Staged, ValueSetProvider};
pub use engine::ValidationOrchestrator;
pub use error::{
    ConfigError, DownloadError, OnboardedCountriesError, PackageError, PackageErrorKind,
    PackageOrigin, RuleValidationError, ValidationError,
};
pub use evaluation::{interpret, HealthCertificateValidationReport, RuleEvaluationEngine};
pub use https::{Client, HttpFailure, HttpsClient, PackageDownloadResponse};
pub use package::{SignatureVerification, SignedPackage, TrustAnchorVerifier};
pub use rules::{
    ExternalParameter, FilterParameter, Rule, RuleCategory, RuleCertificateType, RuleOutcome,
    RuleType, ValidationResult,
};
pub use store::{FileStore, MemoryStore, RuleCategoryCache, Store, ValueSetsCache};
pub use value_sets::{ValueSet, ValueSetItem, ValueSets};
