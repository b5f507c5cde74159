//! Cached packages.
//!
//! The store is a key-value store of JSON documents. Each cached package is
//! one document holding both the ETag and the payload, so the pair is always
//! replaced together.
//!
//! Two implementations are provided:
//! - [`MemoryStore`]: process-local, used in tests and one-shot tools
//! - [`FileStore`]: memory-backed with write-through persistence to a
//!   directory; files are written to a temporary name and renamed into place
//!
//! Persistence failures are logged and never fail the caller; the in-memory
//! copy remains authoritative for the life of the process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::rules::{Rule, RuleCategory};
use crate::value_sets::ValueSets;

/// Cached rule set of one category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCategoryCache {
    /// ETag of the response the rules came from.
    pub last_etag: String,
    /// Decoded rules.
    pub rules: Vec<Rule>,
}

/// Cached value sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetsCache {
    /// ETag of the response the value sets came from.
    pub last_etag: String,
    /// Decoded value sets.
    pub value_sets: ValueSets,
}

/// Cached onboarded-countries list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardedCountriesCache {
    /// ETag of the response the list came from.
    pub last_etag: String,
    /// Country codes.
    pub countries: Vec<String>,
}

const VALUE_SETS_KEY: &str = "value-sets";
const ONBOARDED_COUNTRIES_KEY: &str = "onboarded-countries";
const BOOSTER_EXECUTION_KEY: &str = "last-booster-notifications-execution-date";

fn rules_key(category: RuleCategory) -> String {
    format!("rules.{category}")
}

/// Key-value persistence for downloaded packages.
///
/// Implementors only provide [`load`](Store::load) and [`save`](Store::save);
/// the typed accessors are built on them.
pub trait Store: Send + Sync {
    /// Read a document.
    fn load(&self, key: &str) -> Option<Json>;

    /// Replace a document.
    fn save(&self, key: &str, value: Json);

    /// Cached rules of a category.
    fn rules_cache(&self, category: RuleCategory) -> Option<RuleCategoryCache> {
        decode(&rules_key(category), self.load(&rules_key(category)))
    }

    /// Replace the cached rules of a category.
    fn set_rules_cache(&self, category: RuleCategory, cache: &RuleCategoryCache) {
        save_encoded(self, &rules_key(category), cache);
    }

    /// Cached value sets.
    fn value_sets_cache(&self) -> Option<ValueSetsCache> {
        decode(VALUE_SETS_KEY, self.load(VALUE_SETS_KEY))
    }

    /// Replace the cached value sets.
    fn set_value_sets_cache(&self, cache: &ValueSetsCache) {
        save_encoded(self, VALUE_SETS_KEY, cache);
    }

    /// Cached onboarded countries.
    fn onboarded_countries_cache(&self) -> Option<OnboardedCountriesCache> {
        decode(ONBOARDED_COUNTRIES_KEY, self.load(ONBOARDED_COUNTRIES_KEY))
    }

    /// Replace the cached onboarded countries.
    fn set_onboarded_countries_cache(&self, cache: &OnboardedCountriesCache) {
        save_encoded(self, ONBOARDED_COUNTRIES_KEY, cache);
    }

    /// When booster notification rules were last refreshed with content.
    fn last_booster_notifications_execution_date(&self) -> Option<DateTime<Utc>> {
        decode(BOOSTER_EXECUTION_KEY, self.load(BOOSTER_EXECUTION_KEY))
    }

    /// Record a booster notification refresh.
    fn set_last_booster_notifications_execution_date(&self, date: DateTime<Utc>) {
        save_encoded(self, BOOSTER_EXECUTION_KEY, &date);
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: Option<Json>) -> Option<T> {
    let value = value?;
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(key = %key, "Store: discarding undecodable entry: {}", e);
            None
        },
    }
}

fn save_encoded<S: Store + ?Sized, T: Serialize>(store: &S, key: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(json) => store.save(key, json),
        Err(e) => warn!(key = %key, "Store: failed to encode entry: {}", e),
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Json>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn load(&self, key: &str) -> Option<Json> {
        self.entries.read().ok()?.get(key).cloned()
    }

    fn save(&self, key: &str, value: Json) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.to_string(), value);
        }
    }
}

/// Store persisted to a directory.
#[derive(Debug)]
pub struct FileStore {
    memory: MemoryStore,
    cache_dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `cache_dir`.
    ///
    /// The directory is created on first write.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            memory: MemoryStore::new(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Directory the store writes to.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(b"dcc-store:");
        hasher.update(key.as_bytes());
        let hash = hex::encode(&hasher.finalize()[..16]);

        self.cache_dir.join(format!("{hash}.json"))
    }

    fn read_file(&self, key: &str) -> Option<Json> {
        let path = self.entry_path(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(key = %key, "Store: no persisted entry ({})", e);
                return None;
            },
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, path = %path.display(), "Store: corrupt entry ignored: {}", e);
                None
            },
        }
    }

    fn write_file(&self, key: &str, value: &Json) {
        if let Err(e) = std::fs::create_dir_all(&self.cache_dir) {
            warn!("Store: failed to create cache directory: {}", e);
            return;
        }

        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, "Store: failed to serialize entry: {}", e);
                return;
            },
        };

        let path = self.entry_path(key);
        let tmp = path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp, &bytes) {
            warn!(key = %key, "Store: failed to write entry: {}", e);
            return;
        }
        if let Err(e) = std::fs::rename(&tmp, &path) {
            warn!(key = %key, "Store: failed to move entry into place: {}", e);
            let _ = std::fs::remove_file(&tmp);
            return;
        }
        debug!(key = %key, bytes = bytes.len(), "Store: entry persisted");
    }
}

impl Store for FileStore {
    fn load(&self, key: &str) -> Option<Json> {
        if let Some(value) = self.memory.load(key) {
            return Some(value);
        }
        let value = self.read_file(key)?;
        self.memory.save(key, value.clone());
        Some(value)
    }

    fn save(&self, key: &str, value: Json) {
        self.write_file(key, &value);
        self.memory.save(key, value);
    }
}
