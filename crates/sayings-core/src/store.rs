use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::selection::SayingSource;
use crate::{default_sayings, Category, RawSaying, Saying, SayingId, ValidationError};

/// Format tag written next to every persisted collection.
pub const FORMAT_VERSION: &str = "1.0";

const PROBE_KEY: &str = "sayingsProbe";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum StorageError {
    #[error("storage is unavailable")]
    Unavailable,
    #[error("storage quota exceeded: {needed} bytes needed, capacity {capacity}")]
    QuotaExceeded { needed: usize, capacity: usize },
    #[error("failed to encode catalog: {0}")]
    Encoding(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateField {
    Id,
    Text,
    Translation,
}

impl DuplicateField {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Text => "text",
            Self::Translation => "translation",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum AddError {
    #[error("invalid saying: {0}")]
    Validation(#[from] ValidationError),
    #[error("duplicate saying: {} matches an existing entry", .field.as_str())]
    Duplicate { field: DuplicateField, existing: SayingId },
    #[error("saying was not persisted: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RemoveError {
    #[error("no saying with id {0}")]
    NotFound(SayingId),
}

/// String-keyed, string-valued durable storage.
pub trait KeyValueStorage {
    /// Read one value.
    ///
    /// # Errors
    /// Returns a [`StorageError`] when the medium cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write several values so that either all or none of them land.
    ///
    /// # Errors
    /// Returns a [`StorageError`] when the medium rejects the write.
    fn set_many(&mut self, entries: &[(&str, &str)]) -> Result<(), StorageError>;

    /// Delete several keys; missing keys are ignored.
    ///
    /// # Errors
    /// Returns a [`StorageError`] when the medium rejects the delete.
    fn remove_many(&mut self, keys: &[&str]) -> Result<(), StorageError>;

    /// Check that the medium accepts a write and a delete.
    ///
    /// # Errors
    /// Returns the [`StorageError`] raised by the probe write or delete.
    fn probe(&mut self) -> Result<(), StorageError> {
        self.set_many(&[(PROBE_KEY, "probe")])?;
        self.remove_many(&[PROBE_KEY])
    }
}

/// In-process storage with an optional byte capacity, counted over keys and
/// values.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: BTreeMap<String, String>,
    capacity: Option<usize>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity_bytes(capacity: usize) -> Self {
        Self { entries: BTreeMap::new(), capacity: Some(capacity) }
    }

    pub fn set_capacity_bytes(&mut self, capacity: Option<usize>) {
        self.capacity = capacity;
    }

    fn used_bytes(entries: &BTreeMap<String, String>) -> usize {
        entries.iter().map(|(key, value)| key.len() + value.len()).sum()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set_many(&mut self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        let mut next = self.entries.clone();
        for (key, value) in entries {
            next.insert((*key).to_string(), (*value).to_string());
        }
        if let Some(capacity) = self.capacity {
            let needed = Self::used_bytes(&next);
            if needed > capacity {
                return Err(StorageError::QuotaExceeded { needed, capacity });
            }
        }
        self.entries = next;
        Ok(())
    }

    fn remove_many(&mut self, keys: &[&str]) -> Result<(), StorageError> {
        for key in keys {
            self.entries.remove(*key);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StoreConfig {
    pub sayings_key: String,
    pub version_key: String,
    pub last_saved_key: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sayings_key: "sayings".to_string(),
            version_key: "sayingsVersion".to_string(),
            last_saved_key: "sayingsLastSaved".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    Storage,
    Defaults,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct LoadReport {
    pub source: LoadSource,
    pub loaded: usize,
    pub discarded: usize,
    pub version: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_saved: Option<OffsetDateTime>,
    pub persisted_defaults: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SaveReport {
    pub saved: usize,
    pub filtered: usize,
}

/// Outcome of [`CatalogStore::remove`]. The entry is gone from the catalog
/// either way; `persisted` is false when the write-back failed.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Removal {
    pub saying: Saying,
    pub persisted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StorageInfo {
    pub available: bool,
    pub sayings_count: usize,
    pub data_size: usize,
    pub version: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_saved: Option<OffsetDateTime>,
}

struct ParsedCollection {
    sayings: Vec<Saying>,
    discarded: usize,
}

/// Authoritative owner of the saying catalog. Every mutation is persisted
/// immediately; a failed persist leaves the in-memory catalog unchanged.
#[derive(Debug)]
pub struct CatalogStore<S> {
    config: StoreConfig,
    storage: Option<S>,
    sayings: Vec<Saying>,
}

impl<S: KeyValueStorage> CatalogStore<S> {
    #[must_use]
    pub fn new(storage: S, config: StoreConfig) -> Self {
        Self { config, storage: Some(storage), sayings: Vec::new() }
    }

    /// A store with no durable medium; every persist fails with
    /// [`StorageError::Unavailable`].
    #[must_use]
    pub fn detached(config: StoreConfig) -> Self {
        Self { config, storage: None, sayings: Vec::new() }
    }

    #[must_use]
    pub fn storage(&self) -> Option<&S> {
        self.storage.as_ref()
    }

    pub fn storage_mut(&mut self) -> Option<&mut S> {
        self.storage.as_mut()
    }

    /// Populate the catalog from storage, falling back to the built-in
    /// defaults when storage is absent, unreadable, malformed, or yields no
    /// valid entry. Never fails.
    pub fn load(&mut self) -> LoadReport {
        if self.storage.is_none() {
            self.sayings = default_sayings();
            tracing::info!(
                count = self.sayings.len(),
                "running without durable storage; using default sayings"
            );
            return LoadReport {
                source: LoadSource::Defaults,
                loaded: self.sayings.len(),
                discarded: 0,
                version: None,
                last_saved: None,
                persisted_defaults: false,
            };
        }

        let version = self.read_key(&self.config.version_key);
        let last_saved = self
            .read_key(&self.config.last_saved_key)
            .and_then(|raw| OffsetDateTime::parse(&raw, &Rfc3339).ok());

        if let Some(tag) = version.as_deref() {
            if tag != FORMAT_VERSION {
                tracing::warn!(
                    found = tag,
                    expected = FORMAT_VERSION,
                    "unknown sayings format version; attempting to parse anyway"
                );
            }
        }

        let mut discarded = 0;
        match self.read_persisted() {
            Ok(Some(parsed)) if !parsed.sayings.is_empty() => {
                tracing::info!(
                    loaded = parsed.sayings.len(),
                    discarded = parsed.discarded,
                    last_saved = ?last_saved,
                    "loaded sayings from storage"
                );
                self.sayings = parsed.sayings;
                self.warn_empty_categories();
                return LoadReport {
                    source: LoadSource::Storage,
                    loaded: self.sayings.len(),
                    discarded: parsed.discarded,
                    version,
                    last_saved,
                    persisted_defaults: false,
                };
            }
            Ok(Some(parsed)) => {
                tracing::warn!(discarded = parsed.discarded, "no valid sayings found in storage");
                discarded = parsed.discarded;
            }
            Ok(None) => tracing::info!("no saved sayings found in storage"),
            Err(err) => tracing::warn!(error = %err, "failed to load sayings from storage"),
        }

        self.sayings = default_sayings();
        let persisted_defaults = self.persist_defaults();
        self.warn_empty_categories();

        LoadReport {
            source: LoadSource::Defaults,
            loaded: self.sayings.len(),
            discarded,
            version,
            last_saved,
            persisted_defaults,
        }
    }

    /// Persist the valid subset of the catalog with its format tag and a
    /// last-saved timestamp.
    ///
    /// # Errors
    /// Returns [`StorageError::Unavailable`] for a detached store, or the
    /// backend error when the write is rejected.
    pub fn save(&mut self) -> Result<SaveReport, StorageError> {
        let valid = self.sayings.iter().filter(|saying| saying.is_valid()).collect::<Vec<_>>();
        let filtered = self.sayings.len() - valid.len();
        if filtered > 0 {
            tracing::warn!(filtered, "filtered out invalid sayings before saving");
        }

        let payload =
            serde_json::to_string(&valid).map_err(|err| StorageError::Encoding(err.to_string()))?;
        let saved_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|err| StorageError::Encoding(err.to_string()))?;

        let Some(storage) = self.storage.as_mut() else {
            tracing::error!("cannot save sayings: storage is unavailable");
            return Err(StorageError::Unavailable);
        };

        let result = storage.set_many(&[
            (self.config.sayings_key.as_str(), payload.as_str()),
            (self.config.version_key.as_str(), FORMAT_VERSION),
            (self.config.last_saved_key.as_str(), saved_at.as_str()),
        ]);

        match result {
            Ok(()) => {
                tracing::info!(saved = valid.len(), "saved sayings to storage");
                Ok(SaveReport { saved: valid.len(), filtered })
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to save sayings to storage");
                Err(err)
            }
        }
    }

    /// Append a new saying with a freshly generated id and persist it.
    ///
    /// # Errors
    /// Returns [`AddError::Validation`] for blank fields,
    /// [`AddError::Duplicate`] when the text or translation already exists
    /// (case-insensitive), and [`AddError::Storage`] when persisting fails, in
    /// which case the catalog is rolled back.
    pub fn add(
        &mut self,
        text: &str,
        translation: &str,
        category: Category,
        usage_context: &str,
    ) -> Result<SayingId, AddError> {
        let candidate = Saying {
            id: SayingId::generate(),
            text: text.to_string(),
            translation: translation.to_string(),
            category,
            usage_context: usage_context.to_string(),
        };

        if let Err(err) = candidate.validate() {
            tracing::warn!(error = %err, "invalid saying data, not adding");
            return Err(AddError::Validation(err));
        }

        for existing in &self.sayings {
            let field = if existing.id == candidate.id {
                Some(DuplicateField::Id)
            } else {
                existing.collides_with(&candidate)
            };
            if let Some(field) = field {
                tracing::warn!(
                    field = field.as_str(),
                    existing = %existing.id,
                    "duplicate saying detected, not adding"
                );
                return Err(AddError::Duplicate { field, existing: existing.id.clone() });
            }
        }

        let id = candidate.id.clone();
        self.sayings.push(candidate);

        if let Err(err) = self.save() {
            self.sayings.pop();
            return Err(AddError::Storage(err));
        }

        tracing::info!(id = %id, category = %category, "new saying added and saved");
        Ok(id)
    }

    /// Remove one saying by id and try to persist the change. A failed
    /// write-back is logged and reported through [`Removal::persisted`]; the
    /// removal itself stands, so detached stores can still remove.
    ///
    /// # Errors
    /// Returns [`RemoveError::NotFound`] when no entry carries `id`.
    pub fn remove(&mut self, id: &SayingId) -> Result<Removal, RemoveError> {
        let Some(index) = self.sayings.iter().position(|saying| &saying.id == id) else {
            tracing::warn!(id = %id, "saying not found");
            return Err(RemoveError::NotFound(id.clone()));
        };

        let saying = self.sayings.remove(index);
        let persisted = match self.save() {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(id = %id, error = %err, "saying removed but not persisted");
                false
            }
        };

        tracing::info!(id = %id, persisted, "saying removed");
        Ok(Removal { saying, persisted })
    }

    /// Drop every persisted key owned by the catalog. The in-memory catalog
    /// is left untouched.
    ///
    /// # Errors
    /// Returns [`StorageError::Unavailable`] for a detached store, or the
    /// backend error when the delete is rejected.
    pub fn clear_storage(&mut self) -> Result<(), StorageError> {
        let storage = self.storage.as_mut().ok_or(StorageError::Unavailable)?;
        storage.remove_many(&[
            self.config.sayings_key.as_str(),
            self.config.version_key.as_str(),
            self.config.last_saved_key.as_str(),
        ])?;
        tracing::info!("cleared all stored sayings data");
        Ok(())
    }

    pub fn get_info(&mut self) -> StorageInfo {
        let available = self.probe_storage();
        if !available {
            return StorageInfo {
                available,
                sayings_count: self.sayings.len(),
                data_size: 0,
                version: None,
                last_saved: None,
            };
        }

        StorageInfo {
            available,
            sayings_count: self.sayings.len(),
            data_size: self.read_key(&self.config.sayings_key).map_or(0, |raw| raw.len()),
            version: self.read_key(&self.config.version_key),
            last_saved: self
                .read_key(&self.config.last_saved_key)
                .and_then(|raw| OffsetDateTime::parse(&raw, &Rfc3339).ok()),
        }
    }

    /// Pure validity predicate shared by the load and save paths.
    #[must_use]
    pub fn validate(candidate: &Saying) -> bool {
        candidate.is_valid()
    }

    #[must_use]
    pub fn list_by_category(&self, category: Category) -> Vec<&Saying> {
        self.sayings.iter().filter(|saying| saying.category == category).collect()
    }

    #[must_use]
    pub fn get(&self, id: &SayingId) -> Option<&Saying> {
        self.sayings.iter().find(|saying| &saying.id == id)
    }

    #[must_use]
    pub fn all(&self) -> &[Saying] {
        &self.sayings
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sayings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sayings.is_empty()
    }

    #[must_use]
    pub fn empty_categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|category| !self.sayings.iter().any(|saying| saying.category == *category))
            .collect()
    }

    fn read_key(&self, key: &str) -> Option<String> {
        let storage = self.storage.as_ref()?;
        match storage.get(key) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to read storage key");
                None
            }
        }
    }

    fn read_persisted(&self) -> Result<Option<ParsedCollection>, String> {
        let Some(storage) = self.storage.as_ref() else {
            return Ok(None);
        };
        let Some(raw) = storage.get(&self.config.sayings_key).map_err(|err| err.to_string())?
        else {
            return Ok(None);
        };
        parse_collection(&raw).map(Some)
    }

    fn probe_storage(&mut self) -> bool {
        let Some(storage) = self.storage.as_mut() else {
            return false;
        };
        match storage.probe() {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "storage is not available");
                false
            }
        }
    }

    fn persist_defaults(&mut self) -> bool {
        if !self.probe_storage() {
            tracing::info!(
                count = self.sayings.len(),
                "initialized with default sayings (storage not available)"
            );
            return false;
        }
        match self.save() {
            Ok(_) => {
                tracing::info!(count = self.sayings.len(), "initialized with default sayings");
                true
            }
            Err(_) => false,
        }
    }

    fn warn_empty_categories(&self) {
        for category in self.empty_categories() {
            tracing::warn!(category = %category, "category is empty; consider adding sayings");
        }
    }
}

impl<S: KeyValueStorage> SayingSource for CatalogStore<S> {
    fn list_by_category(&self, category: Category) -> Vec<&Saying> {
        CatalogStore::list_by_category(self, category)
    }
}

fn parse_collection(raw: &str) -> Result<ParsedCollection, String> {
    let entries: Vec<Value> = serde_json::from_str(raw)
        .map_err(|err| format!("invalid data format in storage: {err}"))?;

    let total = entries.len();
    let mut sayings: Vec<Saying> = Vec::with_capacity(total);
    for entry in entries {
        let parsed = serde_json::from_value::<RawSaying>(entry)
            .map_err(|err| err.to_string())
            .and_then(|raw| raw.into_saying().map_err(|err| err.to_string()));
        match parsed {
            Ok(saying) if sayings.iter().any(|kept| kept.id == saying.id) => {
                tracing::warn!(id = %saying.id, "discarding stored saying with duplicate id");
            }
            Ok(saying) => sayings.push(saying),
            Err(reason) => tracing::warn!(%reason, "discarding invalid stored saying"),
        }
    }

    Ok(ParsedCollection { discarded: total - sayings.len(), sayings })
}
