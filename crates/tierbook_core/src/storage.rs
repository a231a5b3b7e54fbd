//! Storage contracts for the external tier storage engine.
//!
//! # Responsibility
//! - Define the seam the core uses to reach folder/file-backed tier state.
//! - Provide an in-memory implementation for tests and embedding.
//!
//! # Invariants
//! - A tier "exists" only once `setup_files` has run for it.
//! - Child listing follows creation order.
//! - All reported paths are relative to the project folder.

use crate::model::tier::{TierKind, TierRef};
use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub type StorageResult<T> = Result<T, StorageError>;

/// Errors from the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The tier's storage is already materialized.
    AlreadyExists(String),
    /// The tier's storage is not materialized.
    NotFound(String),
    /// Backend failure outside this core's control.
    Backend(String),
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyExists(name) => write!(f, "tier already exists: {name}"),
            Self::NotFound(name) => write!(f, "tier does not exist: {name}"),
            Self::Backend(message) => write!(f, "storage backend error: {message}"),
        }
    }
}

impl Error for StorageError {}

/// Seam to the file-backed tier storage engine.
///
/// The engine owning folder creation, notebook templating and content file
/// lifecycle lives outside this core; everything here is treated as an opaque
/// synchronous call into it.
pub trait TierStorage {
    /// Whether the tier's backing storage has been materialized.
    fn exists(&self, tier: &TierRef) -> bool;

    /// Relative folder path of the tier.
    fn folder_path(&self, tier: &TierRef) -> PathBuf;

    /// Relative path of the primary document, when present.
    fn notebook_path(&self, tier: &TierRef) -> Option<PathBuf>;

    /// Relative path of the metadata store, when present.
    fn meta_path(&self, tier: &TierRef) -> Option<PathBuf>;

    /// Relative path of the highlights artifact, when present.
    fn highlights_path(&self, tier: &TierRef) -> Option<PathBuf>;

    /// Persisted metadata of the tier, in storage form.
    fn read_meta(&self, tier: &TierRef) -> StorageResult<IndexMap<String, Value>>;

    /// Ids of materialized direct children, in creation order.
    fn list_children(&self, tier: &TierRef) -> Vec<String>;

    /// Materializes the tier from an optional content template and initial
    /// metadata. Fails when the tier already exists.
    fn setup_files(
        &mut self,
        tier: &TierRef,
        template: Option<&str>,
        meta: IndexMap<String, Value>,
    ) -> StorageResult<()>;

    /// Opens the tier's folder in the host file browser.
    fn open_folder(&self, tier: &TierRef) -> StorageResult<()>;
}

#[derive(Debug, Clone)]
struct StoredTier {
    name: String,
    kind: TierKind,
    meta: IndexMap<String, Value>,
    template: Option<String>,
    has_highlights: bool,
}

/// In-memory storage engine.
///
/// Keeps the materialized tiers of one project in creation order, which makes
/// it a faithful stand-in for the folder-backed engine in tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: IndexMap<Vec<String>, StoredTier>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes one raw metadata value, simulating a collaborator editing the
    /// metadata store directly.
    pub fn write_meta(
        &mut self,
        tier: &TierRef,
        key: impl Into<String>,
        value: Value,
    ) -> StorageResult<()> {
        let entry = self
            .entries
            .get_mut(&tier.identifiers)
            .ok_or_else(|| StorageError::NotFound(tier.name.clone()))?;
        entry.meta.insert(key.into(), value);
        Ok(())
    }

    /// Marks the tier as carrying a highlights artifact.
    pub fn set_highlights(&mut self, tier: &TierRef, present: bool) -> StorageResult<()> {
        let entry = self
            .entries
            .get_mut(&tier.identifiers)
            .ok_or_else(|| StorageError::NotFound(tier.name.clone()))?;
        entry.has_highlights = present;
        Ok(())
    }

    /// Template the tier was materialized from, if any.
    pub fn template_of(&self, tier: &TierRef) -> Option<&str> {
        self.entries
            .get(&tier.identifiers)
            .and_then(|entry| entry.template.as_deref())
    }

    fn content_entry(&self, tier: &TierRef) -> Option<&StoredTier> {
        self.entries
            .get(&tier.identifiers)
            .filter(|entry| entry.kind == TierKind::ContentBearing)
    }
}

impl TierStorage for MemoryStorage {
    fn exists(&self, tier: &TierRef) -> bool {
        self.entries.contains_key(&tier.identifiers)
    }

    fn folder_path(&self, tier: &TierRef) -> PathBuf {
        if tier.identifiers.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(tier.identifiers.join("/"))
        }
    }

    fn notebook_path(&self, tier: &TierRef) -> Option<PathBuf> {
        self.content_entry(tier)
            .map(|entry| self.folder_path(tier).join(format!("{}.ipynb", entry.name)))
    }

    fn meta_path(&self, tier: &TierRef) -> Option<PathBuf> {
        self.content_entry(tier).map(|entry| {
            self.folder_path(tier)
                .join(".tier")
                .join(format!("{}.json", entry.name))
        })
    }

    fn highlights_path(&self, tier: &TierRef) -> Option<PathBuf> {
        self.content_entry(tier)
            .filter(|entry| entry.has_highlights)
            .map(|entry| {
                self.folder_path(tier)
                    .join(".tier")
                    .join(format!("{}.hlts.json", entry.name))
            })
    }

    fn read_meta(&self, tier: &TierRef) -> StorageResult<IndexMap<String, Value>> {
        self.entries
            .get(&tier.identifiers)
            .map(|entry| entry.meta.clone())
            .ok_or_else(|| StorageError::NotFound(tier.name.clone()))
    }

    fn list_children(&self, tier: &TierRef) -> Vec<String> {
        let parent = tier.identifiers.as_slice();
        self.entries
            .keys()
            .filter(|identifiers| {
                identifiers.len() == parent.len() + 1 && identifiers.starts_with(parent)
            })
            .filter_map(|identifiers| identifiers.last().cloned())
            .collect()
    }

    fn setup_files(
        &mut self,
        tier: &TierRef,
        template: Option<&str>,
        mut meta: IndexMap<String, Value>,
    ) -> StorageResult<()> {
        if self.exists(tier) {
            return Err(StorageError::AlreadyExists(tier.name.clone()));
        }
        if tier.kind == TierKind::ContentBearing && !meta.contains_key("started") {
            meta.insert(
                "started".to_string(),
                Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            );
        }
        self.entries.insert(
            tier.identifiers.clone(),
            StoredTier {
                name: tier.name.clone(),
                kind: tier.kind,
                meta,
                template: template.map(str::to_string),
                has_highlights: false,
            },
        );
        Ok(())
    }

    fn open_folder(&self, tier: &TierRef) -> StorageResult<()> {
        if self.exists(tier) {
            Ok(())
        } else {
            Err(StorageError::NotFound(tier.name.clone()))
        }
    }
}
