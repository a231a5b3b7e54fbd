//! Transport-ready serialization of resolved tiers.
//!
//! # Responsibility
//! - Build the child summary, branch and lookup shapes from a resolved tier.
//! - Keep one serialization path for every handler variant, parameterized
//!   only by tier kind.
//!
//! # Invariants
//! - Container tiers carry no timestamp and no content paths.
//! - A tier whose class defines no child class serializes no `childClsInfo`.
//! - Children iterate in creation order.

use crate::meta::{MetaError, MetaSchema, MetaValue, SchemaHandle, SchemaRegistry};
use crate::model::tier::{TierKind, TierRef};
use crate::project::{Project, ResolveError};
use crate::storage::StorageError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::RwLockReadGuard;

pub type SerializeResult<T> = Result<T, SerializeError>;

/// Errors from building transport shapes.
#[derive(Debug)]
pub enum SerializeError {
    Meta(MetaError),
    Storage(StorageError),
    Resolve(ResolveError),
}

impl Display for SerializeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Meta(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
            Self::Resolve(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SerializeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Meta(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::Resolve(err) => Some(err),
        }
    }
}

impl From<MetaError> for SerializeError {
    fn from(value: MetaError) -> Self {
        Self::Meta(value)
    }
}

impl From<StorageError> for SerializeError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

impl From<ResolveError> for SerializeError {
    fn from(value: ResolveError) -> Self {
        Self::Resolve(value)
    }
}

/// Transport shape of one tier without its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildSummary {
    pub name: String,
    /// First line of the free-text description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    /// First line of the free-text conclusion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(rename = "hltsPath", skip_serializing_if = "Option::is_none")]
    pub hlts_path: Option<String>,
    #[serde(rename = "metaPath", skip_serializing_if = "Option::is_none")]
    pub meta_path: Option<String>,
    #[serde(rename = "notebookPath", skip_serializing_if = "Option::is_none")]
    pub notebook_path: Option<String>,
    #[serde(rename = "additionalMeta")]
    pub additional_meta: IndexMap<String, Value>,
}

/// Descriptor of the child class a tier can produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tierType")]
pub enum ChildClsInfo {
    #[serde(rename = "folder")]
    Folder {
        name: String,
        #[serde(rename = "idRegex")]
        id_regex: String,
        #[serde(rename = "namePartTemplate")]
        name_part_template: String,
    },
    #[serde(rename = "notebook")]
    Notebook {
        name: String,
        #[serde(rename = "idRegex")]
        id_regex: String,
        #[serde(rename = "namePartTemplate")]
        name_part_template: String,
        templates: Vec<String>,
        #[serde(rename = "metaSchema")]
        meta_schema: MetaSchema,
        #[serde(rename = "additionalMetaKeys")]
        additional_meta_keys: Vec<String>,
    },
}

/// Transport shape of one tier together with its direct children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchResponse {
    #[serde(flatten)]
    pub summary: ChildSummary,
    /// Relative folder path of the tier.
    pub folder: String,
    #[serde(rename = "childClsInfo", skip_serializing_if = "Option::is_none")]
    pub child_cls_info: Option<ChildClsInfo>,
    pub children: IndexMap<String, ChildSummary>,
}

/// Lookup response, discriminated by tier kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tierType")]
pub enum TierInfo {
    #[serde(rename = "folder")]
    Folder {
        name: String,
        ids: Vec<String>,
        children: Vec<String>,
    },
    #[serde(rename = "notebook")]
    Notebook {
        name: String,
        ids: Vec<String>,
        children: Vec<String>,
        started: DateTime<Utc>,
        #[serde(rename = "notebookPath")]
        notebook_path: String,
        #[serde(rename = "metaPath")]
        meta_path: String,
        #[serde(rename = "hltsPath", skip_serializing_if = "Option::is_none")]
        hlts_path: Option<String>,
        #[serde(rename = "metaSchema")]
        meta_schema: MetaSchema,
    },
}

/// Outcome body of the `open` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub status: StatusKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Success,
    Failure,
}

fn schema_guard(handle: &SchemaHandle) -> RwLockReadGuard<'_, SchemaRegistry> {
    match handle.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Renders a relative path with forward slashes regardless of platform.
fn rel(path: &Path) -> String {
    let parts: Vec<String> = path
        .iter()
        .map(|component| component.to_string_lossy().into_owned())
        .collect();
    parts.join("/")
}

fn first_line(value: &Value) -> Option<String> {
    value
        .as_str()
        .and_then(|text| text.lines().next())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
}

/// Builds the summary shape for one tier.
pub fn summarize(project: &Project, tier: &TierRef) -> SerializeResult<ChildSummary> {
    if tier.kind == TierKind::Container {
        return Ok(ChildSummary {
            name: tier.name.clone(),
            info: None,
            outcome: None,
            started: None,
            hlts_path: None,
            meta_path: None,
            notebook_path: None,
            additional_meta: IndexMap::new(),
        });
    }

    let storage = project.storage();
    let meta = storage.read_meta(tier)?;
    let schema = project.class_of(tier).schema();

    let started = match schema {
        Some(handle) => {
            let registry = schema_guard(handle);
            match meta.get("started") {
                Some(raw) if registry.contains("started") => {
                    match registry.decode("started", Some(raw))? {
                        MetaValue::DateTime(at) => Some(at),
                        _ => None,
                    }
                }
                _ => None,
            }
        }
        None => None,
    };

    let additional_keys = match schema {
        Some(handle) => {
            schema_guard(handle).additional_keys(meta.keys().map(String::as_str))
        }
        None => meta
            .keys()
            .filter(|key| !crate::meta::RESERVED_META_KEYS.contains(&key.as_str()))
            .cloned()
            .collect(),
    };
    let additional_meta = additional_keys
        .into_iter()
        .filter_map(|key| meta.get(&key).cloned().map(|value| (key, value)))
        .collect();

    Ok(ChildSummary {
        name: tier.name.clone(),
        info: meta.get("description").and_then(first_line),
        outcome: meta.get("conclusion").and_then(first_line),
        started,
        hlts_path: storage.highlights_path(tier).map(|path| rel(&path)),
        meta_path: storage.meta_path(tier).map(|path| rel(&path)),
        notebook_path: storage.notebook_path(tier).map(|path| rel(&path)),
        additional_meta,
    })
}

struct ChildClsParts {
    pretty_type: String,
    kind: TierKind,
    id_regex: String,
    name_part_template: String,
    templates: Vec<String>,
    schema: Option<SchemaHandle>,
}

/// Builds the branch shape: the tier plus its direct materialized children.
pub fn branch(project: &mut Project, tier: &TierRef) -> SerializeResult<BranchResponse> {
    let summary = summarize(project, tier)?;
    let folder = rel(&project.storage().folder_path(tier));

    let parts = project.child_class(tier).map(|class| ChildClsParts {
        pretty_type: class.pretty_type().to_string(),
        kind: class.kind(),
        id_regex: class.id_regex().to_string(),
        name_part_template: class.name_part_template().to_string(),
        templates: class.templates().to_vec(),
        schema: class.schema().cloned(),
    });

    let mut children = IndexMap::new();
    let mut child_meta_keys = BTreeSet::new();
    if parts.is_some() {
        for id in project.storage().list_children(tier) {
            let child = project.address_child(tier, &id)?;
            if child.kind == TierKind::ContentBearing {
                child_meta_keys.extend(project.storage().read_meta(&child)?.keys().cloned());
            }
            let child_summary = summarize(project, &child)?;
            children.insert(id, child_summary);
        }
    }

    let child_cls_info = parts.map(|parts| match parts.kind {
        TierKind::Container => ChildClsInfo::Folder {
            name: parts.pretty_type,
            id_regex: parts.id_regex,
            name_part_template: parts.name_part_template,
        },
        TierKind::ContentBearing => {
            let (meta_schema, additional_meta_keys) = match &parts.schema {
                Some(handle) => {
                    let registry = schema_guard(handle);
                    (
                        registry.describe(),
                        registry.additional_keys(child_meta_keys.iter().map(String::as_str)),
                    )
                }
                None => (
                    SchemaRegistry::new().describe(),
                    child_meta_keys
                        .iter()
                        .filter(|key| !crate::meta::RESERVED_META_KEYS.contains(&key.as_str()))
                        .cloned()
                        .collect(),
                ),
            };
            ChildClsInfo::Notebook {
                name: parts.pretty_type,
                id_regex: parts.id_regex,
                name_part_template: parts.name_part_template,
                templates: parts.templates,
                meta_schema,
                additional_meta_keys,
            }
        }
    });

    Ok(BranchResponse {
        summary,
        folder,
        child_cls_info,
        children,
    })
}

/// Builds the lookup shape for one tier.
pub fn tier_info(project: &Project, tier: &TierRef) -> SerializeResult<TierInfo> {
    let storage = project.storage();
    let children = storage
        .list_children(tier)
        .into_iter()
        .map(|id| {
            let mut identifiers = tier.identifiers.clone();
            identifiers.push(id);
            project.name_of(&identifiers)
        })
        .collect();

    if tier.kind == TierKind::Container {
        return Ok(TierInfo::Folder {
            name: tier.name.clone(),
            ids: tier.identifiers.clone(),
            children,
        });
    }

    let meta = storage.read_meta(tier)?;
    let schema = project.class_of(tier).schema();
    let started = match schema {
        Some(handle) => match schema_guard(handle).decode("started", meta.get("started"))? {
            MetaValue::DateTime(at) => at,
            _ => return Err(MetaError::Missing("started".to_string()).into()),
        },
        None => return Err(MetaError::Missing("started".to_string()).into()),
    };
    let meta_schema = match schema {
        Some(handle) => schema_guard(handle).describe(),
        None => SchemaRegistry::new().describe(),
    };

    let notebook_path = storage
        .notebook_path(tier)
        .map(|path| rel(&path))
        .ok_or_else(|| StorageError::NotFound(tier.name.clone()))?;
    let meta_path = storage
        .meta_path(tier)
        .map(|path| rel(&path))
        .ok_or_else(|| StorageError::NotFound(tier.name.clone()))?;

    Ok(TierInfo::Notebook {
        name: tier.name.clone(),
        ids: tier.identifiers.clone(),
        children,
        started,
        notebook_path,
        meta_path,
        hlts_path: storage.highlights_path(tier).map(|path| rel(&path)),
        meta_schema,
    })
}
