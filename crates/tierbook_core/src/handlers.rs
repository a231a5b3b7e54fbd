//! The four logical operations of the notebook API.
//!
//! # Responsibility
//! - Wire each operation's input/output schema types into the dispatch
//!   pipeline and implement its body against the project.
//!
//! # Invariants
//! - `open` reports failure in its body and never produces an error reply.
//! - `newChild` validates caller-supplied metadata against the child class
//!   schema before anything is persisted.

use crate::dispatch::{respond, HandlerError, RawRequest, Reply, Verb};
use crate::meta::{SchemaHandle, SchemaRegistry};
use crate::model::tier::TierKind;
use crate::project::{Project, ProjectSlot};
use crate::serialize::{branch, tier_info, BranchResponse, Status, StatusKind, TierInfo};
use indexmap::IndexMap;
use log::info;
use serde::Deserialize;
use serde_json::Value;
use std::sync::RwLockReadGuard;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NameQuery {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TreePathQuery {
    path: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NewChildInfo {
    id: String,
    parent: String,
    #[serde(default)]
    template: Option<String>,
    /// Caller-supplied metadata fields beyond the fixed ones.
    #[serde(flatten)]
    extra: IndexMap<String, Value>,
}

fn schema_guard(handle: &SchemaHandle) -> RwLockReadGuard<'_, SchemaRegistry> {
    match handle.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Looks a tier up by display name.
pub fn lookup(slot: &ProjectSlot, req: &RawRequest) -> Reply {
    respond(slot, Verb::Get, req, |project, query: NameQuery| {
        let tier = project.tier_by_name(&query.name)?;
        let info: TierInfo = tier_info(project, &tier)?;
        Ok(info)
    })
}

/// Opens a tier's folder in the host file browser; failure is a body status,
/// never an error reply.
pub fn open(slot: &ProjectSlot, req: &RawRequest) -> Reply {
    respond(slot, Verb::Get, req, |project, query: NameQuery| {
        let outcome = project
            .tier_by_name(&query.name)
            .map_err(HandlerError::from)
            .and_then(|tier| {
                project
                    .storage()
                    .open_folder(&tier)
                    .map_err(HandlerError::from)
            });
        let status = match outcome {
            Ok(()) => StatusKind::Success,
            Err(_) => StatusKind::Failure,
        };
        Ok(Status { status })
    })
}

/// Returns the branch at the given path segments.
pub fn tree(slot: &ProjectSlot, req: &RawRequest) -> Reply {
    respond(slot, Verb::Get, req, |project, query: TreePathQuery| {
        let tier = project.resolve_ref(&query.path)?;
        let response: BranchResponse = branch(project, &tier)?;
        Ok(response)
    })
}

/// Materializes a new child tier and returns its branch.
pub fn new_child(slot: &ProjectSlot, req: &RawRequest) -> Reply {
    respond(slot, Verb::Post, req, |project, body: NewChildInfo| {
        let parent = project.tier_by_name(&body.parent)?;
        let (child_kind, templates, schema) = match project.child_class(&parent) {
            Some(class) => (
                class.kind(),
                class.templates().to_vec(),
                class.schema().cloned(),
            ),
            None => {
                return Err(HandlerError::NotFound(format!(
                    "parent has no child class: {}",
                    body.parent
                )))
            }
        };

        // Unknown template names fall back to the storage engine's default.
        let template = body
            .template
            .as_deref()
            .filter(|name| templates.iter().any(|known| known == name))
            .filter(|_| child_kind == TierKind::ContentBearing);

        let mut meta = IndexMap::with_capacity(body.extra.len());
        for (key, raw) in &body.extra {
            match &schema {
                Some(handle) => {
                    let registry = schema_guard(handle);
                    if registry.contains(key) {
                        let value = registry.decode(key, Some(raw))?;
                        meta.insert(key.clone(), registry.encode(key, &value)?);
                    } else {
                        meta.insert(key.clone(), raw.clone());
                    }
                }
                None => {
                    meta.insert(key.clone(), raw.clone());
                }
            }
        }

        let child = project.address_child(&parent, &body.id)?;
        project.storage_mut().setup_files(&child, template, meta)?;
        info!(
            "event=child_created module=handlers status=ok name={} parent={}",
            child.name, parent.name
        );

        let response: BranchResponse = branch(project, &child)?;
        Ok(response)
    })
}
