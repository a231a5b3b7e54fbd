//! Project state, identifier resolution and the bound-once context slot.
//!
//! # Responsibility
//! - Own the class chain, the cached tier tree and the storage seam.
//! - Resolve ordered path segments and display names into tiers.
//!
//! # Invariants
//! - Resolution consumes segments strictly left to right; failure is always
//!   reported at the first offending segment.
//! - An empty segment list resolves to the root.
//! - A resolvable tier whose storage is not materialized fails distinctly.

use crate::model::class::TierClass;
use crate::model::tier::{Tier, TierKind, TierRef};
use crate::storage::{StorageError, TierStorage};
use indexmap::IndexMap;
use log::info;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard};

pub type ResolveResult<T> = Result<T, ResolveError>;

/// Errors from identifier and name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The current tier's class defines no child class.
    NoChildClass { index: usize, segment: String },
    /// The segment is rejected by the child class id pattern.
    InvalidSegment { index: usize, segment: String },
    /// The tier is addressable but its storage is not materialized.
    NotMaterialized(String),
    /// The display name matches no class naming rule.
    UnknownName(String),
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoChildClass { index, segment } => {
                write!(f, "no child class for segment `{segment}` at position {index}")
            }
            Self::InvalidSegment { index, segment } => {
                write!(f, "invalid segment `{segment}` at position {index}")
            }
            Self::NotMaterialized(name) => write!(f, "tier not found: {name}"),
            Self::UnknownName(name) => write!(f, "unknown tier name: {name}"),
        }
    }
}

impl Error for ResolveError {}

/// Errors from project construction.
#[derive(Debug)]
pub enum ProjectError {
    /// The class chain is empty.
    NoClasses,
    /// The root class must be a container.
    RootMustBeContainer,
    /// A non-root class template carries no id placeholder, which would make
    /// its tiers unaddressable by name.
    MissingIdPlaceholder(String),
    /// A composed name pattern failed to compile.
    InvalidNamePattern {
        pretty_type: String,
        source: regex::Error,
    },
    Storage(StorageError),
}

impl Display for ProjectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoClasses => write!(f, "a project needs at least one tier class"),
            Self::RootMustBeContainer => write!(f, "the root tier class must be a container"),
            Self::MissingIdPlaceholder(pretty_type) => {
                write!(f, "class `{pretty_type}` has no id placeholder in its name template")
            }
            Self::InvalidNamePattern {
                pretty_type,
                source,
            } => write!(f, "name pattern for `{pretty_type}` failed to compile: {source}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ProjectError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidNamePattern { source, .. } => Some(source),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for ProjectError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

/// One notebook project: a class chain, the cached tier tree and its storage.
pub struct Project {
    classes: Vec<TierClass>,
    /// Compiled full-name patterns; entry `d` parses names at depth `d + 1`.
    name_patterns: Vec<Regex>,
    root: Tier,
    storage: Box<dyn TierStorage>,
}

impl Project {
    /// Builds a project from a root-first class chain and a storage engine,
    /// materializing the root when it does not exist yet.
    pub fn new(
        classes: Vec<TierClass>,
        mut storage: Box<dyn TierStorage>,
    ) -> Result<Self, ProjectError> {
        let home_class = classes.first().ok_or(ProjectError::NoClasses)?;
        if home_class.kind() != TierKind::Container {
            return Err(ProjectError::RootMustBeContainer);
        }

        let mut name_patterns = Vec::with_capacity(classes.len().saturating_sub(1));
        let mut accumulated = String::new();
        for class in &classes[1..] {
            if !class.name_part_template().contains(crate::model::class::ID_PLACEHOLDER) {
                return Err(ProjectError::MissingIdPlaceholder(
                    class.pretty_type().to_string(),
                ));
            }
            accumulated.push_str(&class.name_part_pattern());
            let pattern =
                Regex::new(&format!("^{accumulated}$")).map_err(|source| {
                    ProjectError::InvalidNamePattern {
                        pretty_type: class.pretty_type().to_string(),
                        source,
                    }
                })?;
            name_patterns.push(pattern);
        }

        let root = Tier::new("", Vec::new(), home_class.kind());
        let home = TierRef {
            identifiers: Vec::new(),
            name: home_class.name_part(""),
            kind: home_class.kind(),
        };
        if !storage.exists(&home) {
            storage.setup_files(&home, None, IndexMap::new())?;
        }

        info!(
            "event=project_init module=project status=ok classes={} home={}",
            classes.len(),
            home.name
        );

        Ok(Self {
            classes,
            name_patterns,
            root,
            storage,
        })
    }

    pub fn storage(&self) -> &dyn TierStorage {
        self.storage.as_ref()
    }

    pub fn storage_mut(&mut self) -> &mut dyn TierStorage {
        self.storage.as_mut()
    }

    pub fn root(&self) -> &Tier {
        &self.root
    }

    /// Snapshot of the root tier.
    pub fn home(&self) -> TierRef {
        self.snapshot(Vec::new(), self.classes[0].kind())
    }

    /// Display name of the root tier.
    pub fn home_name(&self) -> String {
        self.classes[0].name_part("")
    }

    /// Class descriptor governing the given tier.
    pub fn class_of(&self, tier: &TierRef) -> &TierClass {
        self.classes.get(tier.depth()).unwrap_or(&self.classes[0])
    }

    /// Class descriptor of the given tier's children, when one is defined.
    pub fn child_class(&self, tier: &TierRef) -> Option<&TierClass> {
        self.classes.get(tier.depth() + 1)
    }

    /// Display name for a full identifier path.
    pub fn name_of(&self, identifiers: &[String]) -> String {
        if identifiers.is_empty() {
            return self.home_name();
        }
        let mut name = String::new();
        for (depth, id) in identifiers.iter().enumerate() {
            if let Some(class) = self.classes.get(depth + 1) {
                name.push_str(&class.name_part(id));
            }
        }
        name
    }

    fn snapshot(&self, identifiers: Vec<String>, kind: TierKind) -> TierRef {
        TierRef {
            name: self.name_of(&identifiers),
            identifiers,
            kind,
        }
    }

    /// Walks the segments, lazily instantiating addressable tiers, without
    /// requiring the target's storage to exist.
    pub fn address(&mut self, segments: &[String]) -> ResolveResult<&Tier> {
        let mut tier = &mut self.root;
        for (index, segment) in segments.iter().enumerate() {
            let child_class = match self.classes.get(index + 1) {
                Some(class) => class,
                None => {
                    return Err(ResolveError::NoChildClass {
                        index,
                        segment: segment.clone(),
                    })
                }
            };
            if !child_class.matches_id(segment) {
                return Err(ResolveError::InvalidSegment {
                    index,
                    segment: segment.clone(),
                });
            }
            let kind = child_class.kind();
            let mut identifiers = tier.identifiers.clone();
            identifiers.push(segment.clone());
            tier = tier
                .children
                .entry(segment.clone())
                .or_insert_with(|| Tier::new(segment.clone(), identifiers, kind));
        }
        Ok(tier)
    }

    /// Like [`Project::address`], returning a detached snapshot.
    pub fn address_ref(&mut self, segments: &[String]) -> ResolveResult<TierRef> {
        let (identifiers, kind) = {
            let tier = self.address(segments)?;
            (tier.identifiers.clone(), tier.kind)
        };
        Ok(self.snapshot(identifiers, kind))
    }

    /// Addresses a direct child of `parent` by id.
    pub fn address_child(&mut self, parent: &TierRef, id: &str) -> ResolveResult<TierRef> {
        let mut segments = parent.identifiers.clone();
        segments.push(id.to_string());
        self.address_ref(&segments)
    }

    /// Resolves segments to a tier whose storage is materialized.
    pub fn resolve_ref(&mut self, segments: &[String]) -> ResolveResult<TierRef> {
        let tier = self.address_ref(segments)?;
        if !self.storage.exists(&tier) {
            return Err(ResolveError::NotMaterialized(tier.name));
        }
        Ok(tier)
    }

    /// Resolves segments to the cached tier node.
    pub fn resolve(&mut self, segments: &[String]) -> ResolveResult<&Tier> {
        self.resolve_ref(segments)?;
        let mut tier = &self.root;
        for (index, segment) in segments.iter().enumerate() {
            tier = tier
                .children
                .get(segment)
                .ok_or_else(|| ResolveError::InvalidSegment {
                    index,
                    segment: segment.clone(),
                })?;
        }
        Ok(tier)
    }

    /// Resolves a display name, the inverse of [`Project::name_of`].
    pub fn tier_by_name(&mut self, name: &str) -> ResolveResult<TierRef> {
        if name == self.home_name() {
            return self.resolve_ref(&[]);
        }
        let mut parsed = None;
        for pattern in &self.name_patterns {
            if let Some(captures) = pattern.captures(name) {
                let segments: Vec<String> = (1..captures.len())
                    .filter_map(|group| captures.get(group))
                    .map(|m| m.as_str().to_string())
                    .collect();
                parsed = Some(segments);
                break;
            }
        }
        match parsed {
            Some(segments) => self.resolve_ref(&segments),
            None => Err(ResolveError::UnknownName(name.to_string())),
        }
    }
}

/// Explicit lifecycle for the process-wide current project.
///
/// Replaces a mutable global: unbound until [`ProjectSlot::bind`], bound once
/// for the process lifetime, and reset only by tests that need independent
/// instances.
#[derive(Default)]
pub struct ProjectSlot {
    inner: Mutex<Option<Project>>,
}

/// Error from binding an already-bound slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlreadyBound;

impl Display for AlreadyBound {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "a project is already bound to this slot")
    }
}

impl Error for AlreadyBound {}

impl ProjectSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Project>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Binds the project; fails when the slot is already bound.
    pub fn bind(&self, project: Project) -> Result<(), AlreadyBound> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(AlreadyBound);
        }
        info!("event=project_bound module=project status=ok");
        *slot = Some(project);
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.lock().is_some()
    }

    /// Runs `f` against the bound project, or returns `None` when unbound.
    pub fn with<R>(&self, f: impl FnOnce(&mut Project) -> R) -> Option<R> {
        let mut slot = self.lock();
        slot.as_mut().map(f)
    }

    /// Tears the binding down so tests can substitute a fresh project.
    pub fn reset(&self) {
        *self.lock() = None;
    }
}
