//! Tier nodes of the project hierarchy.

use indexmap::IndexMap;

/// Container/content-bearing variant tag for a tier.
///
/// Content-bearing tiers additionally carry a primary document, a metadata
/// store and optional highlights in their backing storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierKind {
    Container,
    ContentBearing,
}

/// One node in the project hierarchy.
///
/// Tiers are lazily instantiated on lookup and cached for the lifetime of
/// the owning project. A tier being addressable here is distinct from its
/// backing storage being materialized.
#[derive(Debug, Clone)]
pub struct Tier {
    /// Short segment, unique among siblings. Empty for the root.
    pub id: String,
    /// Full path from the root; the root's list is empty.
    pub identifiers: Vec<String>,
    pub kind: TierKind,
    /// Instantiated children in insertion order.
    pub children: IndexMap<String, Tier>,
}

impl Tier {
    pub fn new(id: impl Into<String>, identifiers: Vec<String>, kind: TierKind) -> Self {
        Self {
            id: id.into(),
            identifiers,
            kind,
            children: IndexMap::new(),
        }
    }

    /// Depth below the root; the root is at depth zero.
    pub fn depth(&self) -> usize {
        self.identifiers.len()
    }
}

/// Lightweight snapshot of a resolved tier, handed to external collaborators
/// (storage, serializers) without borrowing the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierRef {
    pub identifiers: Vec<String>,
    /// Display name derived from ancestor ids via the class templates.
    pub name: String,
    pub kind: TierKind,
}

impl TierRef {
    pub fn depth(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_root(&self) -> bool {
        self.identifiers.is_empty()
    }
}
