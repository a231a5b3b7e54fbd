//! Core domain logic for the tierbook notebook organizer.
//!
//! Resolves dotted and path-segment identifiers into a strictly typed tier
//! hierarchy, validates requests and responses against declared schemas, and
//! serializes resolved branches for the client. The file-backed storage
//! engine and the host HTTP router are external collaborators reached through
//! seams defined here.

pub mod dispatch;
pub mod handlers;
pub mod logging;
pub mod meta;
pub mod model;
pub mod project;
pub mod serialize;
pub mod storage;

pub use dispatch::{
    parse_path_segments, parse_query, respond, DispatchError, HandlerError, RawRequest, Reply,
    Verb,
};
pub use logging::{init_logging, logging_status};
pub use meta::{
    AttrDescriptor, LogicalType, MetaError, MetaResult, MetaSchema, MetaValue, PropertySchema,
    SchemaHandle, SchemaRegistry, StorageType, Visibility, RESERVED_META_KEYS,
};
pub use model::class::{default_hierarchy, ClassError, TierClass};
pub use model::tier::{Tier, TierKind, TierRef};
pub use project::{
    AlreadyBound, Project, ProjectError, ProjectSlot, ResolveError, ResolveResult,
};
pub use serialize::{
    branch, summarize, tier_info, BranchResponse, ChildClsInfo, ChildSummary, SerializeError,
    Status, StatusKind, TierInfo,
};
pub use storage::{MemoryStorage, StorageError, StorageResult, TierStorage};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
