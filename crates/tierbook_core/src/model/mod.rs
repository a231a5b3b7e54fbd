//! Domain model for the strict tier hierarchy.
//!
//! # Responsibility
//! - Define the tier node shape and its container/content-bearing variants.
//! - Define per-class descriptors: id patterns, naming rules, schemas.
//!
//! # Invariants
//! - A tier's `identifiers` is its parent's `identifiers` plus its own `id`.
//! - A class connects to at most one schema registry.

pub mod class;
pub mod tier;
