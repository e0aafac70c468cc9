//! Type definitions for the published-content cache.
//!
//! This module contains the identifiers and records shared across the cache
//! crates.

mod content;
mod ids;

pub use content::ContentNode;
pub use ids::{DictionaryId, Generation, ScopeId, WriterId};
