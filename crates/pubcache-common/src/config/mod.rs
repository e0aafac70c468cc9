//! Configuration for the published-content cache.
//!
//! This module provides configuration structures for the cache components.

mod dictionary;

pub use dictionary::SnapDictionaryConfig;
