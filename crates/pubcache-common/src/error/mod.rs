//! Error handling for the published-content cache.
//!
//! This module provides a unified error type and result alias used
//! across all cache components.

mod cache;

pub use cache::{CacheError, ErrorCode};

/// Result type alias for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
