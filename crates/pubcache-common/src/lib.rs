//! # pubcache-common
//!
//! Common types, errors, and configuration for the published-content cache.
//!
//! This crate provides the foundational pieces shared by the cache crates:
//!
//! - **Types**: Identifiers (`Generation`, `DictionaryId`, `ScopeId`) and the
//!   cached content record (`ContentNode`)
//! - **Errors**: Unified error handling with `CacheError`
//! - **Config**: Snapshot dictionary configuration
//! - **Constants**: Cache-wide defaults
//!
//! ## Example
//!
//! ```rust
//! use pubcache_common::types::{ContentNode, Generation};
//! use pubcache_common::error::CacheResult;
//!
//! fn example() -> CacheResult<()> {
//!     let gen = Generation::new(3);
//!     let node = ContentNode::new(1046, 0x1046).with_path("-1,1046");
//!     assert_eq!(gen.next().as_u64(), 4);
//!     assert_eq!(node.level(), 1);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use error::{CacheError, CacheResult};
pub use types::{ContentNode, DictionaryId, Generation, ScopeId, WriterId};
