//! # pubcache-snapdict
//!
//! Generational snapshot dictionary backing the published-content cache.
//!
//! This crate implements:
//! - Generation tokens and the generation queue
//! - Immutable linked value chains
//! - Generation-bound snapshots with non-blocking reads
//! - The dictionary with its single-writer lock, commit and rollback
//! - Scope-enlisted write locks
//! - Generation-floor garbage collection
//!
//! ## Example
//!
//! ```rust
//! use pubcache_common::config::SnapDictionaryConfig;
//! use pubcache_snapdict::SnapDictionary;
//!
//! let dict: SnapDictionary<u32, String> =
//!     SnapDictionary::with_config(SnapDictionaryConfig::for_testing()).unwrap();
//!
//! dict.set(1, "one".to_string()).unwrap();
//! let snapshot = dict.create_snapshot().unwrap();
//!
//! let lock = dict.write_lock(None).unwrap();
//! dict.set_locked(1, "uno".to_string()).unwrap();
//! lock.rollback().unwrap();
//!
//! assert_eq!(snapshot.get(&1).unwrap().as_deref(), Some("one"));
//! assert_eq!(dict.create_snapshot().unwrap().get(&1).unwrap().as_deref(), Some("one"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Immutable linked value chains
pub mod chain;

/// The snapshot dictionary
pub mod dictionary;

/// Generation-floor garbage collection
pub mod gc;

/// Generation tokens
pub mod generation;

/// Ambient scopes and write-lock handles
pub mod scope;

/// Generation-bound read views
pub mod snapshot;

#[cfg(any(test, feature = "test-helpers"))]
pub use dictionary::TestHelper;
pub use dictionary::{CacheKey, CacheValue, SnapDictionary};
pub use gc::{CollectResult, CollectStats};
pub use generation::{GenObjInfo, GenRef};
pub use scope::{AmbientScopeProvider, ScopeContext, ScopeProvider, ScopedWriteLock, WriteLock};
pub use snapshot::{Snapshot, SnapshotValues};
