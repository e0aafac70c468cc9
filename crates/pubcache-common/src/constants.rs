//! Cache-wide constants.
//!
//! Defaults used by the snapshot dictionary and its collector.

// =============================================================================
// Generation Constants
// =============================================================================

/// Generation the dictionary starts at.
///
/// Bulk-seeded entries are written at this generation.
pub const INITIAL_GENERATION: u64 = 0;

/// Default number of generations the live generation may run ahead of the
/// floor before an automatic collection is scheduled.
pub const DEFAULT_COLLECT_MIN_GEN_DELTA: u64 = 8;

// =============================================================================
// Scope Constants
// =============================================================================

/// Prefix of the key a dictionary uses when enlisting its write lock into a
/// scope context. The dictionary id is appended.
pub const SCOPE_ENLIST_KEY_PREFIX: &str = "snapdict-";

/// Name given to background collector threads.
pub const COLLECTOR_THREAD_NAME: &str = "snapdict-collect";
