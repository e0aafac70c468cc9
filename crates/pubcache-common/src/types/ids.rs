//! Core identifier types for the published-content cache.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::constants::INITIAL_GENERATION;

/// Generation number - a logical commit point of a snapshot dictionary.
///
/// Generations increase monotonically. All writes made between two snapshot
/// exposures share one generation; a snapshot bound to generation `G` sees
/// every write made at a generation `<= G` and none above.
///
/// # Example
///
/// ```rust
/// use pubcache_common::types::Generation;
///
/// let gen = Generation::new(1);
/// assert!(gen > Generation::ZERO);
/// assert_eq!(gen.prev(), Generation::ZERO);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Generation(u64);

impl Generation {
    /// The initial generation.
    pub const ZERO: Self = Self(INITIAL_GENERATION);

    /// Creates a new `Generation` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(gen: u64) -> Self {
        Self(gen)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next generation.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the previous generation (saturating at zero).
    #[inline]
    #[must_use]
    pub const fn prev(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    /// Returns how many generations `self` is ahead of `other`.
    #[inline]
    #[must_use]
    pub const fn distance_from(self, other: Self) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Generation({})", self.0)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

impl From<u64> for Generation {
    #[inline]
    fn from(gen: u64) -> Self {
        Self::new(gen)
    }
}

impl From<Generation> for u64 {
    #[inline]
    fn from(gen: Generation) -> Self {
        gen.0
    }
}

static NEXT_DICTIONARY_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Dictionary identifier - distinguishes snapshot dictionary instances.
///
/// Used in error messages and as part of the key a dictionary enlists its
/// write lock under.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DictionaryId(u64);

impl DictionaryId {
    /// Creates a new `DictionaryId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates an identifier that is unique within this process.
    #[must_use]
    pub fn next_unique() -> Self {
        Self(NEXT_DICTIONARY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for DictionaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DictionaryId({})", self.0)
    }
}

impl fmt::Display for DictionaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snapdict#{}", self.0)
    }
}

/// Scope identifier - identifies an ambient transaction scope.
///
/// Two write-lock acquisitions carrying the same scope id belong to the same
/// writer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Creates a new `ScopeId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates an identifier that is unique within this process.
    #[must_use]
    pub fn next_unique() -> Self {
        Self(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeId({})", self.0)
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// Identity of the holder of a dictionary write lock.
///
/// A lock taken without a scope belongs to the calling thread; a scoped lock
/// belongs to the scope, whichever thread acts on its behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriterId {
    /// A context-less writer, identified by its thread.
    Thread(std::thread::ThreadId),
    /// A writer enlisted in an ambient scope.
    Scope(ScopeId),
}

impl WriterId {
    /// Returns the identity of the calling thread.
    #[must_use]
    pub fn current_thread() -> Self {
        Self::Thread(std::thread::current().id())
    }

    /// Returns true if this writer is a scope.
    #[inline]
    #[must_use]
    pub const fn is_scope(&self) -> bool {
        matches!(self, Self::Scope(_))
    }
}

impl fmt::Display for WriterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thread(id) => write!(f, "thread {id:?}"),
            Self::Scope(id) => write!(f, "{id}"),
        }
    }
}

impl From<ScopeId> for WriterId {
    fn from(id: ScopeId) -> Self {
        Self::Scope(id)
    }
}
