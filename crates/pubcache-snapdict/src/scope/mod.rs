//! Ambient scopes and write-lock handles.
//!
//! A [`ScopeContext`] models the ambient transaction of the calling code. A
//! dictionary write lock taken with a scope is enlisted into it: the lock
//! stays held after the [`WriteLock`] handle goes away and is only released,
//! with commit or rollback, when the scope exits. A lock taken without a scope
//! belongs to the calling thread and is released by its outermost handle.
//!
//! # Example
//!
//! ```rust
//! use pubcache_snapdict::{ScopeContext, SnapDictionary};
//!
//! let dict: SnapDictionary<u32, String> = SnapDictionary::new();
//! let scope = ScopeContext::new();
//!
//! let lock = dict.write_lock(Some(&scope)).unwrap();
//! dict.set_locked(1, "one".to_string()).unwrap();
//! drop(lock); // still held by the scope
//!
//! assert_eq!(dict.create_snapshot().unwrap().get(&1).unwrap(), None);
//! scope.exit(true);
//! assert_eq!(dict.create_snapshot().unwrap().get(&1).unwrap(), Some("one".to_string()));
//! ```

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use pubcache_common::constants::SCOPE_ENLIST_KEY_PREFIX;
use pubcache_common::error::{CacheError, CacheResult};
use pubcache_common::types::{DictionaryId, ScopeId, WriterId};
use tracing::{debug, warn};

use crate::dictionary::{CacheKey, CacheValue, Core};

type ExitCallback = Box<dyn FnOnce(bool) + Send>;

/// A participant enlisted into a scope.
struct Enlistment {
    key: String,
    participant: Arc<dyn Any + Send + Sync>,
    on_exit: Option<ExitCallback>,
}

#[derive(Default)]
struct ScopeState {
    enlisted: Vec<Enlistment>,
    exited: bool,
}

/// An ambient transaction scope.
///
/// Participants enlist under a string key and get notified once, in
/// enlistment order, when the scope exits. A scope dropped without an
/// explicit [`exit`](Self::exit) exits as not completed.
pub struct ScopeContext {
    id: ScopeId,
    state: Mutex<ScopeState>,
}

impl ScopeContext {
    /// Creates a new scope with a process-unique id.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ScopeId::next_unique(),
            state: Mutex::new(ScopeState::default()),
        })
    }

    /// Returns the scope id.
    #[inline]
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Returns true once the scope has exited.
    pub fn is_exited(&self) -> bool {
        self.state.lock().exited
    }

    /// Returns the number of enlisted participants.
    pub fn enlisted_count(&self) -> usize {
        self.state.lock().enlisted.len()
    }

    /// Enlists a participant, see [`try_enlist`](Self::try_enlist).
    pub fn enlist<T, C, E>(&self, key: &str, creator: C, on_exit: E) -> CacheResult<Arc<T>>
    where
        T: Any + Send + Sync,
        C: FnOnce() -> Arc<T>,
        E: FnOnce(Arc<T>, bool) + Send + 'static,
    {
        self.try_enlist(key, || Ok(creator()), on_exit)
    }

    /// Enlists a participant under `key`.
    ///
    /// If a participant is already enlisted under `key` it is returned and
    /// neither `creator` nor `on_exit` is used. Otherwise `creator` builds
    /// the participant and `on_exit` is registered to run with it when the
    /// scope exits. `creator` runs under the scope's internal lock and must
    /// not call back into this scope.
    pub fn try_enlist<T, C, E>(&self, key: &str, creator: C, on_exit: E) -> CacheResult<Arc<T>>
    where
        T: Any + Send + Sync,
        C: FnOnce() -> CacheResult<Arc<T>>,
        E: FnOnce(Arc<T>, bool) + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.exited {
            return Err(CacheError::ScopeExited { scope: self.id });
        }

        if let Some(existing) = state.enlisted.iter().find(|e| e.key == key) {
            return Arc::clone(&existing.participant)
                .downcast::<T>()
                .map_err(|_| {
                    CacheError::internal(format!(
                        "{} has a participant of another type enlisted under '{key}'",
                        self.id
                    ))
                });
        }

        let participant = creator()?;
        let notified = Arc::clone(&participant);
        state.enlisted.push(Enlistment {
            key: key.to_string(),
            participant: participant.clone(),
            on_exit: Some(Box::new(move |completed| on_exit(notified, completed))),
        });
        Ok(participant)
    }

    /// Exits the scope, notifying every participant.
    ///
    /// Only the first call has any effect. Callbacks run outside the scope's
    /// internal lock.
    pub fn exit(&self, completed: bool) {
        let callbacks: Vec<ExitCallback> = {
            let mut state = self.state.lock();
            if state.exited {
                return;
            }
            state.exited = true;
            state
                .enlisted
                .iter_mut()
                .filter_map(|e| e.on_exit.take())
                .collect()
        };

        debug!(
            scope = %self.id,
            completed,
            participants = callbacks.len(),
            "scope exited"
        );
        for callback in callbacks {
            callback(completed);
        }
    }
}

impl Drop for ScopeContext {
    fn drop(&mut self) {
        if !self.state.get_mut().exited {
            self.exit(false);
        }
    }
}

impl fmt::Debug for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ScopeContext")
            .field("id", &self.id)
            .field(
                "enlisted",
                &state.enlisted.iter().map(|e| e.key.as_str()).collect::<Vec<_>>(),
            )
            .field("exited", &state.exited)
            .finish()
    }
}

/// Source of the current ambient scope.
pub trait ScopeProvider {
    /// Returns the current scope, if any.
    fn context(&self) -> Option<Arc<ScopeContext>>;
}

impl ScopeProvider for Option<Arc<ScopeContext>> {
    fn context(&self) -> Option<Arc<ScopeContext>> {
        self.clone()
    }
}

/// A [`ScopeProvider`] whose current scope is set explicitly.
#[derive(Debug, Default)]
pub struct AmbientScopeProvider {
    current: RwLock<Option<Arc<ScopeContext>>>,
}

impl AmbientScopeProvider {
    /// Creates a provider with no current scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new scope and makes it current.
    pub fn begin(&self) -> Arc<ScopeContext> {
        let scope = ScopeContext::new();
        *self.current.write() = Some(Arc::clone(&scope));
        scope
    }

    /// Replaces the current scope.
    pub fn set(&self, scope: Option<Arc<ScopeContext>>) {
        *self.current.write() = scope;
    }

    /// Exits the current scope and clears it.
    pub fn complete(&self, completed: bool) {
        if let Some(scope) = self.current.write().take() {
            scope.exit(completed);
        }
    }
}

impl ScopeProvider for AmbientScopeProvider {
    fn context(&self) -> Option<Arc<ScopeContext>> {
        self.current.read().clone()
    }
}

/// A dictionary write lock enlisted into a scope.
///
/// Every acquisition of the same dictionary's lock within the same scope
/// yields this one object.
#[derive(Debug)]
pub struct ScopedWriteLock {
    dictionary: DictionaryId,
    scope: ScopeId,
    poisoned: AtomicBool,
}

impl ScopedWriteLock {
    /// Acquires `core`'s write lock for `scope`, or returns the lock the scope
    /// already holds.
    pub(crate) fn enlist<K: CacheKey, V: CacheValue>(
        core: &Arc<Core<K, V>>,
        scope: &ScopeContext,
    ) -> CacheResult<Arc<Self>> {
        let key = format!("{SCOPE_ENLIST_KEY_PREFIX}{}", core.id.as_u64());
        let writer = WriterId::Scope(scope.id());
        let weak = Arc::downgrade(core);

        scope.try_enlist(
            &key,
            || {
                core.acquire(writer, true)?;
                Ok(Arc::new(Self {
                    dictionary: core.id,
                    scope: scope.id(),
                    poisoned: AtomicBool::new(false),
                }))
            },
            move |lock: Arc<Self>, completed| {
                let Some(core) = weak.upgrade() else {
                    return;
                };
                let commit = completed && !lock.is_poisoned();
                if let Err(e) = core.release(writer, commit) {
                    warn!(dictionary = %lock.dictionary, error = %e, "scoped release failed");
                }
            },
        )
    }

    /// Returns the dictionary this lock belongs to.
    pub fn dictionary(&self) -> DictionaryId {
        self.dictionary
    }

    /// Returns the scope holding this lock.
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Returns true if a handle asked for rollback.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(AtomicOrdering::Acquire)
    }

    fn poison(&self) {
        self.poisoned.store(true, AtomicOrdering::Release);
    }
}

enum LockKind {
    Thread(WriterId),
    Scoped(Arc<ScopedWriteLock>),
}

/// Handle on a dictionary write lock.
///
/// For a lock taken without a scope, committing, rolling back or dropping
/// the handle releases one level of nesting; the outermost release unlocks
/// the dictionary. Dropping commits unless the thread is panicking.
///
/// For a scoped lock the handle only observes: the scope's exit decides.
/// [`rollback`](Self::rollback) still forces the scope's exit to roll back.
pub struct WriteLock<K: CacheKey, V: CacheValue> {
    core: Arc<Core<K, V>>,
    kind: LockKind,
    released: bool,
}

impl<K: CacheKey, V: CacheValue> WriteLock<K, V> {
    pub(crate) fn unscoped(core: Arc<Core<K, V>>, writer: WriterId) -> Self {
        Self {
            core,
            kind: LockKind::Thread(writer),
            released: false,
        }
    }

    pub(crate) fn scoped(core: Arc<Core<K, V>>, lock: Arc<ScopedWriteLock>) -> Self {
        Self {
            core,
            kind: LockKind::Scoped(lock),
            released: false,
        }
    }

    /// Returns the identity holding the lock.
    pub fn writer(&self) -> WriterId {
        match &self.kind {
            LockKind::Thread(writer) => *writer,
            LockKind::Scoped(lock) => WriterId::Scope(lock.scope),
        }
    }

    /// Returns true if the lock is enlisted into a scope.
    pub fn is_scoped(&self) -> bool {
        matches!(self.kind, LockKind::Scoped(_))
    }

    /// Returns true if both handles refer to the same held lock.
    pub fn same_lock(&self, other: &Self) -> bool {
        if !Arc::ptr_eq(&self.core, &other.core) {
            return false;
        }
        match (&self.kind, &other.kind) {
            (LockKind::Scoped(a), LockKind::Scoped(b)) => Arc::ptr_eq(a, b),
            (LockKind::Thread(a), LockKind::Thread(b)) => a == b,
            _ => false,
        }
    }

    /// Releases this handle, keeping its writes.
    pub fn commit(mut self) -> CacheResult<()> {
        self.finish(true)
    }

    /// Releases this handle, discarding every write made under the lock.
    pub fn rollback(mut self) -> CacheResult<()> {
        self.finish(false)
    }

    fn finish(&mut self, commit: bool) -> CacheResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match &self.kind {
            LockKind::Thread(writer) => self.core.release(*writer, commit),
            LockKind::Scoped(lock) => {
                if !commit {
                    lock.poison();
                }
                Ok(())
            }
        }
    }
}

impl<K: CacheKey, V: CacheValue> Drop for WriteLock<K, V> {
    fn drop(&mut self) {
        let commit = !std::thread::panicking();
        if let Err(e) = self.finish(commit) {
            warn!(dictionary = %self.core.id, error = %e, "write lock release failed");
        }
    }
}

impl<K: CacheKey, V: CacheValue> fmt::Debug for WriteLock<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteLock")
            .field("dictionary", &self.core.id)
            .field("writer", &self.writer())
            .field("released", &self.released)
            .finish()
    }
}
