//! The snapshot dictionary.
//!
//! A [`SnapDictionary`] maps keys to linked value chains and hands out
//! [`Snapshot`]s that each read the dictionary as of one generation. One
//! writer at a time mutates it under a write lock; readers never block and
//! never take the structural lock.
//!
//! # Generations
//!
//! ```text
//!             set    snapshot   set    snapshot   lock+set   snapshot (locked)
//! live_gen:    1        1        2        2          3            3
//! next_gen:  false     true    false     true      false        false
//! binds:               g1                 g2                      g2
//! ```
//!
//! `next_gen` records that the live generation has been exposed to a
//! snapshot. The next write then opens a fresh generation so the exposed one
//! stays immutable. Writes to an unexposed live generation coalesce into it.
//!
//! A snapshot taken while the lock is held binds to `live_gen - 1` and never
//! sees the writer's work in progress. [`SnapDictionary::live_snapshot`] is
//! the writer's read-your-writes view.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use pubcache_common::config::SnapDictionaryConfig;
use pubcache_common::error::{CacheError, CacheResult};
use pubcache_common::types::{DictionaryId, Generation, WriterId};
use tracing::{debug, trace};

use crate::chain::{self, Node, WriteOutcome};
use crate::gc::{CollectResult, CollectStats};
use crate::generation::{GenQueue, LiveViews};
#[cfg(any(test, feature = "test-helpers"))]
use crate::generation::GenObjInfo;
use crate::scope::{ScopeContext, ScopeProvider, ScopedWriteLock, WriteLock};
use crate::snapshot::Snapshot;

/// Bounds on dictionary keys.
pub trait CacheKey: Eq + Hash + Clone + Send + Sync + 'static {}

impl<T: Eq + Hash + Clone + Send + Sync + 'static> CacheKey for T {}

/// Bounds on dictionary values.
///
/// Values are cloned out to readers, so large records are best stored
/// behind an `Arc`.
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> CacheValue for T {}

/// The current write-lock holder.
pub(crate) struct Writer<K, V> {
    pub(crate) id: WriterId,
    /// Nested acquisitions by the same thread.
    pub(crate) depth: usize,
    /// Whether acquiring the lock opened the live generation.
    pub(crate) opened: bool,
    /// Set by any release that asked for rollback.
    pub(crate) rollback: bool,
    /// Chain heads as they were before the lock first touched each key.
    pub(crate) undo: HashMap<K, Option<Arc<Node<V>>>>,
}

/// Generation bookkeeping, guarded by the structural lock.
pub(crate) struct State<K, V> {
    pub(crate) live_gen: Generation,
    pub(crate) next_gen: bool,
    pub(crate) floor_gen: Generation,
    pub(crate) queue: GenQueue,
    pub(crate) live_views: LiveViews,
    pub(crate) writer: Option<Writer<K, V>>,
}

impl<K, V> State<K, V> {
    /// Makes sure writes land in a generation no snapshot has seen.
    fn open_generation(&mut self) {
        if self.next_gen {
            self.live_gen = self.live_gen.next();
            self.next_gen = false;
            if let Some(writer) = self.writer.as_mut() {
                writer.opened = true;
            }
        }
    }
}

/// Shared dictionary internals.
///
/// Snapshots, lock handles, scope callbacks and collector threads all keep
/// the core alive; the public [`SnapDictionary`] owns its lifetime.
pub(crate) struct Core<K, V> {
    pub(crate) id: DictionaryId,
    pub(crate) chains: DashMap<K, Arc<Node<V>>>,
    pub(crate) state: Mutex<State<K, V>>,
    /// Serializes collection runs.
    pub(crate) collect_lock: Mutex<()>,
    /// Set while a background collection is scheduled or running.
    pub(crate) collecting: AtomicBool,
    pub(crate) collect_auto: AtomicBool,
    pub(crate) collect_min_gen_delta: u64,
    pub(crate) disposed: AtomicBool,
    pub(crate) stats: CollectStats,
}

impl<K: CacheKey, V: CacheValue> Core<K, V> {
    fn new(config: &SnapDictionaryConfig) -> Self {
        Self {
            id: DictionaryId::next_unique(),
            chains: DashMap::new(),
            state: Mutex::new(State {
                live_gen: Generation::ZERO,
                next_gen: true,
                floor_gen: Generation::ZERO,
                queue: GenQueue::new(),
                live_views: LiveViews::default(),
                writer: None,
            }),
            collect_lock: Mutex::new(()),
            collecting: AtomicBool::new(false),
            collect_auto: AtomicBool::new(config.collect_auto),
            collect_min_gen_delta: config.collect_min_gen_delta,
            disposed: AtomicBool::new(false),
            stats: CollectStats::new(),
        }
    }

    #[inline]
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(AtomicOrdering::Acquire)
    }

    pub(crate) fn ensure_live(&self) -> CacheResult<()> {
        if self.is_disposed() {
            return Err(CacheError::Disposed {
                dictionary: self.id,
            });
        }
        Ok(())
    }

    /// Takes the write lock for `writer`.
    ///
    /// The calling thread may nest context-less acquisitions. A scoped
    /// acquisition always opens a fresh generation so that the scope's
    /// writes can be rolled back as a unit.
    pub(crate) fn acquire(&self, writer: WriterId, scoped: bool) -> CacheResult<()> {
        self.ensure_live()?;
        let mut state = self.state.lock();

        if let Some(holder) = state.writer.as_mut() {
            if holder.id == writer && !scoped {
                holder.depth += 1;
                trace!(dictionary = %self.id, %writer, depth = holder.depth, "write lock nested");
                return Ok(());
            }
            return Err(CacheError::LockConflict {
                dictionary: self.id,
                holder: holder.id,
                requester: writer,
            });
        }

        let opened = state.next_gen || scoped;
        if opened {
            state.live_gen = state.live_gen.next();
            state.next_gen = false;
        }
        state.writer = Some(Writer {
            id: writer,
            depth: 1,
            opened,
            rollback: false,
            undo: HashMap::new(),
        });

        debug!(
            dictionary = %self.id,
            %writer,
            live_gen = %state.live_gen,
            opened,
            "write lock acquired"
        );
        Ok(())
    }

    /// Releases one level of `writer`'s lock.
    ///
    /// The outermost release unlocks. If any release asked for rollback the
    /// chain heads touched under the lock are restored and a generation the
    /// lock opened is given back.
    pub(crate) fn release(self: &Arc<Self>, writer: WriterId, commit: bool) -> CacheResult<()> {
        {
            let mut state = self.state.lock();
            let Some(holder) = state.writer.as_mut() else {
                return Err(CacheError::NotWriteLocked {
                    dictionary: self.id,
                });
            };
            if holder.id != writer {
                return Err(CacheError::internal(format!(
                    "{writer} released a lock held by {}",
                    holder.id
                )));
            }

            if !commit {
                holder.rollback = true;
            }
            holder.depth -= 1;
            if holder.depth > 0 {
                trace!(dictionary = %self.id, %writer, depth = holder.depth, "write lock unnested");
                return Ok(());
            }

            let Some(holder) = state.writer.take() else {
                return Ok(());
            };
            if holder.rollback {
                let restored = holder.undo.len();
                for (key, head) in holder.undo {
                    match head {
                        Some(head) => {
                            self.chains.insert(key, head);
                        }
                        None => {
                            self.chains.remove(&key);
                        }
                    }
                }
                if holder.opened {
                    state.live_gen = state.live_gen.prev();
                    state.next_gen = true;
                }
                debug!(
                    dictionary = %self.id,
                    %writer,
                    live_gen = %state.live_gen,
                    restored,
                    "write lock rolled back"
                );
            } else {
                debug!(
                    dictionary = %self.id,
                    %writer,
                    live_gen = %state.live_gen,
                    touched = holder.undo.len(),
                    "write lock committed"
                );
            }
        }

        self.schedule_collect();
        Ok(())
    }

    /// Checks that the caller may write under the held lock.
    ///
    /// A thread-owned lock admits only the thread holding it. A scoped lock
    /// admits any caller working within the scope.
    fn ensure_writer(&self, state: &State<K, V>) -> CacheResult<()> {
        match state.writer.as_ref().map(|w| w.id) {
            Some(holder) if holder.is_scope() || holder == WriterId::current_thread() => Ok(()),
            _ => Err(CacheError::NotWriteLocked {
                dictionary: self.id,
            }),
        }
    }

    /// Writes `value` (or a tombstone) for `key` under the held lock.
    fn write_locked(&self, state: &mut State<K, V>, key: K, value: Option<V>) -> CacheResult<()> {
        self.ensure_writer(state)?;
        state.open_generation();
        let generation = state.live_gen;
        let Some(writer) = state.writer.as_mut() else {
            return Err(CacheError::NotWriteLocked {
                dictionary: self.id,
            });
        };

        match self.chains.entry(key) {
            Entry::Occupied(mut entry) => match chain::write(Some(entry.get()), generation, value) {
                WriteOutcome::Publish(node) => {
                    let head = Arc::clone(entry.get());
                    writer.undo.entry(entry.key().clone()).or_insert(Some(head));
                    entry.insert(node);
                }
                WriteOutcome::Remove => {
                    let head = Arc::clone(entry.get());
                    writer.undo.entry(entry.key().clone()).or_insert(Some(head));
                    entry.remove();
                }
                WriteOutcome::Unchanged => {}
            },
            Entry::Vacant(entry) => {
                if let WriteOutcome::Publish(node) = chain::write(None, generation, value) {
                    writer.undo.entry(entry.key().clone()).or_insert(None);
                    entry.insert(node);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn set_locked(&self, key: K, value: Option<V>) -> CacheResult<()> {
        self.ensure_live()?;
        let mut state = self.state.lock();
        self.write_locked(&mut state, key, value)
    }

    pub(crate) fn clear_all_locked(&self) -> CacheResult<()> {
        self.ensure_live()?;
        let mut state = self.state.lock();
        self.ensure_writer(&state)?;
        let keys: Vec<K> = self.chains.iter().map(|e| e.key().clone()).collect();
        trace!(dictionary = %self.id, keys = keys.len(), "clearing all keys");
        for key in keys {
            self.write_locked(&mut state, key, None)?;
        }
        Ok(())
    }

    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, AtomicOrdering::AcqRel) {
            return;
        }
        {
            let mut state = self.state.lock();
            state.queue.clear();
            state.live_views.clear();
            state.writer = None;
        }
        self.chains.clear();
        debug!(dictionary = %self.id, "dictionary disposed");
    }
}

/// A generational multi-version dictionary.
///
/// # Example
///
/// ```rust
/// use pubcache_snapdict::SnapDictionary;
///
/// let dict: SnapDictionary<u32, &str> = SnapDictionary::new();
/// dict.set(1, "one").unwrap();
/// let before = dict.create_snapshot().unwrap();
///
/// dict.set(1, "uno").unwrap();
/// let after = dict.create_snapshot().unwrap();
///
/// assert_eq!(before.get(&1).unwrap(), Some("one"));
/// assert_eq!(after.get(&1).unwrap(), Some("uno"));
/// ```
pub struct SnapDictionary<K: CacheKey, V: CacheValue> {
    core: Arc<Core<K, V>>,
}

impl<K: CacheKey, V: CacheValue> SnapDictionary<K, V> {
    /// Creates an empty dictionary with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Arc::new(Core::new(&SnapDictionaryConfig::default())),
        }
    }

    /// Creates an empty dictionary.
    pub fn with_config(config: SnapDictionaryConfig) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self {
            core: Arc::new(Core::new(&config)),
        })
    }

    /// Creates a dictionary seeded with `entries` at the initial generation.
    ///
    /// Used to rebuild the cache from its backing store at startup; no lock
    /// is taken and later duplicates win.
    pub fn with_entries<I>(config: SnapDictionaryConfig, entries: I) -> CacheResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let dict = Self::with_config(config)?;
        for (key, value) in entries {
            dict.core
                .chains
                .insert(key, Node::new(Generation::ZERO, Some(value), None));
        }
        debug!(dictionary = %dict.core.id, entries = dict.core.chains.len(), "dictionary seeded");
        Ok(dict)
    }

    /// Returns the dictionary id.
    #[inline]
    pub fn id(&self) -> DictionaryId {
        self.core.id
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Creates a snapshot of the latest published generation.
    ///
    /// Without a writer the snapshot binds to the live generation, which is
    /// thereby exposed: the next write opens a new one. With a writer the
    /// snapshot binds to the generation before the writer's.
    pub fn create_snapshot(&self) -> CacheResult<Snapshot<K, V>> {
        self.core.ensure_live()?;
        let token = {
            let mut state = self.core.state.lock();
            let generation = if state.writer.is_some() {
                state.live_gen.prev()
            } else {
                state.next_gen = true;
                state.live_gen
            };
            state.queue.register(generation)
        };
        trace!(dictionary = %self.core.id, generation = %token.generation(), "snapshot created");

        self.core.schedule_collect();
        Ok(Snapshot::tracked(Arc::clone(&self.core), token))
    }

    /// Returns a view of the live generation, including writes made under a
    /// currently held lock.
    ///
    /// The view does not expose the live generation, so later writes to it
    /// show through. Collection keeps every version the view can reach for
    /// as long as it is alive.
    pub fn live_snapshot(&self) -> CacheResult<Snapshot<K, V>> {
        self.core.ensure_live()?;
        let token = {
            let mut state = self.core.state.lock();
            let generation = state.live_gen;
            state.live_views.register(generation)
        };
        Ok(Snapshot::tracked(Arc::clone(&self.core), token))
    }

    // =========================================================================
    // Locking
    // =========================================================================

    /// Takes the write lock.
    ///
    /// Without a scope the lock belongs to the calling thread. With a scope
    /// it is enlisted into the scope and released when the scope exits.
    /// Fails with [`CacheError::LockConflict`] if someone else holds it.
    pub fn write_lock(&self, scope: Option<&Arc<ScopeContext>>) -> CacheResult<WriteLock<K, V>> {
        match scope {
            None => {
                let writer = WriterId::current_thread();
                self.core.acquire(writer, false)?;
                Ok(WriteLock::unscoped(Arc::clone(&self.core), writer))
            }
            Some(scope) => {
                let lock = ScopedWriteLock::enlist(&self.core, scope)?;
                Ok(WriteLock::scoped(Arc::clone(&self.core), lock))
            }
        }
    }

    /// Takes the write lock within the provider's current scope.
    pub fn write_lock_from(&self, provider: &impl ScopeProvider) -> CacheResult<WriteLock<K, V>> {
        let scope = provider.context();
        self.write_lock(scope.as_ref())
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Sets `key` to `value`. Requires the write lock.
    pub fn set_locked(&self, key: K, value: V) -> CacheResult<()> {
        self.core.set_locked(key, Some(value))
    }

    /// Removes `key`. Requires the write lock.
    pub fn clear_locked(&self, key: K) -> CacheResult<()> {
        self.core.set_locked(key, None)
    }

    /// Removes every key. Requires the write lock.
    pub fn clear_all_locked(&self) -> CacheResult<()> {
        self.core.clear_all_locked()
    }

    /// Sets `key` to `value` under a transient lock.
    pub fn set(&self, key: K, value: V) -> CacheResult<()> {
        let lock = self.write_lock(None)?;
        self.set_locked(key, value)?;
        lock.commit()
    }

    /// Removes `key` under a transient lock.
    pub fn clear(&self, key: K) -> CacheResult<()> {
        let lock = self.write_lock(None)?;
        self.clear_locked(key)?;
        lock.commit()
    }

    /// Removes every key under a transient lock.
    pub fn clear_all(&self) -> CacheResult<()> {
        let lock = self.write_lock(None)?;
        self.clear_all_locked()?;
        lock.commit()
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Collects versions and generations no snapshot can reach any more.
    pub fn collect(&self) -> CacheResult<CollectResult> {
        self.core.collect()
    }

    /// Runs [`collect`](Self::collect) on tokio's blocking pool.
    pub async fn collect_async(&self) -> CacheResult<CollectResult> {
        let core = Arc::clone(&self.core);
        tokio::task::spawn_blocking(move || core.collect())
            .await
            .map_err(|e| CacheError::internal(format!("collector task failed: {e}")))?
    }

    /// Returns the number of keys with a chain, tombstoned ones included.
    pub fn count(&self) -> usize {
        self.core.chains.len()
    }

    /// Returns the number of live tracked snapshots.
    pub fn snap_count(&self) -> usize {
        self.core.state.lock().queue.snapshot_count()
    }

    /// Returns the number of tracked generations, including ones whose
    /// snapshots are gone but that have not been collected yet.
    pub fn gen_count(&self) -> usize {
        self.core.state.lock().queue.len()
    }

    /// Returns cumulative collection statistics.
    pub fn collect_stats(&self) -> &CollectStats {
        &self.core.stats
    }

    /// Disposes the dictionary, dropping all content.
    ///
    /// Every later operation, through the dictionary or its snapshots,
    /// fails with [`CacheError::Disposed`].
    pub fn dispose(&self) {
        self.core.dispose();
    }

    /// Returns true once the dictionary is disposed.
    pub fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }

    /// Returns diagnostics over the internal generation state.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn test_helper(&self) -> TestHelper<'_, K, V> {
        TestHelper { core: &self.core }
    }
}

impl<K: CacheKey, V: CacheValue> Default for SnapDictionary<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey, V: CacheValue> Drop for SnapDictionary<K, V> {
    fn drop(&mut self) {
        self.core.dispose();
    }
}

impl<K: CacheKey, V: CacheValue> fmt::Debug for SnapDictionary<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("SnapDictionary")
            .field("id", &self.core.id)
            .field("count", &self.core.chains.len())
            .field("live_gen", &state.live_gen)
            .field("next_gen", &state.next_gen)
            .field("floor_gen", &state.floor_gen)
            .field("locked", &state.writer.is_some())
            .field("disposed", &self.core.is_disposed())
            .finish()
    }
}

/// Read access to a dictionary's generation state.
#[cfg(any(test, feature = "test-helpers"))]
pub struct TestHelper<'a, K: CacheKey, V: CacheValue> {
    core: &'a Core<K, V>,
}

#[cfg(any(test, feature = "test-helpers"))]
impl<K: CacheKey, V: CacheValue> TestHelper<'_, K, V> {
    /// The generation currently being written.
    pub fn live_gen(&self) -> Generation {
        self.core.state.lock().live_gen
    }

    /// Whether the live generation has been exposed to a snapshot.
    pub fn next_gen(&self) -> bool {
        self.core.state.lock().next_gen
    }

    /// The lowest generation still reconstructible.
    pub fn floor_gen(&self) -> Generation {
        self.core.state.lock().floor_gen
    }

    /// Whether a writer holds the lock.
    pub fn is_locked(&self) -> bool {
        self.core.state.lock().writer.is_some()
    }

    /// The current lock holder.
    pub fn writer(&self) -> Option<WriterId> {
        self.core.state.lock().writer.as_ref().map(|w| w.id)
    }

    /// The newest tracked generation.
    pub fn gen_obj(&self) -> Option<GenObjInfo> {
        self.core.state.lock().queue.newest().map(|obj| obj.info())
    }

    /// The versions of `key`, newest first.
    pub fn chain(&self, key: &K) -> Vec<(Generation, Option<V>)> {
        let Some(head) = self.core.chains.get(key).map(|e| Arc::clone(e.value())) else {
            return Vec::new();
        };
        head.iter()
            .map(|node| (node.generation(), node.value().cloned()))
            .collect()
    }

    /// Whether automatic collection is on.
    pub fn collect_auto(&self) -> bool {
        self.core.collect_auto.load(AtomicOrdering::Acquire)
    }

    /// Turns automatic collection on or off.
    pub fn set_collect_auto(&self, on: bool) {
        self.core.collect_auto.store(on, AtomicOrdering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict() -> SnapDictionary<u32, &'static str> {
        SnapDictionary::with_config(SnapDictionaryConfig::for_testing()).unwrap()
    }

    fn g(n: u64) -> Generation {
        Generation::new(n)
    }

    #[test]
    fn test_initial_state() {
        let d = dict();
        let t = d.test_helper();
        assert_eq!(t.live_gen(), g(0));
        assert!(t.next_gen());
        assert_eq!(t.floor_gen(), g(0));
        assert!(!t.is_locked());
        assert!(t.gen_obj().is_none());
        assert_eq!(d.count(), 0);
    }

    #[test]
    fn test_set_opens_generation_once() {
        let d = dict();
        d.set(1, "one").unwrap();
        d.set(2, "two").unwrap();

        let t = d.test_helper();
        assert_eq!(t.live_gen(), g(1));
        assert!(!t.next_gen());
        assert_eq!(t.chain(&1), vec![(g(1), Some("one"))]);

        // same generation: coalesced
        d.set(1, "uno").unwrap();
        assert_eq!(t.chain(&1), vec![(g(1), Some("uno"))]);
    }

    #[test]
    fn test_snapshot_exposes_generation() {
        let d = dict();
        d.set(1, "one").unwrap();
        let s1 = d.create_snapshot().unwrap();
        assert_eq!(s1.generation(), g(1));
        assert!(d.test_helper().next_gen());

        d.set(1, "uno").unwrap();
        let t = d.test_helper();
        assert_eq!(t.live_gen(), g(2));
        assert_eq!(t.chain(&1), vec![(g(2), Some("uno")), (g(1), Some("one"))]);
        assert_eq!(s1.get(&1).unwrap(), Some("one"));
    }

    #[test]
    fn test_write_without_lock() {
        let d = dict();
        let err = d.set_locked(1, "one").unwrap_err();
        assert!(matches!(err, CacheError::NotWriteLocked { .. }));
        assert!(matches!(
            d.clear_all_locked().unwrap_err(),
            CacheError::NotWriteLocked { .. }
        ));
    }

    #[test]
    fn test_locked_snapshot_binds_previous_generation() {
        let d = dict();
        d.set(1, "one").unwrap();
        let _s1 = d.create_snapshot().unwrap();
        d.set(1, "uno").unwrap();
        let _s2 = d.create_snapshot().unwrap();

        let lock = d.write_lock(None).unwrap();
        d.set_locked(1, "ein").unwrap();

        let s3 = d.create_snapshot().unwrap();
        assert_eq!(s3.generation(), g(2));
        assert_eq!(s3.get(&1).unwrap(), Some("uno"));
        assert!(!d.test_helper().next_gen());

        let live = d.live_snapshot().unwrap();
        assert_eq!(live.generation(), g(3));
        assert_eq!(live.get(&1).unwrap(), Some("ein"));

        lock.commit().unwrap();
        let s4 = d.create_snapshot().unwrap();
        assert_eq!(s4.generation(), g(3));
        assert_eq!(s4.get(&1).unwrap(), Some("ein"));
    }

    #[test]
    fn test_first_lock_joins_open_generation() {
        let d = dict();
        d.set(1, "one").unwrap();

        let lock = d.write_lock(None).unwrap();
        let s1 = d.create_snapshot().unwrap();
        assert_eq!(s1.generation(), g(0));
        assert_eq!(s1.get(&1).unwrap(), None);
        assert_eq!(d.test_helper().live_gen(), g(1));
        drop(lock);

        let s2 = d.create_snapshot().unwrap();
        assert_eq!(s2.generation(), g(1));
        assert_eq!(s2.get(&1).unwrap(), Some("one"));
    }

    #[test]
    fn test_nested_thread_locks() {
        let d = dict();
        let outer = d.write_lock(None).unwrap();
        let inner = d.write_lock(None).unwrap();
        assert!(outer.same_lock(&inner));

        d.set_locked(1, "one").unwrap();
        inner.commit().unwrap();
        assert!(d.test_helper().is_locked());

        outer.commit().unwrap();
        assert!(!d.test_helper().is_locked());
        assert_eq!(d.create_snapshot().unwrap().get(&1).unwrap(), Some("one"));
    }

    #[test]
    fn test_nested_rollback_poisons_outer() {
        let d = dict();
        d.set(1, "one").unwrap();
        let _s = d.create_snapshot().unwrap();

        let outer = d.write_lock(None).unwrap();
        let inner = d.write_lock(None).unwrap();
        d.set_locked(1, "uno").unwrap();
        inner.rollback().unwrap();
        outer.commit().unwrap();

        let t = d.test_helper();
        assert_eq!(t.live_gen(), g(1));
        assert!(t.next_gen());
        assert_eq!(t.chain(&1), vec![(g(1), Some("one"))]);
    }

    #[test]
    fn test_rollback_restores_heads() {
        let d = dict();
        d.set(1, "one").unwrap();
        d.set(2, "two").unwrap();
        let _s = d.create_snapshot().unwrap();

        let lock = d.write_lock(None).unwrap();
        d.set_locked(1, "uno").unwrap();
        d.clear_locked(2).unwrap();
        d.set_locked(3, "three").unwrap();
        lock.rollback().unwrap();

        let t = d.test_helper();
        assert_eq!(t.chain(&1), vec![(g(1), Some("one"))]);
        assert_eq!(t.chain(&2), vec![(g(1), Some("two"))]);
        assert!(t.chain(&3).is_empty());
        assert_eq!(d.count(), 2);

        let s = d.create_snapshot().unwrap();
        assert_eq!(s.generation(), g(1));
        assert_eq!(s.get(&2).unwrap(), Some("two"));
    }

    #[test]
    fn test_rollback_of_joined_generation_keeps_earlier_writes() {
        let d = dict();
        d.set(1, "one").unwrap();

        let lock = d.write_lock(None).unwrap();
        d.set_locked(1, "uno").unwrap();
        d.set_locked(2, "two").unwrap();
        lock.rollback().unwrap();

        let t = d.test_helper();
        assert_eq!(t.live_gen(), g(1));
        assert!(!t.next_gen());
        assert_eq!(t.chain(&1), vec![(g(1), Some("one"))]);
        assert!(t.chain(&2).is_empty());
    }

    #[test]
    fn test_lock_conflict_across_threads() {
        let d = Arc::new(dict());
        let lock = d.write_lock(None).unwrap();

        let other = Arc::clone(&d);
        let err = std::thread::spawn(move || other.write_lock(None).map(|_| ()))
            .join()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, CacheError::LockConflict { .. }));
        assert!(err.is_retryable());
        drop(lock);
    }

    #[test]
    fn test_only_holder_thread_writes() {
        let d = Arc::new(dict());
        d.set(1, "one").unwrap();
        let lock = d.write_lock(None).unwrap();

        let other = Arc::clone(&d);
        let (set, clear, clear_all) = std::thread::spawn(move || {
            (
                other.set_locked(1, "intruder"),
                other.clear_locked(1),
                other.clear_all_locked(),
            )
        })
        .join()
        .unwrap();
        assert!(matches!(set, Err(CacheError::NotWriteLocked { .. })));
        assert!(matches!(clear, Err(CacheError::NotWriteLocked { .. })));
        assert!(matches!(clear_all, Err(CacheError::NotWriteLocked { .. })));

        lock.commit().unwrap();
        assert_eq!(d.test_helper().chain(&1), vec![(g(1), Some("one"))]);
    }

    #[test]
    fn test_scoped_lock_admits_any_thread() {
        let d = Arc::new(dict());
        let scope = ScopeContext::new();
        let _w = d.write_lock(Some(&scope)).unwrap();

        let other = Arc::clone(&d);
        std::thread::spawn(move || other.set_locked(1, "one"))
            .join()
            .unwrap()
            .unwrap();

        scope.exit(true);
        assert_eq!(d.create_snapshot().unwrap().get(&1).unwrap(), Some("one"));
    }

    #[test]
    fn test_scoped_lock_commits_on_exit() {
        let d = dict();
        d.set(1, "one").unwrap();
        let _s1 = d.create_snapshot().unwrap();

        let scope = ScopeContext::new();
        let w1 = d.write_lock(Some(&scope)).unwrap();
        let w2 = d.write_lock(Some(&scope)).unwrap();
        assert!(w1.same_lock(&w2));
        assert!(w1.is_scoped());
        d.set_locked(1, "uno").unwrap();
        drop(w2);
        w1.commit().unwrap();

        let t = d.test_helper();
        assert!(t.is_locked());
        assert_eq!(d.create_snapshot().unwrap().get(&1).unwrap(), Some("one"));

        scope.exit(true);
        assert!(!t.is_locked());
        assert_eq!(d.create_snapshot().unwrap().get(&1).unwrap(), Some("uno"));
    }

    #[test]
    fn test_scoped_lock_forces_new_generation() {
        let d = dict();
        d.set(1, "one").unwrap();
        assert!(!d.test_helper().next_gen());

        let scope = ScopeContext::new();
        let _w = d.write_lock(Some(&scope)).unwrap();
        assert_eq!(d.test_helper().live_gen(), g(2));

        scope.exit(false);
        let t = d.test_helper();
        assert_eq!(t.live_gen(), g(1));
        assert!(t.next_gen());
        assert!(!t.is_locked());
    }

    #[test]
    fn test_scoped_handle_rollback_poisons_exit() {
        let d = dict();
        d.set(1, "one").unwrap();

        let scope = ScopeContext::new();
        let w = d.write_lock(Some(&scope)).unwrap();
        d.set_locked(1, "uno").unwrap();
        w.rollback().unwrap();

        scope.exit(true);
        assert_eq!(d.create_snapshot().unwrap().get(&1).unwrap(), Some("one"));
    }

    #[test]
    fn test_scope_conflicts_with_thread_lock() {
        let d = dict();
        let _w = d.write_lock(None).unwrap();
        let scope = ScopeContext::new();
        let err = d.write_lock(Some(&scope)).unwrap_err();
        assert!(matches!(err, CacheError::LockConflict { .. }));
        assert_eq!(scope.enlisted_count(), 0);
    }

    #[test]
    fn test_write_lock_from_provider() {
        let d = dict();
        let provider = crate::scope::AmbientScopeProvider::new();

        let w = d.write_lock_from(&provider).unwrap();
        assert!(!w.is_scoped());
        drop(w);

        let scope = provider.begin();
        let w = d.write_lock_from(&provider).unwrap();
        assert!(w.is_scoped());
        assert_eq!(w.writer(), WriterId::Scope(scope.id()));
        drop(w);
        provider.complete(true);
        assert!(!d.test_helper().is_locked());
    }

    #[test]
    fn test_drop_while_panicking_rolls_back() {
        let d = Arc::new(dict());
        d.set(1, "one").unwrap();
        let _s = d.create_snapshot().unwrap();

        let writer = Arc::clone(&d);
        let result = std::thread::spawn(move || {
            let _lock = writer.write_lock(None).unwrap();
            writer.set_locked(1, "uno").unwrap();
            panic!("writer failed");
        })
        .join();
        assert!(result.is_err());

        assert!(!d.test_helper().is_locked());
        assert_eq!(d.create_snapshot().unwrap().get(&1).unwrap(), Some("one"));
    }

    #[test]
    fn test_clear_all() {
        let d = dict();
        d.set(1, "one").unwrap();
        d.set(2, "two").unwrap();
        let before = d.create_snapshot().unwrap();

        d.clear_all().unwrap();
        let after = d.create_snapshot().unwrap();
        assert!(after.is_empty().unwrap());
        assert!(!before.is_empty().unwrap());
        assert_eq!(d.count(), 2);
    }

    #[test]
    fn test_with_entries() {
        let d = SnapDictionary::with_entries(
            SnapDictionaryConfig::for_testing(),
            vec![(1, "one"), (2, "two"), (1, "uno")],
        )
        .unwrap();
        assert_eq!(d.count(), 2);

        let s = d.create_snapshot().unwrap();
        assert_eq!(s.generation(), g(0));
        assert_eq!(s.get(&1).unwrap(), Some("uno"));

        d.set(2, "deux").unwrap();
        assert_eq!(d.test_helper().live_gen(), g(1));
        assert_eq!(s.get(&2).unwrap(), Some("two"));
    }

    #[test]
    fn test_invalid_config() {
        let config = SnapDictionaryConfig::for_testing().with_collect_min_gen_delta(0);
        let err = SnapDictionary::<u32, u32>::with_config(config).unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfig { .. }));
    }

    #[test]
    fn test_dispose() {
        let d = dict();
        d.set(1, "one").unwrap();
        let s = d.create_snapshot().unwrap();

        d.dispose();
        assert!(d.is_disposed());
        assert_eq!(d.count(), 0);
        assert!(matches!(d.set(2, "two"), Err(CacheError::Disposed { .. })));
        assert!(matches!(d.create_snapshot(), Err(CacheError::Disposed { .. })));
        assert!(matches!(s.get(&1), Err(CacheError::Disposed { .. })));
        assert!(matches!(d.collect(), Err(CacheError::Disposed { .. })));
    }

    #[test]
    fn test_counts() {
        let d = dict();
        d.set(1, "one").unwrap();
        let s1 = d.create_snapshot().unwrap();
        let s1b = d.create_snapshot().unwrap();
        d.set(1, "uno").unwrap();
        let s2 = d.create_snapshot().unwrap();

        assert_eq!(d.snap_count(), 3);
        assert_eq!(d.gen_count(), 2);
        assert_eq!(
            d.test_helper().gen_obj(),
            Some(GenObjInfo {
                generation: g(2),
                snapshots: 1,
            })
        );

        drop(s1);
        drop(s1b);
        s2.dispose();
        assert_eq!(d.snap_count(), 0);
        assert_eq!(d.gen_count(), 2);
    }
}
