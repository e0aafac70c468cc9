//! Generation-bound read views.
//!
//! A [`Snapshot`] reads every key as it was at one generation: for each
//! chain it returns the newest node written at or before that generation.
//! Reads go straight to the key map and never take the dictionary's
//! structural lock or the write lock. The map itself holds a shard read lock
//! for the moment it takes to clone a chain head.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use pubcache_common::error::CacheResult;
use pubcache_common::types::Generation;

use crate::chain::Node;
use crate::dictionary::{CacheKey, CacheValue, Core};
use crate::generation::GenRef;

/// A point-in-time read view of a dictionary.
///
/// A snapshot pins its generation until it is dropped or
/// [`dispose`](Self::dispose)d; the collector keeps every version it can
/// see. Reads fail once the dictionary is disposed.
pub struct Snapshot<K: CacheKey, V: CacheValue> {
    core: Arc<Core<K, V>>,
    generation: Generation,
    token: Option<Arc<GenRef>>,
}

impl<K: CacheKey, V: CacheValue> Snapshot<K, V> {
    pub(crate) fn tracked(core: Arc<Core<K, V>>, token: Arc<GenRef>) -> Self {
        Self {
            core,
            generation: token.generation(),
            token: Some(token),
        }
    }

    /// Returns the generation this snapshot reads.
    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    fn head<Q>(&self, key: &Q) -> Option<Arc<Node<V>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.chains.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the value of `key`, or `None` if absent or removed.
    pub fn get<Q>(&self, key: &Q) -> CacheResult<Option<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.ensure_live()?;
        Ok(self.head(key).and_then(|head| {
            head.find(self.generation)
                .and_then(Node::value)
                .cloned()
        }))
    }

    /// Returns true if `key` has a value.
    pub fn contains_key<Q>(&self, key: &Q) -> CacheResult<bool>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.ensure_live()?;
        Ok(self.head(key).is_some_and(|head| {
            head.find(self.generation)
                .is_some_and(|node| !node.is_tombstone())
        }))
    }

    /// Returns every value, in no particular order.
    ///
    /// The chain heads are copied up front and resolved as the iterator
    /// advances. Calling again starts over.
    pub fn get_all(&self) -> CacheResult<SnapshotValues<V>> {
        self.core.ensure_live()?;
        let heads: Vec<Arc<Node<V>>> = self
            .core
            .chains
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        Ok(SnapshotValues {
            heads: heads.into_iter(),
            generation: self.generation,
        })
    }

    /// Returns true if no key has a value.
    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.get_all()?.next().is_none())
    }

    /// Releases the snapshot.
    pub fn dispose(self) {
        drop(self);
    }
}

impl<K: CacheKey, V: CacheValue> Drop for Snapshot<K, V> {
    fn drop(&mut self) {
        if self.token.take().is_some() {
            self.core.schedule_collect();
        }
    }
}

impl<K: CacheKey, V: CacheValue> fmt::Debug for Snapshot<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("dictionary", &self.core.id)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Values visible to a snapshot, see [`Snapshot::get_all`].
pub struct SnapshotValues<V> {
    heads: std::vec::IntoIter<Arc<Node<V>>>,
    generation: Generation,
}

impl<V: Clone> Iterator for SnapshotValues<V> {
    type Item = V;

    fn next(&mut self) -> Option<V> {
        let generation = self.generation;
        self.heads.find_map(|head| {
            head.find(generation)
                .and_then(Node::value)
                .cloned()
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.heads.len()))
    }
}
