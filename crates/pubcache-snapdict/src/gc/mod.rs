//! Generation-floor garbage collection.
//!
//! Collection frees chain versions that no snapshot can reach any more.
//!
//! # Overview
//!
//! A run:
//! 1. Drops generation trackers whose snapshots are all gone from the front
//!    of the queue
//! 2. Raises the floor generation to the oldest generation still tracked, or,
//!    with nothing tracked, to the oldest generation a new snapshot could bind,
//!    never past a live view that is still held
//! 3. Trims every chain down to what generations at or above the floor can
//!    see, removing chains left with nothing visible
//!
//! The floor is committed before any chain is touched and trimming swaps a
//! chain only if its head is unchanged since it was read, so a run racing a
//! writer skips that chain and leaves it for the next run.
//!
//! Runs happen on demand ([`SnapDictionary::collect`],
//! [`SnapDictionary::collect_async`]) or automatically on a background thread
//! once the live generation runs far enough ahead of the floor.
//!
//! [`SnapDictionary::collect`]: crate::SnapDictionary::collect
//! [`SnapDictionary::collect_async`]: crate::SnapDictionary::collect_async

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread;

use pubcache_common::constants::COLLECTOR_THREAD_NAME;
use pubcache_common::error::CacheResult;
use pubcache_common::types::Generation;
use tracing::{debug, trace, warn};

use crate::chain::{self, Node, TrimAction};
use crate::dictionary::{CacheKey, CacheValue, Core};

/// Result of a collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectResult {
    /// The floor generation after the run.
    pub floor_gen: Generation,
    /// Generation trackers dropped from the queue.
    pub generations_dequeued: usize,
    /// Chain versions freed.
    pub versions_collected: usize,
    /// Chains removed from the dictionary.
    pub chains_pruned: usize,
}

impl CollectResult {
    /// Returns true if any work was done.
    pub fn did_work(&self) -> bool {
        self.generations_dequeued > 0 || self.versions_collected > 0 || self.chains_pruned > 0
    }
}

/// Cumulative collection statistics.
#[derive(Debug, Default)]
pub struct CollectStats {
    /// Total number of runs.
    pub runs: AtomicU64,
    /// Total chain versions freed.
    pub versions_collected: AtomicU64,
    /// Total chains removed.
    pub chains_pruned: AtomicU64,
    /// Total generation trackers dequeued.
    pub generations_dequeued: AtomicU64,
}

impl CollectStats {
    /// Creates new stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a run.
    pub fn record_run(&self, result: &CollectResult) {
        self.runs.fetch_add(1, AtomicOrdering::Relaxed);
        self.versions_collected
            .fetch_add(result.versions_collected as u64, AtomicOrdering::Relaxed);
        self.chains_pruned
            .fetch_add(result.chains_pruned as u64, AtomicOrdering::Relaxed);
        self.generations_dequeued
            .fetch_add(result.generations_dequeued as u64, AtomicOrdering::Relaxed);
    }

    /// Returns the total number of runs.
    pub fn total_runs(&self) -> u64 {
        self.runs.load(AtomicOrdering::Relaxed)
    }

    /// Returns the total versions freed.
    pub fn total_versions_collected(&self) -> u64 {
        self.versions_collected.load(AtomicOrdering::Relaxed)
    }

    /// Returns the total chains removed.
    pub fn total_chains_pruned(&self) -> u64 {
        self.chains_pruned.load(AtomicOrdering::Relaxed)
    }

    /// Returns the total generation trackers dequeued.
    pub fn total_generations_dequeued(&self) -> u64 {
        self.generations_dequeued.load(AtomicOrdering::Relaxed)
    }
}

impl<K: CacheKey, V: CacheValue> Core<K, V> {
    /// Runs one collection.
    pub(crate) fn collect(&self) -> CacheResult<CollectResult> {
        self.ensure_live()?;
        let _running = self.collect_lock.lock();

        let (floor_gen, generations_dequeued) = {
            let mut state = self.state.lock();
            let dequeued = state.queue.pop_dead_front();
            let mut candidate = match state.queue.oldest() {
                Some(oldest) => oldest,
                None if state.next_gen => state.live_gen,
                // a snapshot taken under a lock on the open generation binds below it
                None => state.live_gen.prev(),
            };
            if let Some(viewed) = state.live_views.oldest() {
                candidate = candidate.min(viewed);
            }
            if candidate > state.floor_gen {
                state.floor_gen = candidate;
            }
            (state.floor_gen, dequeued)
        };

        let heads: Vec<(K, Arc<Node<V>>)> = self
            .chains
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut versions_collected = 0;
        let mut chains_pruned = 0;
        for (key, head) in heads {
            let trimmed = chain::trim(&head, floor_gen);
            match trimmed.action {
                TrimAction::Keep => {}
                TrimAction::Replace(rebuilt) => {
                    if let Some(mut current) = self.chains.get_mut(&key) {
                        if Arc::ptr_eq(current.value(), &head) {
                            *current = rebuilt;
                            versions_collected += trimmed.dropped;
                        }
                    }
                }
                TrimAction::Remove => {
                    let removed = self
                        .chains
                        .remove_if(&key, |_, current| Arc::ptr_eq(current, &head));
                    if removed.is_some() {
                        versions_collected += trimmed.dropped;
                        chains_pruned += 1;
                    }
                }
            }
        }

        let result = CollectResult {
            floor_gen,
            generations_dequeued,
            versions_collected,
            chains_pruned,
        };
        self.stats.record_run(&result);

        if result.did_work() {
            debug!(
                dictionary = %self.id,
                floor_gen = %floor_gen,
                generations_dequeued,
                versions_collected,
                chains_pruned,
                "collected"
            );
        } else {
            trace!(dictionary = %self.id, floor_gen = %floor_gen, "nothing to collect");
        }
        Ok(result)
    }

    /// Starts a background collection if automatic collection is on, the
    /// live generation has run far enough ahead of the floor and no other
    /// background run is pending.
    pub(crate) fn schedule_collect(self: &Arc<Self>) {
        if !self.collect_auto.load(AtomicOrdering::Acquire) || self.is_disposed() {
            return;
        }

        let due = {
            let state = self.state.lock();
            state.live_gen.distance_from(state.floor_gen) > self.collect_min_gen_delta
        };
        if !due {
            return;
        }

        if self
            .collecting
            .compare_exchange(false, true, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_err()
        {
            return;
        }

        let core = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(COLLECTOR_THREAD_NAME.to_string())
            .spawn(move || {
                if let Err(e) = core.collect() {
                    debug!(dictionary = %core.id, error = %e, "background collection skipped");
                }
                core.collecting.store(false, AtomicOrdering::Release);
            });

        if let Err(e) = spawned {
            warn!(dictionary = %self.id, error = %e, "failed to start collector thread");
            self.collecting.store(false, AtomicOrdering::Release);
        }
    }
}

impl fmt::Display for CollectResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "floor {} ({} generations, {} versions, {} chains)",
            self.floor_gen, self.generations_dequeued, self.versions_collected, self.chains_pruned
        )
    }
}
