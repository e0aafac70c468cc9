//! Generation tokens and the generation queue.
//!
//! Every snapshot pins the generation it reads by holding an [`Arc<GenRef>`].
//! The dictionary keeps one [`GenObj`] per generation that had a snapshot
//! taken, holding only a [`Weak`] reference to that token. A generation is
//! "in use" for exactly as long as the weak reference can be upgraded, so
//! dropping the last snapshot of a generation releases it without any
//! explicit bookkeeping.
//!
//! # Queue Structure
//!
//! ```text
//! front (oldest)                                   back (newest)
//! ┌────────┐   ┌────────┐   ┌────────┐   ┌────────┐
//! │ g1 dead│ → │ g2 live│ → │ g4 dead│ → │ g7 live│
//! └────────┘   └────────┘   └────────┘   └────────┘
//!     ↑ dequeued by the collector; g2 becomes the floor
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use pubcache_common::types::Generation;

/// The token a snapshot holds to keep its generation alive.
#[derive(Debug)]
pub struct GenRef {
    generation: Generation,
}

impl GenRef {
    /// Returns the generation this token pins.
    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }
}

/// Weak tracker of a generation that had a snapshot taken.
pub struct GenObj {
    generation: Generation,
    weak: Weak<GenRef>,
}

impl GenObj {
    /// Creates a tracker and the first token for `generation`.
    fn new(generation: Generation) -> (Self, Arc<GenRef>) {
        let token = Arc::new(GenRef { generation });
        let obj = Self {
            generation,
            weak: Arc::downgrade(&token),
        };
        (obj, token)
    }

    /// Returns the tracked generation.
    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Returns true while at least one snapshot pins this generation.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.weak.strong_count() > 0
    }

    /// Returns the number of snapshots pinning this generation.
    #[inline]
    pub fn snapshot_count(&self) -> usize {
        self.weak.strong_count()
    }

    /// Hands out a token for this generation, reviving the tracker if its
    /// previous snapshots are all gone.
    fn acquire(&mut self) -> Arc<GenRef> {
        if let Some(token) = self.weak.upgrade() {
            return token;
        }
        let token = Arc::new(GenRef {
            generation: self.generation,
        });
        self.weak = Arc::downgrade(&token);
        token
    }

    /// Returns a copyable view of this tracker.
    pub fn info(&self) -> GenObjInfo {
        GenObjInfo {
            generation: self.generation,
            snapshots: self.snapshot_count(),
        }
    }
}

impl fmt::Debug for GenObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenObj")
            .field("generation", &self.generation)
            .field("snapshots", &self.snapshot_count())
            .finish()
    }
}

/// Point-in-time view of a [`GenObj`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenObjInfo {
    /// The tracked generation.
    pub generation: Generation,
    /// Number of snapshots pinning the generation.
    pub snapshots: usize,
}

/// Ascending queue of generation trackers.
///
/// Generations only ever get registered at or above the newest tracked one,
/// so the queue stays sorted without any reordering.
#[derive(Debug, Default)]
pub(crate) struct GenQueue {
    items: VecDeque<GenObj>,
}

impl GenQueue {
    /// Creates an empty queue.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns a token pinning `generation`.
    ///
    /// Shares the newest tracker's token when it tracks the same generation,
    /// revives it if it is dead, and enqueues a new tracker otherwise.
    pub(crate) fn register(&mut self, generation: Generation) -> Arc<GenRef> {
        if let Some(tail) = self.items.back_mut() {
            debug_assert!(tail.generation <= generation);
            if tail.generation == generation {
                return tail.acquire();
            }
        }
        let (obj, token) = GenObj::new(generation);
        self.items.push_back(obj);
        token
    }

    /// Removes dead trackers from the front and returns how many went.
    pub(crate) fn pop_dead_front(&mut self) -> usize {
        let mut popped = 0;
        while self.items.front().is_some_and(|obj| !obj.is_alive()) {
            self.items.pop_front();
            popped += 1;
        }
        popped
    }

    /// Returns the oldest tracked generation.
    pub(crate) fn oldest(&self) -> Option<Generation> {
        self.items.front().map(GenObj::generation)
    }

    /// Returns the newest tracker.
    pub(crate) fn newest(&self) -> Option<&GenObj> {
        self.items.back()
    }

    /// Total number of snapshots pinning any tracked generation.
    pub(crate) fn snapshot_count(&self) -> usize {
        self.items.iter().map(GenObj::snapshot_count).sum()
    }

    /// Number of tracked generations, dead or alive.
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    /// Drops every tracker.
    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }
}

/// Trackers of the writer's live views.
///
/// Live views bind whatever generation is being written when they are taken,
/// which may sit below the newest queued generation after a rollback, so they
/// are kept apart from the ordered [`GenQueue`].
#[derive(Debug, Default)]
pub(crate) struct LiveViews {
    items: Vec<GenObj>,
}

impl LiveViews {
    /// Returns a token pinning `generation` for a live view.
    pub(crate) fn register(&mut self, generation: Generation) -> Arc<GenRef> {
        self.items.retain(GenObj::is_alive);
        if let Some(obj) = self.items.iter_mut().find(|obj| obj.generation == generation) {
            return obj.acquire();
        }
        let (obj, token) = GenObj::new(generation);
        self.items.push(obj);
        token
    }

    /// Drops trackers whose views are gone and returns the oldest generation
    /// still viewed.
    pub(crate) fn oldest(&mut self) -> Option<Generation> {
        self.items.retain(GenObj::is_alive);
        self.items.iter().map(GenObj::generation).min()
    }

    /// Drops every tracker.
    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gen_obj_liveness() {
        let (obj, token) = GenObj::new(Generation::new(3));
        assert!(obj.is_alive());
        assert_eq!(obj.snapshot_count(), 1);
        assert_eq!(token.generation(), Generation::new(3));

        let second = Arc::clone(&token);
        assert_eq!(obj.snapshot_count(), 2);

        drop(token);
        drop(second);
        assert!(!obj.is_alive());
    }

    #[test]
    fn test_register_shares_token() {
        let mut queue = GenQueue::new();
        let a = queue.register(Generation::new(1));
        let b = queue.register(Generation::new(1));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.snapshot_count(), 2);
    }

    #[test]
    fn test_register_revives_dead_tail() {
        let mut queue = GenQueue::new();
        drop(queue.register(Generation::new(1)));
        assert_eq!(queue.snapshot_count(), 0);

        let token = queue.register(Generation::new(1));
        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.newest().map(GenObj::info),
            Some(GenObjInfo {
                generation: Generation::new(1),
                snapshots: 1,
            })
        );
        drop(token);
    }

    #[test]
    fn test_pop_dead_front() {
        let mut queue = GenQueue::new();
        drop(queue.register(Generation::new(1)));
        let g2 = queue.register(Generation::new(2));
        drop(queue.register(Generation::new(4)));
        assert_eq!(queue.len(), 3);

        // g4 is dead but sits behind the live g2
        assert_eq!(queue.pop_dead_front(), 1);
        assert_eq!(queue.oldest(), Some(Generation::new(2)));
        assert_eq!(queue.len(), 2);

        drop(g2);
        assert_eq!(queue.pop_dead_front(), 2);
        assert_eq!(queue.oldest(), None);
    }

    #[test]
    fn test_clear() {
        let mut queue = GenQueue::new();
        let token = queue.register(Generation::new(5));
        queue.clear();
        assert_eq!(queue.len(), 0);
        assert!(queue.newest().is_none());
        assert_eq!(token.generation(), Generation::new(5));
    }

    #[test]
    fn test_live_views() {
        let mut views = LiveViews::default();
        assert_eq!(views.oldest(), None);

        let a = views.register(Generation::new(3));
        let b = views.register(Generation::new(3));
        let c = views.register(Generation::new(2));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(views.oldest(), Some(Generation::new(2)));

        drop(c);
        assert_eq!(views.oldest(), Some(Generation::new(3)));
        drop(a);
        drop(b);
        assert_eq!(views.oldest(), None);
    }
}
