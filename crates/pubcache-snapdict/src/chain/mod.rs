//! Linked value chains.
//!
//! Each key maps to an immutable, singly-linked list of [`Node`]s ordered
//! newest first with strictly decreasing generations. Nodes are never mutated
//! once published: a write builds a new head that links to the old one, and
//! the collector rebuilds the retained prefix when it cuts the tail off.
//! Older nodes are therefore shared between successive chain versions, and a
//! reader that grabbed a head keeps a consistent list no matter what writers
//! and the collector do afterwards.
//!
//! # Chain Structure
//!
//! ```text
//! key 1046 ──► [g7 "uno"] ──► [g4 ∅] ──► [g2 "one"] ──► None
//!                  ↑             ↑
//!            newest write    tombstone (key cleared at g4)
//! ```
//!
//! A snapshot bound to g5 resolves to the tombstone and sees nothing; one
//! bound to g3 sees "one"; one bound to g1 finds no node at all.

use std::fmt;
use std::sync::Arc;

use pubcache_common::types::Generation;

/// One version of a key's value.
pub struct Node<V> {
    generation: Generation,
    /// `None` marks a tombstone.
    value: Option<V>,
    next: Option<Arc<Node<V>>>,
}

impl<V> Node<V> {
    /// Creates a node.
    pub(crate) fn new(
        generation: Generation,
        value: Option<V>,
        next: Option<Arc<Self>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            generation,
            value,
            next,
        })
    }

    /// Returns the generation that wrote this node.
    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Returns the value, or `None` for a tombstone.
    #[inline]
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Returns true if this node records a removal.
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Returns the next older node.
    #[inline]
    pub fn next(&self) -> Option<&Arc<Self>> {
        self.next.as_ref()
    }

    /// Iterates the chain starting at this node, newest first.
    pub fn iter(&self) -> ChainIter<'_, V> {
        ChainIter { cur: Some(self) }
    }

    /// Returns the newest node written at or before `max`.
    pub fn find(&self, max: Generation) -> Option<&Self> {
        self.iter().find(|node| node.generation <= max)
    }

    /// Returns the number of nodes in the chain starting at this node.
    pub fn chain_len(&self) -> usize {
        self.iter().count()
    }
}

impl<V: fmt::Debug> fmt::Debug for Node<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|node| (node.generation, &node.value)))
            .finish()
    }
}

/// Iterator over a chain, newest first.
pub struct ChainIter<'a, V> {
    cur: Option<&'a Node<V>>,
}

impl<'a, V> Iterator for ChainIter<'a, V> {
    type Item = &'a Node<V>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cur?;
        self.cur = node.next.as_deref();
        Some(node)
    }
}

/// What a write does to a chain head.
pub(crate) enum WriteOutcome<V> {
    /// Publish this node as the new head.
    Publish(Arc<Node<V>>),
    /// Remove the chain from the map.
    Remove,
    /// Leave the chain as it is.
    Unchanged,
}

/// Computes the effect of writing `value` at `generation` onto `head`.
///
/// A head already carrying `generation` is replaced rather than stacked on,
/// so every generation contributes at most one node per key.
pub(crate) fn write<V>(
    head: Option<&Arc<Node<V>>>,
    generation: Generation,
    value: Option<V>,
) -> WriteOutcome<V> {
    let Some(head) = head else {
        return match value {
            Some(value) => WriteOutcome::Publish(Node::new(generation, Some(value), None)),
            None => WriteOutcome::Unchanged,
        };
    };

    if head.generation == generation {
        if value.is_none() && head.next.is_none() {
            return WriteOutcome::Remove;
        }
        return WriteOutcome::Publish(Node::new(generation, value, head.next.clone()));
    }

    debug_assert!(head.generation < generation);
    if value.is_none() && head.is_tombstone() {
        return WriteOutcome::Unchanged;
    }
    WriteOutcome::Publish(Node::new(generation, value, Some(Arc::clone(head))))
}

/// What trimming does to a chain.
pub(crate) enum TrimAction<V> {
    /// Nothing below the floor can go.
    Keep,
    /// Replace the head with a rebuilt chain.
    Replace(Arc<Node<V>>),
    /// The chain holds nothing reachable any more.
    Remove,
}

/// Result of trimming one chain.
pub(crate) struct Trimmed<V> {
    pub(crate) action: TrimAction<V>,
    /// Nodes dropped from the chain.
    pub(crate) dropped: usize,
}

/// Trims `head` against `floor`.
///
/// Every node above the floor is kept, as is the newest node at or below it
/// unless that node is a tombstone. Everything older goes.
pub(crate) fn trim<V: Clone>(head: &Arc<Node<V>>, floor: Generation) -> Trimmed<V> {
    let mut prefix: Vec<&Node<V>> = Vec::new();
    let mut cur = Some(head.as_ref());
    while let Some(node) = cur {
        if node.generation <= floor {
            break;
        }
        prefix.push(node);
        cur = node.next.as_deref();
    }

    let Some(anchor) = cur else {
        return Trimmed {
            action: TrimAction::Keep,
            dropped: 0,
        };
    };

    let older = anchor.next.as_ref().map_or(0, |next| next.chain_len());
    let (tail, dropped) = if anchor.is_tombstone() {
        (None, older + 1)
    } else if older == 0 {
        return Trimmed {
            action: TrimAction::Keep,
            dropped: 0,
        };
    } else {
        let tail = Node::new(anchor.generation, anchor.value.clone(), None);
        (Some(tail), older)
    };

    let rebuilt = prefix.iter().rev().fold(tail, |next, node| {
        Some(Node::new(node.generation, node.value.clone(), next))
    });

    let action = match rebuilt {
        Some(head) => TrimAction::Replace(head),
        None => TrimAction::Remove,
    };
    Trimmed { action, dropped }
}
