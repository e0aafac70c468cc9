//! Randomized workloads with a reference model.
//!
//! A [`Workload`] produces a seeded sequence of dictionary operations. The
//! [`ReferenceModel`] applies the same operations to a plain map so every
//! snapshot can be checked against the committed state it should see.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// One step of a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Set a key in its own transient lock.
    Set(u32, u64),
    /// Clear a key in its own transient lock.
    Clear(u32),
    /// Write a batch under one lock, then commit or roll back.
    Batch {
        /// Writes in order; `None` clears the key.
        writes: Vec<(u32, Option<u64>)>,
        /// Whether the batch commits.
        commit: bool,
    },
    /// Take a snapshot and keep it.
    Snapshot,
    /// Drop the oldest kept snapshot.
    DropSnapshot,
    /// Run a collection.
    Collect,
}

/// Seeded generator of [`Op`]s.
#[derive(Debug)]
pub struct Workload {
    rng: StdRng,
    key_space: u32,
    next_value: u64,
}

impl Workload {
    /// Creates a workload over keys `0..key_space`.
    pub fn new(seed: u64, key_space: u32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            key_space,
            next_value: 1,
        }
    }

    fn value(&mut self) -> u64 {
        let value = self.next_value;
        self.next_value += 1;
        value
    }

    fn key(&mut self) -> u32 {
        self.rng.gen_range(0..self.key_space)
    }

    /// Produces the next operation.
    pub fn next_op(&mut self) -> Op {
        match self.rng.gen_range(0..100) {
            0..=34 => {
                let key = self.key();
                Op::Set(key, self.value())
            }
            35..=44 => Op::Clear(self.key()),
            45..=59 => {
                let len = self.rng.gen_range(1..=4);
                let writes = (0..len)
                    .map(|_| {
                        let key = self.key();
                        let value = if self.rng.gen_bool(0.8) {
                            Some(self.value())
                        } else {
                            None
                        };
                        (key, value)
                    })
                    .collect();
                Op::Batch {
                    writes,
                    commit: self.rng.gen_bool(0.7),
                }
            }
            60..=79 => Op::Snapshot,
            80..=92 => Op::DropSnapshot,
            _ => Op::Collect,
        }
    }
}

/// The committed state a fresh snapshot should see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceModel {
    values: HashMap<u32, u64>,
}

impl ReferenceModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a committed write.
    pub fn apply(&mut self, key: u32, value: Option<u64>) {
        match value {
            Some(value) => {
                self.values.insert(key, value);
            }
            None => {
                self.values.remove(&key);
            }
        }
    }

    /// Returns the expected value of `key`.
    pub fn get(&self, key: u32) -> Option<u64> {
        self.values.get(&key).copied()
    }

    /// Returns every expected value, sorted.
    pub fn sorted_values(&self) -> Vec<u64> {
        let mut values: Vec<u64> = self.values.values().copied().collect();
        values.sort_unstable();
        values
    }
}
