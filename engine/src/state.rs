//! Per-worker machine state: accumulator register, visited-value memory and
//! the one-step transition cache.
//!
//! Every structure here is owned by exactly one [`crate::SequenceEngine`] run.
//! Nothing is shared between workers, so none of these types synchronize.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::error::EngineError;

/// The accumulator register (`ACC`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Register {
    acc: u64,
}

impl Register {
    /// Creates a register holding `value`.
    #[inline]
    pub const fn new(value: u64) -> Self {
        Self { acc: value }
    }

    /// Current contents.
    #[inline]
    pub const fn get(&self) -> u64 {
        self.acc
    }

    /// Overwrites the contents.
    #[inline]
    pub fn load(&mut self, value: u64) {
        self.acc = value;
    }
}

/// Visited values, each mapped to the step index at which it was first seen.
///
/// A value is recorded at most once; seeing it again means the sequence has
/// cycled.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    seen: HashMap<u64, u64>,
}

impl Memory {
    /// Creates an empty memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `value` was already visited.
    #[inline]
    pub fn contains(&self, value: u64) -> bool {
        self.seen.contains_key(&value)
    }

    /// Step index at which `value` was first seen.
    #[inline]
    pub fn first_seen(&self, value: u64) -> Option<u64> {
        self.seen.get(&value).copied()
    }

    /// Records `value` at `step`. Returns false (and keeps the old index) if
    /// it was already present.
    pub fn record(&mut self, value: u64, step: u64) -> bool {
        match self.seen.entry(value) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(step);
                true
            }
        }
    }

    /// Number of visited values.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns true if nothing has been visited.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Write-once map from an input value to its full one-step successor
/// (post-perturbation). Never evicts.
#[derive(Debug, Clone, Default)]
pub struct Cache {
    entries: HashMap<u64, u64>,
    hits: u64,
}

impl Cache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up `key`, counting a hit when present.
    #[inline]
    pub fn lookup(&mut self, key: u64) -> Option<u64> {
        let found = self.entries.get(&key).copied();
        if found.is_some() {
            self.hits += 1;
        }
        found
    }

    /// Peeks at `key` without counting a hit.
    #[inline]
    pub fn peek(&self, key: u64) -> Option<u64> {
        self.entries.get(&key).copied()
    }

    /// Stores `key -> value`.
    ///
    /// Re-storing an identical pair is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CacheConflict`] if `key` already maps to a
    /// different value.
    pub fn insert(&mut self, key: u64, value: u64) -> Result<(), EngineError> {
        match self.entries.entry(key) {
            Entry::Occupied(slot) if *slot.get() == value => Ok(()),
            Entry::Occupied(slot) => Err(EngineError::CacheConflict {
                key,
                existing: *slot.get(),
                attempted: value,
            }),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    /// Number of successful lookups so far.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Number of cached transitions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over cached transitions in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }
}
