//! Fixed-capacity hash table with addressable slots
//!
//! Entries live in a preallocated slot arena; a key index maps each key to
//! its slot. Slot positions are stable for the lifetime of an entry, which
//! lets callers walk or delete entries by position.

use crate::{Error, Result};
use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug)]
pub struct SlotTable<K, V> {
    slots: Vec<Option<(K, V)>>,
    index: HashMap<K, usize>,
    /// Free slot positions; the next insert takes the last one
    free: Vec<usize>,
}

impl<K, V> SlotTable<K, V>
where
    K: Copy + Eq + Hash,
{
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Self {
            slots,
            index: HashMap::with_capacity(capacity),
            free: (0..capacity).rev().collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.slots[slot].as_ref().map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let slot = *self.index.get(key)?;
        self.slots[slot].as_mut().map(|(_, v)| v)
    }

    /// Slot position currently holding `key`
    pub fn position(&self, key: &K) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Insert or overwrite. Returns the slot position used.
    ///
    /// Overwriting keeps the entry in its slot; a new key needs a free slot.
    pub fn insert(&mut self, key: K, value: V) -> Result<usize> {
        if let Some(&slot) = self.index.get(&key) {
            self.slots[slot] = Some((key, value));
            return Ok(slot);
        }

        let slot = self.free.pop().ok_or(Error::CapacityExceeded {
            capacity: self.capacity(),
        })?;
        self.slots[slot] = Some((key, value));
        self.index.insert(key, slot);
        Ok(slot)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.index.remove(key)?;
        self.free.push(slot);
        self.slots[slot].take().map(|(_, v)| v)
    }

    /// Key stored at a slot position, if the slot is occupied
    pub fn key_at(&self, slot: usize) -> Option<&K> {
        self.slots.get(slot)?.as_ref().map(|(k, _)| k)
    }

    /// Delete whatever occupies `slot`, returning the removed entry
    pub fn delete_at(&mut self, slot: usize) -> Option<(K, V)> {
        let entry = self.slots.get_mut(slot)?.take()?;
        self.index.remove(&entry.0);
        self.free.push(slot);
        Some(entry)
    }

    /// Occupied entries in ascending slot order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &K, &V)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_ref().map(|(k, v)| (slot, k, v)))
    }
}
