//! Bounded per-source flow state
//!
//! Every worker rate-limits against the same table, so the table is shared
//! behind a single lock and located by name through [`FlowTableRegistry`].
//!
//! When full, room is made by a recycling sweep: a cursor walks slot
//! positions in ascending order (wrapping at the end) and deletes the first
//! occupied slot it finds. This is a round-robin over slots, not a recency
//! ordered LRU; an entry that is hit on every packet is evicted just as
//! readily as an idle one once the cursor reaches it.

use super::slot_table::SlotTable;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Default number of tracked sources
pub const DEFAULT_CAPACITY: usize = 100_000;

/// Flow identity: the raw IPv4 source address bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey(pub [u8; 4]);

impl From<Ipv4Addr> for FlowKey {
    fn from(addr: Ipv4Addr) -> Self {
        FlowKey(addr.octets())
    }
}

impl fmt::Debug for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Ipv4Addr::from(self.0))
    }
}

/// Counters for the current one-second window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowState {
    pub packets_this_window: u64,
    pub bytes_this_window: u64,
    /// Window start, whole seconds on the dataplane clock
    pub window_start: u64,
}

impl FlowState {
    pub fn new(packets: u64, bytes: u64, window_start: u64) -> Self {
        Self {
            packets_this_window: packets,
            bytes_this_window: bytes,
            window_start,
        }
    }
}

/// Storage the rate limiter runs against
pub trait FlowCache {
    fn lookup_mut(&mut self, key: &FlowKey) -> Option<&mut FlowState>;

    /// True when a new key cannot be inserted without evicting first
    fn is_full(&self) -> bool;

    /// Remove one entry to make room. False if nothing could be removed.
    fn evict_one(&mut self) -> bool;

    fn insert(&mut self, key: FlowKey, state: FlowState) -> Result<()>;
}

#[derive(Debug)]
pub struct FlowTable {
    slots: SlotTable<FlowKey, FlowState>,
    /// Next slot position the recycling sweep inspects
    cursor: usize,
}

impl FlowTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: SlotTable::with_capacity(capacity),
            cursor: 0,
        }
    }

    pub fn lookup(&self, key: &FlowKey) -> Option<&FlowState> {
        self.slots.get(key)
    }

    pub fn lookup_mut(&mut self, key: &FlowKey) -> Option<&mut FlowState> {
        self.slots.get_mut(key)
    }

    /// Insert a new flow or overwrite an existing one.
    ///
    /// A new key on a full table fails with `CapacityExceeded`; the caller
    /// is expected to `evict_one` first.
    pub fn insert(&mut self, key: FlowKey, state: FlowState) -> Result<()> {
        self.slots.insert(key, state).map(|_| ())
    }

    /// Delete the first occupied slot at or after the cursor, wrapping to
    /// slot 0, and move the cursor just past it.
    pub fn evict_one(&mut self) -> bool {
        if self.slots.is_empty() {
            return false;
        }

        let capacity = self.slots.capacity();
        for step in 0..capacity {
            let slot = (self.cursor + step) % capacity;
            if let Some((key, _)) = self.slots.delete_at(slot) {
                tracing::trace!(?key, slot, "recycled flow slot");
                self.cursor = (slot + 1) % capacity;
                return true;
            }
        }

        false
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.slots.capacity()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Slot position of a flow
    pub fn position(&self, key: &FlowKey) -> Option<usize> {
        self.slots.position(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &FlowKey, &FlowState)> + '_ {
        self.slots.iter()
    }
}

impl FlowCache for FlowTable {
    fn lookup_mut(&mut self, key: &FlowKey) -> Option<&mut FlowState> {
        FlowTable::lookup_mut(self, key)
    }

    fn is_full(&self) -> bool {
        FlowTable::is_full(self)
    }

    fn evict_one(&mut self) -> bool {
        FlowTable::evict_one(self)
    }

    fn insert(&mut self, key: FlowKey, state: FlowState) -> Result<()> {
        FlowTable::insert(self, key, state)
    }
}

pub type SharedFlowTable = Arc<Mutex<FlowTable>>;

/// Named flow tables, created once at start-up and looked up by workers
#[derive(Debug, Default)]
pub struct FlowTableRegistry {
    tables: Mutex<HashMap<String, SharedFlowTable>>,
}

impl FlowTableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table under `name`. Creating a name twice is a config error.
    pub fn create(&self, name: &str, capacity: usize) -> Result<SharedFlowTable> {
        let mut tables = self.tables.lock();
        if tables.contains_key(name) {
            return Err(Error::Config(format!("flow table {} already exists", name)));
        }

        let table = Arc::new(Mutex::new(FlowTable::new(capacity)));
        tables.insert(name.to_string(), table.clone());
        Ok(table)
    }

    pub fn find_existing(&self, name: &str) -> Result<SharedFlowTable> {
        self.tables
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TableNotFound {
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(last: u8) -> FlowKey {
        FlowKey([10, 0, 0, last])
    }

    #[test]
    fn test_flow_key_from_addr() {
        let k = FlowKey::from(Ipv4Addr::new(192, 0, 2, 9));
        assert_eq!(k, FlowKey([192, 0, 2, 9]));
        assert_eq!(format!("{:?}", k), "192.0.2.9");
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut table = FlowTable::new(4);
        table.insert(key(1), FlowState::new(1, 64, 0)).unwrap();

        assert_eq!(table.lookup(&key(1)), Some(&FlowState::new(1, 64, 0)));
        assert!(table.lookup(&key(2)).is_none());

        table.lookup_mut(&key(1)).unwrap().packets_this_window += 1;
        assert_eq!(table.lookup(&key(1)).unwrap().packets_this_window, 2);
    }

    #[test]
    fn test_insert_on_full_table_fails() {
        let mut table = FlowTable::new(2);
        table.insert(key(1), FlowState::default()).unwrap();
        table.insert(key(2), FlowState::default()).unwrap();
        assert!(table.is_full());

        assert!(matches!(
            table.insert(key(3), FlowState::default()),
            Err(Error::CapacityExceeded { capacity: 2 })
        ));
        // Overwrite still works
        table.insert(key(2), FlowState::new(5, 5, 5)).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_evict_empty() {
        let mut table = FlowTable::new(3);
        assert!(!table.evict_one());
        assert_eq!(table.cursor(), 0);

        let mut none = FlowTable::new(0);
        assert!(none.is_full());
        assert!(!none.evict_one());
    }

    #[test]
    fn test_evict_follows_cursor_and_wraps() {
        let mut table = FlowTable::new(3);
        for i in 1..=3 {
            table.insert(key(i), FlowState::default()).unwrap();
        }

        assert!(table.evict_one());
        assert!(table.lookup(&key(1)).is_none());
        assert_eq!(table.cursor(), 1);

        // Slot 0 is refilled by the next insert
        table.insert(key(4), FlowState::default()).unwrap();
        assert_eq!(table.position(&key(4)), Some(0));

        assert!(table.evict_one());
        assert!(table.lookup(&key(2)).is_none());
        assert!(table.evict_one());
        assert!(table.lookup(&key(3)).is_none());
        assert_eq!(table.cursor(), 0);

        // Wrapped: slot 0 again
        assert!(table.evict_one());
        assert!(table.lookup(&key(4)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_evict_skips_empty_slots() {
        let mut table = FlowTable::new(4);
        for i in 1..=4 {
            table.insert(key(i), FlowState::default()).unwrap();
        }
        // Leave slots 0 and 1 empty, cursor at 0
        table.slots.remove(&key(1));
        table.slots.remove(&key(2));

        assert!(table.evict_one());
        assert!(table.lookup(&key(3)).is_none());
        assert_eq!(table.cursor(), 3);

        // Only slot 3 left: sweep from 3
        assert!(table.evict_one());
        assert_eq!(table.cursor(), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn test_bounded_under_churn() {
        let mut table = FlowTable::new(8);
        for i in 0..200u8 {
            if table.is_full() {
                assert!(table.evict_one());
            }
            table.insert(key(i), FlowState::default()).unwrap();
            assert!(table.len() <= 8);
        }
        assert_eq!(table.len(), 8);
    }

    #[test]
    fn test_registry() {
        let registry = FlowTableRegistry::new();
        let created = registry.create("rate_limits", 16).unwrap();
        assert!(registry.create("rate_limits", 16).is_err());

        let found = registry.find_existing("rate_limits").unwrap();
        assert!(Arc::ptr_eq(&created, &found));
        assert_eq!(found.lock().capacity(), 16);

        assert!(matches!(
            registry.find_existing("missing"),
            Err(Error::TableNotFound { .. })
        ));
    }
}
