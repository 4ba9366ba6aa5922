//! Per-source rate limiter
//!
//! Fixed one-second windows per source address. A flow whose window is older
//! than one second is reset on its next packet; that packet is admitted and
//! not counted in the new window. Within a window the counters grow with each
//! packet and the packet that brings either counter to its limit is dropped.

use super::flow_table::{FlowCache, FlowKey, FlowState};
use serde::Deserialize;

/// What to do with a new flow when the table is full and no room can be made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableFullPolicy {
    /// Forward the packet without tracking the flow
    #[default]
    FailOpen,
    /// Drop the packet
    FailClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Forward(Admission),
    Drop(DropReason),
}

impl Verdict {
    pub fn is_forward(&self) -> bool {
        matches!(self, Verdict::Forward(_))
    }
}

/// Why a packet was admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Counted in the current window, under the limits
    Counted,
    /// Window expired and was reset; packet not counted
    WindowReset,
    /// First packet of an untracked flow; `evicted` if room had to be made
    NewFlow { evicted: bool },
    /// Table full and nothing evictable; forwarded without tracking
    Uncached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    PacketRate,
    ByteRate,
    /// Table full under `TableFullPolicy::FailClosed`
    TableFull,
}

/// Window length in seconds
const WINDOW_SECS: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiter {
    /// Packets per window, 0 = unlimited
    pps_limit: u64,
    /// Bytes per window, 0 = unlimited
    bps_limit: u64,
    on_table_full: TableFullPolicy,
}

impl RateLimiter {
    pub fn new(pps_limit: u64, bps_limit: u64) -> Self {
        Self {
            pps_limit,
            bps_limit,
            on_table_full: TableFullPolicy::default(),
        }
    }

    pub fn with_table_full_policy(mut self, policy: TableFullPolicy) -> Self {
        self.on_table_full = policy;
        self
    }

    pub fn pps_limit(&self) -> u64 {
        self.pps_limit
    }

    pub fn bps_limit(&self) -> u64 {
        self.bps_limit
    }

    /// Account one packet of `len` bytes from `key` at second `now`.
    pub fn check<C: FlowCache + ?Sized>(
        &self,
        flows: &mut C,
        key: FlowKey,
        len: usize,
        now: u64,
    ) -> Verdict {
        if let Some(state) = flows.lookup_mut(&key) {
            return self.account(state, len as u64, now);
        }

        let mut evicted = false;
        if flows.is_full() {
            if !flows.evict_one() {
                return self.table_full(key);
            }
            evicted = true;
        }

        match flows.insert(key, FlowState::new(1, len as u64, now)) {
            Ok(()) => Verdict::Forward(Admission::NewFlow { evicted }),
            Err(_) => self.table_full(key),
        }
    }

    fn account(&self, state: &mut FlowState, len: u64, now: u64) -> Verdict {
        // Workers sample the clock before taking the table lock, so `now`
        // can trail a window start written by another worker.
        if now.saturating_sub(state.window_start) > WINDOW_SECS {
            *state = FlowState::new(0, 0, now);
            return Verdict::Forward(Admission::WindowReset);
        }

        state.packets_this_window += 1;
        state.bytes_this_window += len;

        if self.pps_limit > 0 && state.packets_this_window >= self.pps_limit {
            return Verdict::Drop(DropReason::PacketRate);
        }
        if self.bps_limit > 0 && state.bytes_this_window >= self.bps_limit {
            return Verdict::Drop(DropReason::ByteRate);
        }

        Verdict::Forward(Admission::Counted)
    }

    fn table_full(&self, key: FlowKey) -> Verdict {
        tracing::debug!(?key, policy = ?self.on_table_full, "flow table full, not tracking");
        match self.on_table_full {
            TableFullPolicy::FailOpen => Verdict::Forward(Admission::Uncached),
            TableFullPolicy::FailClosed => Verdict::Drop(DropReason::TableFull),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::flow_table::FlowTable;
    use crate::{Error, Result};

    const A: FlowKey = FlowKey([10, 0, 0, 1]);
    const B: FlowKey = FlowKey([10, 0, 0, 2]);
    const C: FlowKey = FlowKey([10, 0, 0, 3]);

    /// A full table whose eviction always fails
    struct StuckTable {
        inner: FlowTable,
    }

    impl FlowCache for StuckTable {
        fn lookup_mut(&mut self, key: &FlowKey) -> Option<&mut FlowState> {
            self.inner.lookup_mut(key)
        }

        fn is_full(&self) -> bool {
            true
        }

        fn evict_one(&mut self) -> bool {
            false
        }

        fn insert(&mut self, _key: FlowKey, _state: FlowState) -> Result<()> {
            Err(Error::CapacityExceeded { capacity: 0 })
        }
    }

    #[test]
    fn test_new_flow_is_inserted_with_first_packet() {
        let limiter = RateLimiter::new(0, 0);
        let mut table = FlowTable::new(8);

        let verdict = limiter.check(&mut table, A, 100, 7);
        assert_eq!(verdict, Verdict::Forward(Admission::NewFlow { evicted: false }));
        assert_eq!(table.lookup(&A), Some(&FlowState::new(1, 100, 7)));
    }

    #[test]
    fn test_counts_within_window() {
        let limiter = RateLimiter::new(0, 0);
        let mut table = FlowTable::new(8);

        limiter.check(&mut table, A, 100, 10);
        assert_eq!(
            limiter.check(&mut table, A, 50, 10),
            Verdict::Forward(Admission::Counted)
        );
        // One second later is still the same window
        assert_eq!(
            limiter.check(&mut table, A, 50, 11),
            Verdict::Forward(Admission::Counted)
        );
        assert_eq!(table.lookup(&A), Some(&FlowState::new(3, 200, 10)));
    }

    #[test]
    fn test_window_reset_admits_without_counting() {
        let limiter = RateLimiter::new(2, 0);
        let mut table = FlowTable::new(8);
        table.insert(A, FlowState::new(50, 5000, 3)).unwrap();

        let verdict = limiter.check(&mut table, A, 1500, 5);
        assert_eq!(verdict, Verdict::Forward(Admission::WindowReset));
        // Reset to zero, not to one packet of 1500 bytes
        assert_eq!(table.lookup(&A), Some(&FlowState::new(0, 0, 5)));

        assert_eq!(
            limiter.check(&mut table, A, 1500, 5),
            Verdict::Forward(Admission::Counted)
        );
        assert_eq!(table.lookup(&A), Some(&FlowState::new(1, 1500, 5)));
    }

    #[test]
    fn test_clock_behind_window_start_does_not_reset() {
        let limiter = RateLimiter::new(0, 0);
        let mut table = FlowTable::new(8);
        table.insert(A, FlowState::new(1, 10, 9)).unwrap();

        assert_eq!(
            limiter.check(&mut table, A, 10, 8),
            Verdict::Forward(Admission::Counted)
        );
        assert_eq!(table.lookup(&A).unwrap().window_start, 9);
    }

    #[test]
    fn test_pps_limit_fires_at_limit() {
        let limiter = RateLimiter::new(5, 0);
        let mut table = FlowTable::new(8);

        let verdicts: Vec<_> = (0..6).map(|_| limiter.check(&mut table, A, 64, 1)).collect();

        assert!(verdicts[..4].iter().all(Verdict::is_forward));
        assert_eq!(verdicts[4], Verdict::Drop(DropReason::PacketRate));
        assert_eq!(verdicts[5], Verdict::Drop(DropReason::PacketRate));
        assert_eq!(table.lookup(&A).unwrap().packets_this_window, 6);
    }

    #[test]
    fn test_pps_limit_counter_reaches_limit_on_first_drop() {
        let limiter = RateLimiter::new(5, 0);
        let mut table = FlowTable::new(8);

        let mut first_drop = None;
        for i in 0..6 {
            if !limiter.check(&mut table, A, 64, 1).is_forward() && first_drop.is_none() {
                first_drop = Some((i, table.lookup(&A).unwrap().packets_this_window));
            }
        }
        assert_eq!(first_drop, Some((4, 5)));
    }

    #[test]
    fn test_bps_limit() {
        let limiter = RateLimiter::new(0, 3000);
        let mut table = FlowTable::new(8);

        assert!(limiter.check(&mut table, A, 1000, 0).is_forward());
        assert!(limiter.check(&mut table, A, 1000, 0).is_forward());
        assert_eq!(
            limiter.check(&mut table, A, 1000, 0),
            Verdict::Drop(DropReason::ByteRate)
        );
    }

    #[test]
    fn test_limits_are_per_source() {
        let limiter = RateLimiter::new(2, 0);
        let mut table = FlowTable::new(8);

        assert!(limiter.check(&mut table, A, 64, 0).is_forward());
        assert!(!limiter.check(&mut table, A, 64, 0).is_forward());
        assert!(limiter.check(&mut table, B, 64, 0).is_forward());
    }

    #[test]
    fn test_drop_then_new_window() {
        let limiter = RateLimiter::new(2, 0);
        let mut table = FlowTable::new(8);

        limiter.check(&mut table, A, 64, 0);
        assert!(!limiter.check(&mut table, A, 64, 0).is_forward());
        assert_eq!(
            limiter.check(&mut table, A, 64, 2),
            Verdict::Forward(Admission::WindowReset)
        );
        assert!(limiter.check(&mut table, A, 64, 2).is_forward());
        assert!(!limiter.check(&mut table, A, 64, 2).is_forward());
    }

    #[test]
    fn test_full_table_evicts_at_cursor() {
        let limiter = RateLimiter::new(0, 0);
        let mut table = FlowTable::new(2);

        limiter.check(&mut table, A, 64, 0);
        limiter.check(&mut table, B, 64, 0);
        assert!(table.is_full());
        assert_eq!(table.cursor(), 0);

        let verdict = limiter.check(&mut table, C, 64, 0);
        assert_eq!(verdict, Verdict::Forward(Admission::NewFlow { evicted: true }));
        assert_eq!(table.len(), 2);
        // A held slot 0
        assert!(table.lookup(&A).is_none());
        assert!(table.lookup(&B).is_some());
        assert_eq!(table.lookup(&C), Some(&FlowState::new(1, 64, 0)));
    }

    #[test]
    fn test_fail_open_when_eviction_fails() {
        let limiter = RateLimiter::new(1, 0);
        let mut inner = FlowTable::new(1);
        inner.insert(A, FlowState::new(0, 0, 0)).unwrap();
        let mut table = StuckTable { inner };

        assert_eq!(
            limiter.check(&mut table, B, 64, 0),
            Verdict::Forward(Admission::Uncached)
        );
        assert_eq!(
            limiter.check(&mut table, B, 64, 0),
            Verdict::Forward(Admission::Uncached)
        );
        // Existing entry untouched, B never tracked
        assert_eq!(table.inner.lookup(&A), Some(&FlowState::new(0, 0, 0)));
        assert!(table.inner.lookup(&B).is_none());
        assert_eq!(table.inner.len(), 1);
    }

    #[test]
    fn test_fail_closed_when_eviction_fails() {
        let limiter = RateLimiter::new(0, 0).with_table_full_policy(TableFullPolicy::FailClosed);
        let mut table = StuckTable {
            inner: FlowTable::new(1),
        };

        assert_eq!(
            limiter.check(&mut table, B, 64, 0),
            Verdict::Drop(DropReason::TableFull)
        );
    }

    #[test]
    fn test_zero_capacity_table_is_fail_open() {
        let limiter = RateLimiter::new(1, 1);
        let mut table = FlowTable::new(0);

        for _ in 0..3 {
            assert_eq!(
                limiter.check(&mut table, A, 64, 0),
                Verdict::Forward(Admission::Uncached)
            );
        }
        assert!(table.is_empty());
    }
}
