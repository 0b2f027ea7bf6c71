use std::sync::{Arc, RwLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{CoreError, CoreResult};
use crate::key::FlowKey;
use crate::packet::Ipv4HeaderRef;
use crate::record::{EndReason, ExpiredSnapshot, FlowRecord};
use crate::stats::Stats;

/// One arena slot: either a live record or a hole left by a previous
/// eviction. Indices are never reassigned to a different key, they are only
/// ever reused by `observe` popping the free-list.
enum Slot {
    Occupied(Arc<FlowRecord>),
    Free,
}

struct Arena {
    slots: Vec<Slot>,
    free_list: Vec<usize>,
}

impl Arena {
    fn new() -> Self {
        Arena { slots: Vec::new(), free_list: Vec::new() }
    }

    fn insert(&mut self, record: FlowRecord) -> usize {
        let record = Arc::new(record);
        if let Some(idx) = self.free_list.pop() {
            self.slots[idx] = Slot::Occupied(record);
            idx
        } else {
            self.slots.push(Slot::Occupied(record));
            self.slots.len() - 1
        }
    }

    fn get(&self, idx: usize) -> Option<Arc<FlowRecord>> {
        match self.slots.get(idx) {
            Some(Slot::Occupied(r)) => Some(Arc::clone(r)),
            _ => None,
        }
    }

    fn free(&mut self, idx: usize) {
        self.slots[idx] = Slot::Free;
        self.free_list.push(idx);
    }

    fn occupied_count(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }
}

/// The keyed flow table: a concurrent lookup structure (`FlowKey -> arena
/// index`) paired with a record arena.
///
/// The lookup structure is a [`DashMap`], a sharded concurrent hash map
/// giving bucket-level locking instead of a single global lock. The arena
/// lives behind a `RwLock` so concurrent `observe` hits take only a read
/// lock; writers (new-flow insertion, eviction) take the write lock briefly.
pub struct FlowTable {
    lookup: DashMap<FlowKey, usize>,
    arena: RwLock<Arena>,
    idle_timeout_ms: i64,
    active_timeout_ms: i64,
    max_flows: usize,
    stats: Arc<Stats>,
}

impl FlowTable {
    pub fn new(idle_timeout_ms: i64, active_timeout_ms: i64, max_flows: usize, stats: Arc<Stats>) -> Self {
        FlowTable {
            lookup: DashMap::new(),
            arena: RwLock::new(Arena::new()),
            idle_timeout_ms,
            active_timeout_ms,
            max_flows,
            stats,
        }
    }

    /// Hot path: fold one observed packet into its flow, creating the flow
    /// on first sight. O(1) expected; never allocates on the hit path.
    pub fn observe(&self, packet: &Ipv4HeaderRef) -> CoreResult<()> {
        let key = FlowKey::new(packet.src_addr, packet.dst_addr, packet.protocol, packet.src_port, packet.dst_port);

        // Fast path: the flow already exists. A plain `get` avoids taking
        // the per-shard write lock `entry` would require. The index can go
        // stale between this read and the arena lookup below if the
        // scheduler's scan evicts the same flow concurrently; that is an
        // ordinary race the §5 concurrency model anticipates, not table
        // corruption, so a stale index falls through to the slow path
        // below rather than being treated as fatal.
        if let Some(idx_ref) = self.lookup.get(&key) {
            let idx = *idx_ref;
            drop(idx_ref);
            if self.try_apply(idx, &key, packet)? {
                return Ok(());
            }
        }

        match self.lookup.entry(key) {
            Entry::Occupied(mut e) => {
                let idx = *e.get();
                if self.try_apply(idx, &key, packet)? {
                    return Ok(());
                }
                // The flow was evicted between the fast-path check and
                // taking the entry lock. The key legitimately existed a
                // moment ago; treat this packet as starting the flow over.
                let new_idx = self.insert_fresh(key, packet)?;
                e.insert(new_idx);
                Ok(())
            }
            Entry::Vacant(e) => {
                let idx = self.insert_fresh(key, packet)?;
                e.insert(idx);
                Ok(())
            }
        }
    }

    /// Applies one observation to the record at `idx`, if it is still live.
    /// Returns `Ok(false)` when the slot has been freed since `idx` was
    /// read (a benign race with a concurrent eviction). Returns
    /// `Err(CoreError::Fatal)` only when the slot is occupied by a record
    /// for a *different* key than the one that produced `idx` — genuine
    /// key-to-index aliasing, the programming-error class §7 reserves for
    /// `Fatal`.
    fn try_apply(&self, idx: usize, key: &FlowKey, packet: &Ipv4HeaderRef) -> CoreResult<bool> {
        let arena = self.arena.read().unwrap();
        match arena.get(idx) {
            Some(record) => {
                if record.key != *key {
                    return Err(CoreError::Fatal(format!(
                        "lookup index {} for key {:?} now holds a record for key {:?}",
                        idx, key, record.key
                    )));
                }
                record.observe(packet.observed_at_ms, packet.total_length as u32);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Allocates a fresh arena slot for `key`, honoring `max_flows`. Used
    /// both for genuinely new flows and for a flow re-created after losing
    /// a race with a concurrent eviction.
    fn insert_fresh(&self, key: FlowKey, packet: &Ipv4HeaderRef) -> CoreResult<usize> {
        let mut arena = self.arena.write().unwrap();
        if arena.free_list.is_empty() && arena.occupied_count() >= self.max_flows {
            self.stats.inc_table_full();
            return Err(CoreError::TableFull);
        }
        let record = FlowRecord::new(key, packet.observed_at_ms, packet.total_length as u32);
        Ok(arena.insert(record))
    }

    /// Cold path: apply the expiry state machine to every live flow and
    /// return the snapshots that must be exported this tick.
    ///
    /// IDLE wins the tie-break: if both predicates fire on the same scan,
    /// the flow is evicted, not emitted-and-reset.
    pub fn scan_expired(&self, now_ms: i64) -> Vec<ExpiredSnapshot> {
        let keys: Vec<FlowKey> = self.lookup.iter().map(|e| *e.key()).collect();
        let mut expired = Vec::new();

        for key in keys {
            let idx = match self.lookup.get(&key) {
                Some(idx_ref) => *idx_ref,
                None => continue, // evicted by a racing scan already
            };

            let record = {
                let arena = self.arena.read().unwrap();
                match arena.get(idx) {
                    Some(r) => r,
                    None => continue,
                }
            };

            let idle_fires = record.flow_end_ms() + self.idle_timeout_ms < now_ms;
            let active_fires = record.flow_start_ms() + self.active_timeout_ms < now_ms;

            if idle_fires {
                let snapshot = record.snapshot();
                self.lookup.remove(&key);
                let mut arena = self.arena.write().unwrap();
                arena.free(idx);
                self.stats.inc_flows_evicted();
                expired.push(ExpiredSnapshot { snapshot, reason: EndReason::IdleTimeout });
            } else if active_fires {
                let snapshot = record.snapshot();
                record.reset(now_ms);
                self.stats.inc_active_timeout_resets();
                expired.push(ExpiredSnapshot { snapshot, reason: EndReason::ActiveTimeout });
            }
        }

        self.stats.set_flows_active(self.lookup.len() as u64);
        expired
    }

    /// Shutdown final scan: every live flow is evicted regardless of its
    /// timers.
    pub fn drain_all(&self) -> Vec<ExpiredSnapshot> {
        self.scan_expired(i64::MAX)
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// A deep-copied, point-in-time view of every live record, for trace
    /// capture. Never aliases the live arena.
    pub fn snapshot_all(&self) -> Vec<crate::record::FlowSnapshot> {
        let arena = self.arena.read().unwrap();
        arena
            .slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Occupied(r) => Some(r.snapshot()),
                Slot::Free => None,
            })
            .collect()
    }

    /// A point-in-time copy of the lookup structure's `key -> arena index`
    /// mapping, for trace capture. Read-only: takes no lock the arena isn't
    /// already using, and never mutates `self.lookup`.
    pub fn snapshot_indices(&self) -> Vec<(FlowKey, usize)> {
        self.lookup.iter().map(|entry| (*entry.key(), *entry.value())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    fn stats() -> Arc<Stats> {
        Arc::new(Stats::new())
    }

    fn udp_packet(now_ms: i64, octets: u16) -> Ipv4HeaderRef {
        Ipv4HeaderRef {
            src_addr: Ipv4Addr::new(10, 0, 0, 1),
            dst_addr: Ipv4Addr::new(10, 0, 0, 2),
            protocol: 17,
            src_port: 1000,
            dst_port: 2000,
            total_length: octets,
            ingress_interface: 1,
            observed_at_ms: now_ms,
        }
    }

    #[test]
    fn idle_timeout_evicts_and_emits_one_snapshot() {
        let table = FlowTable::new(1000, 10_000, 1024, stats());
        table.observe(&udp_packet(0, 40)).unwrap();

        let expired = table.scan_expired(1500);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].snapshot.packet_delta_count, 1);
        assert_eq!(expired[0].snapshot.octet_delta_count, 40);
        assert_eq!(expired[0].snapshot.flow_start_ms, 0);
        assert_eq!(expired[0].snapshot.flow_end_ms, 0);
        assert_eq!(expired[0].reason, EndReason::IdleTimeout);
        assert!(table.is_empty());
    }

    #[test]
    fn active_timeout_emits_and_resets_without_eviction() {
        let table = FlowTable::new(10_000, 1000, 1024, stats());
        for t in (0i64..1200).step_by(200) {
            table.observe(&udp_packet(t, 100)).unwrap();
        }

        let expired = table.scan_expired(1200);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].snapshot.packet_delta_count, 6);
        assert_eq!(expired[0].snapshot.octet_delta_count, 600);
        assert_eq!(expired[0].snapshot.flow_start_ms, 0);
        assert_eq!(expired[0].snapshot.flow_end_ms, 1000);
        assert_eq!(expired[0].reason, EndReason::ActiveTimeout);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn both_timeouts_firing_together_evicts_not_resets() {
        let table = FlowTable::new(500, 1000, 1024, stats());
        table.observe(&udp_packet(0, 40)).unwrap();

        let expired = table.scan_expired(2000);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].reason, EndReason::IdleTimeout);
        assert_eq!(expired[0].snapshot.flow_end_ms, 0);
        assert!(table.is_empty());
    }

    #[test]
    fn icmp_packets_with_different_identifiers_share_one_flow() {
        let table = FlowTable::new(10_000, 30_000, 1024, stats());
        let icmp_a = Ipv4HeaderRef {
            src_addr: Ipv4Addr::new(1, 1, 1, 1),
            dst_addr: Ipv4Addr::new(2, 2, 2, 2),
            protocol: 1,
            src_port: 0xABCD,
            dst_port: 0,
            total_length: 84,
            ingress_interface: 1,
            observed_at_ms: 0,
        };
        let icmp_b = Ipv4HeaderRef { src_port: 0x1234, ..icmp_a };

        table.observe(&icmp_a).unwrap();
        table.observe(&icmp_b).unwrap();

        assert_eq!(table.len(), 1);
        let expired = table.drain_all();
        assert_eq!(expired[0].snapshot.packet_delta_count, 2);
        assert_eq!(expired[0].snapshot.key.src_port(), 0);
        assert_eq!(expired[0].snapshot.key.dst_port(), 0);
    }

    #[test]
    fn table_full_is_reported_once_max_flows_is_reached() {
        let table = FlowTable::new(10_000, 30_000, 1, stats());
        table.observe(&udp_packet(0, 40)).unwrap();

        let other = Ipv4HeaderRef { dst_addr: Ipv4Addr::new(9, 9, 9, 9), ..udp_packet(0, 40) };
        let err = table.observe(&other);
        assert!(matches!(err, Err(CoreError::TableFull)));
    }

    #[test]
    fn freed_slots_are_reused_by_the_next_insert() {
        let table = FlowTable::new(1000, 30_000, 1024, stats());
        table.observe(&udp_packet(0, 40)).unwrap();
        table.scan_expired(2000); // evicts, frees the slot

        let other = Ipv4HeaderRef { dst_addr: Ipv4Addr::new(9, 9, 9, 9), ..udp_packet(3000, 40) };
        table.observe(&other).unwrap();
        assert_eq!(table.len(), 1);

        let arena = table.arena.read().unwrap();
        assert_eq!(arena.slots.len(), 1, "the freed slot must be reused, not a new one appended");
    }

    #[test]
    fn trace_snapshot_is_unaffected_by_later_observations() {
        let table = FlowTable::new(10_000, 30_000, 1024, stats());
        table.observe(&udp_packet(0, 40)).unwrap();

        let trace = table.snapshot_all();
        for i in 1..=1000 {
            table.observe(&udp_packet(i, 40)).unwrap();
        }

        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].packet_delta_count, 1);
        assert_eq!(trace[0].octet_delta_count, 40);
    }

    #[test]
    fn a_stale_index_from_a_racing_eviction_is_not_fatal() {
        let table = FlowTable::new(10_000, 30_000, 1024, stats());
        table.observe(&udp_packet(0, 40)).unwrap();

        let key = FlowKey::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 17, 1000, 2000);
        let idx = *table.lookup.get(&key).unwrap();

        // Simulate the window between a scheduler's idle eviction freeing
        // the arena slot and removing the lookup entry: the lookup
        // structure still maps `key -> idx`, but the slot is a hole. An
        // ordinary packet arriving in that window must not be misreported
        // as table corruption.
        table.arena.write().unwrap().free(idx);

        let result = table.observe(&udp_packet(100, 40));
        assert!(result.is_ok(), "a stale index must fall back to a fresh record, not Fatal: {:?}", result);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn an_index_aliased_to_the_wrong_key_is_reported_as_fatal() {
        let table = FlowTable::new(10_000, 30_000, 1024, stats());
        table.observe(&udp_packet(0, 40)).unwrap();

        let key = FlowKey::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 17, 1000, 2000);
        let idx = *table.lookup.get(&key).unwrap();

        // Corrupt the arena directly: the slot `idx` now holds a record
        // for an unrelated key while the lookup structure still maps
        // `key -> idx`. This is the real key<->index aliasing invariant
        // violation `CoreError::Fatal` exists to catch.
        let other_key = FlowKey::new(Ipv4Addr::new(9, 9, 9, 9), Ipv4Addr::new(9, 9, 9, 9), 17, 1, 2);
        table.arena.write().unwrap().slots[idx] = Slot::Occupied(Arc::new(FlowRecord::new(other_key, 0, 1)));

        let err = table.observe(&udp_packet(200, 40));
        assert!(matches!(err, Err(CoreError::Fatal(_))));
    }
}
