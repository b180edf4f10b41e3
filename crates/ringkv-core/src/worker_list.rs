//! The ordered worker list maintained by every role (§4.5).
//!
//! A single [`WorkerEntry`]/[`WorkerList`] pair serves the master, worker
//! and client views alike (§9 "two nearly identical copies" design note):
//! each role simply populates and reads the subset of fields relevant to
//! it (a worker/client never writes `recent_add_count` or `last_contact`,
//! for instance) rather than getting its own duplicate type.

use crate::error::Error;
use crate::key::{CompositeKey, KeyRange};
use ahash::{HashMap, HashMapExt};
use std::collections::BTreeMap;
use std::time::Instant;

/// `0` means unassigned/invalid; real ids start at 1 and are assigned
/// monotonically by the master.
pub type WorkerId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkAddress {
    pub ip: String,
    pub port: u16,
}

impl NetworkAddress {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }
}

/// The master's and each worker's view of one ring participant (§3).
#[derive(Debug, Clone)]
pub struct WorkerEntry {
    pub id: WorkerId,
    pub udp_addr: Option<NetworkAddress>,
    pub tcp_addr: Option<NetworkAddress>,
    pub range: KeyRange,
    pub key_count: u32,
    pub recent_add_count: u32,
    pub left_id: WorkerId,
    pub right_id: WorkerId,
    pub active: bool,
    pub last_contact: Instant,
}

impl WorkerEntry {
    fn new(id: WorkerId, udp_addr: NetworkAddress, tcp_addr: NetworkAddress) -> Self {
        Self {
            id,
            udp_addr: Some(udp_addr),
            tcp_addr: Some(tcp_addr),
            range: KeyRange::invalid(),
            key_count: 0,
            recent_add_count: 0,
            left_id: 0,
            right_id: 0,
            active: false,
            last_contact: Instant::now(),
        }
    }

    /// Addresses latch once set: a second set with a *different* value is
    /// rejected (§3 `WorkerEntry`). Returns `false` when rejected.
    fn try_set_udp_addr(&mut self, addr: NetworkAddress) -> bool {
        match &self.udp_addr {
            Some(existing) if *existing != addr => false,
            _ => {
                self.udp_addr = Some(addr);
                true
            }
        }
    }

    fn try_set_tcp_addr(&mut self, addr: NetworkAddress) -> bool {
        match &self.tcp_addr {
            Some(existing) if *existing != addr => false,
            _ => {
                self.tcp_addr = Some(addr);
                true
            }
        }
    }
}

/// The ordered map of ring participants, indexed by id, by UDP address
/// (uniqueness checks) and by range-min (owner lookup). Callers are
/// expected to guard the whole structure with one `parking_lot::RwLock`
/// (§5 "Worker-list mutex").
#[derive(Default)]
pub struct WorkerList {
    by_id: HashMap<WorkerId, WorkerEntry>,
    by_udp_addr: HashMap<NetworkAddress, WorkerId>,
    by_range_min: BTreeMap<CompositeKey, WorkerId>,
    next_id: WorkerId,
}

impl WorkerList {
    pub fn new() -> Self {
        Self { by_id: HashMap::new(), by_udp_addr: HashMap::new(), by_range_min: BTreeMap::new(), next_id: 1 }
    }

    pub fn get(&self, id: WorkerId) -> Option<&WorkerEntry> {
        self.by_id.get(&id)
    }

    pub fn get_mut(&mut self, id: WorkerId) -> Option<&mut WorkerEntry> {
        self.by_id.get_mut(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.by_id.keys().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = &WorkerEntry> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Master-only: register a brand new worker. Rejects duplicates by UDP
    /// address. The first worker ever registered gets the all-inclusive
    /// range and is activated immediately (§4.5).
    pub fn add_worker(
        &mut self,
        udp_addr: NetworkAddress,
        tcp_addr: NetworkAddress,
    ) -> Result<&WorkerEntry, Error> {
        if self.by_udp_addr.contains_key(&udp_addr) {
            return Err(Error::Config(format!("worker already registered at {udp_addr:?}")));
        }

        let id = self.next_id;
        self.next_id += 1;

        let mut entry = WorkerEntry::new(id, udp_addr.clone(), tcp_addr);
        if self.by_id.is_empty() {
            entry.range = KeyRange::unlimited_from(CompositeKey::min());
            entry.active = true;
        }

        self.by_udp_addr.insert(udp_addr, id);
        if entry.range.valid {
            self.by_range_min.insert(entry.range.min.clone(), id);
        }

        self.by_id.insert(id, entry);
        Ok(self.by_id.get(&id).expect("just inserted"))
    }

    /// Master-side update driven by a `WORKER_KEYS_INFO` report, or a
    /// worker/client-side update driven by a `MAST_WORKER_INFO` reply.
    /// Returns the previous range if it changed (re-indexing `by_range_min`
    /// only when the incoming range is valid).
    pub fn update_entry(
        &mut self,
        id: WorkerId,
        udp_addr: Option<NetworkAddress>,
        tcp_addr: Option<NetworkAddress>,
        range: Option<KeyRange>,
    ) -> Result<Option<KeyRange>, Error> {
        let entry = self.by_id.get_mut(&id).ok_or_else(|| Error::Config(format!("unknown worker {id}")))?;

        if let Some(addr) = udp_addr {
            if !entry.try_set_udp_addr(addr.clone()) {
                log::warn!("worker {id} tried to change its latched UDP address");
            } else {
                self.by_udp_addr.insert(addr, id);
            }
        }

        if let Some(addr) = tcp_addr {
            if !entry.try_set_tcp_addr(addr) {
                log::warn!("worker {id} tried to change its latched TCP address");
            }
        }

        entry.last_contact = Instant::now();

        let Some(new_range) = range else { return Ok(None) };
        if !new_range.valid {
            return Ok(None);
        }

        let old_range = entry.range.clone();
        if old_range != new_range {
            if old_range.valid {
                self.by_range_min.remove(&old_range.min);
            }
            self.by_range_min.insert(new_range.min.clone(), id);
            entry.range = new_range;
            Ok(Some(old_range))
        } else {
            Ok(None)
        }
    }

    pub fn activate(&mut self, id: WorkerId) -> Result<(), Error> {
        let entry = self.by_id.get_mut(&id).ok_or_else(|| Error::Config(format!("unknown worker {id}")))?;
        entry.active = true;
        Ok(())
    }

    pub fn set_neighbors(&mut self, id: WorkerId, left_id: WorkerId, right_id: WorkerId) -> Result<(), Error> {
        let entry = self.by_id.get_mut(&id).ok_or_else(|| Error::Config(format!("unknown worker {id}")))?;
        entry.left_id = left_id;
        entry.right_id = right_id;
        Ok(())
    }

    /// Replace/extend the known id set from a `MAST_WORKER_LIST` broadcast
    /// (worker/client side). Returns the ids that were newly learned, so
    /// the caller can arm a do-list item requesting each one's details.
    pub fn merge_ids(&mut self, ids: impl IntoIterator<Item = WorkerId>) -> Vec<WorkerId> {
        let mut new_ids = Vec::new();
        for id in ids {
            if !self.by_id.contains_key(&id) {
                self.by_id.insert(
                    id,
                    WorkerEntry {
                        id,
                        udp_addr: None,
                        tcp_addr: None,
                        range: KeyRange::invalid(),
                        key_count: 0,
                        recent_add_count: 0,
                        left_id: 0,
                        right_id: 0,
                        active: false,
                        last_contact: Instant::now(),
                    },
                );
                new_ids.push(id);
            }
        }
        new_ids
    }

    /// Linear scan by range is acceptable for the expected worker counts
    /// (§4.5); the `by_range_min` `BTreeMap` gives O(log n) in practice
    /// since ranges never overlap and are contiguous.
    pub fn find_worker_for_key(&self, key: &CompositeKey) -> Option<&WorkerEntry> {
        self.by_range_min
            .range(..=key.clone())
            .next_back()
            .and_then(|(_, id)| self.by_id.get(id))
            .filter(|entry| entry.range.contains(key))
    }

    /// Debug/topology-sanity helper: true if more than one active worker
    /// claims `unlimited`.
    pub fn has_multiple_right_edges(&self) -> bool {
        self.by_id.values().filter(|e| e.active && e.range.unlimited).count() > 1
    }

    pub fn average_key_count(&self) -> f64 {
        let active: Vec<_> = self.by_id.values().filter(|e| e.active).collect();
        if active.is_empty() {
            return 0.0;
        }
        active.iter().map(|e| e.key_count as f64).sum::<f64>() / active.len() as f64
    }

    pub fn first_inactive(&self) -> Option<WorkerId> {
        self.by_id.values().find(|e| !e.active).map(|e| e.id)
    }

    pub fn right_edge(&self) -> Option<WorkerId> {
        self.by_id.values().find(|e| e.active && e.range.unlimited).map(|e| e.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> NetworkAddress {
        NetworkAddress::new("127.0.0.1", port)
    }

    #[test]
    fn first_worker_gets_the_unlimited_range_and_is_active() {
        let mut list = WorkerList::new();
        let entry = list.add_worker(addr(9876), addr(9877)).unwrap();
        assert_eq!(entry.id, 1);
        assert!(entry.active);
        assert!(entry.range.unlimited);
    }

    #[test]
    fn duplicate_udp_address_is_rejected() {
        let mut list = WorkerList::new();
        list.add_worker(addr(9876), addr(9877)).unwrap();
        assert!(list.add_worker(addr(9876), addr(9878)).is_err());
    }

    #[test]
    fn ids_are_assigned_monotonically() {
        let mut list = WorkerList::new();
        let a = list.add_worker(addr(1), addr(2)).unwrap().id;
        let b = list.add_worker(addr(3), addr(4)).unwrap().id;
        assert_eq!((a, b), (1, 2));
    }

    #[test]
    fn address_latch_rejects_a_changed_value() {
        let mut list = WorkerList::new();
        let id = list.add_worker(addr(1), addr(2)).unwrap().id;
        list.update_entry(id, Some(addr(99)), None, None).unwrap();
        assert_eq!(list.get(id).unwrap().udp_addr, Some(addr(1)));
    }

    #[test]
    fn find_worker_for_key_uses_the_range_index() {
        let mut list = WorkerList::new();
        let id1 = list.add_worker(addr(1), addr(2)).unwrap().id;
        let id2 = list.add_worker(addr(3), addr(4)).unwrap().id;

        list.update_entry(
            id1,
            None,
            None,
            Some(KeyRange::bounded(CompositeKey::min(), CompositeKey::new(100, ""))),
        )
        .unwrap();
        list.update_entry(id2, None, None, Some(KeyRange::unlimited_from(CompositeKey::new(100, "")))).unwrap();

        assert_eq!(list.find_worker_for_key(&CompositeKey::new(5, "x")).unwrap().id, id1);
        assert_eq!(list.find_worker_for_key(&CompositeKey::new(100, "")).unwrap().id, id2);
        assert_eq!(list.find_worker_for_key(&CompositeKey::new(1_000_000, "z")).unwrap().id, id2);
    }
}
