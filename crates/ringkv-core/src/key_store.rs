//! Per-worker key map and range, guarded by a single mutex (§4.6, §5).
//!
//! The mutex covers the map, the range and the recent-adds queue, and the
//! short staging critical sections used by the shift protocol (§4.7.2). It
//! is held only for in-memory mutation; callers must never hold it across
//! socket I/O.

use crate::key::{CompositeKey, KeyRange};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

pub const DEFAULT_RECENT_ADD_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Either a fresh insert or a duplicate with the identical value — both
    /// are a success from the client's point of view (§8 invariant 5).
    Stored { chunk: i32, subchunk: i32 },
    /// An existing key with a diverging value (§7 `DuplicateKeyMismatch`).
    /// The map is left untouched; `chunk`/`subchunk` are the stored value.
    DuplicateMismatch { chunk: i32, subchunk: i32 },
    /// The key does not belong to this worker's range; the caller must
    /// forward (§4.8).
    OutOfRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found { chunk: i32, subchunk: i32 },
    NotFound,
    OutOfRange,
}

/// Keys pulled out of the map for an in-flight shift, plus enough of the
/// old state to roll back atomically if the peer connection drops before
/// the shift is acknowledged (§4.7.3, §9 Open Question on `range.max`
/// rollback).
#[derive(Debug, Clone)]
pub struct ShiftStaging {
    pub keys: Vec<(CompositeKey, i32, i32)>,
    pub old_range: KeyRange,
}

struct Inner {
    map: BTreeMap<CompositeKey, (i32, i32)>,
    range: KeyRange,
    recent_adds: VecDeque<Instant>,
    recent_add_window: Duration,
    pending_to_right: Option<ShiftStaging>,
    pending_from_right: Option<ShiftStaging>,
}

pub struct KeyStore {
    inner: Mutex<Inner>,
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_ADD_WINDOW)
    }
}

impl KeyStore {
    pub fn new(recent_add_window: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: BTreeMap::new(),
                range: KeyRange::invalid(),
                recent_adds: VecDeque::new(),
                recent_add_window,
                pending_to_right: None,
                pending_from_right: None,
            }),
        }
    }

    pub fn range(&self) -> KeyRange {
        self.inner.lock().range.clone()
    }

    /// Returns the previous range (§9 Open Question resolution).
    pub fn set_range(&self, range: KeyRange) -> KeyRange {
        let mut inner = self.inner.lock();
        std::mem::replace(&mut inner.range, range)
    }

    pub fn key_count(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn recent_add_count(&self) -> usize {
        let mut inner = self.inner.lock();
        let window = inner.recent_add_window;
        trim_recent_adds(&mut inner.recent_adds, window);
        inner.recent_adds.len()
    }

    pub fn contains(&self, key: &CompositeKey) -> bool {
        self.inner.lock().range.contains(key)
    }

    pub fn first_key(&self) -> Option<CompositeKey> {
        self.inner.lock().map.keys().next().cloned()
    }

    /// §4.6 "Insert".
    pub fn insert(&self, key: CompositeKey, chunk: i32, subchunk: i32) -> InsertOutcome {
        let mut inner = self.inner.lock();

        if !inner.range.contains(&key) {
            return InsertOutcome::OutOfRange;
        }

        let outcome = match inner.map.get(&key).copied() {
            Some((c, s)) if (c, s) != (chunk, subchunk) => InsertOutcome::DuplicateMismatch { chunk: c, subchunk: s },
            Some((c, s)) => InsertOutcome::Stored { chunk: c, subchunk: s },
            None => {
                inner.map.insert(key, (chunk, subchunk));
                InsertOutcome::Stored { chunk, subchunk }
            }
        };

        let window = inner.recent_add_window;
        inner.recent_adds.push_back(Instant::now());
        trim_recent_adds(&mut inner.recent_adds, window);

        outcome
    }

    /// §4.6 "Lookup".
    pub fn lookup(&self, key: &CompositeKey) -> LookupOutcome {
        let inner = self.inner.lock();

        if !inner.range.contains(key) {
            return LookupOutcome::OutOfRange;
        }

        match inner.map.get(key) {
            Some(&(chunk, subchunk)) => LookupOutcome::Found { chunk, subchunk },
            None => LookupOutcome::NotFound,
        }
    }

    /// §4.6 "Key count and range report" (`_worker_keys_info_builder`).
    pub fn report(&self) -> (usize, usize, KeyRange) {
        let mut inner = self.inner.lock();
        let window = inner.recent_add_window;
        trim_recent_adds(&mut inner.recent_adds, window);
        (inner.map.len(), inner.recent_adds.len(), inner.range.clone())
    }

    /// §4.7.2 TO-RIGHT step 1–2: remove the largest `count` keys, leaving
    /// `range.max` set to the smallest of the removed batch.
    pub fn begin_shift_to_right(&self, count: usize) -> Option<ShiftStaging> {
        if count == 0 {
            return None;
        }

        let mut inner = self.inner.lock();
        let old_range = inner.range.clone();

        let keys_to_move: Vec<CompositeKey> =
            inner.map.keys().rev().take(count).cloned().collect();
        if keys_to_move.is_empty() {
            return None;
        }

        let mut keys = Vec::with_capacity(keys_to_move.len());
        for key in keys_to_move {
            let (chunk, subchunk) = inner.map.remove(&key).expect("key came from the map");
            keys.push((key, chunk, subchunk));
        }
        keys.sort_by(|a, b| a.0.cmp(&b.0));

        let new_max = keys.first().map(|(k, _, _)| k.clone()).expect("non-empty batch");
        inner.range.set_max(new_max);

        let staging = ShiftStaging { keys, old_range };
        inner.pending_to_right = Some(staging.clone());
        Some(staging)
    }

    pub fn commit_shift_to_right(&self) {
        self.inner.lock().pending_to_right = None;
    }

    /// §4.7.3: a dropped connection rolls the staged keys and the old
    /// `range.max` back together, atomically.
    pub fn rollback_shift_to_right(&self) {
        let mut inner = self.inner.lock();
        if let Some(staging) = inner.pending_to_right.take() {
            for (key, chunk, subchunk) in staging.keys {
                inner.map.insert(key, (chunk, subchunk));
            }
            inner.range = staging.old_range;
        }
    }

    /// §4.7.2 FROM-RIGHT step 2 (run on the right side): select the
    /// smallest `count` keys, stage them, and advance `range.min` past the
    /// last one kept (i.e. to the new first key).
    pub fn begin_shift_from_right(&self, count: usize) -> Option<ShiftStaging> {
        if count == 0 {
            return None;
        }

        let mut inner = self.inner.lock();
        let old_range = inner.range.clone();

        let keys_to_move: Vec<CompositeKey> = inner.map.keys().take(count).cloned().collect();
        if keys_to_move.is_empty() {
            return None;
        }

        let mut keys = Vec::with_capacity(keys_to_move.len());
        for key in keys_to_move {
            let (chunk, subchunk) = inner.map.remove(&key).expect("key came from the map");
            keys.push((key, chunk, subchunk));
        }

        if let Some((new_min, _, _)) = inner.map.keys().next().map(|k| (k.clone(), 0, 0)) {
            inner.range.set_min(new_min);
        }

        inner.pending_from_right = Some(ShiftStaging { keys: keys.clone(), old_range: old_range.clone() });
        Some(ShiftStaging { keys, old_range })
    }

    pub fn commit_shift_from_right(&self) {
        self.inner.lock().pending_from_right = None;
    }

    pub fn rollback_shift_from_right(&self) {
        let mut inner = self.inner.lock();
        if let Some(staging) = inner.pending_from_right.take() {
            for (key, chunk, subchunk) in staging.keys {
                inner.map.insert(key, (chunk, subchunk));
            }
            inner.range = staging.old_range;
        }
    }

    /// §4.7.2 TO-RIGHT step 4 (run on the receiving/right side): insert the
    /// batch idempotently and advance `range.min` to the smallest received
    /// key. A diverging value for an already-present key is a conflict:
    /// logged and dropped (§4.7.3), never overwritten.
    pub fn receive_shifted_to_right(&self, pairs: Vec<(CompositeKey, i32, i32)>) {
        let mut inner = self.inner.lock();
        let mut smallest = None;

        for (key, chunk, subchunk) in pairs {
            match inner.map.get(&key).copied() {
                Some((c, s)) if (c, s) != (chunk, subchunk) => {
                    log::error!("shift conflict for key ({}, {:?}): kept ({c}, {s}), dropped ({chunk}, {subchunk})", key.int_part(), key.str_part());
                    continue;
                }
                Some(_) => {}
                None => {
                    inner.map.insert(key.clone(), (chunk, subchunk));
                }
            }

            smallest = Some(match smallest {
                Some(s) if s <= key => s,
                _ => key,
            });
        }

        if let Some(min) = smallest {
            inner.range.set_min(min);
        }
    }

    /// §4.7.2 FROM-RIGHT step 3 (run on the left side): insert the batch
    /// idempotently and advance `range.max` to one past the largest
    /// received key.
    pub fn receive_shifted_from_right(&self, pairs: Vec<(CompositeKey, i32, i32)>) {
        let mut inner = self.inner.lock();
        let mut largest: Option<CompositeKey> = None;

        for (key, chunk, subchunk) in pairs {
            match inner.map.get(&key).copied() {
                Some((c, s)) if (c, s) != (chunk, subchunk) => {
                    log::error!("shift conflict for key ({}, {:?}): kept ({c}, {s}), dropped ({chunk}, {subchunk})", key.int_part(), key.str_part());
                    continue;
                }
                Some(_) => {}
                None => {
                    inner.map.insert(key.clone(), (chunk, subchunk));
                }
            }

            largest = Some(match largest {
                Some(l) if l >= key => l,
                _ => key,
            });
        }

        if let Some(max_key) = largest {
            inner.range.set_max(max_key.successor());
        }
    }
}

fn trim_recent_adds(queue: &mut VecDeque<Instant>, window: Duration) {
    let now = Instant::now();
    while let Some(front) = queue.front() {
        if now.duration_since(*front) > window {
            queue.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_range(min: u64, max: Option<u64>) -> KeyStore {
        let store = KeyStore::default();
        let range = match max {
            Some(m) => KeyRange::bounded(CompositeKey::new(min, ""), CompositeKey::new(m, "")),
            None => KeyRange::unlimited_from(CompositeKey::new(min, "")),
        };
        store.set_range(range);
        store
    }

    #[test]
    fn insert_outside_range_is_reported_as_such() {
        let store = store_with_range(100, None);
        assert_eq!(store.insert(CompositeKey::new(1, ""), 1, 1), InsertOutcome::OutOfRange);
    }

    #[test]
    fn duplicate_insert_with_same_value_is_idempotent() {
        let store = store_with_range(0, None);
        let key = CompositeKey::new(1, "k");

        assert_eq!(store.insert(key.clone(), 1, 2), InsertOutcome::Stored { chunk: 1, subchunk: 2 });
        assert_eq!(store.insert(key.clone(), 1, 2), InsertOutcome::Stored { chunk: 1, subchunk: 2 });
        assert_eq!(store.key_count(), 1);
    }

    #[test]
    fn duplicate_insert_with_different_value_is_a_mismatch_and_does_not_overwrite() {
        let store = store_with_range(0, None);
        let key = CompositeKey::new(1, "k");

        store.insert(key.clone(), 1, 2);
        let outcome = store.insert(key.clone(), 9, 9);
        assert_eq!(outcome, InsertOutcome::DuplicateMismatch { chunk: 1, subchunk: 2 });
        assert_eq!(store.lookup(&key), LookupOutcome::Found { chunk: 1, subchunk: 2 });
    }

    #[test]
    fn shift_to_right_rollback_restores_both_keys_and_max_atomically() {
        let store = store_with_range(0, None);
        for i in 0..10u64 {
            store.insert(CompositeKey::new(i, ""), i as i32, 0);
        }

        let before = store.range();
        let staging = store.begin_shift_to_right(3).unwrap();
        assert_eq!(staging.keys.len(), 3);
        assert_eq!(store.key_count(), 7);
        assert_ne!(store.range(), before);

        store.rollback_shift_to_right();
        assert_eq!(store.key_count(), 10);
        assert_eq!(store.range(), before);
    }

    #[test]
    fn receiving_a_shift_is_idempotent_on_retransmission() {
        let store = store_with_range(0, None);
        let pairs = vec![(CompositeKey::new(1, ""), 1, 1), (CompositeKey::new(2, ""), 2, 2)];

        store.receive_shifted_to_right(pairs.clone());
        store.receive_shifted_to_right(pairs);
        assert_eq!(store.key_count(), 2);
    }

    #[test]
    fn receiving_a_shift_with_a_conflicting_value_drops_the_incoming_one() {
        let store = store_with_range(0, None);
        store.receive_shifted_to_right(vec![(CompositeKey::new(1, ""), 1, 1)]);
        store.receive_shifted_to_right(vec![(CompositeKey::new(1, ""), 9, 9)]);
        assert_eq!(store.lookup(&CompositeKey::new(1, "")), LookupOutcome::Found { chunk: 1, subchunk: 1 });
    }
}
