//! Periodic work scheduler with rate-limited retry (§4.3).
//!
//! Grounded on `DoListItem`/`TimeOut` from the original `loader` module:
//! each item tracks a timeout, a rate limit, a `needs_info` flag and
//! whether it is a one-shot, all behind its own small mutex, while the
//! list itself carries a separate mutex for membership plus a "to-add"
//! staging list so a handler running mid-iteration can enqueue new items
//! without deadlocking on the list lock.

use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One variant per distinct do-list use named in §4.3 "Used by". Carried
/// purely for logging/debugging; the scheduling state lives in
/// [`DoListItem`] uniformly regardless of kind (§9 "Do-list item
/// polymorphism").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    SendWorkerList,
    RequestKeyCounts,
    PullWorkerList,
    RegisterWithMaster,
    MonitorRightNeighbor,
    ClientInsert,
    ClientLookup,
}

impl ItemKind {
    fn label(self) -> &'static str {
        match self {
            ItemKind::SendWorkerList => "send-worker-list",
            ItemKind::RequestKeyCounts => "request-key-counts",
            ItemKind::PullWorkerList => "pull-worker-list",
            ItemKind::RegisterWithMaster => "register-with-master",
            ItemKind::MonitorRightNeighbor => "monitor-right-neighbor",
            ItemKind::ClientInsert => "client-insert",
            ItemKind::ClientLookup => "client-lookup",
        }
    }
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_secs(5);
pub const MAX_RATE_LIMIT: Duration = Duration::from_secs(120);

struct TimeoutClock {
    interval: Duration,
    last_trigger: Instant,
}

impl TimeoutClock {
    fn new(interval: Duration) -> Self {
        Self { interval, last_trigger: Instant::now() }
    }

    fn due(&self, now: Instant) -> bool {
        now.duration_since(self.last_trigger) > self.interval
    }

    fn triggered(&mut self, now: Instant) {
        self.last_trigger = now;
    }
}

struct State {
    timeout: TimeoutClock,
    rate_limit: TimeoutClock,
    needs_info: bool,
    one_shot: bool,
    command_in_flight: bool,
    attempt: u32,
}

/// A single scheduled item (§4.3). Cheap to clone (`Arc`-backed); clones
/// share the same underlying state, matching the original's
/// `shared_from_this` usage.
#[derive(Clone)]
pub struct DoListItem {
    kind: ItemKind,
    state: Arc<Mutex<State>>,
    removed: Arc<AtomicBool>,
    base_rate_limit: Duration,
}

impl DoListItem {
    pub fn new(kind: ItemKind, timeout: Duration, rate_limit: Duration, one_shot: bool) -> Self {
        let now = Instant::now();
        Self {
            kind,
            state: Arc::new(Mutex::new(State {
                timeout: TimeoutClock::new(timeout),
                rate_limit: TimeoutClock::new(rate_limit),
                needs_info: true,
                one_shot,
                command_in_flight: false,
                attempt: 0,
            })),
            removed: Arc::new(AtomicBool::new(false)),
            base_rate_limit: rate_limit,
        }
    }

    pub fn heartbeat(kind: ItemKind) -> Self {
        Self::new(kind, DEFAULT_TIMEOUT, DEFAULT_RATE_LIMIT, false)
    }

    pub fn one_shot(kind: ItemKind) -> Self {
        Self::new(kind, DEFAULT_TIMEOUT, DEFAULT_RATE_LIMIT, true)
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    /// Marks the item freshly interested in running (§4.3 `needs_info`).
    pub fn set_needs_info(&self) {
        let mut state = self.state.lock();
        state.needs_info = true;
        log::debug!("do-list item {} armed", self.kind.label());
    }

    /// The requested info arrived; clears `needs_info` and resets the
    /// timeout clock and backoff counter.
    pub fn info_received(&self) {
        let mut state = self.state.lock();
        state.needs_info = false;
        state.attempt = 0;
        state.timeout.triggered(Instant::now());
        log::debug!("do-list item {} info received", self.kind.label());
    }

    pub fn mark_for_removal(&self) {
        self.removed.store(true, Ordering::Relaxed);
    }

    fn is_one_shot_done(state: &State) -> bool {
        !state.needs_info && state.one_shot
    }

    pub fn should_remove(&self) -> bool {
        if self.removed.load(Ordering::Relaxed) {
            return true;
        }
        Self::is_one_shot_done(&self.state.lock())
    }

    /// §4.3 execution contract: claims the right to run a command if this
    /// item is due and not already in flight. The caller must invoke
    /// [`DoListItem::command_finished`] once its command completes.
    pub fn try_fire(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();

        if state.command_in_flight || Self::is_one_shot_done(&state) {
            return false;
        }

        let due = state.needs_info || state.timeout.due(now);
        if !due || !state.rate_limit.due(now) {
            return false;
        }

        state.rate_limit.triggered(now);
        state.attempt = state.attempt.saturating_add(1);
        let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
        let backoff = self.base_rate_limit.saturating_mul(state.attempt).min(MAX_RATE_LIMIT);
        state.rate_limit.interval = (backoff + jitter).min(MAX_RATE_LIMIT + Duration::from_secs(1));

        state.command_in_flight = true;
        log::debug!("do-list item {} fired (attempt {})", self.kind.label(), state.attempt);
        true
    }

    pub fn command_finished(&self) {
        let mut state = self.state.lock();
        state.command_in_flight = false;
    }
}

/// The scheduler (§4.3 "Concurrency"): a membership mutex over the active
/// items plus a separate "to-add" staging list, so `add` can be called
/// safely from inside a handler running during `tick`.
#[derive(Default)]
pub struct DoList {
    items: Mutex<Vec<DoListItem>>,
    to_add: Mutex<Vec<DoListItem>>,
}

impl DoList {
    pub fn new() -> Self {
        Self { items: Mutex::new(Vec::new()), to_add: Mutex::new(Vec::new()) }
    }

    pub fn add(&self, item: DoListItem) {
        self.to_add.lock().push(item);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// One scheduler pass: merges staged items, drops items that should be
    /// removed, and calls `on_due` for every item ready to run. `on_due` is
    /// responsible for building and executing (or spawning) the item's
    /// command, and for calling [`DoListItem::command_finished`] when it
    /// completes.
    pub fn tick(&self, mut on_due: impl FnMut(&DoListItem)) {
        {
            let mut staged = self.to_add.lock();
            if !staged.is_empty() {
                self.items.lock().append(&mut staged);
            }
        }

        let mut items = self.items.lock();
        items.retain(|item| {
            if item.should_remove() {
                log::debug!("do-list item {} retired", item.kind.label());
                false
            } else {
                true
            }
        });

        for item in items.iter() {
            if item.try_fire() {
                on_due(item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_item_fires_immediately_because_needs_info_defaults_true() {
        let item = DoListItem::heartbeat(ItemKind::PullWorkerList);
        assert!(item.try_fire());
    }

    #[test]
    fn item_does_not_refire_while_a_command_is_in_flight() {
        let item = DoListItem::heartbeat(ItemKind::PullWorkerList);
        assert!(item.try_fire());
        assert!(!item.try_fire());
    }

    #[test]
    fn finishing_the_command_allows_a_future_refire() {
        let item = DoListItem::new(ItemKind::PullWorkerList, DEFAULT_TIMEOUT, Duration::from_millis(0), false);
        assert!(item.try_fire());
        item.command_finished();
        std::thread::sleep(Duration::from_millis(5));
        assert!(item.try_fire());
    }

    #[test]
    fn one_shot_is_removed_once_info_received() {
        let item = DoListItem::one_shot(ItemKind::ClientInsert);
        assert!(!item.should_remove());
        item.info_received();
        assert!(item.should_remove());
    }

    #[test]
    fn heartbeat_item_is_never_removed_by_info_received() {
        let item = DoListItem::heartbeat(ItemKind::MonitorRightNeighbor);
        item.info_received();
        assert!(!item.should_remove());
    }

    #[test]
    fn do_list_tick_picks_up_items_added_during_a_previous_tick() {
        let list = DoList::new();
        list.add(DoListItem::heartbeat(ItemKind::SendWorkerList));
        list.tick(|_| {});
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn do_list_drops_retired_one_shots_on_tick() {
        let list = DoList::new();
        let item = DoListItem::one_shot(ItemKind::ClientLookup);
        list.add(item.clone());
        list.tick(|_| {});
        assert_eq!(list.len(), 1);

        item.info_received();
        list.tick(|_| {});
        assert_eq!(list.len(), 0);
    }
}
