//! Request forwarding decision for a key that does not belong to the
//! receiving worker (§4.8). Pure function over `&WorkerList`; no sockets,
//! easy to exercise with plain unit tests.

use crate::key::CompositeKey;
use crate::worker_list::{NetworkAddress, WorkerList};

pub const DEFAULT_HOPS_MAX: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Forward unchanged (aside from the caller bumping `hops`) to this
    /// address — the key's known owner.
    ForwardToOwner(NetworkAddress),
    /// Owner unknown yet; fall back to a neighbor in the direction the key
    /// lies.
    ForwardToNeighbor(NetworkAddress),
    /// `hops` would exceed the ceiling, or no suitable neighbor address is
    /// known.
    Drop(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    HopsExceeded,
    NoKnownRoute,
}

/// Decide where a request for `key` should go next.
///
/// `own_id` avoids "forwarding" to itself when the owner lookup happens to
/// return this worker's own (stale) entry; `left_id`/`right_id` are this
/// worker's own neighbor ids, passed explicitly rather than looked up from
/// `list` since a worker never adds itself to its own worker-list view.
pub fn route(
    list: &WorkerList,
    own_id: u32,
    own_min: &CompositeKey,
    left_id: u32,
    right_id: u32,
    key: &CompositeKey,
    hops: u32,
    hops_max: u32,
) -> RouteDecision {
    if hops + 1 > hops_max {
        return RouteDecision::Drop(DropReason::HopsExceeded);
    }

    if let Some(owner) = list.find_worker_for_key(key) {
        if owner.id != own_id {
            if let Some(addr) = &owner.udp_addr {
                return RouteDecision::ForwardToOwner(addr.clone());
            }
        }
    }

    let neighbor_id = if key < own_min { left_id } else { right_id };

    match list.get(neighbor_id).and_then(|e| e.udp_addr.clone()) {
        Some(addr) => RouteDecision::ForwardToNeighbor(addr),
        None => RouteDecision::Drop(DropReason::NoKnownRoute),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyRange;

    fn addr(port: u16) -> NetworkAddress {
        NetworkAddress::new("127.0.0.1", port)
    }

    #[test]
    fn routes_directly_to_the_known_owner() {
        let mut list = WorkerList::new();
        let left = list.add_worker(addr(1), addr(2)).unwrap().id;
        let right = list.add_worker(addr(3), addr(4)).unwrap().id;

        list.update_entry(left, None, None, Some(KeyRange::bounded(CompositeKey::min(), CompositeKey::new(100, ""))))
            .unwrap();
        list.update_entry(right, None, None, Some(KeyRange::unlimited_from(CompositeKey::new(100, "")))).unwrap();

        let decision = route(&list, left, &CompositeKey::min(), 0, right, &CompositeKey::new(500, ""), 0, DEFAULT_HOPS_MAX);
        assert_eq!(decision, RouteDecision::ForwardToOwner(addr(3)));
    }

    #[test]
    fn drops_when_hops_exceed_the_ceiling() {
        let list = WorkerList::new();
        let decision = route(&list, 1, &CompositeKey::min(), 0, 0, &CompositeKey::new(1, ""), 5, DEFAULT_HOPS_MAX);
        assert_eq!(decision, RouteDecision::Drop(DropReason::HopsExceeded));
    }

    #[test]
    fn falls_back_to_left_neighbor_when_owner_unknown_and_key_is_smaller() {
        let mut list = WorkerList::new();
        let me = list.add_worker(addr(1), addr(2)).unwrap().id;
        let left = list.add_worker(addr(3), addr(4)).unwrap().id;

        let decision = route(&list, me, &CompositeKey::new(50, ""), left, 0, &CompositeKey::new(10, ""), 0, DEFAULT_HOPS_MAX);
        assert_eq!(decision, RouteDecision::ForwardToNeighbor(addr(3)));
    }

    #[test]
    fn drops_with_no_known_route_when_no_neighbor_address_is_known() {
        let list = WorkerList::new();
        let decision = route(&list, 1, &CompositeKey::new(50, ""), 0, 0, &CompositeKey::new(10, ""), 0, DEFAULT_HOPS_MAX);
        assert_eq!(decision, RouteDecision::Drop(DropReason::NoKnownRoute));
    }
}
