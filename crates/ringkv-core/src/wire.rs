//! Conversions between [`KeyRange`] and its wire form `WorkerRange` (§6.1),
//! shared by the neighbor-link handshake and the role binaries' master/
//! worker-list message handlers.

use crate::key::{CompositeKey, KeyRange};
use ringkv_codec::payload::WorkerRange;

pub fn to_wire_range(range: &KeyRange) -> WorkerRange {
    WorkerRange {
        valid: range.valid,
        min_int: range.min.int_part(),
        min_str: range.min.str_part().to_string(),
        max_int: range.max.int_part(),
        max_str: range.max.str_part().to_string(),
        max_unlimited: range.unlimited,
    }
}

pub fn from_wire_range(wire: &WorkerRange) -> KeyRange {
    let min = CompositeKey::new(wire.min_int, wire.min_str.clone());
    if !wire.valid {
        return KeyRange::invalid();
    }
    if wire.max_unlimited {
        KeyRange::unlimited_from(min)
    } else {
        KeyRange::bounded(min, CompositeKey::new(wire.max_int, wire.max_str.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_range_round_trips_through_the_wire_form() {
        let range = KeyRange::unlimited_from(CompositeKey::new(10, "x"));
        assert_eq!(from_wire_range(&to_wire_range(&range)), range);
    }

    #[test]
    fn bounded_range_round_trips_through_the_wire_form() {
        let range = KeyRange::bounded(CompositeKey::new(0, ""), CompositeKey::new(100, "z"));
        assert_eq!(from_wire_range(&to_wire_range(&range)), range);
    }
}
