//! The partitioning key and the range type that carves the key space
//! between workers (§3).

use std::cmp::Ordering;

/// An unsigned 64-bit integer paired with a string, ordered lexicographically
/// by `(int, string)`. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeKey {
    int_part: u64,
    str_part: String,
}

impl CompositeKey {
    pub fn new(int_part: u64, str_part: impl Into<String>) -> Self {
        Self { int_part, str_part: str_part.into() }
    }

    /// `CompositeKey(0, "")`, the minimum possible key.
    pub fn min() -> Self {
        Self::new(0, "")
    }

    pub fn int_part(&self) -> u64 {
        self.int_part
    }

    pub fn str_part(&self) -> &str {
        &self.str_part
    }

    /// The smallest key strictly greater than `self`.
    ///
    /// Under byte-wise string ordering, appending the lowest possible byte
    /// produces the immediate successor: nothing can sort between `s` and
    /// `s + "\0"`. Used to build an exclusive upper bound "one past" a key
    /// (§4.7.1's `increment(left.range.max)`, §4.7.2's FROM-RIGHT `max`
    /// update).
    pub fn successor(&self) -> CompositeKey {
        CompositeKey::new(self.int_part, format!("{}\0", self.str_part))
    }
}

impl PartialOrd for CompositeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CompositeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.int_part
            .cmp(&other.int_part)
            .then_with(|| self.str_part.cmp(&other.str_part))
    }
}

/// A worker's ownership interval (§3). `max` is an exclusive upper bound
/// unless `unlimited` is set, in which case it is ignored by containment
/// tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub valid: bool,
    pub unlimited: bool,
    pub min: CompositeKey,
    pub max: CompositeKey,
}

impl KeyRange {
    /// A not-yet-established range, as every worker starts out (§4.6).
    pub fn invalid() -> Self {
        Self {
            valid: false,
            unlimited: false,
            min: CompositeKey::min(),
            max: CompositeKey::min(),
        }
    }

    /// The all-inclusive range given to the very first worker to register
    /// (§4.5 "`add_worker`").
    pub fn unlimited_from(min: CompositeKey) -> Self {
        Self { valid: true, unlimited: true, min, max: CompositeKey::min() }
    }

    pub fn bounded(min: CompositeKey, max: CompositeKey) -> Self {
        debug_assert!(min < max, "a bounded range must have min < max");
        Self { valid: true, unlimited: false, min, max }
    }

    /// `contains(k) ≡ valid ∧ k ≥ min ∧ (unlimited ∨ k < max)`.
    pub fn contains(&self, key: &CompositeKey) -> bool {
        self.valid && *key >= self.min && (self.unlimited || *key < self.max)
    }

    /// True if this range and `other` share any key. Used by debug
    /// assertions guarding the ring's no-overlap invariant (§3), the
    /// counterpart to `contains` noted in the original source's
    /// `KeyRange::isOverlapping`.
    pub fn overlaps(&self, other: &KeyRange) -> bool {
        if !self.valid || !other.valid {
            return false;
        }

        let self_before_other = !self.unlimited && self.max <= other.min;
        let other_before_self = !other.unlimited && other.max <= self.min;

        !(self_before_other || other_before_self)
    }

    /// Sets `min`/`max` and returns the *previous* range (§9 Open Question:
    /// the setter returns the old value rather than a changed/unchanged
    /// bool, so callers that need that can compare themselves).
    pub fn set_max(&mut self, max: CompositeKey) -> KeyRange {
        let previous = self.clone();
        self.max = max;
        self.unlimited = false;
        previous
    }

    pub fn set_min(&mut self, min: CompositeKey) -> KeyRange {
        let previous = self.clone();
        self.min = min;
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_lexicographic_by_int_then_string() {
        assert!(CompositeKey::new(1, "a") < CompositeKey::new(2, "a"));
        assert!(CompositeKey::new(1, "a") < CompositeKey::new(1, "b"));
        assert_eq!(CompositeKey::new(1, "a"), CompositeKey::new(1, "a"));
    }

    #[test]
    fn invalid_range_contains_nothing() {
        let range = KeyRange::invalid();
        assert!(!range.contains(&CompositeKey::min()));
    }

    #[test]
    fn unlimited_range_contains_everything_above_min() {
        let range = KeyRange::unlimited_from(CompositeKey::new(10, ""));
        assert!(!range.contains(&CompositeKey::new(9, "z")));
        assert!(range.contains(&CompositeKey::new(10, "")));
        assert!(range.contains(&CompositeKey::new(u64::MAX, "zzzz")));
    }

    #[test]
    fn bounded_range_is_exclusive_at_max() {
        let range = KeyRange::bounded(CompositeKey::new(0, ""), CompositeKey::new(10, ""));
        assert!(range.contains(&CompositeKey::new(9, "zzz")));
        assert!(!range.contains(&CompositeKey::new(10, "")));
    }

    #[test]
    fn adjacent_ranges_do_not_overlap() {
        let left = KeyRange::bounded(CompositeKey::new(0, ""), CompositeKey::new(10, ""));
        let right = KeyRange::unlimited_from(CompositeKey::new(10, ""));
        assert!(!left.overlaps(&right));
    }

    #[test]
    fn successor_sorts_immediately_after_its_source() {
        let k = CompositeKey::new(5, "abc");
        let s = k.successor();
        assert!(k < s);
        assert!(CompositeKey::new(5, "abd") > s);
        assert!(CompositeKey::new(6, "") > s);
    }

    #[test]
    fn shifted_ranges_overlap() {
        let left = KeyRange::bounded(CompositeKey::new(0, ""), CompositeKey::new(10, ""));
        let right = KeyRange::bounded(CompositeKey::new(5, ""), CompositeKey::new(20, ""));
        assert!(left.overlaps(&right));
    }
}
