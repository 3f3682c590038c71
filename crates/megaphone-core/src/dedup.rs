//! Fixed-capacity ring of recently seen event ids.
//!
//! The server may retransmit chunks, so every chunk's event id is checked
//! against the ring before it is routed. The ring only remembers the last
//! `capacity` ids: an id evicted by newer traffic is treated as new again.

use std::collections::HashMap;

use crate::error::MegaphoneError;

/// Bounded memory of recently recorded event ids.
#[derive(Debug)]
pub struct DedupRing {
    /// Slots in insertion order, overwritten circularly.
    slots: Vec<Option<String>>,
    /// Next slot to overwrite.
    cursor: usize,
    /// Occupancy count per id for O(1) membership.
    index: HashMap<String, usize>,
}

impl DedupRing {
    /// Create a ring remembering the last `capacity` ids.
    ///
    /// A zero capacity is rejected.
    pub fn new(capacity: usize) -> Result<Self, MegaphoneError> {
        if capacity == 0 {
            return Err(MegaphoneError::Config(
                "dedup ring capacity must be at least 1".into(),
            ));
        }
        Ok(Self {
            slots: vec![None; capacity],
            cursor: 0,
            index: HashMap::with_capacity(capacity),
        })
    }

    /// Whether `id` is among the last `capacity` recorded ids.
    pub fn seen(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Write `id` at the cursor, evicting the oldest entry once full.
    pub fn record(&mut self, id: &str) {
        if let Some(evicted) = self.slots[self.cursor].replace(id.to_string()) {
            if let Some(count) = self.index.get_mut(&evicted) {
                *count -= 1;
                if *count == 0 {
                    self.index.remove(&evicted);
                }
            }
        }
        *self.index.entry(id.to_string()).or_insert(0) += 1;
        self.cursor = (self.cursor + 1) % self.slots.len();
    }

    /// Record `id` if it is new. Returns `false` for a duplicate, which is
    /// left unrecorded.
    pub fn check_and_record(&mut self, id: &str) -> bool {
        if self.seen(id) {
            return false;
        }
        self.record(id);
        true
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Forget every recorded id.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.index.clear();
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_config_error() {
        let err = DedupRing::new(0).unwrap_err();
        assert!(matches!(err, MegaphoneError::Config(_)));
    }

    #[test]
    fn duplicate_within_window_is_rejected() {
        let mut ring = DedupRing::new(4).unwrap();
        assert!(ring.check_and_record("a"));
        assert!(ring.check_and_record("b"));
        assert!(!ring.check_and_record("a"));
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn evicted_id_is_treated_as_new() {
        // a, b, c, d into three slots leaves {b, c, d}
        let mut ring = DedupRing::new(3).unwrap();
        for id in ["a", "b", "c", "d"] {
            assert!(ring.check_and_record(id));
        }
        assert!(!ring.seen("a"));
        assert!(ring.seen("b") && ring.seen("c") && ring.seen("d"));
        assert!(ring.check_and_record("a"));
        assert!(!ring.seen("b"));
    }

    #[test]
    fn never_holds_more_than_capacity() {
        let mut ring = DedupRing::new(2).unwrap();
        for i in 0..10 {
            ring.record(&i.to_string());
        }
        assert_eq!(ring.len(), 2);
        assert!(ring.seen("8") && ring.seen("9"));
        assert!(!ring.seen("7"));
    }

    #[test]
    fn repeated_record_keeps_id_until_last_copy_evicted() {
        let mut ring = DedupRing::new(3).unwrap();
        ring.record("x");
        ring.record("x");
        ring.record("y");
        ring.record("z"); // evicts the first "x"
        assert!(ring.seen("x"));
        ring.record("w"); // evicts the second "x"
        assert!(!ring.seen("x"));
    }

    #[test]
    fn clear_forgets_everything() {
        let mut ring = DedupRing::new(2).unwrap();
        ring.record("a");
        ring.clear();
        assert!(ring.is_empty());
        assert!(ring.check_and_record("a"));
    }
}
