// One automaton state under construction.
//
// An `UnpackedState` is a reusable accumulator: the state stack creates one
// per key depth and clears it for reuse once the depth has been persisted,
// so feeding a key allocates nothing. Content is meaningless between a
// `clear` and the next fill.

use minidict_core::coding::varshort_len;
use minidict_core::hash;

use crate::bits::LabelSet;
use crate::{FINAL_SLOT, LABEL_RANGE, WEIGHT_SLOT};

/// One outgoing transition: a byte label (or [`FINAL_SLOT`] for the final
/// pseudo-transition, whose target is the value handle) and a target that is
/// either a placeholder 0 while the child is still on the stack or the
/// child's persisted offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub label: u16,
    pub target: u64,
}

/// Mutable pre-persistence representation of one automaton state.
#[derive(Debug, Default)]
pub struct UnpackedState {
    outgoing: Vec<Transition>,
    label_set: LabelSet,
    is_final: bool,
    weight: u32,
    hash: Option<u64>,
    no_minimization: u32,
}

impl UnpackedState {
    /// Add an outgoing transition. The caller guarantees each label is added
    /// at most once between clears (the generator feeds strictly increasing
    /// suffixes, so this holds by construction).
    pub fn add_transition(&mut self, label: u8, target: u64) {
        debug_assert!(!self.label_set.get(label as usize));
        self.outgoing.push(Transition {
            label: u16::from(label),
            target,
        });
        self.label_set.set(label as usize);
    }

    /// Mark this state final with the given value handle. The final marker is
    /// just another reserved pseudo-label: it occupies the bitmap slots of
    /// the value's varshort cells and participates in hashing and comparison
    /// like an ordinary transition.
    pub fn set_final(&mut self, value: u64) {
        debug_assert!(!self.is_final);
        self.outgoing.push(Transition {
            label: FINAL_SLOT as u16,
            target: value,
        });
        for i in 0..varshort_len(value) {
            self.label_set.set(FINAL_SLOT + i);
        }
        self.is_final = true;
    }

    /// Patch the target of the most recently added transition (the stack
    /// inserts suffix transitions with a placeholder target and patches in
    /// the child's offset once it has been persisted).
    pub fn set_last_target(&mut self, target: u64) {
        if let Some(last) = self.outgoing.last_mut() {
            last.target = target;
        }
    }

    /// Raise the state's weight, never lowering it.
    pub fn update_weight_if_higher(&mut self, weight: u32) {
        if weight > self.weight {
            self.weight = weight;
            self.label_set.set(WEIGHT_SLOT);
        }
    }

    /// Reset every field for reuse at a new depth.
    pub fn clear(&mut self) {
        self.outgoing.clear();
        self.label_set.clear();
        self.is_final = false;
        self.weight = 0;
        self.hash = None;
        self.no_minimization = 0;
    }

    /// Content hash over every transition plus a weighted/unweighted flag.
    /// Memoized; invalidated only by [`clear`](Self::clear). The weight
    /// magnitude is deliberately excluded so that a later, higher weight can
    /// still merge with an earlier weighted state.
    pub fn hash(&mut self) -> u64 {
        if let Some(h) = self.hash {
            return h;
        }
        let mut acc = hash::fold(hash::HASH_INIT, u64::from(self.weight > 0));
        for t in &self.outgoing {
            acc = hash::fold_transition(acc, t.label, t.target);
        }
        self.hash = Some(acc);
        acc
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.outgoing.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty()
    }

    #[inline]
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    #[inline]
    pub fn weight(&self) -> u32 {
        self.weight
    }

    #[inline]
    pub fn has_label(&self, label: u8) -> bool {
        self.label_set.get(label as usize)
    }

    /// Byte label of the first transition, if any. Drives the placement
    /// alignment heuristic and the zero-byte scrambling decision.
    pub fn first_label(&self) -> Option<u8> {
        self.outgoing.first().and_then(|t| {
            ((t.label as usize) < LABEL_RANGE).then_some(t.label as u8)
        })
    }

    #[inline]
    pub fn transitions(&self) -> &[Transition] {
        &self.outgoing
    }

    #[inline]
    pub fn label_set(&self) -> &LabelSet {
        &self.label_set
    }

    /// Consecutive minimization failures rooted below this state. Once
    /// positive, minimization is never attempted for this state again; the
    /// counter is monotone until the next clear.
    #[inline]
    pub fn no_minimization(&self) -> u32 {
        self.no_minimization
    }

    pub fn bump_no_minimization(&mut self, delta: u32) {
        self.no_minimization += delta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_keep_insertion_order() {
        let mut s = UnpackedState::default();
        s.add_transition(98, 10);
        s.add_transition(97, 20);
        assert_eq!(s.len(), 2);
        assert_eq!(s.transitions()[0].label, 98);
        assert_eq!(s.transitions()[1].label, 97);
        assert!(s.has_label(97));
        assert!(!s.has_label(99));
    }

    #[test]
    fn final_marker_is_independent_of_transitions() {
        let mut s = UnpackedState::default();
        s.set_final(7);
        s.add_transition(97, 1);
        assert!(s.is_final());
        assert_eq!(s.len(), 2);
        assert!(s.label_set().get(FINAL_SLOT));
    }

    #[test]
    fn multi_cell_final_value_occupies_extra_slots() {
        let mut s = UnpackedState::default();
        s.set_final(1 << 20); // needs two varshort cells
        assert!(s.label_set().get(FINAL_SLOT));
        assert!(s.label_set().get(FINAL_SLOT + 1));
        assert!(!s.label_set().get(FINAL_SLOT + 2));
    }

    #[test]
    fn hash_is_memoized_and_reset_by_clear() {
        let mut s = UnpackedState::default();
        s.add_transition(97, 42);
        let h1 = s.hash();
        assert_eq!(s.hash(), h1);
        s.clear();
        s.add_transition(97, 43);
        assert_ne!(s.hash(), h1);
    }

    #[test]
    fn weight_flag_changes_hash_but_magnitude_does_not() {
        let mut a = UnpackedState::default();
        a.add_transition(97, 1);
        let unweighted = a.hash();

        let mut b = UnpackedState::default();
        b.add_transition(97, 1);
        b.update_weight_if_higher(5);
        let low = b.hash();

        let mut c = UnpackedState::default();
        c.add_transition(97, 1);
        c.update_weight_if_higher(500);
        let high = c.hash();

        assert_ne!(unweighted, low);
        assert_eq!(low, high);
    }

    #[test]
    fn weight_never_decreases() {
        let mut s = UnpackedState::default();
        s.update_weight_if_higher(10);
        s.update_weight_if_higher(3);
        assert_eq!(s.weight(), 10);
    }

    #[test]
    fn clear_resets_everything() {
        let mut s = UnpackedState::default();
        s.add_transition(0, 1);
        s.set_final(2);
        s.update_weight_if_higher(9);
        s.bump_no_minimization(3);
        s.clear();
        assert_eq!(s.len(), 0);
        assert!(!s.is_final());
        assert_eq!(s.weight(), 0);
        assert_eq!(s.no_minimization(), 0);
        assert!(!s.label_set().get(WEIGHT_SLOT));
    }
}
