// State placement and transition encoding.
//
// `SparseArrayBuilder` is the sole writer of the address space. Persisting a
// state either resolves to an existing offset through the minimization cache
// or claims a free bucket: a start offset where every occupied label slot of
// the state is free and none of the byte-level alias hazards of the format
// can arise (see the guard comments in `find_free_bucket`).

use log::{debug, trace};

use minidict_core::coding::{VARSHORT_MAX_CELLS, encode_varshort};

use crate::arena::Arena;
use crate::cache::{CacheEntry, MinimizationCache};
use crate::config::GeneratorConfig;
use crate::state::UnpackedState;
use crate::window::SlidingPositionWindow;
use crate::{
    COMPACT_WINDOW, FINAL_GUARD, FINAL_LABEL, FINAL_SLOT, FsaError, LABEL_RANGE, WEIGHT_SLOT,
};

/// How far below the most recently placed state the free-bucket search
/// starts. Keeping placements clustered keeps most pointers inside the
/// relative-compact encoding.
const SEARCH_LOOKBACK: usize = 128;

const RELATIVE_MAX: usize = 0x8000;
const ABSOLUTE_MAX: u64 = 0x4000;

/// Weight cells are plain u16 values.
const WEIGHT_MAX: u32 = u16::MAX as u32;

/// Definitive structural comparison of an in-memory candidate against the
/// state persisted at `offset`, reading back through the arena's own decode
/// path. Weight magnitude is excluded: two states differing only in weight
/// hash differently when one is unweighted, and merge when both are
/// weighted (the stored weight is then raised in place).
pub fn read_and_compare(arena: &Arena, offset: u64, candidate: &UnpackedState) -> bool {
    for t in candidate.transitions() {
        if (t.label as usize) < LABEL_RANGE {
            let position = offset as usize + t.label as usize;
            if u16::from(arena.label_at(position)) != t.label {
                return false;
            }
            let stored = arena.resolve_pointer(position, arena.cell_at(position));
            if stored != t.target {
                return false;
            }
        } else {
            // final pseudo-transition
            if arena.final_value_of(offset) != Some(t.target) {
                return false;
            }
        }
    }
    true
}

/// The zero-byte scrambling decision for a slot: the label byte to write and
/// the fictitious owner position to retire, if one is representable.
#[derive(Debug, Clone, Copy)]
struct Scramble {
    label: u8,
    owner: Option<usize>,
}

/// A free bucket for a state, as found by the search.
#[derive(Debug, Clone, Copy)]
struct Placement {
    offset: usize,
    scramble: Option<Scramble>,
}

/// Persists unpacked states into the sparse array.
#[derive(Debug)]
pub struct SparseArrayBuilder {
    arena: Arena,
    cache: MinimizationCache,
    /// Slots occupied by any transition/pseudo-label cell.
    taken: SlidingPositionWindow,
    /// Offsets where a state starts, or that are blocked from ever becoming
    /// a state start by one of the alias guards.
    state_starts: SlidingPositionWindow,
    /// Fictitious owners of scrambled labels; never allowed to become real
    /// state starts.
    scramble_owners: SlidingPositionWindow,
    state_count: u64,
    highest_persisted: usize,
    minimize: bool,
    inner_weights: bool,
    cache_skip_state_threshold: u64,
    cache_skip_failure_threshold: u32,
}

impl SparseArrayBuilder {
    pub fn new(config: &GeneratorConfig, inner_weights: bool) -> Self {
        SparseArrayBuilder {
            arena: Arena::default(),
            cache: MinimizationCache::new(config.cache_generation_capacity, config.cache_generations),
            taken: SlidingPositionWindow::default(),
            state_starts: SlidingPositionWindow::default(),
            scramble_owners: SlidingPositionWindow::default(),
            state_count: 0,
            highest_persisted: 0,
            minimize: config.minimize,
            inner_weights,
            cache_skip_state_threshold: config.cache_skip_state_threshold,
            cache_skip_failure_threshold: config.cache_skip_failure_threshold,
        }
    }

    /// Persist `state`, returning its offset. Either an existing offset (the
    /// cache found a structurally identical state -- its stored weight is
    /// raised if needed) or a freshly written one.
    pub fn persist_state(&mut self, state: &mut UnpackedState) -> Result<u64, FsaError> {
        if self.minimize && state.no_minimization() == 0 {
            if let Some(offset) = self.cache.get(state, &self.arena) {
                trace!("minimized state into offset {offset}");
                if state.weight() > 0 {
                    self.update_weight(offset as usize, state.weight());
                }
                return Ok(offset);
            }
        }

        // This exact state is now known to be unique; any state reaching it
        // cannot be minimized either, so the counter propagates upward.
        state.bump_no_minimization(1);

        let placement = self.find_free_bucket(state);
        self.write_state(placement, state)?;
        self.state_count += 1;

        // Skip cache registration once minimization keeps failing on a
        // grown automaton: such states are statistically dead weight in the
        // cache.
        if self.minimize
            && (self.state_count < self.cache_skip_state_threshold
                || state.no_minimization() < self.cache_skip_failure_threshold)
        {
            self.cache.add(CacheEntry {
                hash: state.hash(),
                offset: placement.offset as u64,
                transitions: state.len() as u32,
            });
        }

        Ok(placement.offset as u64)
    }

    pub fn state_count(&self) -> u64 {
        self.state_count
    }

    /// Release the working structures, keeping only the written arena.
    pub fn into_arena(self) -> Arena {
        debug!(
            "builder finished: {} states, {} slots",
            self.state_count,
            self.arena.len()
        );
        self.arena
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Find a start offset where the state fits without creating any alias.
    /// Terminates because the search eventually reaches the untouched space
    /// past the frontier, which is free.
    ///
    /// States never start at offset 0 (reserved as "no state").
    fn find_free_bucket(&self, state: &UnpackedState) -> Placement {
        let first_label = usize::from(state.first_label().unwrap_or(0));
        let mut position = self.highest_persisted.saturating_sub(SEARCH_LOOKBACK).max(1);
        // snap the first transition into the next free slot
        position = self
            .taken
            .next_free(position + first_label)
            .saturating_sub(first_label)
            .max(1);

        loop {
            position = self.state_starts.next_free(position);
            if self.scramble_owners.is_set(position) {
                position += 1;
                continue;
            }
            // A state start at `position + FINAL_GUARD` would let this
            // state's final marker fake transitions labeled 1..=4 on it.
            if state.is_final() && self.state_starts.is_set(position + FINAL_GUARD) {
                position += 1;
                continue;
            }

            let shift = self.taken.is_available(state.label_set(), position);
            if shift != 0 {
                position += shift;
                continue;
            }
            // In weighted dictionaries every state owns its weight cell.
            if self.inner_weights && self.taken.is_set(position + WEIGHT_SLOT) {
                position += 1;
                continue;
            }
            // A transition labeled 1 writes the byte 1 at `position + 1`,
            // which is the final-marker slot of `position - FINAL_GUARD`.
            if state.has_label(FINAL_LABEL)
                && position > FINAL_GUARD
                && self.state_starts.is_set(position - FINAL_GUARD)
            {
                position += 1;
                continue;
            }

            // A state whose own slot stays empty would appear to have a
            // zero-labeled transition; scramble the slot unless a real
            // zero transition (or an earlier write) fills it.
            let mut scramble = None;
            if !state.has_label(0) && !self.taken.is_set(position) {
                match self.pick_scramble(position) {
                    Some(s) => scramble = Some(s),
                    None => {
                        position += 1;
                        continue;
                    }
                }
            }

            trace!("free bucket at {position}");
            return Placement {
                offset: position,
                scramble,
            };
        }
    }

    /// Choose the scrambling label for the slot at `position`: a label byte
    /// whose implied owner `position - label` is not and will never be a
    /// real state. Below the label range no owner is representable and a
    /// fixed byte suffices.
    fn pick_scramble(&self, position: usize) -> Option<Scramble> {
        if position < LABEL_RANGE {
            return Some(Scramble {
                label: 0xFF,
                owner: None,
            });
        }
        let owner = self.state_starts.next_free(position - (LABEL_RANGE - 1));
        if owner >= position {
            return None;
        }
        let label = (position - owner) as u8;
        // the byte 1 is the final marker; writing it would fake finality of
        // `position - FINAL_SLOT`
        if label == FINAL_LABEL {
            return None;
        }
        Some(Scramble {
            label,
            owner: Some(owner),
        })
    }

    /// Write `state` at its placement: reserve the footprint, scribble the
    /// scramble byte, then encode every transition.
    fn write_state(&mut self, placement: Placement, state: &UnpackedState) -> Result<(), FsaError> {
        let offset = placement.offset;
        self.arena.begin_state(offset);
        if offset > self.highest_persisted {
            self.highest_persisted = offset;
        }

        if let Some(scramble) = placement.scramble
            && !self.taken.is_set(offset)
        {
            if let Some(owner) = scramble.owner {
                self.scramble_owners.set(owner);
            }
            // may legitimately be overwritten by a later state's transition;
            // any such write keeps the byte non-zero
            self.arena.write_cell(offset, scramble.label, 0);
        }

        if state.has_label(FINAL_LABEL) && offset > FINAL_GUARD {
            self.state_starts.set(offset - FINAL_GUARD);
        }

        // 1st pass: reserve every slot of the footprint
        self.taken.set_label_set(state.label_set(), offset);
        if state.is_final() {
            self.state_starts.set(offset + FINAL_GUARD);
        }
        self.state_starts.set(offset);

        // 2nd pass: write the cells
        for &t in state.transitions() {
            if (t.label as usize) < LABEL_RANGE {
                self.write_transition(offset + t.label as usize, t.label as u8, t.target)?;
            } else {
                self.write_final_value(offset, t.target);
            }
        }

        if self.inner_weights {
            self.taken.set(offset + WEIGHT_SLOT);
            self.state_starts.set(offset + WEIGHT_SLOT);
            if state.weight() > 0 {
                self.update_weight(offset, state.weight());
            }
        }

        trace!(
            "state written at {offset}: {} transitions, final={}",
            state.len(),
            state.is_final()
        );
        Ok(())
    }

    /// Encode the pointer `target` into the cell at `position`, choosing the
    /// most compact representation (see `Arena::resolve_pointer` for the
    /// layout).
    fn write_transition(&mut self, position: usize, label: u8, target: u64) -> Result<(), FsaError> {
        let difference = (position + COMPACT_WINDOW).checked_sub(target as usize);

        if let Some(diff) = difference
            && diff < RELATIVE_MAX
        {
            self.arena.write_cell(position, label, diff as u16);
            return Ok(());
        }
        if target < ABSOLUTE_MAX {
            self.arena
                .write_cell(position, label, target as u16 | 0xC000);
            return Ok(());
        }

        // overflow: high bits go to an extra bucket near `position`
        let (relative, code) = match difference {
            Some(diff) if (diff as u64) < target => (true, diff as u64),
            _ => (false, target),
        };
        let mut chain = [0u16; VARSHORT_MAX_CELLS];
        let chain_len = encode_varshort(code >> 3, &mut chain);
        let bucket = self.place_overflow_bucket(position, &chain[..chain_len])?;

        let delta = (bucket + COMPACT_WINDOW - position) as u16;
        let cell = 0x8000 | (delta << 4) | (u16::from(relative) << 3) | (code & 0x7) as u16;
        self.arena.write_cell(position, label, cell);
        trace!("overflow transition at {position}: bucket {bucket}, {chain_len} cells");
        Ok(())
    }

    /// Find and write an extra bucket of `chain.len()` contiguous free slots
    /// within the encodable window around `position`, with scrambled label
    /// bytes so the cells can never be mistaken for transitions or final
    /// markers of any real state.
    fn place_overflow_bucket(&mut self, position: usize, chain: &[u16]) -> Result<usize, FsaError> {
        let len = chain.len();
        let mut bucket = position.saturating_sub(COMPACT_WINDOW).max(1);

        'search: loop {
            bucket = self.taken.next_free(bucket);
            if bucket + COMPACT_WINDOW < position + 1 {
                bucket += 1;
                continue;
            }
            if bucket > position + (COMPACT_WINDOW - 1) {
                // the 10-bit bucket pointer cannot reach further
                return Err(FsaError::AddressSpaceExhausted);
            }

            for i in 0..len {
                let slot = bucket + i;
                if self.taken.is_set(slot) {
                    bucket = slot + 1;
                    continue 'search;
                }
                // never write into another state's weight cell
                if self.inner_weights
                    && slot >= WEIGHT_SLOT
                    && self.state_starts.is_set(slot - WEIGHT_SLOT)
                {
                    bucket = slot + 1;
                    continue 'search;
                }
            }

            let scramble = match self.pick_bucket_scramble(bucket, len) {
                Some(s) => s,
                None => {
                    bucket += len;
                    continue;
                }
            };

            if let Some(owner) = scramble.owner {
                self.scramble_owners.set(owner);
            }
            for (i, &cell) in chain.iter().enumerate() {
                self.taken.set(bucket + i);
                self.arena.write_cell(bucket + i, scramble.label + i as u8, cell);
            }
            return Ok(bucket);
        }
    }

    /// Scramble labels for an overflow bucket of `len` cells starting at
    /// `bucket`: labels `base..base + len` must all stay in byte range, skip
    /// the final marker, and share one retired owner.
    fn pick_bucket_scramble(&self, bucket: usize, len: usize) -> Option<Scramble> {
        if bucket < LABEL_RANGE {
            let base = (LABEL_RANGE - len) as u8; // 0xFF for a single cell
            if bucket > base as usize {
                // an owner in 1.. would be implied; give up on this bucket
                return None;
            }
            return Some(Scramble {
                label: base,
                owner: None,
            });
        }
        let owner = self
            .state_starts
            .next_free(bucket + len - LABEL_RANGE);
        if owner >= bucket {
            return None;
        }
        let label = (bucket - owner) as u8;
        if label == FINAL_LABEL {
            return None;
        }
        Some(Scramble {
            label,
            owner: Some(owner),
        })
    }

    fn write_final_value(&mut self, offset: usize, value: u64) {
        debug_assert!(value < 1 << 60, "value handle exceeds final-cell capacity");
        let mut chain = [0u16; VARSHORT_MAX_CELLS];
        let len = encode_varshort(value, &mut chain);
        for (i, &cell) in chain[..len].iter().enumerate() {
            self.arena
                .write_cell(offset + FINAL_SLOT + i, FINAL_LABEL + i as u8, cell);
        }
    }

    /// Raise the weight stored for the state at `offset`, never lowering it.
    fn update_weight(&mut self, offset: usize, weight: u32) {
        let capped = weight.min(WEIGHT_MAX) as u16;
        let slot = offset + WEIGHT_SLOT;
        if self.arena.cell_at(slot) < capped {
            self.arena.write_cell(slot, 0, capped);
            self.taken.set(slot);
            self.state_starts.set(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneratorConfig;

    fn builder() -> SparseArrayBuilder {
        SparseArrayBuilder::new(&GeneratorConfig::default(), false)
    }

    #[test]
    fn persist_and_read_back_simple_state() {
        let mut b = builder();
        let mut s = UnpackedState::default();
        s.add_transition(b'a', 100);
        s.add_transition(b'b', 101);
        s.set_final(55);
        let offset = b.persist_state(&mut s).unwrap();

        let arena = b.arena();
        assert_eq!(arena.target_of(offset, b'a'), Some(100));
        assert_eq!(arena.target_of(offset, b'b'), Some(101));
        assert_eq!(arena.target_of(offset, b'c'), None);
        assert_eq!(arena.final_value_of(offset), Some(55));
    }

    #[test]
    fn identical_states_share_an_offset() {
        let mut b = builder();
        let mut s1 = UnpackedState::default();
        s1.add_transition(b'x', 42);
        let o1 = b.persist_state(&mut s1).unwrap();

        let mut s2 = UnpackedState::default();
        s2.add_transition(b'x', 42);
        let o2 = b.persist_state(&mut s2).unwrap();

        assert_eq!(o1, o2);
        assert_eq!(b.state_count(), 1);
    }

    #[test]
    fn different_targets_do_not_share() {
        let mut b = builder();
        let mut s1 = UnpackedState::default();
        s1.add_transition(b'x', 42);
        let o1 = b.persist_state(&mut s1).unwrap();

        let mut s2 = UnpackedState::default();
        s2.add_transition(b'x', 43);
        let o2 = b.persist_state(&mut s2).unwrap();

        assert_ne!(o1, o2);
        assert_eq!(b.state_count(), 2);
    }

    #[test]
    fn no_minimization_counter_forces_a_copy() {
        let mut b = builder();
        let mut s1 = UnpackedState::default();
        s1.add_transition(b'x', 42);
        let o1 = b.persist_state(&mut s1).unwrap();

        let mut s2 = UnpackedState::default();
        s2.add_transition(b'x', 42);
        s2.bump_no_minimization(1);
        let o2 = b.persist_state(&mut s2).unwrap();

        assert_ne!(o1, o2);
    }

    #[test]
    fn persist_bumps_the_counter_on_a_miss() {
        let mut b = builder();
        let mut s = UnpackedState::default();
        s.add_transition(b'x', 42);
        assert_eq!(s.no_minimization(), 0);
        b.persist_state(&mut s).unwrap();
        assert_eq!(s.no_minimization(), 1);
    }

    #[test]
    fn scrambled_slot_blocks_ghost_zero_transition() {
        let mut b = builder();
        let mut s = UnpackedState::default();
        // no zero-labeled transition: the state's own slot must not read as
        // a valid label-0 transition
        s.add_transition(b'q', 7);
        let offset = b.persist_state(&mut s).unwrap();
        assert_eq!(b.arena().target_of(offset, 0), None);
        assert_ne!(b.arena().label_at(offset as usize), 0);
    }

    #[test]
    fn zero_transition_occupies_own_slot() {
        let mut b = builder();
        let mut s = UnpackedState::default();
        s.add_transition(0, 9);
        let offset = b.persist_state(&mut s).unwrap();
        assert_eq!(b.arena().target_of(offset, 0), Some(9));
    }

    #[test]
    fn weight_bump_on_minimization_hit() {
        let mut b = SparseArrayBuilder::new(&GeneratorConfig::default(), true);
        let mut s1 = UnpackedState::default();
        s1.add_transition(b'x', 42);
        s1.update_weight_if_higher(3);
        let o1 = b.persist_state(&mut s1).unwrap();
        assert_eq!(b.arena().weight_of(o1), 3);

        let mut s2 = UnpackedState::default();
        s2.add_transition(b'x', 42);
        s2.update_weight_if_higher(10);
        let o2 = b.persist_state(&mut s2).unwrap();
        assert_eq!(o1, o2);
        assert_eq!(b.arena().weight_of(o1), 10);

        // a later, lower weight never lowers the stored one
        let mut s3 = UnpackedState::default();
        s3.add_transition(b'x', 42);
        s3.update_weight_if_higher(5);
        let o3 = b.persist_state(&mut s3).unwrap();
        assert_eq!(o1, o3);
        assert_eq!(b.arena().weight_of(o1), 10);
    }

    #[test]
    fn large_target_uses_overflow_encoding() {
        let mut b = builder();
        // force a pointer that fits neither the relative nor the absolute
        // compact form: persist a dummy state far into the address space
        // first, then reference a mid-range offset from beyond its window
        let mut filler = UnpackedState::default();
        filler.add_transition(b'z', 5);
        let far_target = 0x5000u64; // > ABSOLUTE_MAX, far from the write position
        b.persist_state(&mut filler).unwrap();

        let mut s = UnpackedState::default();
        s.add_transition(b'a', far_target);
        let offset = b.persist_state(&mut s).unwrap();
        // the writing position is near the start of the space, so the
        // difference is negative and the absolute value exceeds 0x4000
        assert_eq!(b.arena().target_of(offset, b'a'), Some(far_target));
    }

    #[test]
    fn final_only_leaf_state_is_scrambled() {
        let mut b = builder();
        let mut s = UnpackedState::default();
        s.set_final(12);
        let offset = b.persist_state(&mut s).unwrap();
        assert_eq!(b.arena().final_value_of(offset), Some(12));
        // the state's own slot must not read as a zero-labeled transition
        assert_eq!(b.arena().target_of(offset, 0), None);
    }

    #[test]
    fn write_final_value_compact_and_wide() {
        let mut b = builder();
        b.arena.begin_state(2048);

        b.write_final_value(25, 55);
        assert_eq!(b.arena.final_value_of(25), Some(55));

        b.write_final_value(42, 0);
        assert_eq!(b.arena.final_value_of(42), Some(0));

        b.write_final_value(2048, 0x12_3456_789A); // three varshort cells
        assert_eq!(b.arena.final_value_of(2048), Some(0x12_3456_789A));
    }

    #[test]
    fn write_transition_absolute_from_far_away() {
        let mut b = builder();
        b.arena.begin_state(1_000_000 - 65);
        b.highest_persisted = 1_000_000;

        // large write position, low target: absolute-compact
        b.write_transition(1_000_000, 65, 20).unwrap();
        b.taken.set(1_000_000);
        assert_eq!(b.arena.label_at(1_000_000), 65);
        assert_eq!(
            b.arena.resolve_pointer(1_000_000, b.arena.cell_at(1_000_000)),
            20
        );
    }

    #[test]
    fn write_transition_overflow_absolute() {
        let mut b = builder();
        b.arena.begin_state(1_000_001 - 65);
        b.highest_persisted = 1_000_001;

        // target too large for the absolute form, too far for the relative
        b.write_transition(1_000_001, 65, 34_000).unwrap();
        b.taken.set(1_000_001);
        assert_eq!(b.arena.label_at(1_000_001), 65);
        assert_eq!(
            b.arena.resolve_pointer(1_000_001, b.arena.cell_at(1_000_001)),
            34_000
        );
    }

    #[test]
    fn write_transition_overflow_relative() {
        let mut b = builder();
        b.arena.begin_state(1_000_002 - 65);
        b.highest_persisted = 1_000_002;

        // difference exceeds the compact range but undercuts the absolute
        // value, so the overflow bucket carries relative coding
        b.write_transition(1_000_002, 65, 950_000).unwrap();
        b.taken.set(1_000_002);
        assert_eq!(
            b.arena.resolve_pointer(1_000_002, b.arena.cell_at(1_000_002)),
            950_000
        );
    }

    #[test]
    fn read_and_compare_rejects_partial_matches() {
        let mut b = builder();
        let mut s = UnpackedState::default();
        s.add_transition(b'a', 10);
        s.add_transition(b'b', 20);
        let offset = b.persist_state(&mut s).unwrap();

        let mut subset = UnpackedState::default();
        subset.add_transition(b'a', 10);
        assert!(read_and_compare(b.arena(), offset, &subset));

        let mut wrong = UnpackedState::default();
        wrong.add_transition(b'a', 11);
        assert!(!read_and_compare(b.arena(), offset, &wrong));

        let mut missing = UnpackedState::default();
        missing.add_transition(b'c', 10);
        assert!(!read_and_compare(b.arena(), offset, &missing));
    }
}
