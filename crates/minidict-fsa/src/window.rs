// Sliding occupancy window over the unbounded address space.
//
// Construction moves through the address space in a generally forward
// direction, with backward probes bounded by the pointer-encoding window and
// a state's footprint. The tracker therefore only retains two 2048-bit
// blocks: the block containing the highest position touched so far and the
// one before it. Anything older reads as occupied, anything newer as free.

use log::trace;

use crate::STATE_SPAN;
use crate::bits::{BLOCK_BITS, BitBlock, LabelSet};

const BLOCK_SHIFT: usize = BLOCK_BITS.trailing_zeros() as usize;
const BLOCK_MASK: usize = BLOCK_BITS - 1;

/// Sliding bitmap answering "is this position taken" and "where is the next
/// free position" over a sparsely populated, forward-growing address space.
#[derive(Debug, Default)]
pub struct SlidingPositionWindow {
    window_index: usize,
    current: BitBlock,
    previous: BitBlock,
}

impl SlidingPositionWindow {
    /// Whether `position` is set. Positions behind the retained window are
    /// reported as set (nothing allocates that far back).
    pub fn is_set(&self, position: usize) -> bool {
        let block = position >> BLOCK_SHIFT;
        let offset = position & BLOCK_MASK;
        if block == self.window_index {
            self.current.get(offset)
        } else if block > self.window_index {
            false
        } else if block + 1 == self.window_index {
            self.previous.get(offset)
        } else {
            true
        }
    }

    /// Mark `position` as set, sliding the window forward if needed.
    pub fn set(&mut self, position: usize) {
        let block = position >> BLOCK_SHIFT;
        if block > self.window_index {
            self.slide_to(block);
        }
        let offset = position & BLOCK_MASK;
        if block == self.window_index {
            self.current.set(offset);
        } else if block + 1 == self.window_index {
            self.previous.set(offset);
        }
        // older positions: forgotten territory, already reads as set
    }

    /// OR an entire label set into the window with its bit 0 at `position`.
    pub fn set_label_set(&mut self, set: &LabelSet, position: usize) {
        let end_block = (position + STATE_SPAN) >> BLOCK_SHIFT;
        if end_block > self.window_index {
            self.slide_to(end_block);
        }
        let block = position >> BLOCK_SHIFT;
        let offset = position & BLOCK_MASK;
        if block == self.window_index {
            self.current.or_label_set(set, offset);
        } else if block + 1 == self.window_index {
            self.previous.or_label_set(set, offset);
            if end_block == self.window_index {
                self.current.or_label_set_from(set, BLOCK_BITS - offset);
            }
        }
    }

    /// Smallest position `>= from` that is not set.
    pub fn next_free(&self, from: usize) -> usize {
        let mut block = from >> BLOCK_SHIFT;
        let mut offset = from & BLOCK_MASK;
        if block > self.window_index {
            return from;
        }
        if block + 1 < self.window_index {
            // behind the window; resume scanning at its lower edge
            block = self.window_index - 1;
            offset = 0;
        }
        if block + 1 == self.window_index {
            let bit = self.previous.next_zero(offset);
            if bit < BLOCK_BITS {
                return (block << BLOCK_SHIFT) + bit;
            }
            block += 1;
            offset = 0;
        }
        let bit = self.current.next_zero(offset);
        // a fully set tail means the first free position is past the frontier
        (block << BLOCK_SHIFT) + bit
    }

    /// Return 0 when every set bit of `set`, placed at `position`, falls on a
    /// free position; otherwise a forward shift hint for the next probe.
    pub fn is_available(&self, set: &LabelSet, position: usize) -> usize {
        let block = position >> BLOCK_SHIFT;
        let offset = position & BLOCK_MASK;
        if block > self.window_index {
            return 0;
        }
        if block == self.window_index {
            return self.current.disjoint_shift(set, offset);
        }
        if block + 1 == self.window_index {
            let shift = self.previous.disjoint_shift(set, offset);
            if shift == 0 && BLOCK_BITS - offset < STATE_SPAN {
                return self.current.disjoint_shift_spill(set, BLOCK_BITS - offset);
            }
            return shift;
        }
        // behind the window: treat as occupied
        1
    }

    fn slide_to(&mut self, block: usize) {
        if block > self.window_index + 1 {
            // the gap skipped an entire block; neither retained block is it
            self.previous.clear();
            self.current.clear();
        } else {
            std::mem::swap(&mut self.previous, &mut self.current);
            self.current.clear();
        }
        self.window_index = block;
        trace!("occupancy window slid to block {block}");
    }
}
