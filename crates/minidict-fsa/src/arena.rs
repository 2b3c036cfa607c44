// The flat sparse-array address space.
//
// Two parallel growable arrays over one slot index: a label byte and a u16
// cell per slot. A state at offset `o` owns slot `o + label` for each of its
// transition labels; the cell there encodes the target pointer in one of
// three representations (see `resolve_pointer`). Final values and weights
// live in the reserved pseudo-label slots above 255.
//
// The builder is the only writer. Reads are total: slots that were never
// written (including slots past the end of the arrays) read as label 0 /
// cell 0, which no decode path mistakes for content.

use std::io::Write;

use minidict_core::coding::{VARSHORT_MAX_CELLS, decode_varshort};

use crate::{COMPACT_WINDOW, FINAL_LABEL, FINAL_SLOT, FINAL_VALUE_MAX_CELLS, STATE_SPAN, WEIGHT_SLOT};

/// Growable label/cell storage for one automaton.
#[derive(Debug, Default)]
pub struct Arena {
    labels: Vec<u8>,
    cells: Vec<u16>,
    highest_state_begin: usize,
    highest_written: usize,
}

impl Arena {
    /// Reconstruct an arena from serialized parts (reader side).
    pub fn from_parts(labels: Vec<u8>, cells: Vec<u16>) -> Self {
        let highest = labels.len().saturating_sub(1);
        Arena {
            labels,
            cells,
            highest_state_begin: 0,
            highest_written: highest,
        }
    }

    /// Announce that a state is about to be written at `offset`: grows the
    /// arrays to cover the state's whole footprint plus the overflow-bucket
    /// window, so every subsequent slot access for this state is in bounds.
    pub fn begin_state(&mut self, offset: usize) {
        let needed = offset + STATE_SPAN + COMPACT_WINDOW;
        if needed > self.labels.len() {
            self.labels.resize(needed, 0);
            self.cells.resize(needed, 0);
        }
        if offset > self.highest_state_begin {
            self.highest_state_begin = offset;
        }
    }

    /// Store a raw (label, cell) pair at `position`.
    pub fn write_cell(&mut self, position: usize, label: u8, cell: u16) {
        if position >= self.labels.len() {
            self.labels.resize(position + 1, 0);
            self.cells.resize(position + 1, 0);
        }
        self.labels[position] = label;
        self.cells[position] = cell;
        if position > self.highest_written {
            self.highest_written = position;
        }
    }

    #[inline]
    pub fn label_at(&self, position: usize) -> u8 {
        self.labels.get(position).copied().unwrap_or(0)
    }

    #[inline]
    pub fn cell_at(&self, position: usize) -> u16 {
        self.cells.get(position).copied().unwrap_or(0)
    }

    /// Decode the target pointer stored at `position`. Pure function of the
    /// stored cells; no construction-time context is needed.
    ///
    /// Cell layout (tag in the top bits):
    /// - `0xxxxxxx xxxxxxxx` -- relative: `target = position + 512 - cell`
    /// - `11xxxxxx xxxxxxxx` -- absolute: `target = cell & 0x3FFF`
    /// - `10xxxxxx xxxxxxxx` -- overflow: bits 4..=13 point at an extra
    ///   bucket in `position - 512 ..= position + 511` holding the high bits
    ///   as a varshort; bit 3 selects relative coding of the recombined
    ///   value; bits 0..=2 are its low three bits.
    pub fn resolve_pointer(&self, position: usize, cell: u16) -> u64 {
        if cell & 0xC000 == 0xC000 {
            return u64::from(cell & 0x3FFF);
        }
        if cell & 0x8000 != 0 {
            let delta = usize::from((cell >> 4) & 0x3FF);
            let bucket = position + delta - COMPACT_WINDOW;
            let mut chain = [0u16; VARSHORT_MAX_CELLS];
            for (i, slot) in chain.iter_mut().enumerate() {
                *slot = self.cell_at(bucket + i);
            }
            let code = (decode_varshort(&chain) << 3) | u64::from(cell & 0x7);
            if cell & 0x8 != 0 {
                (position + COMPACT_WINDOW) as u64 - code
            } else {
                code
            }
        } else {
            (position + COMPACT_WINDOW) as u64 - u64::from(cell)
        }
    }

    /// Target of the transition labeled `label` out of the state at
    /// `state_offset`, or `None` if the state has no such transition.
    pub fn target_of(&self, state_offset: u64, label: u8) -> Option<u64> {
        let position = state_offset as usize + label as usize;
        if self.label_at(position) != label {
            return None;
        }
        // An untouched slot reads as label 0 / cell 0; a state without a
        // zero transition always has a scrambled (non-zero) label byte at
        // its own offset, so reaching here for label 0 means the transition
        // is real.
        if label == 0 && position >= self.labels.len() {
            return None;
        }
        Some(self.resolve_pointer(position, self.cell_at(position)))
    }

    /// Value handle of the state at `state_offset`, or `None` if it is not
    /// final.
    pub fn final_value_of(&self, state_offset: u64) -> Option<u64> {
        let base = state_offset as usize + FINAL_SLOT;
        if self.label_at(base) != FINAL_LABEL {
            return None;
        }
        let mut chain = [0u16; VARSHORT_MAX_CELLS];
        for (i, slot) in chain.iter_mut().enumerate().take(FINAL_VALUE_MAX_CELLS) {
            *slot = self.cell_at(base + i);
        }
        Some(decode_varshort(&chain))
    }

    /// Stored ranking weight of the state at `state_offset` (0 = unset).
    /// Only meaningful in weighted dictionaries.
    pub fn weight_of(&self, state_offset: u64) -> u32 {
        u32::from(self.cell_at(state_offset as usize + WEIGHT_SLOT))
    }

    /// Number of addressable slots that carry content, the serialized size.
    pub fn len(&self) -> usize {
        (self.highest_state_begin + STATE_SPAN).max(self.highest_written + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.highest_written == 0 && self.highest_state_begin == 0
    }

    /// Serialize: the label array, then the cell array in little-endian.
    pub fn write_to<W: Write>(&self, sink: &mut W) -> std::io::Result<()> {
        let len = self.len().min(self.labels.len());
        sink.write_all(&self.labels[..len])?;
        let mut buf = Vec::with_capacity(len * 2);
        for &cell in &self.cells[..len] {
            buf.extend_from_slice(&cell.to_le_bytes());
        }
        sink.write_all(&buf)
    }
}
