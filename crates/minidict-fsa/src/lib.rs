//! Minimal finite-state automaton construction engine.
//!
//! This crate builds a minimal FSA from a strictly sorted stream of
//! (key, value) pairs and persists it into a compact, randomly-addressable
//! sparse transition table: a transition is located by plain addition
//! (`state_offset + label_byte`), so lookup cost is proportional to key
//! length, not key count. Minimization happens on the fly while feeding --
//! structurally identical suffix states are detected through a bounded
//! fingerprint cache and stored once.
//!
//! # Architecture
//!
//! - [`generator`] -- feeding orchestration and lifecycle
//! - [`stack`] -- per-depth arena of states under construction
//! - [`state`] -- one mutable, reusable automaton state accumulator
//! - [`builder`] -- state placement and transition-pointer encoding
//! - [`cache`] -- generation-rotating minimization cache
//! - [`arena`] -- the flat label/cell address space and its decode paths
//! - [`window`] / [`bits`] -- sliding occupancy bitmaps for placement
//! - [`value_store`] -- the boundary to application value payloads
//! - [`format`] -- file header and dictionary properties block
//! - [`config`] -- construction tuning knobs
//!
//! # Example
//!
//! ```
//! use minidict_fsa::generator::Generator;
//! use minidict_fsa::value_store::U64ValueStore;
//!
//! let mut generator = Generator::new(U64ValueStore::default());
//! generator.add(b"rust", 1).unwrap();
//! generator.add(b"rustic", 2).unwrap();
//! generator.close_feeding().unwrap();
//!
//! let mut out = Vec::new();
//! generator.write(&mut out).unwrap();
//! ```

pub mod arena;
pub mod bits;
pub mod builder;
pub mod cache;
pub mod config;
pub mod format;
pub mod generator;
pub mod stack;
pub mod state;
pub mod value_store;
pub mod window;

/// Error type for automaton construction.
#[derive(Debug, thiserror::Error)]
pub enum FsaError {
    #[error("generator is not in the feeding state")]
    NotInFeedingState,
    #[error("automaton is not compiled yet")]
    NotCompiledYet,
    #[error("keys must be added in strictly increasing byte order")]
    UnsortedInput,
    #[error("sparse address space exhausted while placing a state")]
    AddressSpaceExhausted,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Number of distinct byte labels.
pub const LABEL_RANGE: usize = 256;

/// Pseudo-label slot of the final marker: a state at offset `o` is final iff
/// the label byte at `o + FINAL_SLOT` equals [`FINAL_LABEL`]. The final value
/// is varshort-coded into up to [`FINAL_VALUE_MAX_CELLS`] cells starting
/// there, with label bytes `FINAL_LABEL`, `FINAL_LABEL + 1`, ...
pub const FINAL_SLOT: usize = 256;

/// Label byte marking the first final-value cell.
pub const FINAL_LABEL: u8 = 1;

/// Maximum number of cells the final value may occupy (value < 2^60).
pub const FINAL_VALUE_MAX_CELLS: usize = 4;

/// Pseudo-label slot holding a state's ranking weight in weighted
/// dictionaries.
pub const WEIGHT_SLOT: usize = 260;

/// Width of a state's potential footprint (byte labels plus the reserved
/// pseudo-label slots); also the width of the per-state label bitmap.
pub const STATE_SPAN: usize = 261;

/// Alias distance between a final marker and a label-1 transition: a state
/// starting at `o + FINAL_GUARD` with a transition labeled 1 would write the
/// byte 1 at `o + FINAL_SLOT`, faking finality of `o`. The placement guards
/// keep final states and state starts at this distance apart.
pub const FINAL_GUARD: usize = FINAL_SLOT - FINAL_LABEL as usize;

/// Lookahead constant of the relative pointer encoding, and the half-width
/// of the window in which overflow buckets must be placed.
pub const COMPACT_WINDOW: usize = 512;
