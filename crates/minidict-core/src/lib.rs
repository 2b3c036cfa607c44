//! Shared primitives for the minidict dictionary engine.
//!
//! This crate carries the small pieces that cross crate boundaries:
//!
//! - [`coding`] -- variable-length integer encodings (byte varint and
//!   16-bit-cell varshort)
//! - [`hash`] -- the incremental content hash used for state fingerprints
//! - [`ValueHandle`] -- the record a value store returns for a stored value

pub mod coding;
pub mod hash;

/// Handle for a value stored in a value store.
///
/// The automaton generator records `value_id` verbatim at the final state of
/// the key and never interprets it otherwise. `weight` is an optional ranking
/// weight (0 = unset) propagated to ancestor states for ranked traversal.
/// `shareable` gates automaton-level minimization of the final state: a store
/// that hands out per-key, non-deduplicatable payloads reports `false`, which
/// marks the final state (and transitively its ancestors) as unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValueHandle {
    /// Opaque value identifier, stored at the final state. Must stay below
    /// 2^60 so it fits the final-value cell encoding.
    pub value_id: u64,
    /// Ranking weight, 0 meaning unset.
    pub weight: u32,
    /// Whether a final state carrying this value may be merged with a
    /// structurally identical state.
    pub shareable: bool,
}

impl ValueHandle {
    /// Handle for a key without a value payload.
    pub const NONE: ValueHandle = ValueHandle {
        value_id: 0,
        weight: 0,
        shareable: true,
    };
}
