// The boundary between the automaton and application value payloads.
//
// The generator never interprets a value beyond the `ValueHandle` the store
// returns: the handle's id is recorded verbatim at the final state, the
// weight feeds ranked traversal, and the shareability flag gates
// automaton-level minimization of the final state. The stores here are the
// reference implementations; applications with richer payloads implement
// the trait themselves.

use std::io::Write;

use hashbrown::HashMap;
use minidict_core::ValueHandle;
use minidict_core::coding::encode_varint;

/// A store for the application payloads of final keys.
pub trait ValueStore {
    /// The caller-facing value type.
    type Value;

    /// Whether dictionaries built with this store carry per-state ranking
    /// weights (selects the weighted cell layout).
    const INNER_WEIGHTS: bool;

    /// Store `value`, returning the handle the generator records at the
    /// key's final state. `value_id` must stay below 2^60.
    fn store(&mut self, value: Self::Value) -> ValueHandle;

    /// Identifier recorded in the dictionary properties block.
    fn kind(&self) -> &'static str;

    /// Append the store's own serialized section after the automaton.
    fn write_to(&self, sink: &mut dyn Write) -> std::io::Result<()>;
}

/// Store for key-set dictionaries: every key maps to the empty handle.
#[derive(Debug, Default)]
pub struct NullValueStore;

impl ValueStore for NullValueStore {
    type Value = ();
    const INNER_WEIGHTS: bool = false;

    fn store(&mut self, _value: ()) -> ValueHandle {
        ValueHandle::NONE
    }

    fn kind(&self) -> &'static str {
        "null"
    }

    fn write_to(&self, _sink: &mut dyn Write) -> std::io::Result<()> {
        Ok(())
    }
}

/// Store for integer values: the handle *is* the value, so nothing needs a
/// separate value section.
#[derive(Debug, Default)]
pub struct U64ValueStore;

impl ValueStore for U64ValueStore {
    type Value = u64;
    const INNER_WEIGHTS: bool = false;

    fn store(&mut self, value: u64) -> ValueHandle {
        ValueHandle {
            value_id: value,
            weight: 0,
            shareable: true,
        }
    }

    fn kind(&self) -> &'static str {
        "u64"
    }

    fn write_to(&self, _sink: &mut dyn Write) -> std::io::Result<()> {
        Ok(())
    }
}

/// Integer store whose values double as ranking weights: completion-style
/// dictionaries rank suggestions by the stored count.
#[derive(Debug, Default)]
pub struct U64WeightValueStore;

impl ValueStore for U64WeightValueStore {
    type Value = u64;
    const INNER_WEIGHTS: bool = true;

    fn store(&mut self, value: u64) -> ValueHandle {
        ValueHandle {
            value_id: value,
            weight: u32::try_from(value).unwrap_or(u32::MAX),
            shareable: true,
        }
    }

    fn kind(&self) -> &'static str {
        "u64-weights"
    }

    fn write_to(&self, _sink: &mut dyn Write) -> std::io::Result<()> {
        Ok(())
    }
}

/// Deduplicating string store: handles are byte offsets into a blob of
/// varint-length-prefixed payloads. Equal strings share one blob entry, so
/// the automaton can also share the final states pointing at them.
#[derive(Debug, Default)]
pub struct StringValueStore {
    blob: Vec<u8>,
    dedup: HashMap<String, u64>,
}

impl StringValueStore {
    /// Read back the payload for a handle produced by this store. Used by
    /// readers and tests; the generator itself never calls this.
    pub fn get(&self, value_id: u64) -> Option<&str> {
        let start = value_id as usize;
        let bytes = self.blob.get(start..)?;
        let (len, consumed) = minidict_core::coding::decode_varint(bytes);
        let payload = bytes.get(consumed..consumed + len as usize)?;
        std::str::from_utf8(payload).ok()
    }
}

impl ValueStore for StringValueStore {
    type Value = String;
    const INNER_WEIGHTS: bool = false;

    fn store(&mut self, value: String) -> ValueHandle {
        if let Some(&value_id) = self.dedup.get(&value) {
            return ValueHandle {
                value_id,
                weight: 0,
                shareable: true,
            };
        }
        let value_id = self.blob.len() as u64;
        encode_varint(value.len() as u64, &mut self.blob);
        self.blob.extend_from_slice(value.as_bytes());
        self.dedup.insert(value, value_id);
        ValueHandle {
            value_id,
            weight: 0,
            shareable: true,
        }
    }

    fn kind(&self) -> &'static str {
        "string"
    }

    fn write_to(&self, sink: &mut dyn Write) -> std::io::Result<()> {
        let mut prefix = Vec::new();
        encode_varint(self.blob.len() as u64, &mut prefix);
        sink.write_all(&prefix)?;
        sink.write_all(&self.blob)
    }
}
