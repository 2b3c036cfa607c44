// Feeding orchestration and lifecycle.
//
// The generator consumes a strictly sorted key stream. Each key is diffed
// against the previous one: every stack depth beyond the shared prefix can
// no longer gain transitions and is persisted bottom-up, then the new
// suffix is fed in. Closing the feed consumes the remaining depths down to
// the start state.
//
//     stack depth |12345
//     ------------|------
//     key 1       |aa
//     key 2       |abc
//     key 3       |abcde
//     key 4       |abe
//
// Comparing "abcde" with "abe" shares the prefix "ab", so depths 5 ("e")
// then 4 ("d") then 3 ("c") are persisted and their offsets patched into
// the transitions one level up.

use std::io::Write;

use log::debug;

use minidict_core::ValueHandle;

use crate::FsaError;
use crate::arena::Arena;
use crate::builder::SparseArrayBuilder;
use crate::config::GeneratorConfig;
use crate::format::{self, DictionaryProperties, FORMAT_VERSION};
use crate::stack::UnpackedStateStack;
use crate::value_store::ValueStore;

/// Length of the longest common prefix of two byte strings.
pub fn common_prefix_length(first: &[u8], second: &[u8]) -> usize {
    first
        .iter()
        .zip(second)
        .take_while(|(a, b)| a == b)
        .count()
}

/// Lifecycle of a generator: strictly `Feeding -> Finalizing -> Compiled`,
/// no cycle. Each phase owns exactly the structures it still needs.
#[derive(Debug)]
enum Phase {
    Feeding {
        stack: UnpackedStateStack,
        builder: SparseArrayBuilder,
    },
    Finalizing,
    Compiled {
        arena: Arena,
    },
}

/// Builds a minimal automaton from a sorted stream of (key, value) pairs.
#[derive(Debug)]
pub struct Generator<V: ValueStore> {
    phase: Phase,
    value_store: V,
    last_key: Vec<u8>,
    highest_stack: usize,
    key_count: u64,
    state_count: u64,
    start_state: u64,
    manifest: Option<String>,
}

impl<V: ValueStore> Generator<V> {
    pub fn new(value_store: V) -> Self {
        Generator::with_config(GeneratorConfig::default(), value_store)
    }

    pub fn with_config(config: GeneratorConfig, value_store: V) -> Self {
        Generator {
            phase: Phase::Feeding {
                stack: UnpackedStateStack::new(
                    config.initial_stack_depth,
                    config.weight_propagation_depth,
                ),
                builder: SparseArrayBuilder::new(&config, V::INNER_WEIGHTS),
            },
            value_store,
            last_key: Vec::new(),
            highest_stack: 0,
            key_count: 0,
            state_count: 0,
            start_state: 0,
            manifest: None,
        }
    }

    /// Add a key-value pair. Keys must arrive in strictly increasing byte
    /// order; adding the same key (and value) again is a no-op, anything
    /// that sorts below the previous key is rejected. The empty key is
    /// indistinguishable from the initial feed position and is ignored.
    pub fn add(&mut self, key: &[u8], value: V::Value) -> Result<(), FsaError> {
        if !matches!(self.phase, Phase::Feeding { .. }) {
            return Err(FsaError::NotInFeedingState);
        }
        match key.cmp(self.last_key.as_slice()) {
            std::cmp::Ordering::Equal => return Ok(()),
            std::cmp::Ordering::Less => return Err(FsaError::UnsortedInput),
            std::cmp::Ordering::Greater => {}
        }
        let handle = self.value_store.store(value);
        self.add_suffix(key, handle)
    }

    /// Add a key with a handle returned by an earlier `store` on this
    /// generator's value store (re-using an already stored value).
    pub fn add_with_handle(&mut self, key: &[u8], handle: ValueHandle) -> Result<(), FsaError> {
        if !matches!(self.phase, Phase::Feeding { .. }) {
            return Err(FsaError::NotInFeedingState);
        }
        match key.cmp(self.last_key.as_slice()) {
            std::cmp::Ordering::Equal => return Ok(()),
            std::cmp::Ordering::Less => return Err(FsaError::UnsortedInput),
            std::cmp::Ordering::Greater => {}
        }
        self.add_suffix(key, handle)
    }

    fn add_suffix(&mut self, key: &[u8], handle: ValueHandle) -> Result<(), FsaError> {
        let prefix_len = common_prefix_length(&self.last_key, key);
        let Phase::Feeding { stack, builder } = &mut self.phase else {
            return Err(FsaError::NotInFeedingState);
        };

        // depths beyond the shared prefix can no longer change
        Self::consume_stack(stack, builder, &mut self.highest_stack, prefix_len)?;

        // feed the diverging suffix
        for (depth, &byte) in key.iter().enumerate().skip(prefix_len) {
            stack.insert(depth, byte, 0);
        }
        if key.len() > self.highest_stack {
            self.highest_stack = key.len();
        }

        stack.insert_final(key.len(), handle.value_id, !handle.shareable);
        self.key_count += 1;

        if handle.weight > 0 {
            stack.update_weights(0, key.len() + 1, handle.weight);
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        Ok(())
    }

    /// Persist every depth above `end`, patching each resulting offset into
    /// the transition one level up.
    fn consume_stack(
        stack: &mut UnpackedStateStack,
        builder: &mut SparseArrayBuilder,
        highest: &mut usize,
        end: usize,
    ) -> Result<(), FsaError> {
        while *highest > end {
            let depth = *highest;
            let (offset, counter) = {
                let state = stack.get_mut(depth);
                let offset = builder.persist_state(state)?;
                (offset, state.no_minimization())
            };
            stack.push_transition_pointer(depth - 1, offset, counter);
            stack.erase(depth);
            *highest -= 1;
        }
        Ok(())
    }

    /// End the feed: consumes the remaining stack down to the start state
    /// and releases the construction working memory. After this only
    /// `write` and the read-only accessors are valid.
    pub fn close_feeding(&mut self) -> Result<(), FsaError> {
        match std::mem::replace(&mut self.phase, Phase::Finalizing) {
            Phase::Feeding {
                mut stack,
                mut builder,
            } => {
                Self::consume_stack(&mut stack, &mut builder, &mut self.highest_stack, 0)?;
                let start_state = builder.persist_state(stack.get_mut(0))?;
                self.start_state = start_state;
                self.state_count = builder.state_count();
                debug!(
                    "compiled automaton: start state {start_state}, {} states, {} keys",
                    self.state_count, self.key_count
                );
                self.phase = Phase::Compiled {
                    arena: builder.into_arena(),
                };
                Ok(())
            }
            other => {
                self.phase = other;
                Err(FsaError::NotInFeedingState)
            }
        }
    }

    /// Serialize the compiled dictionary: header and properties, the arena
    /// payload, then the value store's own section.
    pub fn write<W: Write>(&self, sink: &mut W) -> Result<(), FsaError> {
        let Phase::Compiled { arena } = &self.phase else {
            return Err(FsaError::NotCompiledYet);
        };
        let properties = DictionaryProperties {
            version: FORMAT_VERSION,
            start_state: self.start_state,
            key_count: self.key_count,
            state_count: self.state_count,
            arena_size: arena.len() as u64,
            value_store: self.value_store.kind().to_string(),
            manifest: self.manifest.clone(),
        };
        format::write_header(sink, &properties)?;
        arena.write_to(sink)?;
        self.value_store.write_to(sink)?;
        Ok(())
    }

    /// Embed a free-form manifest into the dictionary properties.
    pub fn set_manifest(&mut self, manifest: impl Into<String>) {
        self.manifest = Some(manifest.into());
    }

    /// Offset of the start state. Only valid once compiled.
    pub fn start_state(&self) -> Result<u64, FsaError> {
        self.compiled().map(|_| self.start_state)
    }

    /// Number of distinct states in the automaton. Only valid once compiled.
    pub fn state_count(&self) -> Result<u64, FsaError> {
        self.compiled().map(|_| self.state_count)
    }

    /// Number of keys added. Only valid once compiled.
    pub fn key_count(&self) -> Result<u64, FsaError> {
        self.compiled().map(|_| self.key_count)
    }

    /// The persisted address space. Only valid once compiled.
    pub fn arena(&self) -> Result<&Arena, FsaError> {
        self.compiled()
    }

    pub fn value_store(&self) -> &V {
        &self.value_store
    }

    fn compiled(&self) -> Result<&Arena, FsaError> {
        match &self.phase {
            Phase::Compiled { arena } => Ok(arena),
            _ => Err(FsaError::NotCompiledYet),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_store::{NullValueStore, U64ValueStore};

    /// Walk the automaton byte by byte and return the stored value handle.
    fn lookup(arena: &Arena, start: u64, key: &[u8]) -> Option<u64> {
        let mut state = start;
        for &byte in key {
            state = arena.target_of(state, byte)?;
        }
        arena.final_value_of(state)
    }

    #[test]
    fn common_prefix() {
        assert_eq!(common_prefix_length(b"", b"abc"), 0);
        assert_eq!(common_prefix_length(b"abc", b"abd"), 2);
        assert_eq!(common_prefix_length(b"abc", b"abcde"), 3);
        assert_eq!(common_prefix_length(b"abc", b"abc"), 3);
    }

    #[test]
    fn simple_key_set_round_trips() {
        let keys: [&[u8]; 5] = [b"aaa", b"abcde", b"bar", b"foo", b"zar"];
        let mut g = Generator::new(NullValueStore);
        for key in keys {
            g.add(key, ()).unwrap();
        }
        g.close_feeding().unwrap();

        let arena = g.arena().unwrap();
        let start = g.start_state().unwrap();
        for key in keys {
            assert!(lookup(arena, start, key).is_some(), "missing {key:?}");
        }
        assert!(lookup(arena, start, b"ab").is_none());
        assert!(lookup(arena, start, b"aaaa").is_none());
        assert!(lookup(arena, start, b"zzz").is_none());
        assert_eq!(g.key_count().unwrap(), 5);
    }

    #[test]
    fn values_are_stored_at_final_states() {
        let mut g = Generator::new(U64ValueStore);
        g.add(b"eads", 576).unwrap();
        g.add(b"facebook", 4_368_451).unwrap();
        g.add(b"youtube", 2_622_207).unwrap();
        g.close_feeding().unwrap();

        let arena = g.arena().unwrap();
        let start = g.start_state().unwrap();
        assert_eq!(lookup(arena, start, b"eads"), Some(576));
        assert_eq!(lookup(arena, start, b"facebook"), Some(4_368_451));
        assert_eq!(lookup(arena, start, b"youtube"), Some(2_622_207));
    }

    #[test]
    fn prefix_of_a_key_is_only_final_if_added() {
        let mut g = Generator::new(U64ValueStore);
        g.add(b"ab", 1).unwrap();
        g.add(b"abcd", 2).unwrap();
        g.close_feeding().unwrap();

        let arena = g.arena().unwrap();
        let start = g.start_state().unwrap();
        assert_eq!(lookup(arena, start, b"ab"), Some(1));
        assert_eq!(lookup(arena, start, b"abc"), None);
        assert_eq!(lookup(arena, start, b"abcd"), Some(2));
    }

    #[test]
    fn duplicate_add_is_a_no_op() {
        let mut g = Generator::new(U64ValueStore);
        g.add(b"dup", 7).unwrap();
        g.add(b"dup", 7).unwrap();
        g.add(b"later", 8).unwrap();
        g.close_feeding().unwrap();
        assert_eq!(g.key_count().unwrap(), 2);
    }

    #[test]
    fn unsorted_input_is_rejected() {
        let mut g = Generator::new(U64ValueStore);
        g.add(b"m", 1).unwrap();
        let err = g.add(b"a", 2).unwrap_err();
        assert!(matches!(err, FsaError::UnsortedInput));
    }

    #[test]
    fn lifecycle_is_enforced() {
        let mut g = Generator::new(U64ValueStore);
        g.add(b"k", 1).unwrap();

        let mut out = Vec::new();
        assert!(matches!(g.write(&mut out), Err(FsaError::NotCompiledYet)));
        assert!(matches!(g.start_state(), Err(FsaError::NotCompiledYet)));

        g.close_feeding().unwrap();
        assert!(matches!(
            g.add(b"late", 2),
            Err(FsaError::NotInFeedingState)
        ));
        assert!(matches!(g.close_feeding(), Err(FsaError::NotInFeedingState)));
        g.write(&mut out).unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn empty_dictionary_compiles() {
        let mut g = Generator::new(NullValueStore);
        g.close_feeding().unwrap();
        let arena = g.arena().unwrap();
        let start = g.start_state().unwrap();
        assert_eq!(g.key_count().unwrap(), 0);
        assert_eq!(arena.final_value_of(start), None);
        assert_eq!(arena.target_of(start, b'x'), None);
    }

    #[test]
    fn add_with_handle_reuses_a_stored_value() {
        use crate::value_store::StringValueStore;

        let mut g = Generator::new(StringValueStore::default());
        g.add(b"color", "red".to_string()).unwrap();
        let handle = ValueHandle {
            value_id: 0, // first stored payload sits at blob offset 0
            weight: 0,
            shareable: true,
        };
        g.add_with_handle(b"colour", handle).unwrap();
        g.close_feeding().unwrap();

        let arena = g.arena().unwrap();
        let start = g.start_state().unwrap();
        let id_a = lookup(arena, start, b"color").unwrap();
        let id_b = lookup(arena, start, b"colour").unwrap();
        assert_eq!(id_a, id_b);
        assert_eq!(g.value_store().get(id_a), Some("red"));
    }
}
