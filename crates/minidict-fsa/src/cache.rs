// Bounded approximate minimization cache.
//
// Maps the content fingerprint of a persisted state to its offset so that a
// structurally identical state about to be persisted can be replaced by a
// pointer to the existing one. Memory is bounded by rotating whole
// generations: the newest generation takes all inserts; when it fills it is
// rotated out, and the oldest generation is dropped wholesale once the
// configured count is exceeded. Forgetting old states costs only space in
// the output, never correctness.

use hashbrown::HashTable;
use log::trace;

use crate::arena::Arena;
use crate::builder::read_and_compare;
use crate::state::UnpackedState;

/// Fingerprint of a persisted state: enough to pre-filter candidates, with
/// the definitive byte-level comparison done against the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub hash: u64,
    pub offset: u64,
    pub transitions: u32,
}

/// Generation-rotating fingerprint cache.
#[derive(Debug)]
pub struct MinimizationCache {
    current: HashTable<CacheEntry>,
    /// Older generations, newest last.
    older: Vec<HashTable<CacheEntry>>,
    generation_capacity: usize,
    max_generations: usize,
}

impl MinimizationCache {
    /// `generation_capacity` entries per generation, `max_generations`
    /// generations total (the current one included).
    pub fn new(generation_capacity: usize, max_generations: usize) -> Self {
        MinimizationCache {
            current: HashTable::with_capacity(generation_capacity),
            older: Vec::new(),
            generation_capacity: generation_capacity.max(1),
            max_generations: max_generations.max(1),
        }
    }

    /// Offset of a persisted state structurally equal to `candidate`, if the
    /// cache still remembers one. A hit in an older generation is promoted
    /// into the current generation so frequently shared suffixes stay hot.
    pub fn get(&mut self, candidate: &mut UnpackedState, arena: &Arena) -> Option<u64> {
        let hash = candidate.hash();
        let transitions = candidate.len() as u32;
        let matches = |entry: &CacheEntry| {
            entry.hash == hash
                && entry.transitions == transitions
                && read_and_compare(arena, entry.offset, candidate)
        };

        if let Some(entry) = self.current.find(hash, &matches) {
            return Some(entry.offset);
        }

        for index in (0..self.older.len()).rev() {
            if let Ok(occupied) = self.older[index].find_entry(hash, &matches) {
                let (entry, _) = occupied.remove();
                trace!(
                    "cache hit in generation {} promoted, offset {}",
                    index, entry.offset
                );
                self.insert(entry);
                return Some(entry.offset);
            }
        }
        None
    }

    /// Register a freshly persisted state, rotating generations when the
    /// current one is full.
    pub fn add(&mut self, entry: CacheEntry) {
        if self.current.len() >= self.generation_capacity {
            self.rotate();
        }
        self.insert(entry);
    }

    /// Number of live fingerprints across all generations.
    pub fn len(&self) -> usize {
        self.current.len() + self.older.iter().map(HashTable::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&mut self, entry: CacheEntry) {
        self.current
            .insert_unique(entry.hash, entry, |e| e.hash);
    }

    fn rotate(&mut self) {
        // Recycle the evicted table's allocation for the new current
        // generation.
        let fresh = if self.older.len() + 1 >= self.max_generations {
            let mut evicted = self.older.remove(0);
            evicted.clear();
            evicted
        } else {
            HashTable::with_capacity(self.generation_capacity)
        };
        let filled = std::mem::replace(&mut self.current, fresh);
        self.older.push(filled);
        trace!("cache rotated, {} generations live", self.older.len() + 1);
    }
}
