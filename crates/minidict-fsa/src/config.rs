// Construction tuning knobs.

/// Tuning parameters for automaton construction.
///
/// All values are performance/size trade-offs; none of them affect the
/// correctness of the produced automaton. The defaults match a dictionary of
/// a few million keys built within a few hundred megabytes.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Attempt state minimization at all. Disabling produces a (much larger)
    /// trie-shaped automaton; useful for debugging the encoder.
    pub minimize: bool,
    /// Entries per minimization-cache generation.
    pub cache_generation_capacity: usize,
    /// Number of cache generations kept (the current one included); the
    /// oldest is dropped wholesale when the count would be exceeded.
    pub cache_generations: usize,
    /// Depth below which key weights are no longer propagated. Ranked
    /// traversal only consults weights near the root; propagating them
    /// arbitrarily deep is wasted work.
    pub weight_propagation_depth: usize,
    /// Once the automaton holds this many states, states whose
    /// minimization-failure count reached `cache_skip_failure_threshold`
    /// are no longer registered in the cache.
    pub cache_skip_state_threshold: u64,
    /// See `cache_skip_state_threshold`.
    pub cache_skip_failure_threshold: u32,
    /// Initial depth of the state stack arena (grows on demand).
    pub initial_stack_depth: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            minimize: true,
            cache_generation_capacity: 1 << 18,
            cache_generations: 4,
            weight_propagation_depth: 64,
            cache_skip_state_threshold: 1_000_000,
            cache_skip_failure_threshold: 8,
            initial_stack_depth: 30,
        }
    }
}

impl GeneratorConfig {
    /// Derive the cache shape from a memory budget in bytes, keeping the
    /// default generation count. A cache entry is a fixed-size fingerprint,
    /// so the capacity is plain division with headroom for the table's load
    /// factor.
    pub fn with_cache_memory_limit(limit_bytes: usize) -> Self {
        let defaults = GeneratorConfig::default();
        // fingerprint plus hashbrown's per-entry overhead, at ~87% max load
        let entry_footprint = (size_of::<crate::cache::CacheEntry>() + 1) * 8 / 7;
        let per_generation = limit_bytes / entry_footprint / defaults.cache_generations;
        GeneratorConfig {
            cache_generation_capacity: per_generation.max(1024),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_limit_shrinks_generations() {
        let small = GeneratorConfig::with_cache_memory_limit(1 << 20);
        let large = GeneratorConfig::with_cache_memory_limit(1 << 30);
        assert!(small.cache_generation_capacity < large.cache_generation_capacity);
        assert_eq!(small.cache_generations, GeneratorConfig::default().cache_generations);
    }

    #[test]
    fn memory_limit_has_a_floor() {
        let tiny = GeneratorConfig::with_cache_memory_limit(16);
        assert!(tiny.cache_generation_capacity >= 1024);
    }
}
