use std::hash::BuildHasher;

// fixed seeds so that iteration order over maps is reproducible between runs,
// dumps and warnings must come out the same every frame
pub(crate) fn constant_ahash_randomstate() -> ahash::RandomState {
    const SEEDS: [u64; 4] = [
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    ];
    ahash::RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3])
}

pub(crate) fn constant_ahash_hasher() -> ahash::AHasher {
    constant_ahash_randomstate().build_hasher()
}

pub(crate) fn constant_ahash_hashmap<K, V>() -> ahash::HashMap<K, V> {
    ahash::HashMap::with_hasher(constant_ahash_randomstate())
}

pub(crate) fn constant_ahash_hashset<K>() -> ahash::HashSet<K> {
    ahash::HashSet::with_hasher(constant_ahash_randomstate())
}
