//! Map aliases used throughout the engine.
//!
//! By default the maps are `hashbrown` tables keyed with `ahash`. The
//! `std-hash` feature swaps them for the standard library containers.

#[cfg(feature = "std-hash")]
pub mod map {
    pub use std::collections::{HashMap, HashSet};
}

#[cfg(not(feature = "std-hash"))]
pub mod map {
    pub type HashMap<K, V> = hashbrown::HashMap<K, V, ahash::RandomState>;
    pub type HashSet<K> = hashbrown::HashSet<K, ahash::RandomState>;
}
