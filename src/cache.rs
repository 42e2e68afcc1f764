use std::collections::HashMap;
use std::hash::{BuildHasherDefault, Hash};
use std::sync::RwLock;

use seahash::SeaHasher;

pub type CacheHasher = BuildHasherDefault<SeaHasher>;

/// A concurrent-safe keyed cache, one instance per registry, owned by the
/// store instance. Strictly advisory: a miss or a clear never changes
/// correctness, only the number of round trips to the backing engine.
#[derive(Debug)]
pub struct SyncCache<K, V> {
    map: RwLock<HashMap<K, V, CacheHasher>>,
}

impl<K: Eq + Hash, V: Clone> SyncCache<K, V> {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::default()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.map.read().ok()?.get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.map.read().map(|m| m.contains_key(key)).unwrap_or(false)
    }

    pub fn put(&self, key: K, value: V) {
        if let Ok(mut map) = self.map.write() {
            map.insert(key, value);
        }
    }

    pub fn put_many(&self, entries: impl IntoIterator<Item = (K, V)>) {
        if let Ok(mut map) = self.map.write() {
            for (key, value) in entries {
                map.insert(key, value);
            }
        }
    }

    pub fn clear(&self) {
        if let Ok(mut map) = self.map.write() {
            map.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.map.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash, V: Clone> Default for SyncCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
