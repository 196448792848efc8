//! The cache interface consumed by eviction policies and a basic
//! implementation that maps it onto a single [`BucketTable`].

use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};

use crate::config::ConfigError;
use crate::error::Error;
use crate::table::BucketTable;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Cache (trait)
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A concurrent key-value cache.
pub trait Cache<K, V> {
    /// Inserts `value` for `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Fails if the storage for the entry could not be allocated.
    fn put(&self, key: K, value: V) -> Result<(), Error>;

    /// Returns a copy of the value for `key`.
    fn get(&self, key: &K) -> Option<V>;

    /// Removes `key` and returns `true` if it was present.
    fn remove(&self, key: &K) -> bool;

    /// Removes all entries.
    fn clear(&self);

    /// Returns the number of entries.
    fn len(&self) -> usize;

    /// Returns `true` if the cache contains no entries.
    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// BasicCache
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A [`Cache`] without any eviction policy, backed by one [`BucketTable`].
pub struct BasicCache<K, V, S = RandomState> {
    table: BucketTable<K, V>,
    hash_builder: S,
}

/********** impl Default **************************************************************************/

impl<K, V, S: Default> Default for BasicCache<K, V, S> {
    #[inline]
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

/********** impl Debug ****************************************************************************/

impl<K, V, S> fmt::Debug for BasicCache<K, V, S> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BasicCache").field("table", &self.table).finish()
    }
}

/********** impl inherent *************************************************************************/

impl<K, V> BasicCache<K, V> {
    /// Creates a new cache over a table with the default shard counts.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K, V, S> BasicCache<K, V, S> {
    /// Creates a new cache that hashes keys with `hash_builder`.
    #[inline]
    pub fn with_hasher(hash_builder: S) -> Self {
        Self { table: BucketTable::new(), hash_builder }
    }

    /// Creates a new cache over a table with the given numbers of buckets
    /// and shard locks.
    ///
    /// # Errors
    ///
    /// Fails if either count is not a non-zero power of two.
    #[inline]
    pub fn with_shards_and_hasher(
        buckets: usize,
        locks: usize,
        hash_builder: S,
    ) -> Result<Self, ConfigError> {
        Ok(Self { table: BucketTable::with_shards(buckets, locks)?, hash_builder })
    }

    /// Returns the underlying table.
    #[inline]
    pub fn table(&self) -> &BucketTable<K, V> {
        &self.table
    }
}

impl<K: Hash, V, S: BuildHasher> BasicCache<K, V, S> {
    #[inline]
    fn hash(&self, key: &K) -> u64 {
        let mut state = self.hash_builder.build_hasher();
        key.hash(&mut state);
        state.finish()
    }
}

/********** impl Cache ****************************************************************************/

impl<K, V, S> Cache<K, V> for BasicCache<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher,
{
    #[inline]
    fn put(&self, key: K, value: V) -> Result<(), Error> {
        let hash = self.hash(&key);
        self.table.insert_or_assign(hash, key, value).map(|_| ())
    }

    #[inline]
    fn get(&self, key: &K) -> Option<V> {
        self.table.get(self.hash(key), key)
    }

    #[inline]
    fn remove(&self, key: &K) -> bool {
        self.table.erase(self.hash(key), key)
    }

    #[inline]
    fn clear(&self) {
        self.table.clear();
    }

    #[inline]
    fn len(&self) -> usize {
        self.table.len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::BuildHasherDefault;

    use super::{BasicCache, Cache};

    #[test]
    fn put_get_remove() {
        let cache: BasicCache<&str, i32> = BasicCache::new();
        assert!(cache.is_empty());

        cache.put("a", 1).unwrap();
        cache.put("b", 2).unwrap();
        cache.put("a", 3).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(3));
        assert_eq!(cache.get(&"b"), Some(2));

        assert!(cache.remove(&"b"));
        assert!(!cache.remove(&"b"));
        assert_eq!(cache.get(&"b"), None);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn custom_hasher_and_shards() {
        type Hasher = BuildHasherDefault<DefaultHasher>;
        assert!(BasicCache::<u32, u32, Hasher>::with_shards_and_hasher(3, 1, Hasher::default())
            .is_err());

        let cache: BasicCache<u32, u32, Hasher> =
            BasicCache::with_shards_and_hasher(2, 1, Hasher::default()).unwrap();
        for i in 0..64u32 {
            cache.put(i, i + 1).unwrap();
        }

        assert_eq!(cache.table().bucket_count(), 2);
        assert_eq!(cache.len(), 64);
        assert!((0..64u32).all(|i| cache.get(&i) == Some(i + 1)));
    }
}
