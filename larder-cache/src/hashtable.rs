// Copyright 2025 Cloudflare, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Concurrent hash table keyed by [CacheKey]

use crate::key::CacheKey;
use ahash::RandomState;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;

type Shard<V> = HashMap<CacheKey, V, RandomState>;

/// A hash table that shards to a constant number of tables to reduce lock contention
///
/// Holding the write guard of a shard makes any read-modify-write of a key in that shard atomic.
pub struct ConcurrentHashTable<V, const N: usize> {
    tables: [RwLock<Shard<V>>; N],
}

#[inline]
fn get_shard(key: &CacheKey, n_shards: usize) -> usize {
    (key.shard_hint() % n_shards as u64) as usize
}

impl<V, const N: usize> ConcurrentHashTable<V, N>
where
    [RwLock<Shard<V>>; N]: Default,
{
    pub fn new() -> Self {
        ConcurrentHashTable {
            tables: Default::default(),
        }
    }

    pub fn get(&self, key: &CacheKey) -> &RwLock<Shard<V>> {
        &self.tables[get_shard(key, N)]
    }

    pub fn read(&self, key: &CacheKey) -> RwLockReadGuard<Shard<V>> {
        self.get(key).read()
    }

    pub fn write(&self, key: &CacheKey) -> RwLockWriteGuard<Shard<V>> {
        self.get(key).write()
    }

    /// Clone the value out so the shard lock is released before the caller uses it.
    pub fn get_cloned(&self, key: &CacheKey) -> Option<V>
    where
        V: Clone,
    {
        self.read(key).get(key).cloned()
    }

    /// Number of keys across all shards. Not a snapshot: shards are counted one at a time.
    pub fn len(&self) -> usize {
        self.tables.iter().map(|t| t.read().len()).sum()
    }
}

impl<V, const N: usize> Default for ConcurrentHashTable<V, N>
where
    [RwLock<Shard<V>>; N]: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(first: u8) -> CacheKey {
        let mut bin = [0u8; crate::key::KEY_SIZE];
        bin[0] = first;
        CacheKey::from_bin(bin)
    }

    #[test]
    fn test_sharding() {
        let table: ConcurrentHashTable<u32, 16> = ConcurrentHashTable::new();
        // same first byte modulo 16, same shard
        assert!(std::ptr::eq(table.get(&key(1)), table.get(&key(17))));
        assert!(!std::ptr::eq(table.get(&key(1)), table.get(&key(2))));
    }

    #[test]
    fn test_read_write() {
        let table: ConcurrentHashTable<u32, 16> = ConcurrentHashTable::default();
        table.write(&key(1)).insert(key(1), 1);
        table.write(&key(17)).insert(key(17), 17);
        table.write(&key(2)).insert(key(2), 2);

        assert_eq!(table.get_cloned(&key(1)), Some(1));
        assert_eq!(table.get_cloned(&key(17)), Some(17));
        assert_eq!(table.read(&key(2)).get(&key(2)), Some(&2));
        assert_eq!(table.get_cloned(&key(3)), None);
        assert_eq!(table.len(), 3);

        table.write(&key(17)).remove(&key(17));
        assert_eq!(table.len(), 2);
    }
}
