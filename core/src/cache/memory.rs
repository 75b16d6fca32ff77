/*
 * memory.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Magma, a multi-protocol mail server.
 *
 * Magma is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Magma is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Magma.  If not, see <http://www.gnu.org/licenses/>.
 */

//! In-process cache backend with the same semantics as the wire client.
//! Used for single-node deployments without a memcached instance, and by
//! the test suite.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{Cache, CacheError};

struct Entry {
    value: Vec<u8>,
    expires: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires.map(|at| Instant::now() < at).unwrap_or(true)
    }
}

/// Memcached-shaped storage over a process-local map.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn expiry(ttl: Duration) -> Option<Instant> {
        if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        }
    }
}

#[async_trait::async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.live() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            Entry { value: value.to_vec(), expires: Self::expiry(ttl) },
        );
        Ok(())
    }

    async fn add(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key).map(|e| e.live()).unwrap_or(false) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry { value: value.to_vec(), expires: Self::expiry(ttl) },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        Ok(entries.remove(key).map(|e| e.live()).unwrap_or(false))
    }

    async fn increment(&self, key: &str, delta: u64) -> Result<Option<u64>, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(key).filter(|e| e.live()) else {
            return Ok(None);
        };
        let current: u64 = std::str::from_utf8(&entry.value)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| CacheError::new("cannot increment a non-numeric value"))?;
        let next = current.wrapping_add(delta);
        entry.value = next.to_string().into_bytes();
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_is_exclusive() {
        let cache = MemoryCache::new();
        assert!(cache.add("k", b"1", Duration::ZERO).await.unwrap());
        assert!(!cache.add("k", b"2", Duration::ZERO).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn expired_entries_vanish() {
        let cache = MemoryCache::new();
        cache.set("k", b"1", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        // An expired key no longer blocks add.
        assert!(cache.add("k", b"2", Duration::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn increment_requires_existing_counter() {
        let cache = MemoryCache::new();
        assert_eq!(cache.increment("n", 1).await.unwrap(), None);
        cache.set("n", b"41", Duration::ZERO).await.unwrap();
        assert_eq!(cache.increment("n", 1).await.unwrap(), Some(42));
    }
}
