/*
 * serials.rs
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

//! Cluster-wide monotonic serial numbers, one per (object kind, user).
//! Writers on any node bump the counter; readers compare it against
//! their local checkpoint to decide whether a refetch is due.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, CacheError};

/// Which per-user aggregate a serial tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    User,
    Aliases,
    Folders,
    Messages,
    Contacts,
    Config,
}

impl ObjectKind {
    fn tag(self) -> &'static str {
        match self {
            ObjectKind::User => "user",
            ObjectKind::Aliases => "aliases",
            ObjectKind::Folders => "folders",
            ObjectKind::Messages => "messages",
            ObjectKind::Contacts => "contacts",
            ObjectKind::Config => "config",
        }
    }
}

/// Handle to the cluster serial keyspace.
#[derive(Clone)]
pub struct SerialCounters {
    cache: Arc<dyn Cache>,
}

impl SerialCounters {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    fn key(kind: ObjectKind, number: u64) -> String {
        format!("magma.serial.{}.{}", kind.tag(), number)
    }

    /// Current serial. A missing counter is materialized at zero so
    /// every node agrees on the starting point.
    pub async fn get(&self, kind: ObjectKind, number: u64) -> Result<u64, CacheError> {
        let key = Self::key(kind, number);
        if let Some(value) = self.cache.get(&key).await? {
            return std::str::from_utf8(&value)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| CacheError::new("serial counter holds a non-numeric value"));
        }
        self.cache.add(&key, b"0", Duration::ZERO).await?;
        Ok(0)
    }

    /// Advance the serial, returning the new value.
    pub async fn increment(&self, kind: ObjectKind, number: u64) -> Result<u64, CacheError> {
        let key = Self::key(kind, number);
        if let Some(value) = self.cache.increment(&key, 1).await? {
            return Ok(value);
        }
        // First write for this object: race the add, then increment.
        self.cache.add(&key, b"0", Duration::ZERO).await?;
        self.cache
            .increment(&key, 1)
            .await?
            .ok_or_else(|| CacheError::new("serial counter vanished during initialization"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[tokio::test]
    async fn get_materializes_zero() {
        let counters = SerialCounters::new(Arc::new(MemoryCache::new()));
        assert_eq!(counters.get(ObjectKind::Messages, 42).await.unwrap(), 0);
        assert_eq!(counters.get(ObjectKind::Messages, 42).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn increment_is_monotonic_and_scoped() {
        let counters = SerialCounters::new(Arc::new(MemoryCache::new()));
        assert_eq!(counters.increment(ObjectKind::Messages, 42).await.unwrap(), 1);
        assert_eq!(counters.increment(ObjectKind::Messages, 42).await.unwrap(), 2);
        // Different object kinds and users do not share counters.
        assert_eq!(counters.increment(ObjectKind::Folders, 42).await.unwrap(), 1);
        assert_eq!(counters.get(ObjectKind::Messages, 7).await.unwrap(), 0);
        assert_eq!(counters.get(ObjectKind::Messages, 42).await.unwrap(), 2);
    }
}
