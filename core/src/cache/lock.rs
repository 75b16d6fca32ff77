/*
 * lock.rs
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

//! Named cluster locks over the cache's add-if-absent primitive. The
//! key is `"<name>.lock"`, the value is the acquire timestamp, and the
//! hold is bounded by a TTL so a crashed node cannot wedge the cluster.
//! Release refuses to delete a lock whose stored token no longer matches
//! the grant.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::Cache;

/// Maximum hold before the cache expires the lock on its own.
pub const LOCK_EXPIRATION: Duration = Duration::from_secs(600);

/// Total time an acquirer will retry before giving up.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay between acquisition attempts.
pub const LOCK_STEP: Duration = Duration::from_millis(100);

/// Proof of acquisition; required to release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockGrant {
    pub token: u64,
}

/// Outcome of a lock acquisition attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum LockResult {
    Acquired(LockGrant),
    /// The retry budget ran out while another holder kept the lock.
    Timeout,
    /// The cache itself failed; the lock state is unknown.
    CacheFailure,
    InvalidKey,
}

fn lock_key(name: &str) -> Option<String> {
    if name.is_empty() || name.contains(' ') {
        return None;
    }
    Some(format!("{}.lock", name))
}

/// Acquire a named lock with explicit budgets. The token stored under
/// the key is the acquire timestamp in seconds.
pub async fn lock_get_with(
    cache: &dyn Cache,
    name: &str,
    expiration: Duration,
    timeout: Duration,
    step: Duration,
) -> LockResult {
    let Some(key) = lock_key(name) else {
        return LockResult::InvalidKey;
    };

    let token = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let value = token.to_string();

    let attempts = (timeout.as_millis() / step.as_millis().max(1)).max(1);
    for attempt in 0..attempts {
        match cache.add(&key, value.as_bytes(), expiration).await {
            Ok(true) => return LockResult::Acquired(LockGrant { token }),
            Ok(false) => {
                if attempt + 1 < attempts {
                    tokio::time::sleep(step).await;
                }
            }
            Err(e) => {
                tracing::warn!(name, error = %e, "cluster lock cache failure");
                return LockResult::CacheFailure;
            }
        }
    }

    tracing::debug!(name, "cluster lock acquisition timed out");
    LockResult::Timeout
}

/// Acquire with the standard budgets: 600 s expiration, 60 s of retries
/// at 100 ms steps.
pub async fn lock_get(cache: &dyn Cache, name: &str) -> LockResult {
    lock_get_with(cache, name, LOCK_EXPIRATION, LOCK_TIMEOUT, LOCK_STEP).await
}

/// Release a named lock. The delete only happens when the stored token
/// still matches the grant, so a holder whose lease expired cannot
/// release the next holder's lock.
pub async fn lock_release(cache: &dyn Cache, name: &str, grant: LockGrant) {
    let Some(key) = lock_key(name) else {
        return;
    };
    match cache.get(&key).await {
        Ok(Some(value)) => {
            let stored: Option<u64> =
                std::str::from_utf8(&value).ok().and_then(|s| s.trim().parse().ok());
            if stored == Some(grant.token) {
                let _ = cache.delete(&key).await;
            } else {
                tracing::warn!(name, "declining to release a lock held by another owner");
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(name, error = %e, "cluster lock release failed"),
    }
}

/// Lock the `magma.user` keyspace for one account.
pub async fn user_lock(cache: &dyn Cache, usernum: u64) -> LockResult {
    lock_get(cache, &format!("magma.user.{}", usernum)).await
}

pub async fn user_unlock(cache: &dyn Cache, usernum: u64, grant: LockGrant) {
    lock_release(cache, &format!("magma.user.{}", usernum), grant).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use std::sync::Arc;

    #[tokio::test]
    async fn exclusive_until_released() {
        let cache = MemoryCache::new();
        let grant = match lock_get_with(
            &cache,
            "magma.user.42",
            LOCK_EXPIRATION,
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
        .await
        {
            LockResult::Acquired(g) => g,
            other => panic!("expected acquisition, got {:?}", other),
        };

        // Second acquirer times out while the lock is held.
        let second = lock_get_with(
            &cache,
            "magma.user.42",
            LOCK_EXPIRATION,
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
        .await;
        assert_eq!(second, LockResult::Timeout);

        lock_release(&cache, "magma.user.42", grant).await;
        let third = lock_get_with(
            &cache,
            "magma.user.42",
            LOCK_EXPIRATION,
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
        .await;
        assert!(matches!(third, LockResult::Acquired(_)));
    }

    #[tokio::test]
    async fn contended_acquire_succeeds_after_release() {
        let cache = Arc::new(MemoryCache::new());
        let grant = match lock_get(cache.as_ref(), "u.42").await {
            LockResult::Acquired(g) => g,
            other => panic!("expected acquisition, got {:?}", other),
        };

        let contender = {
            let cache = cache.clone();
            tokio::spawn(async move {
                lock_get_with(
                    cache.as_ref(),
                    "u.42",
                    LOCK_EXPIRATION,
                    Duration::from_secs(2),
                    Duration::from_millis(10),
                )
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        lock_release(cache.as_ref(), "u.42", grant).await;

        assert!(matches!(contender.await.unwrap(), LockResult::Acquired(_)));
    }

    #[tokio::test]
    async fn mismatched_token_is_not_released() {
        let cache = MemoryCache::new();
        let grant = match lock_get(&cache, "scope.7").await {
            LockResult::Acquired(g) => g,
            other => panic!("expected acquisition, got {:?}", other),
        };
        let stale = LockGrant { token: grant.token.wrapping_sub(10) };
        lock_release(&cache, "scope.7", stale).await;
        // Still held: a fresh add fails.
        assert!(!cache.add("scope.7.lock", b"x", LOCK_EXPIRATION).await.unwrap());
    }

    #[tokio::test]
    async fn invalid_key_reported() {
        let cache = MemoryCache::new();
        assert_eq!(lock_get(&cache, "").await, LockResult::InvalidKey);
    }
}
