/*
 * cache.rs
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

//! Process-wide meta-user cache. At most one [`MetaUser`] exists per
//! account; concurrent protocol sessions share it through `Arc` handles
//! and per-protocol reference counts. The cache lock is held only for
//! the O(1) lookup and ref bump, never across storage I/O.

use std::sync::Arc;

use crate::index::{Index, IndexKind, LockMode, Multi};
use crate::storage::{MetaSource, SerialCounters};

use super::user::{FetchMask, MetaUser, Protocol};
use super::MetaError;

/// Occupancy-dependent eviction thresholds, in seconds of idleness.
const PRUNE_AGE_BUSY: u64 = 300;
const PRUNE_AGE_WARM: u64 = 1800;
const PRUNE_AGE_QUIET: u64 = 3600;
const PRUNE_BUSY_COUNT: u64 = 4096;
const PRUNE_WARM_COUNT: u64 = 2048;

/// Result of a prune sweep.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    pub scanned: u64,
    pub evicted: u64,
}

/// The cache plus its collaborators: the source of truth and the
/// cluster serial counters.
pub struct MetaCache {
    users: Index<Arc<MetaUser>>,
    source: Arc<dyn MetaSource>,
    counters: SerialCounters,
}

impl MetaCache {
    pub fn new(source: Arc<dyn MetaSource>, counters: SerialCounters) -> Self {
        Self {
            users: Index::new(IndexKind::Hashed, LockMode::Manual),
            source,
            counters,
        }
    }

    pub fn source(&self) -> &dyn MetaSource {
        self.source.as_ref()
    }

    pub fn counters(&self) -> &SerialCounters {
        &self.counters
    }

    pub fn cached_users(&self) -> u64 {
        self.users.read().count()
    }

    /// Look up or create the meta-user for an authenticated account,
    /// bump the protocol ref, and bring the requested sub-objects up to
    /// date. On refresh failure the ref is removed again and the error
    /// propagates.
    pub async fn meta_get(
        &self,
        usernum: u64,
        username: &str,
        verification: &[u8],
        protocol: Protocol,
        fetch: FetchMask,
    ) -> Result<Arc<MetaUser>, MetaError> {
        if usernum == 0 || username.is_empty() || verification.is_empty() {
            return Err(MetaError::new("invalid parameters for a meta-user lookup"));
        }

        let key = Multi::U64(usernum);
        let user = {
            let mut entries = self.users.write();
            match entries.find(&key) {
                Some(user) => {
                    user.ref_add(protocol);
                    user
                }
                None => {
                    let user = Arc::new(MetaUser::new(usernum, username));
                    user.ref_add(protocol);
                    entries.insert(key, user.clone());
                    user
                }
            }
        };

        if let Err(e) = user.refresh(self.source.as_ref(), &self.counters, fetch).await {
            self.meta_release(usernum, protocol);
            return Err(e);
        }

        // A stale credential can race a password change; the stored
        // verification token is authoritative.
        let detail = user.detail();
        if !detail.verification.is_empty()
            && !crate::stacie::tokens_equal(&detail.verification, verification)
        {
            self.meta_release(usernum, protocol);
            return Err(MetaError::new("verification token no longer matches"));
        }

        Ok(user)
    }

    /// Borrow a cached user without touching the reference counts.
    /// Callers must already hold a protocol reference through some
    /// session.
    pub fn peek(&self, usernum: u64) -> Option<Arc<MetaUser>> {
        self.users.read().find(&Multi::U64(usernum))
    }

    /// Drop one protocol reference. The entry stays cached for future
    /// hits until a prune sweep evicts it.
    pub fn meta_release(&self, usernum: u64, protocol: Protocol) {
        let entries = self.users.read();
        if let Some(user) = entries.find(&Multi::U64(usernum)) {
            user.ref_release(protocol);
        }
    }

    /// Evict idle, unreferenced users. The idle threshold tightens as
    /// the cache fills.
    pub fn prune(&self) -> PruneOutcome {
        let mut outcome = PruneOutcome::default();
        let mut entries = self.users.write();
        let threshold = match entries.count() {
            n if n > PRUNE_BUSY_COUNT => PRUNE_AGE_BUSY,
            n if n > PRUNE_WARM_COUNT => PRUNE_AGE_WARM,
            _ => PRUNE_AGE_QUIET,
        };

        let snapshot = entries.snapshot();
        for (key, user) in snapshot {
            outcome.scanned += 1;
            if user.refs.total() == 0 && user.idle_secs() > threshold {
                entries.delete(&key);
                outcome.evicted += 1;
                tracing::debug!(usernum = user.usernum, "evicted idle meta-user");
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::meta::{MetaFolder, MetaMessage};
    use crate::storage::{FolderKind, MemorySource, UserRecord};

    fn seeded() -> (Arc<MemorySource>, MetaCache) {
        let source = Arc::new(MemorySource::new());
        source.seed_user(
            UserRecord {
                usernum: 42,
                username: "magma".into(),
                salt: vec![0u8; 128],
                verification: b"token".to_vec(),
                bonus: 0,
            },
            crate::meta::UserDetail {
                verification: b"token".to_vec(),
                ..Default::default()
            },
        );
        source.seed_folder(
            42,
            FolderKind::Mail,
            MetaFolder { foldernum: 1, parent: 0, order: 0, name: "Inbox".into() },
        );
        source.seed_message(
            42,
            MetaMessage {
                messagenum: 1,
                foldernum: 1,
                server: "local".into(),
                status: 0,
                size: 64,
                signature_num: 0,
                signature_key: 0,
                created: 0,
                tags: Vec::new(),
            },
        );
        let counters = SerialCounters::new(Arc::new(MemoryCache::new()));
        let cache = MetaCache::new(source.clone(), counters);
        (source, cache)
    }

    #[tokio::test]
    async fn one_entry_per_usernum() {
        let (_, cache) = seeded();
        let a = cache
            .meta_get(42, "magma", b"token", Protocol::Pop, FetchMask::ALL)
            .await
            .unwrap();
        let b = cache
            .meta_get(42, "magma", b"token", Protocol::Imap, FetchMask::ALL)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.cached_users(), 1);
        assert_eq!(a.refs.total(), 2);
        assert_eq!(a.messages.count(), 1);
        assert_eq!(a.message_folders.count(), 1);
    }

    #[tokio::test]
    async fn release_keeps_entry_cached() {
        let (_, cache) = seeded();
        let user = cache
            .meta_get(42, "magma", b"token", Protocol::Pop, FetchMask::NONE)
            .await
            .unwrap();
        cache.meta_release(42, Protocol::Pop);
        assert_eq!(user.refs.total(), 0);
        assert_eq!(cache.cached_users(), 1);
    }

    #[tokio::test]
    async fn prune_requires_zero_refs_and_staleness() {
        let (_, cache) = seeded();
        let user = cache
            .meta_get(42, "magma", b"token", Protocol::Pop, FetchMask::NONE)
            .await
            .unwrap();

        // Referenced: never evicted no matter the age.
        let outcome = cache.prune();
        assert_eq!(outcome.evicted, 0);

        cache.meta_release(42, Protocol::Pop);
        // Unreferenced but fresh: still cached.
        let outcome = cache.prune();
        assert_eq!(outcome.evicted, 0);
        assert_eq!(cache.cached_users(), 1);
        drop(user);
    }

    #[tokio::test]
    async fn wrong_verification_rejected_and_ref_rolled_back() {
        let (_, cache) = seeded();
        let err = cache
            .meta_get(42, "magma", b"wrong", Protocol::Pop, FetchMask::NONE)
            .await
            .unwrap_err();
        assert!(err.message.contains("verification"));
        let user = cache
            .meta_get(42, "magma", b"token", Protocol::Pop, FetchMask::NONE)
            .await
            .unwrap();
        assert_eq!(user.refs.total(), 1);
    }

    #[tokio::test]
    async fn missing_user_fails_and_rolls_back() {
        let (_, cache) = seeded();
        let err = cache
            .meta_get(7, "ghost", b"token", Protocol::Pop, FetchMask::NONE)
            .await
            .unwrap_err();
        assert!(err.message.contains("vanished"));
        // The placeholder entry keeps no references.
        let entries = cache.users.read();
        if let Some(user) = entries.find(&Multi::U64(7)) {
            assert_eq!(user.refs.total(), 0);
        }
    }
}
