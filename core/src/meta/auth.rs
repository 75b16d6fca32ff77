/*
 * auth.rs
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

//! The login pipeline: run the STACIE stages over a presented password
//! and compare against the stored verification token. The server never
//! sees a reason to keep the password; a denied attempt mutates nothing
//! and leaks nothing beyond the canonical refusal.

use std::sync::Arc;

use crate::stacie;

use super::cache::MetaCache;
use super::user::{FetchMask, MetaUser, Protocol};

/// Authentication failure classes. `Denied` covers unknown accounts and
/// wrong passwords alike.
#[derive(Debug)]
pub enum AuthError {
    Denied,
    Transient(String),
    Internal(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Denied => write!(f, "authentication denied"),
            AuthError::Transient(m) => write!(f, "transient failure: {}", m),
            AuthError::Internal(m) => write!(f, "internal failure: {}", m),
        }
    }
}

impl std::error::Error for AuthError {}

/// A successful login: the shared meta-user handle plus the derived
/// verification token for later release bookkeeping.
#[derive(Debug)]
pub struct AuthOutcome {
    pub user: Arc<MetaUser>,
    pub verification: [u8; stacie::KEY_LENGTH],
}

/// Authenticate and attach to the meta-user cache.
pub async fn login(
    cache: &MetaCache,
    username: &str,
    password: &str,
    protocol: Protocol,
    fetch: FetchMask,
) -> Result<AuthOutcome, AuthError> {
    if username.is_empty() || password.is_empty() {
        return Err(AuthError::Denied);
    }

    let record = cache
        .source()
        .user_by_username(username)
        .await
        .map_err(|e| {
            if e.transient {
                AuthError::Transient(e.message)
            } else {
                AuthError::Internal(e.message)
            }
        })?
        .ok_or(AuthError::Denied)?;

    let rounds = stacie::derive_rounds(password, record.bonus);
    let seed = stacie::derive_seed(password, &record.salt)
        .map_err(|e| AuthError::Internal(e.message))?;
    let key = stacie::derive_key(&seed, rounds, &record.username, password, &record.salt)
        .map_err(|e| AuthError::Internal(e.message))?;
    let verification = stacie::derive_token(&key, &record.username, &record.salt, None)
        .map_err(|e| AuthError::Internal(e.message))?;

    if !stacie::tokens_equal(&verification, &record.verification) {
        tracing::debug!(username, "verification token mismatch");
        return Err(AuthError::Denied);
    }

    let user = cache
        .meta_get(record.usernum, &record.username, &verification, protocol, fetch)
        .await
        .map_err(|e| {
            if e.transient {
                AuthError::Transient(e.message)
            } else {
                AuthError::Internal(e.message)
            }
        })?;

    Ok(AuthOutcome { user, verification })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::storage::{MemorySource, SerialCounters, UserRecord};

    fn cache_with_user(password: &str) -> MetaCache {
        let salt = vec![7u8; stacie::SALT_LENGTH];
        let rounds = stacie::derive_rounds(password, 0);
        let seed = stacie::derive_seed(password, &salt).unwrap();
        let key = stacie::derive_key(&seed, rounds, "magma", password, &salt).unwrap();
        let verification = stacie::derive_token(&key, "magma", &salt, None).unwrap();

        let source = Arc::new(MemorySource::new());
        source.seed_user(
            UserRecord {
                usernum: 42,
                username: "magma".into(),
                salt,
                verification: verification.to_vec(),
                bonus: 0,
            },
            crate::meta::UserDetail {
                verification: verification.to_vec(),
                ..Default::default()
            },
        );
        MetaCache::new(source, SerialCounters::new(Arc::new(MemoryCache::new())))
    }

    #[tokio::test]
    async fn correct_password_attaches() {
        let cache = cache_with_user("CorrectHorseBattery1!Staple");
        let outcome = login(
            &cache,
            "magma",
            "CorrectHorseBattery1!Staple",
            Protocol::Pop,
            FetchMask::NONE,
        )
        .await
        .unwrap();
        assert_eq!(outcome.user.usernum, 42);
        assert_eq!(outcome.user.refs.total(), 1);
    }

    #[tokio::test]
    async fn wrong_password_denied_without_state() {
        let cache = cache_with_user("CorrectHorseBattery1!Staple");
        let err = login(&cache, "magma", "guess", Protocol::Pop, FetchMask::NONE)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Denied));
        assert_eq!(cache.cached_users(), 0);
    }

    #[tokio::test]
    async fn unknown_user_denied() {
        let cache = cache_with_user("CorrectHorseBattery1!Staple");
        let err = login(&cache, "ghost", "pw", Protocol::Pop, FetchMask::NONE)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Denied));
    }
}
