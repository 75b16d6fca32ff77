/*
 * mod.rs
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

//! Cluster cache: the memcached-shaped primitives (`get`, `set`, `add`,
//! `delete`, `increment`) behind the [`Cache`] trait, with the wire
//! client for real deployments and an in-process backend for single-node
//! installs and tests. The named cluster lock builds on `add`.

mod client;
mod lock;
mod memory;

pub use client::MemcachedClient;
pub use lock::{lock_get, lock_get_with, lock_release, user_lock, user_unlock, LockGrant, LockResult};
pub use memory::MemoryCache;

use std::io;
use std::time::Duration;

/// Cache transport or protocol error.
#[derive(Debug)]
pub struct CacheError {
    pub message: String,
}

impl CacheError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { message: msg.into() }
    }
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CacheError {}

impl From<io::Error> for CacheError {
    fn from(e: io::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// The cache primitives the rest of the system consumes. TTLs are
/// seconds; zero means no expiry.
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Store only if the key is absent. Returns false when the key
    /// already exists.
    async fn add(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, CacheError>;

    /// Returns false when the key did not exist.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Increment a decimal counter. Returns None when the key does not
    /// exist (memcached does not auto-vivify counters).
    async fn increment(&self, key: &str, delta: u64) -> Result<Option<u64>, CacheError>;
}
