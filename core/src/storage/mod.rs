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

//! Storage tier: the fixed-size pool of prepared-statement database
//! sessions, the datatier queries the core consumes, the cache-backed
//! cluster serial counters, and the [`MetaSource`] seam between the
//! meta-user cache and its source of truth.

mod pool;
mod queries;
mod serials;
mod source;

pub use pool::{PoolSession, StatementPool};
pub use queries::UserRecord;
pub use serials::{ObjectKind, SerialCounters};
pub use source::{FolderKind, MemorySource, MetaSource, SqlSource};

/// Storage tier error. `transient` marks conditions worth retrying
/// (lost connections, pool pressure) as opposed to malformed data or
/// constraint violations.
#[derive(Debug)]
pub struct StorageError {
    pub message: String,
    pub transient: bool,
}

impl StorageError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { message: msg.into(), transient: false }
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self { message: msg.into(), transient: true }
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StorageError {}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        let transient = matches!(e, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut);
        Self { message: e.to_string(), transient }
    }
}
