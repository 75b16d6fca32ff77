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

//! Meta objects: the in-memory, protocol-independent projection of one
//! mailbox account (folders, messages, aliases, contacts), the
//! process-wide cache that shares those projections across protocol
//! sessions, and the login pipeline that produces them.

mod alias;
mod auth;
mod cache;
mod folders;
mod messages;
mod user;

pub use alias::MetaAlias;
pub use auth::{login, AuthError, AuthOutcome};
pub use cache::{MetaCache, PruneOutcome};
pub use folders::{
    folder_children, folder_by_full_name, folder_by_name, folder_by_number, folder_full_name,
    MetaFolder, FOLDER_RECURSION_LIMIT,
};
pub use messages::{folder_tag_stats, status, MetaMessage};
pub use user::{FetchMask, MetaContact, MetaUser, Protocol, UserDetail};

/// Meta layer error: either the backing store failed (transient) or the
/// request itself was invalid.
#[derive(Debug)]
pub struct MetaError {
    pub message: String,
    pub transient: bool,
}

impl MetaError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { message: msg.into(), transient: false }
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self { message: msg.into(), transient: true }
    }
}

impl std::fmt::Display for MetaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for MetaError {}

impl From<crate::storage::StorageError> for MetaError {
    fn from(e: crate::storage::StorageError) -> Self {
        Self { message: e.message, transient: e.transient }
    }
}
