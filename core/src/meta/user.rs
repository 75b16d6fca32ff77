/*
 * user.rs
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

//! The meta-user aggregate: one account's folders, messages, aliases,
//! and contacts, shared across protocol sessions through an `Arc`
//! handle. Sub-objects refresh incrementally by comparing their local
//! serials against the cluster-wide counters; a write-preferring lock
//! keeps readers on consistent snapshots while a writer refetches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::index::{Index, IndexKind, LockMode, Multi};
use crate::storage::{FolderKind, MetaSource, ObjectKind, SerialCounters};

use super::alias::MetaAlias;
use super::folders::MetaFolder;
use super::messages::MetaMessage;
use super::MetaError;

/// Serial sentinel forcing the first refresh to fetch.
const SERIAL_UNSET: u64 = u64::MAX;

/// One contact card entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaContact {
    pub contactnum: u64,
    pub foldernum: u64,
    pub name: String,
    pub email: String,
}

impl MetaContact {
    pub fn key(&self) -> Multi {
        Multi::U64(self.contactnum)
    }
}

/// Which protocol holds a reference on a cached meta-user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Smtp,
    Pop,
    Imap,
    Web,
    Generic,
}

/// Per-protocol reference counts.
#[derive(Debug, Default)]
pub struct ProtocolRefs {
    smtp: AtomicU64,
    pop: AtomicU64,
    imap: AtomicU64,
    web: AtomicU64,
    generic: AtomicU64,
}

impl ProtocolRefs {
    fn slot(&self, protocol: Protocol) -> &AtomicU64 {
        match protocol {
            Protocol::Smtp => &self.smtp,
            Protocol::Pop => &self.pop,
            Protocol::Imap => &self.imap,
            Protocol::Web => &self.web,
            Protocol::Generic => &self.generic,
        }
    }

    pub fn total(&self) -> u64 {
        self.smtp.load(Ordering::SeqCst)
            + self.pop.load(Ordering::SeqCst)
            + self.imap.load(Ordering::SeqCst)
            + self.web.load(Ordering::SeqCst)
            + self.generic.load(Ordering::SeqCst)
    }
}

/// Selects which sub-objects a caller needs populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchMask(u8);

impl FetchMask {
    pub const NONE: FetchMask = FetchMask(0);
    pub const ALIASES: FetchMask = FetchMask(1);
    pub const FOLDERS: FetchMask = FetchMask(2);
    pub const MESSAGES: FetchMask = FetchMask(4);
    pub const CONTACTS: FetchMask = FetchMask(8);
    pub const ALL: FetchMask = FetchMask(15);

    pub fn with(self, other: FetchMask) -> FetchMask {
        FetchMask(self.0 | other.0)
    }

    pub fn demands(self, other: FetchMask) -> bool {
        self.0 & other.0 != 0
    }
}

/// Mutable account details guarded by the user lock.
#[derive(Debug, Clone, Default)]
pub struct UserDetail {
    /// Opaque STACIE verification token.
    pub verification: Vec<u8>,
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
}

#[derive(Debug)]
struct Serials {
    user: AtomicU64,
    aliases: AtomicU64,
    folders: AtomicU64,
    messages: AtomicU64,
    contacts: AtomicU64,
}

impl Default for Serials {
    fn default() -> Self {
        Self {
            user: AtomicU64::new(SERIAL_UNSET),
            aliases: AtomicU64::new(SERIAL_UNSET),
            folders: AtomicU64::new(SERIAL_UNSET),
            messages: AtomicU64::new(SERIAL_UNSET),
            contacts: AtomicU64::new(SERIAL_UNSET),
        }
    }
}

impl Serials {
    fn slot(&self, kind: ObjectKind) -> &AtomicU64 {
        match kind {
            ObjectKind::User | ObjectKind::Config => &self.user,
            ObjectKind::Aliases => &self.aliases,
            ObjectKind::Folders => &self.folders,
            ObjectKind::Messages => &self.messages,
            ObjectKind::Contacts => &self.contacts,
        }
    }
}

/// The process-wide projection of one account.
#[derive(Debug)]
pub struct MetaUser {
    pub usernum: u64,
    pub username: String,

    detail: std::sync::RwLock<UserDetail>,

    pub aliases: Index<MetaAlias>,
    /// Contact folder tree.
    pub folders: Index<MetaFolder>,
    /// Mail folder tree, as seen by IMAP and POP.
    pub message_folders: Index<MetaFolder>,
    pub messages: Index<MetaMessage>,
    pub contacts: Index<MetaContact>,

    serials: Serials,
    pub refs: ProtocolRefs,
    last_touch: AtomicU64,

    guard: RwLock<()>,
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

impl MetaUser {
    pub fn new(usernum: u64, username: impl Into<String>) -> Self {
        Self {
            usernum,
            username: username.into(),
            detail: std::sync::RwLock::new(UserDetail::default()),
            aliases: Index::new(IndexKind::Linked, LockMode::Automatic),
            folders: Index::new(IndexKind::Tree, LockMode::Automatic),
            message_folders: Index::new(IndexKind::Tree, LockMode::Automatic),
            messages: Index::new(IndexKind::Tree, LockMode::Automatic),
            contacts: Index::new(IndexKind::Tree, LockMode::Automatic),
            serials: Serials::default(),
            refs: ProtocolRefs::default(),
            last_touch: AtomicU64::new(now_secs()),
            guard: RwLock::new(()),
        }
    }

    /// Take the user read lock. Guards a consistent snapshot of the
    /// sub-indices against concurrent refresh.
    pub async fn read_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.guard.read().await
    }

    /// Take the user write lock (write-preferring).
    pub async fn write_lock(&self) -> RwLockWriteGuard<'_, ()> {
        self.guard.write().await
    }

    pub fn detail(&self) -> UserDetail {
        self.detail.read().unwrap().clone()
    }

    pub fn touch(&self) {
        self.last_touch.store(now_secs(), Ordering::SeqCst);
    }

    pub fn ref_add(&self, protocol: Protocol) {
        self.refs.slot(protocol).fetch_add(1, Ordering::SeqCst);
        self.touch();
    }

    /// Drop one protocol reference, returning the remaining total.
    pub fn ref_release(&self, protocol: Protocol) -> u64 {
        let slot = self.refs.slot(protocol);
        let mut current = slot.load(Ordering::SeqCst);
        while current > 0 {
            match slot.compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => break,
                Err(seen) => current = seen,
            }
        }
        self.touch();
        self.refs.total()
    }

    /// Seconds since the last reference activity.
    pub fn idle_secs(&self) -> u64 {
        now_secs().saturating_sub(self.last_touch.load(Ordering::SeqCst))
    }

    /// Local serial checkpoint for one sub-object.
    pub fn serial(&self, kind: ObjectKind) -> u64 {
        self.serials.slot(kind).load(Ordering::SeqCst)
    }

    /// Record a local mutation: advance the cluster counter and adopt
    /// its value as the local checkpoint.
    pub async fn bump_serial(&self, counters: &SerialCounters, kind: ObjectKind) {
        match counters.increment(kind, self.usernum).await {
            Ok(value) => self.serials.slot(kind).store(value, Ordering::SeqCst),
            Err(e) => {
                tracing::warn!(usernum = self.usernum, error = %e, "serial propagation failed");
                self.serials.slot(kind).fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Refresh the aggregate from the source of truth. Each sub-object
    /// is fetched only when its cluster serial has moved past the local
    /// checkpoint, or when the fetch mask explicitly demands it. Runs
    /// under the user write lock.
    pub async fn refresh(
        &self,
        source: &dyn MetaSource,
        counters: &SerialCounters,
        fetch: FetchMask,
    ) -> Result<(), MetaError> {
        let _guard = self.guard.write().await;

        if self.serial_stale(counters, ObjectKind::User).await? {
            let record = source
                .user_detail(self.usernum)
                .await?
                .ok_or_else(|| MetaError::new(format!("user {} vanished from storage", self.usernum)))?;
            *self.detail.write().unwrap() = record;
            self.adopt_serial(counters, ObjectKind::User).await?;
        }

        if fetch.demands(FetchMask::ALIASES)
            && self.serial_stale(counters, ObjectKind::Aliases).await?
        {
            let aliases = source.aliases(self.usernum).await?;
            self.aliases.truncate();
            for alias in aliases {
                self.aliases.insert(alias.key(), alias);
            }
            self.adopt_serial(counters, ObjectKind::Aliases).await?;
        }

        if fetch.demands(FetchMask::FOLDERS)
            && self.serial_stale(counters, ObjectKind::Folders).await?
        {
            let mail = source.folders(self.usernum, FolderKind::Mail).await?;
            self.message_folders.truncate();
            for folder in mail {
                self.message_folders.insert(folder.key(), folder);
            }
            let contact = source.folders(self.usernum, FolderKind::Contact).await?;
            self.folders.truncate();
            for folder in contact {
                self.folders.insert(folder.key(), folder);
            }
            self.adopt_serial(counters, ObjectKind::Folders).await?;
        }

        if fetch.demands(FetchMask::MESSAGES)
            && self.serial_stale(counters, ObjectKind::Messages).await?
        {
            let messages = source.messages(self.usernum).await?;
            self.messages.truncate();
            for message in messages {
                self.messages.insert(message.key(), message);
            }
            self.adopt_serial(counters, ObjectKind::Messages).await?;
        }

        if fetch.demands(FetchMask::CONTACTS)
            && self.serial_stale(counters, ObjectKind::Contacts).await?
        {
            let contacts = source.contacts(self.usernum).await?;
            self.contacts.truncate();
            for contact in contacts {
                self.contacts.insert(contact.key(), contact);
            }
            self.adopt_serial(counters, ObjectKind::Contacts).await?;
        }

        Ok(())
    }

    async fn serial_stale(
        &self,
        counters: &SerialCounters,
        kind: ObjectKind,
    ) -> Result<bool, MetaError> {
        let local = self.serials.slot(kind).load(Ordering::SeqCst);
        if local == SERIAL_UNSET {
            return Ok(true);
        }
        let cluster = counters
            .get(kind, self.usernum)
            .await
            .map_err(|e| MetaError::transient(e.to_string()))?;
        Ok(cluster != local)
    }

    async fn adopt_serial(
        &self,
        counters: &SerialCounters,
        kind: ObjectKind,
    ) -> Result<(), MetaError> {
        let cluster = counters
            .get(kind, self.usernum)
            .await
            .map_err(|e| MetaError::transient(e.to_string()))?;
        self.serials.slot(kind).store(cluster, Ordering::SeqCst);
        Ok(())
    }
}
