/*
 * source.rs
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

//! The seam between the meta layer and its source of truth. Production
//! uses [`SqlSource`] over the statement pool; [`MemorySource`] serves
//! tests and toy deployments from seeded records.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::meta::{MetaAlias, MetaContact, MetaFolder, MetaMessage, UserDetail};

use super::pool::StatementPool;
use super::queries::{self, UserRecord};
use super::StorageError;

/// Folder trees are stored in one table split by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderKind {
    Mail,
    Contact,
}

/// Everything the meta layer needs from persistent storage.
#[async_trait::async_trait]
pub trait MetaSource: Send + Sync {
    async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>, StorageError>;

    async fn user_detail(&self, usernum: u64) -> Result<Option<UserDetail>, StorageError>;

    async fn folders(&self, usernum: u64, kind: FolderKind)
        -> Result<Vec<MetaFolder>, StorageError>;

    async fn messages(&self, usernum: u64) -> Result<Vec<MetaMessage>, StorageError>;

    async fn aliases(&self, usernum: u64) -> Result<Vec<MetaAlias>, StorageError>;

    async fn contacts(&self, usernum: u64) -> Result<Vec<MetaContact>, StorageError>;

    async fn insert_message(
        &self,
        usernum: u64,
        foldernum: u64,
        server: &str,
        status: u32,
        size: u64,
    ) -> Result<u64, StorageError>;

    async fn delete_message(&self, usernum: u64, messagenum: u64) -> Result<bool, StorageError>;

    async fn update_message_status(
        &self,
        usernum: u64,
        messagenum: u64,
        status: u32,
    ) -> Result<bool, StorageError>;
}

/// Production source: every call pulls a pooled session and runs the
/// named prepared statements.
pub struct SqlSource {
    pool: Arc<StatementPool>,
}

impl SqlSource {
    pub fn new(pool: Arc<StatementPool>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MetaSource for SqlSource {
    async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>, StorageError> {
        let mut session = self.pool.pull().await?;
        queries::user_by_username(session.connection(), username).await
    }

    async fn user_detail(&self, usernum: u64) -> Result<Option<UserDetail>, StorageError> {
        let mut session = self.pool.pull().await?;
        queries::user_detail(session.connection(), usernum).await
    }

    async fn folders(
        &self,
        usernum: u64,
        kind: FolderKind,
    ) -> Result<Vec<MetaFolder>, StorageError> {
        let mut session = self.pool.pull().await?;
        queries::folders(session.connection(), usernum, kind).await
    }

    async fn messages(&self, usernum: u64) -> Result<Vec<MetaMessage>, StorageError> {
        let mut session = self.pool.pull().await?;
        queries::messages(session.connection(), usernum).await
    }

    async fn aliases(&self, usernum: u64) -> Result<Vec<MetaAlias>, StorageError> {
        let mut session = self.pool.pull().await?;
        queries::aliases(session.connection(), usernum).await
    }

    async fn contacts(&self, usernum: u64) -> Result<Vec<MetaContact>, StorageError> {
        let mut session = self.pool.pull().await?;
        queries::contacts(session.connection(), usernum).await
    }

    async fn insert_message(
        &self,
        usernum: u64,
        foldernum: u64,
        server: &str,
        status: u32,
        size: u64,
    ) -> Result<u64, StorageError> {
        let mut session = self.pool.pull().await?;
        queries::insert_message(session.connection(), usernum, foldernum, server, status, size)
            .await
    }

    async fn delete_message(&self, usernum: u64, messagenum: u64) -> Result<bool, StorageError> {
        let mut session = self.pool.pull().await?;
        queries::delete_message(session.connection(), usernum, messagenum).await
    }

    async fn update_message_status(
        &self,
        usernum: u64,
        messagenum: u64,
        status: u32,
    ) -> Result<bool, StorageError> {
        let mut session = self.pool.pull().await?;
        queries::update_message_status(session.connection(), usernum, messagenum, status).await
    }
}

#[derive(Default)]
struct MemoryAccount {
    record: Option<UserRecord>,
    detail: UserDetail,
    mail_folders: Vec<MetaFolder>,
    contact_folders: Vec<MetaFolder>,
    messages: Vec<MetaMessage>,
    aliases: Vec<MetaAlias>,
    contacts: Vec<MetaContact>,
}

/// Seeded in-process source of truth.
#[derive(Default)]
pub struct MemorySource {
    accounts: Mutex<HashMap<u64, MemoryAccount>>,
    next_message: Mutex<u64>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self { accounts: Mutex::new(HashMap::new()), next_message: Mutex::new(1) }
    }

    pub fn seed_user(&self, record: UserRecord, detail: UserDetail) {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.entry(record.usernum).or_default();
        account.record = Some(record);
        account.detail = detail;
    }

    pub fn seed_folder(&self, usernum: u64, kind: FolderKind, folder: MetaFolder) {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.entry(usernum).or_default();
        match kind {
            FolderKind::Mail => account.mail_folders.push(folder),
            FolderKind::Contact => account.contact_folders.push(folder),
        }
    }

    pub fn seed_message(&self, usernum: u64, message: MetaMessage) {
        let mut accounts = self.accounts.lock().unwrap();
        accounts.entry(usernum).or_default().messages.push(message);
        let mut next = self.next_message.lock().unwrap();
        *next = (*next).max(1);
    }
}

#[async_trait::async_trait]
impl MetaSource for MemorySource {
    async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>, StorageError> {
        let accounts = self.accounts.lock().unwrap();
        Ok(accounts
            .values()
            .filter_map(|a| a.record.clone())
            .find(|r| r.username == username))
    }

    async fn user_detail(&self, usernum: u64) -> Result<Option<UserDetail>, StorageError> {
        let accounts = self.accounts.lock().unwrap();
        Ok(accounts.get(&usernum).map(|a| a.detail.clone()))
    }

    async fn folders(
        &self,
        usernum: u64,
        kind: FolderKind,
    ) -> Result<Vec<MetaFolder>, StorageError> {
        let accounts = self.accounts.lock().unwrap();
        Ok(accounts
            .get(&usernum)
            .map(|a| match kind {
                FolderKind::Mail => a.mail_folders.clone(),
                FolderKind::Contact => a.contact_folders.clone(),
            })
            .unwrap_or_default())
    }

    async fn messages(&self, usernum: u64) -> Result<Vec<MetaMessage>, StorageError> {
        let accounts = self.accounts.lock().unwrap();
        Ok(accounts.get(&usernum).map(|a| a.messages.clone()).unwrap_or_default())
    }

    async fn aliases(&self, usernum: u64) -> Result<Vec<MetaAlias>, StorageError> {
        let accounts = self.accounts.lock().unwrap();
        Ok(accounts.get(&usernum).map(|a| a.aliases.clone()).unwrap_or_default())
    }

    async fn contacts(&self, usernum: u64) -> Result<Vec<MetaContact>, StorageError> {
        let accounts = self.accounts.lock().unwrap();
        Ok(accounts.get(&usernum).map(|a| a.contacts.clone()).unwrap_or_default())
    }

    async fn insert_message(
        &self,
        usernum: u64,
        foldernum: u64,
        server: &str,
        status: u32,
        size: u64,
    ) -> Result<u64, StorageError> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.entry(usernum).or_default();
        let mut next = self.next_message.lock().unwrap();
        let high = account.messages.iter().map(|m| m.messagenum).max().unwrap_or(0);
        *next = (*next).max(high + 1);
        let messagenum = *next;
        *next += 1;
        account.messages.push(MetaMessage {
            messagenum,
            foldernum,
            server: server.to_string(),
            status,
            size,
            signature_num: 0,
            signature_key: 0,
            created: 0,
            tags: Vec::new(),
        });
        Ok(messagenum)
    }

    async fn delete_message(&self, usernum: u64, messagenum: u64) -> Result<bool, StorageError> {
        let mut accounts = self.accounts.lock().unwrap();
        let Some(account) = accounts.get_mut(&usernum) else {
            return Ok(false);
        };
        let before = account.messages.len();
        account.messages.retain(|m| m.messagenum != messagenum);
        Ok(account.messages.len() != before)
    }

    async fn update_message_status(
        &self,
        usernum: u64,
        messagenum: u64,
        status: u32,
    ) -> Result<bool, StorageError> {
        let mut accounts = self.accounts.lock().unwrap();
        let Some(account) = accounts.get_mut(&usernum) else {
            return Ok(false);
        };
        for message in &mut account.messages {
            if message.messagenum == messagenum {
                message.status = status;
                return Ok(true);
            }
        }
        Ok(false)
    }
}
