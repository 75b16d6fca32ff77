/*
 * queries.rs
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

//! The datatier: every named query the core consumes. Statements are
//! prepared by the driver per session and parameters bind positionally;
//! no SQL is ever assembled from input.

use sqlx::mysql::MySqlConnection;
use sqlx::Row;

use crate::meta::{MetaAlias, MetaContact, MetaFolder, MetaMessage};

use super::source::FolderKind;
use super::StorageError;

/// Account row needed for authentication: the STACIE salt and
/// verification token, plus the deployment round bonus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub usernum: u64,
    pub username: String,
    pub salt: Vec<u8>,
    pub verification: Vec<u8>,
    pub bonus: u32,
}

pub async fn user_by_username(
    conn: &mut MySqlConnection,
    username: &str,
) -> Result<Option<UserRecord>, StorageError> {
    let row = sqlx::query(
        "SELECT usernum, userid, salt, verification, bonus FROM Users WHERE userid = ?",
    )
    .bind(username)
    .fetch_optional(&mut *conn)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(UserRecord {
        usernum: row.try_get::<u64, _>(0)?,
        username: row.try_get::<String, _>(1)?,
        salt: row.try_get::<Vec<u8>, _>(2)?,
        verification: row.try_get::<Vec<u8>, _>(3)?,
        bonus: row.try_get::<u32, _>(4)?,
    }))
}

pub async fn user_detail(
    conn: &mut MySqlConnection,
    usernum: u64,
) -> Result<Option<crate::meta::UserDetail>, StorageError> {
    let row = sqlx::query(
        "SELECT verification, public_key, private_key FROM Users WHERE usernum = ?",
    )
    .bind(usernum)
    .fetch_optional(&mut *conn)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(crate::meta::UserDetail {
        verification: row.try_get::<Vec<u8>, _>(0)?,
        public_key: row.try_get::<Vec<u8>, _>(1)?,
        private_key: row.try_get::<Vec<u8>, _>(2)?,
    }))
}

pub async fn folders(
    conn: &mut MySqlConnection,
    usernum: u64,
    kind: FolderKind,
) -> Result<Vec<MetaFolder>, StorageError> {
    let type_tag: i32 = match kind {
        FolderKind::Mail => 0,
        FolderKind::Contact => 1,
    };
    let rows = sqlx::query(
        "SELECT foldernum, parent, `order`, foldername FROM Folders \
         WHERE usernum = ? AND type = ? ORDER BY foldernum",
    )
    .bind(usernum)
    .bind(type_tag)
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter()
        .map(|row| {
            Ok(MetaFolder {
                foldernum: row.try_get::<u64, _>(0)?,
                parent: row.try_get::<u64, _>(1)?,
                order: row.try_get::<u32, _>(2)?,
                name: row.try_get::<String, _>(3)?,
            })
        })
        .collect()
}

pub async fn messages(
    conn: &mut MySqlConnection,
    usernum: u64,
) -> Result<Vec<MetaMessage>, StorageError> {
    let rows = sqlx::query(
        "SELECT messagenum, foldernum, server, status, size, signum, sigkey, \
         UNIX_TIMESTAMP(created) FROM Messages WHERE usernum = ? ORDER BY messagenum",
    )
    .bind(usernum)
    .fetch_all(&mut *conn)
    .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let messagenum = row.try_get::<u64, _>(0)?;
        let tags = message_tags(conn, messagenum).await?;
        out.push(MetaMessage {
            messagenum,
            foldernum: row.try_get::<u64, _>(1)?,
            server: row.try_get::<String, _>(2)?,
            status: row.try_get::<u32, _>(3)?,
            size: row.try_get::<u64, _>(4)?,
            signature_num: row.try_get::<u64, _>(5)?,
            signature_key: row.try_get::<u64, _>(6)?,
            created: row.try_get::<i64, _>(7)?,
            tags,
        });
    }
    Ok(out)
}

async fn message_tags(
    conn: &mut MySqlConnection,
    messagenum: u64,
) -> Result<Vec<String>, StorageError> {
    let rows = sqlx::query("SELECT tag FROM Message_Tags WHERE messagenum = ? ORDER BY tag")
        .bind(messagenum)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter()
        .map(|row| row.try_get::<String, _>(0).map_err(StorageError::from))
        .collect()
}

pub async fn aliases(
    conn: &mut MySqlConnection,
    usernum: u64,
) -> Result<Vec<MetaAlias>, StorageError> {
    let rows = sqlx::query(
        "SELECT aliasnum, address, display, selected, UNIX_TIMESTAMP(created) \
         FROM Mailboxes WHERE usernum = ? ORDER BY aliasnum",
    )
    .bind(usernum)
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter()
        .map(|row| {
            Ok(MetaAlias {
                aliasnum: row.try_get::<u64, _>(0)?,
                address: row.try_get::<String, _>(1)?,
                display: row.try_get::<String, _>(2)?,
                selected: row.try_get::<bool, _>(3)?,
                created: row.try_get::<i64, _>(4)?,
            })
        })
        .collect()
}

pub async fn contacts(
    conn: &mut MySqlConnection,
    usernum: u64,
) -> Result<Vec<MetaContact>, StorageError> {
    let rows = sqlx::query(
        "SELECT contactnum, foldernum, name, email FROM Contacts \
         WHERE usernum = ? ORDER BY contactnum",
    )
    .bind(usernum)
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter()
        .map(|row| {
            Ok(MetaContact {
                contactnum: row.try_get::<u64, _>(0)?,
                foldernum: row.try_get::<u64, _>(1)?,
                name: row.try_get::<String, _>(2)?,
                email: row.try_get::<String, _>(3)?,
            })
        })
        .collect()
}

/// Insert a message row, returning the new message number.
pub async fn insert_message(
    conn: &mut MySqlConnection,
    usernum: u64,
    foldernum: u64,
    server: &str,
    status: u32,
    size: u64,
) -> Result<u64, StorageError> {
    let result = sqlx::query(
        "INSERT INTO Messages (usernum, foldernum, server, status, size, created) \
         VALUES (?, ?, ?, ?, ?, NOW())",
    )
    .bind(usernum)
    .bind(foldernum)
    .bind(server)
    .bind(status)
    .bind(size)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_id())
}

/// Delete a message row. The body file is unlinked only after this
/// succeeds.
pub async fn delete_message(
    conn: &mut MySqlConnection,
    usernum: u64,
    messagenum: u64,
) -> Result<bool, StorageError> {
    let result = sqlx::query("DELETE FROM Messages WHERE usernum = ? AND messagenum = ?")
        .bind(usernum)
        .bind(messagenum)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn update_message_status(
    conn: &mut MySqlConnection,
    usernum: u64,
    messagenum: u64,
    status: u32,
) -> Result<bool, StorageError> {
    let result = sqlx::query("UPDATE Messages SET status = ? WHERE usernum = ? AND messagenum = ?")
        .bind(status)
        .bind(usernum)
        .bind(messagenum)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
