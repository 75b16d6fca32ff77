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

//! Per-protocol state machines. Each module drives one protocol over a
//! [`Connection`] with the shared dispatch-loop shape: read a line,
//! charge spins and violations against the server budget, binary-search
//! the command table, run the handler.

pub mod dmtp;
pub mod http;
pub mod imap;
pub mod molten;
pub mod pop3;
pub mod smtp;

use std::sync::Arc;

use crate::config::ProtocolTag;
use crate::index::{Index, IndexKind, LockMode};
use crate::meta::folder_by_name;
use crate::server::{Connection, Magma};
use crate::storage::{FolderKind, MetaSource};

/// Route an accepted connection to its protocol module. Sessions return
/// when the peer quits, errs, or the budget closes the connection.
pub async fn run_session(ctx: Arc<Magma>, connection: Connection) {
    match connection.server.spec.protocol {
        ProtocolTag::Pop => pop3::run(ctx, connection).await,
        ProtocolTag::Imap => imap::run(ctx, connection).await,
        ProtocolTag::Smtp | ProtocolTag::Submission => smtp::run(ctx, connection).await,
        ProtocolTag::Dmtp => dmtp::run(ctx, connection).await,
        ProtocolTag::Molten => molten::run(ctx, connection).await,
        ProtocolTag::Http => http::run(ctx, connection).await,
    }
}

/// What a handler decided about the connection's future. All paths out
/// of a handler are one of these; nothing unwinds through the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Reply sent; read the next command.
    Continue,
    /// Reply sent; close gracefully.
    Quit,
    /// Close without further output.
    Silent,
}

/// Resolve a recipient's delivery folder. Folder numbers are assigned
/// by storage, so the Inbox has to be looked up per account; when no
/// Inbox exists the lowest root folder takes the delivery, and an
/// account without any folder tree falls back to folder one.
pub(crate) async fn inbox_foldernum(source: &dyn MetaSource, usernum: u64) -> u64 {
    let folders = match source.folders(usernum, FolderKind::Mail).await {
        Ok(folders) => folders,
        Err(e) => {
            tracing::warn!(usernum, error = %e, "folder lookup failed, delivering to folder one");
            return 1;
        }
    };

    let index = Index::new(IndexKind::Tree, LockMode::Automatic);
    let mut lowest_root = None;
    for folder in folders {
        if folder.parent == 0 {
            lowest_root =
                Some(lowest_root.map_or(folder.foldernum, |l: u64| l.min(folder.foldernum)));
        }
        index.insert(folder.key(), folder);
    }

    folder_by_name(&index, "Inbox", 0, true)
        .map(|f| f.foldernum)
        .or(lowest_root)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::MetaFolder;
    use crate::storage::MemorySource;

    fn folder(foldernum: u64, parent: u64, name: &str) -> MetaFolder {
        MetaFolder { foldernum, parent, order: 0, name: name.to_string() }
    }

    #[tokio::test]
    async fn inbox_resolves_by_name_not_number() {
        let source = MemorySource::new();
        source.seed_folder(42, FolderKind::Mail, folder(5, 0, "Archive"));
        source.seed_folder(42, FolderKind::Mail, folder(7, 0, "INBOX"));
        assert_eq!(inbox_foldernum(&source, 42).await, 7);
    }

    #[tokio::test]
    async fn missing_inbox_falls_back_to_lowest_root() {
        let source = MemorySource::new();
        source.seed_folder(42, FolderKind::Mail, folder(9, 0, "Archive"));
        source.seed_folder(42, FolderKind::Mail, folder(4, 0, "Sent"));
        source.seed_folder(42, FolderKind::Mail, folder(2, 4, "2025"));
        assert_eq!(inbox_foldernum(&source, 42).await, 4);
    }

    #[tokio::test]
    async fn empty_tree_falls_back_to_folder_one() {
        let source = MemorySource::new();
        assert_eq!(inbox_foldernum(&source, 42).await, 1);
    }
}
