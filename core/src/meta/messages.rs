/*
 * messages.rs
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

//! Message metadata records and the status bitmask.

use crate::index::{Index, Multi};

/// Message status bits. The low bits mirror the IMAP system flags; the
/// high bits are server-side classifier marks.
pub mod status {
    pub const RECENT: u32 = 1 << 0;
    pub const SEEN: u32 = 1 << 1;
    pub const ANSWERED: u32 = 1 << 2;
    pub const FLAGGED: u32 = 1 << 3;
    pub const DELETED: u32 = 1 << 4;
    pub const DRAFT: u32 = 1 << 5;
    /// Created by IMAP APPEND; invisible to POP3 enumeration.
    pub const APPENDED: u32 = 1 << 6;
    /// Invisible to both POP3 and IMAP.
    pub const HIDDEN: u32 = 1 << 7;
    pub const ENCRYPTED: u32 = 1 << 8;

    pub const JUNK: u32 = 1 << 9;
    pub const INFECTED: u32 = 1 << 10;
    pub const SPOOFED: u32 = 1 << 11;
    pub const BLACKHOLED: u32 = 1 << 12;
    pub const PHISHING: u32 = 1 << 13;
    pub const TAGGED: u32 = 1 << 14;
}

/// Metadata for one stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaMessage {
    pub messagenum: u64,
    pub foldernum: u64,
    /// Storage node holding the message body.
    pub server: String,
    pub status: u32,
    pub size: u64,
    pub signature_num: u64,
    pub signature_key: u64,
    pub created: i64,
    pub tags: Vec<String>,
}

impl MetaMessage {
    pub fn key(&self) -> Multi {
        Multi::U64(self.messagenum)
    }

    pub fn has(&self, bits: u32) -> bool {
        self.status & bits == bits
    }

    pub fn has_any(&self, bits: u32) -> bool {
        self.status & bits != 0
    }
}

/// Count how often each tag appears on the messages of one folder.
pub fn folder_tag_stats(messages: &Index<MetaMessage>, foldernum: u64) -> Vec<(String, u64)> {
    let counts = Index::new(crate::index::IndexKind::Tree, crate::index::LockMode::Automatic);
    let mut cursor = messages.cursor();
    while let Some(message) = cursor.next_value() {
        if message.foldernum != foldernum {
            continue;
        }
        for tag in &message.tags {
            let key = Multi::str(tag.clone());
            let next = counts.find(&key).unwrap_or(0u64) + 1;
            counts.replace(key, next);
        }
    }
    let mut out = Vec::new();
    let mut cursor = counts.cursor();
    while let Some((key, value)) = cursor.next() {
        if let Multi::Str(tag) = key {
            out.push((tag, value));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexKind, LockMode};

    fn message(messagenum: u64, foldernum: u64, tags: &[&str]) -> MetaMessage {
        MetaMessage {
            messagenum,
            foldernum,
            server: "local".into(),
            status: 0,
            size: 100,
            signature_num: 0,
            signature_key: 0,
            created: 0,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn status_helpers() {
        let mut m = message(1, 1, &[]);
        m.status = status::RECENT | status::SEEN;
        assert!(m.has(status::RECENT));
        assert!(m.has(status::RECENT | status::SEEN));
        assert!(!m.has(status::RECENT | status::HIDDEN));
        assert!(m.has_any(status::HIDDEN | status::SEEN));
    }

    #[test]
    fn tag_statistics_per_folder() {
        let messages = Index::new(IndexKind::Tree, LockMode::Automatic);
        for m in [
            message(1, 7, &["work", "todo"]),
            message(2, 7, &["work"]),
            message(3, 8, &["work"]),
        ] {
            messages.insert(m.key(), m);
        }
        let stats = folder_tag_stats(&messages, 7);
        assert_eq!(stats, vec![("todo".to_string(), 1), ("work".to_string(), 2)]);
    }
}
