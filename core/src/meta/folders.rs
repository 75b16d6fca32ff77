/*
 * folders.rs
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

//! Folder records and tree walks. Folders form a hierarchy through
//! `parent` (0 for roots); the fully qualified name joins the ancestor
//! chain with periods. "Inbox" is the only name compared without case.

use crate::index::{Index, Multi};

/// Ancestor walks stop here. Parent cycles can only come from store
/// corruption, and an unbounded walk would spin forever on one.
pub const FOLDER_RECURSION_LIMIT: usize = 16;

/// One mail folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaFolder {
    pub foldernum: u64,
    pub parent: u64,
    pub order: u32,
    pub name: String,
}

impl MetaFolder {
    pub fn key(&self) -> Multi {
        Multi::U64(self.foldernum)
    }
}

fn inbox_match(name: &str, target: &str, inbox: bool) -> bool {
    name == target || (inbox && name.eq_ignore_ascii_case(target))
}

/// Find a folder by name directly under the given parent. The
/// comparison is case sensitive except for "Inbox" when `check_inbox`
/// is set.
pub fn folder_by_name(
    folders: &Index<MetaFolder>,
    target: &str,
    parent: u64,
    check_inbox: bool,
) -> Option<MetaFolder> {
    if target.is_empty() {
        return None;
    }
    let inbox = check_inbox && target.eq_ignore_ascii_case("Inbox");
    let mut cursor = folders.cursor();
    while let Some(folder) = cursor.next_value() {
        if folder.parent == parent && inbox_match(&folder.name, target, inbox) {
            return Some(folder);
        }
    }
    None
}

pub fn folder_by_number(folders: &Index<MetaFolder>, number: u64) -> Option<MetaFolder> {
    folders.find(&Multi::U64(number))
}

/// Fully qualified name: ancestors joined with periods. Returns None
/// when the ancestor chain exceeds the recursion limit or references a
/// missing parent.
pub fn folder_full_name(folders: &Index<MetaFolder>, folder: &MetaFolder) -> Option<String> {
    let mut name = folder.name.clone();
    let mut parent = folder.parent;
    let mut depth = 0;
    while parent != 0 {
        if depth >= FOLDER_RECURSION_LIMIT {
            tracing::warn!(foldernum = folder.foldernum, "folder ancestry exceeds the recursion limit");
            return None;
        }
        let ancestor = folder_by_number(folders, parent)?;
        name = format!("{}.{}", ancestor.name, name);
        parent = ancestor.parent;
        depth += 1;
    }
    Some(name)
}

/// Find a folder by its fully qualified name.
pub fn folder_by_full_name(
    folders: &Index<MetaFolder>,
    target: &str,
    check_inbox: bool,
) -> Option<MetaFolder> {
    if target.is_empty() {
        return None;
    }
    let inbox = check_inbox && target.eq_ignore_ascii_case("Inbox");
    let mut cursor = folders.cursor();
    while let Some(folder) = cursor.next_value() {
        if let Some(full) = folder_full_name(folders, &folder) {
            if inbox_match(&full, target, inbox) {
                return Some(folder);
            }
        }
    }
    None
}

/// Count direct children of a folder.
pub fn folder_children(folders: &Index<MetaFolder>, number: u64) -> usize {
    if number == 0 {
        return 0;
    }
    let mut cursor = folders.cursor();
    let mut count = 0;
    while let Some(folder) = cursor.next_value() {
        if folder.parent == number {
            count += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexKind, LockMode};

    fn folder(foldernum: u64, parent: u64, name: &str) -> MetaFolder {
        MetaFolder { foldernum, parent, order: 0, name: name.to_string() }
    }

    fn tree() -> Index<MetaFolder> {
        let folders = Index::new(IndexKind::Tree, LockMode::Automatic);
        for f in [
            folder(1, 0, "Inbox"),
            folder(2, 0, "Archive"),
            folder(3, 2, "2025"),
            folder(4, 3, "Q1"),
            folder(5, 0, "archive"),
        ] {
            folders.insert(f.key(), f);
        }
        folders
    }

    #[test]
    fn name_lookup_is_case_sensitive_except_inbox() {
        let folders = tree();
        assert_eq!(folder_by_name(&folders, "Archive", 0, true).unwrap().foldernum, 2);
        assert_eq!(folder_by_name(&folders, "archive", 0, true).unwrap().foldernum, 5);
        assert_eq!(folder_by_name(&folders, "INBOX", 0, true).unwrap().foldernum, 1);
        assert!(folder_by_name(&folders, "INBOX", 0, false).is_none());
    }

    #[test]
    fn full_names_join_ancestors() {
        let folders = tree();
        let leaf = folder_by_number(&folders, 4).unwrap();
        assert_eq!(folder_full_name(&folders, &leaf).unwrap(), "Archive.2025.Q1");
        assert_eq!(folder_by_full_name(&folders, "Archive.2025.Q1", true).unwrap().foldernum, 4);
        assert!(folder_by_full_name(&folders, "Archive.2025.Q2", true).is_none());
    }

    #[test]
    fn ancestor_cycle_hits_the_recursion_limit() {
        let folders = Index::new(IndexKind::Tree, LockMode::Automatic);
        let a = folder(1, 2, "a");
        let b = folder(2, 1, "b");
        folders.insert(a.key(), a.clone());
        folders.insert(b.key(), b);
        assert!(folder_full_name(&folders, &a).is_none());
    }

    #[test]
    fn children_are_direct_only() {
        let folders = tree();
        assert_eq!(folder_children(&folders, 2), 1);
        assert_eq!(folder_children(&folders, 3), 1);
        assert_eq!(folder_children(&folders, 4), 0);
        // Parent id 0 is the root marker, not a folder.
        assert_eq!(folder_children(&folders, 0), 0);
    }
}
