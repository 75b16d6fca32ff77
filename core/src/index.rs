/*
 * index.rs
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

//! Generic index: one container interface over three storage shapes
//! (ordered tree, insertion-ordered list, hash map), keyed by the tagged
//! [`Multi`] key. Collections of users, folders, and messages all go
//! through this interface so call sites can pick the shape without
//! changing their code.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Tagged key for index entries. Ordering is total: discriminant first
/// (unsigned, signed, string, null), then the value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Multi {
    U64(u64),
    I64(i64),
    Str(String),
    Null,
}

impl Multi {
    pub fn str(s: impl Into<String>) -> Self {
        Multi::Str(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Multi::Null)
    }
}

impl From<u64> for Multi {
    fn from(v: u64) -> Self {
        Multi::U64(v)
    }
}

impl From<i64> for Multi {
    fn from(v: i64) -> Self {
        Multi::I64(v)
    }
}

/// Storage shape for an [`Index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Ordered by key; rejects duplicate keys.
    Tree,
    /// Insertion order; duplicate keys append.
    Linked,
    /// Unordered; duplicate keys replace.
    Hashed,
}

/// Locking discipline. Automatic wraps every operation in the internal
/// lock; Manual requires the caller to frame sequences with
/// [`Index::read`] / [`Index::write`] guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Automatic,
    Manual,
}

#[derive(Debug)]
enum Store<V> {
    Tree(BTreeMap<Multi, V>),
    Linked(Vec<(Multi, V)>),
    Hashed(HashMap<Multi, V>),
}

/// The keyed records behind an index lock. Obtained directly from the
/// manual-mode guards; automatic-mode operations route through the same
/// methods internally.
#[derive(Debug)]
pub struct Entries<V> {
    store: Store<V>,
    serial: u64,
}

impl<V: Clone> Entries<V> {
    /// Insert a record. Tree entries reject duplicate keys, linked
    /// entries append, hashed entries replace. Returns false when the
    /// insert was rejected.
    pub fn insert(&mut self, key: Multi, value: V) -> bool {
        let inserted = match &mut self.store {
            Store::Tree(map) => {
                if map.contains_key(&key) {
                    false
                } else {
                    map.insert(key, value);
                    true
                }
            }
            Store::Linked(list) => {
                list.push((key, value));
                true
            }
            Store::Hashed(map) => {
                map.insert(key, value);
                true
            }
        };
        if inserted {
            self.serial += 1;
        }
        inserted
    }

    /// Delete any existing record under the key, then insert.
    pub fn replace(&mut self, key: Multi, value: V) -> bool {
        self.delete(&key);
        self.insert(key, value)
    }

    pub fn find(&self, key: &Multi) -> Option<V> {
        match &self.store {
            Store::Tree(map) => map.get(key).cloned(),
            Store::Linked(list) => list.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()),
            Store::Hashed(map) => map.get(key).cloned(),
        }
    }

    pub fn delete(&mut self, key: &Multi) -> bool {
        let deleted = match &mut self.store {
            Store::Tree(map) => map.remove(key).is_some(),
            Store::Linked(list) => {
                let before = list.len();
                list.retain(|(k, _)| k != key);
                list.len() != before
            }
            Store::Hashed(map) => map.remove(key).is_some(),
        };
        if deleted {
            self.serial += 1;
        }
        deleted
    }

    pub fn truncate(&mut self) {
        match &mut self.store {
            Store::Tree(map) => map.clear(),
            Store::Linked(list) => list.clear(),
            Store::Hashed(map) => map.clear(),
        }
        self.serial += 1;
    }

    pub fn count(&self) -> u64 {
        match &self.store {
            Store::Tree(map) => map.len() as u64,
            Store::Linked(list) => list.len() as u64,
            Store::Hashed(map) => map.len() as u64,
        }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Copy out the current records. Tree snapshots are in ascending
    /// key order, linked snapshots in insertion order.
    pub fn snapshot(&self) -> Vec<(Multi, V)> {
        match &self.store {
            Store::Tree(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Store::Linked(list) => list.clone(),
            Store::Hashed(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

/// Polymorphic keyed container. Values are cloned out on access, so
/// large records are held as `Arc<T>`.
#[derive(Debug)]
pub struct Index<V> {
    kind: IndexKind,
    mode: LockMode,
    entries: RwLock<Entries<V>>,
}

impl<V: Clone> Index<V> {
    pub fn new(kind: IndexKind, mode: LockMode) -> Self {
        let store = match kind {
            IndexKind::Tree => Store::Tree(BTreeMap::new()),
            IndexKind::Linked => Store::Linked(Vec::new()),
            IndexKind::Hashed => Store::Hashed(HashMap::new()),
        };
        Self {
            kind,
            mode,
            entries: RwLock::new(Entries { store, serial: 0 }),
        }
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn insert(&self, key: Multi, value: V) -> bool {
        self.entries.write().unwrap().insert(key, value)
    }

    pub fn replace(&self, key: Multi, value: V) -> bool {
        self.entries.write().unwrap().replace(key, value)
    }

    pub fn find(&self, key: &Multi) -> Option<V> {
        self.entries.read().unwrap().find(key)
    }

    pub fn delete(&self, key: &Multi) -> bool {
        self.entries.write().unwrap().delete(key)
    }

    pub fn truncate(&self) {
        self.entries.write().unwrap().truncate()
    }

    pub fn count(&self) -> u64 {
        self.entries.read().unwrap().count()
    }

    /// Monotonic mutation counter. Bumped on every successful insert,
    /// replace, delete, or truncate, in either locking mode.
    pub fn serial(&self) -> u64 {
        self.entries.read().unwrap().serial()
    }

    /// Snapshot cursor. Mutations made after the snapshot become
    /// visible only via [`Cursor::reset`].
    pub fn cursor(&self) -> Cursor<V> {
        Cursor {
            entries: self.entries.read().unwrap().snapshot(),
            position: 0,
        }
    }

    /// Manual-mode read guard framing a sequence of lookups. Panics in
    /// automatic mode, where per-operation locking already applies.
    pub fn read(&self) -> RwLockReadGuard<'_, Entries<V>> {
        assert!(self.mode == LockMode::Manual, "index is in automatic locking mode");
        self.entries.read().unwrap()
    }

    /// Manual-mode write guard framing a transactional sequence.
    pub fn write(&self) -> RwLockWriteGuard<'_, Entries<V>> {
        assert!(self.mode == LockMode::Manual, "index is in automatic locking mode");
        self.entries.write().unwrap()
    }
}

/// Snapshot iterator over an index.
pub struct Cursor<V> {
    entries: Vec<(Multi, V)>,
    position: usize,
}

impl<V: Clone> Cursor<V> {
    pub fn next(&mut self) -> Option<(Multi, V)> {
        let entry = self.entries.get(self.position).cloned();
        if entry.is_some() {
            self.position += 1;
        }
        entry
    }

    pub fn next_value(&mut self) -> Option<V> {
        self.next().map(|(_, v)| v)
    }

    /// Re-snapshot from the live index and rewind.
    pub fn reset(&mut self, index: &Index<V>) {
        self.entries = index.entries.read().unwrap().snapshot();
        self.position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_rejects_duplicates() {
        let index = Index::new(IndexKind::Tree, LockMode::Automatic);
        assert!(index.insert(Multi::U64(1), "a"));
        assert!(!index.insert(Multi::U64(1), "b"));
        assert_eq!(index.find(&Multi::U64(1)), Some("a"));
        assert_eq!(index.count(), 1);
    }

    #[test]
    fn linked_appends_duplicates() {
        let index = Index::new(IndexKind::Linked, LockMode::Automatic);
        assert!(index.insert(Multi::U64(1), "a"));
        assert!(index.insert(Multi::U64(1), "b"));
        assert_eq!(index.count(), 2);
        // Find returns the first match in insertion order.
        assert_eq!(index.find(&Multi::U64(1)), Some("a"));
    }

    #[test]
    fn hashed_replaces_duplicates() {
        let index = Index::new(IndexKind::Hashed, LockMode::Automatic);
        assert!(index.insert(Multi::U64(1), "a"));
        assert!(index.insert(Multi::U64(1), "b"));
        assert_eq!(index.count(), 1);
        assert_eq!(index.find(&Multi::U64(1)), Some("b"));
    }

    #[test]
    fn tree_cursor_ascending() {
        let index = Index::new(IndexKind::Tree, LockMode::Automatic);
        for key in [5u64, 1, 9, 3, 7] {
            index.insert(Multi::U64(key), key);
        }
        let mut cursor = index.cursor();
        let mut seen = Vec::new();
        while let Some((key, _)) = cursor.next() {
            seen.push(key);
        }
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(seen, sorted);
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn cursor_reset_sees_mutations() {
        let index = Index::new(IndexKind::Tree, LockMode::Automatic);
        index.insert(Multi::U64(1), 1u64);
        let mut cursor = index.cursor();
        index.insert(Multi::U64(2), 2u64);
        let mut count = 0;
        while cursor.next().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
        cursor.reset(&index);
        count = 0;
        while cursor.next().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn serial_increments_on_mutation() {
        let index = Index::new(IndexKind::Hashed, LockMode::Automatic);
        let start = index.serial();
        index.insert(Multi::str("k"), 1u64);
        index.replace(Multi::str("k"), 2u64);
        index.delete(&Multi::str("k"));
        // Replace counts the delete and the insert separately.
        assert_eq!(index.serial(), start + 4);
        // A failed delete does not bump the serial.
        index.delete(&Multi::str("k"));
        assert_eq!(index.serial(), start + 4);
    }

    #[test]
    fn manual_mode_guards_frame_sequences() {
        let index = Index::new(IndexKind::Tree, LockMode::Manual);
        {
            let mut entries = index.write();
            entries.insert(Multi::U64(1), "a");
            entries.insert(Multi::U64(2), "b");
        }
        let entries = index.read();
        assert_eq!(entries.count(), 2);
        assert_eq!(entries.find(&Multi::U64(2)), Some("b"));
    }

    #[test]
    fn multi_ordering_is_total() {
        let mut keys = vec![
            Multi::Null,
            Multi::str("b"),
            Multi::str("a"),
            Multi::I64(-2),
            Multi::U64(3),
            Multi::U64(1),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Multi::U64(1),
                Multi::U64(3),
                Multi::I64(-2),
                Multi::str("a"),
                Multi::str("b"),
                Multi::Null,
            ]
        );
    }
}
