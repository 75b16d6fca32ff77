/*
 * stats.rs
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

//! Named statistics counters (connection totals per protocol, secure
//! connection counts). Served to operators over the Molten protocol.

use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct Stats {
    counters: Mutex<BTreeMap<String, i64>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, name: &str) {
        *self.counters.lock().unwrap().entry(name.to_string()).or_insert(0) += 1;
    }

    pub fn decrement(&self, name: &str) {
        *self.counters.lock().unwrap().entry(name.to_string()).or_insert(0) -= 1;
    }

    pub fn get(&self, name: &str) -> i64 {
        self.counters.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    /// Sorted snapshot of every counter.
    pub fn snapshot(&self) -> Vec<(String, i64)> {
        self.counters.lock().unwrap().iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_and_snapshot() {
        let stats = Stats::new();
        stats.increment("pop.connections.total");
        stats.increment("pop.connections.total");
        stats.decrement("pop.connections.total");
        stats.increment("imap.connections.total");
        assert_eq!(stats.get("pop.connections.total"), 1);
        assert_eq!(stats.get("unknown"), 0);
        let snapshot = stats.snapshot();
        assert_eq!(
            snapshot,
            vec![
                ("imap.connections.total".to_string(), 1),
                ("pop.connections.total".to_string(), 1),
            ]
        );
    }
}
