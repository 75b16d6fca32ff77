/*
 * status.rs
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

//! Process status: a signed level behind a read/write lock. Negative
//! means drain; workers poll [`Status::online`] between commands, and
//! the accept loops additionally wake on the change broadcast.

use std::sync::RwLock;

use tokio::sync::watch;

pub struct Status {
    level: RwLock<i32>,
    notify: watch::Sender<i32>,
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

impl Status {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(0);
        Self { level: RwLock::new(0), notify }
    }

    /// True while workers should keep processing.
    pub fn online(&self) -> bool {
        *self.level.read().unwrap() >= 0
    }

    pub fn get(&self) -> i32 {
        *self.level.read().unwrap()
    }

    pub fn set(&self, level: i32) {
        *self.level.write().unwrap() = level;
        let _ = self.notify.send(level);
    }

    /// Subscribe to level changes (used by accept loops to stop
    /// blocking in accept when a drain starts).
    pub fn subscribe(&self) -> watch::Receiver<i32> {
        self.notify.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_flips_online() {
        let status = Status::new();
        assert!(status.online());
        status.set(-1);
        assert!(!status.online());
        assert_eq!(status.get(), -1);
    }

    #[tokio::test]
    async fn subscribers_observe_changes() {
        let status = Status::new();
        let mut rx = status.subscribe();
        status.set(-1);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), -1);
    }
}
