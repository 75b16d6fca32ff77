/*
 * pool.rs
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

//! Fixed-size pool of long-lived database sessions. `pull` blocks until
//! a slot frees, pings the session before handing it out, and rebuilds
//! the connection (statements re-prepare with it) when the ping fails.
//! The slot returns to the pool on every path, including errors, via
//! the guard's drop.

use std::collections::VecDeque;
use std::sync::Mutex;

use sqlx::mysql::MySqlConnection;
use sqlx::{Connection, Executor};
use tokio::sync::Semaphore;

use super::StorageError;

/// Pool of exclusive database sessions. A session is serially
/// single-writer: whoever holds the guard owns the connection.
pub struct StatementPool {
    url: String,
    slots: Mutex<VecDeque<Option<MySqlConnection>>>,
    available: Semaphore,
}

impl StatementPool {
    /// Create a pool of `size` lazily-connected sessions.
    pub fn new(url: impl Into<String>, size: usize) -> Self {
        let size = size.max(1);
        let mut slots = VecDeque::with_capacity(size);
        for _ in 0..size {
            slots.push_back(None);
        }
        Self { url: url.into(), slots: Mutex::new(slots), available: Semaphore::new(size) }
    }

    /// Reserve a session. Blocks (asynchronously) until a slot frees.
    /// The returned session has been pinged; a dead connection is
    /// rebuilt once before the pull fails as transient.
    pub async fn pull(&self) -> Result<PoolSession<'_>, StorageError> {
        let permit = self
            .available
            .acquire()
            .await
            .map_err(|_| StorageError::new("statement pool is shut down"))?;
        let slot = self.slots.lock().unwrap().pop_front().flatten();

        let conn = match slot {
            Some(mut conn) => match conn.ping().await {
                Ok(()) => conn,
                Err(e) => {
                    tracing::debug!(error = %e, "pooled session failed its ping, reconnecting");
                    drop(conn);
                    self.connect().await.inspect_err(|_| {
                        // Hand the empty slot back before surfacing the error.
                        self.slots.lock().unwrap().push_back(None);
                    })?
                }
            },
            None => self.connect().await.inspect_err(|_| {
                self.slots.lock().unwrap().push_back(None);
            })?,
        };

        permit.forget();
        Ok(PoolSession { pool: self, conn: Some(conn) })
    }

    async fn connect(&self) -> Result<MySqlConnection, StorageError> {
        let mut conn = MySqlConnection::connect(&self.url)
            .await
            .map_err(|e| StorageError::transient(format!("database connect failed: {}", e)))?;
        // Sessions talk wall-clock timestamps to the cluster.
        conn.execute("SET time_zone = '+00:00'")
            .await
            .map_err(|e| StorageError::transient(format!("session setup failed: {}", e)))?;
        Ok(conn)
    }

    fn release(&self, conn: Option<MySqlConnection>) {
        self.slots.lock().unwrap().push_back(conn);
        self.available.add_permits(1);
    }
}

/// Exclusive ownership of one pooled session. Dropping the guard
/// returns the slot.
pub struct PoolSession<'a> {
    pool: &'a StatementPool,
    conn: Option<MySqlConnection>,
}

impl PoolSession<'_> {
    pub fn connection(&mut self) -> &mut MySqlConnection {
        self.conn.as_mut().expect("session held until drop")
    }
}

impl Drop for PoolSession<'_> {
    fn drop(&mut self) {
        self.pool.release(self.conn.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // Pull contention is exercised without a live database: slots start
    // unconnected, so we only test the reservation accounting by
    // draining permits directly.
    #[tokio::test]
    async fn pool_blocks_when_exhausted() {
        let pool = StatementPool::new("mysql://unused", 1);
        let permit = pool.available.acquire().await.unwrap();
        permit.forget();
        let slot = pool.slots.lock().unwrap().pop_front().flatten();
        assert!(slot.is_none());

        let second = tokio::time::timeout(Duration::from_millis(50), pool.available.acquire()).await;
        assert!(second.is_err(), "second pull should block while the slot is out");

        pool.release(None);
        let third = tokio::time::timeout(Duration::from_millis(50), pool.available.acquire()).await;
        assert!(third.is_ok());
    }
}
