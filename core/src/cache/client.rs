/*
 * client.rs
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

//! Memcached text-protocol client: one connection guarded by a mutex,
//! reconnected on transport failure. Commands are CRLF lines; values are
//! length-prefixed by the VALUE response line.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::{Cache, CacheError};

/// A connected session with its line buffer.
struct CacheSession {
    stream: TcpStream,
    read_buf: Vec<u8>,
}

async fn read_line(session: &mut CacheSession) -> Result<String, CacheError> {
    session.read_buf.clear();
    loop {
        let mut b = [0u8; 1];
        let n = session.stream.read(&mut b).await?;
        if n == 0 {
            return Err(CacheError::new("cache connection closed"));
        }
        session.read_buf.push(b[0]);
        if session.read_buf.len() >= 2 && session.read_buf[session.read_buf.len() - 2..] == *b"\r\n"
        {
            break;
        }
    }
    let line = String::from_utf8_lossy(&session.read_buf[..session.read_buf.len() - 2]).to_string();
    Ok(line)
}

async fn read_exact(session: &mut CacheSession, len: usize) -> Result<Vec<u8>, CacheError> {
    let mut data = vec![0u8; len + 2];
    session.stream.read_exact(&mut data).await?;
    if &data[len..] != b"\r\n" {
        return Err(CacheError::new("cache value missing its terminator"));
    }
    data.truncate(len);
    Ok(data)
}

fn valid_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() || key.len() > 250 || key.bytes().any(|b| b <= b' ') {
        return Err(CacheError::new(format!("invalid cache key {:?}", key)));
    }
    Ok(())
}

/// Client for a memcached-compatible server.
pub struct MemcachedClient {
    host: String,
    port: u16,
    io_timeout: Duration,
    session: Mutex<Option<CacheSession>>,
}

impl MemcachedClient {
    pub fn new(host: impl Into<String>, port: u16, io_timeout: Duration) -> Self {
        Self { host: host.into(), port, io_timeout, session: Mutex::new(None) }
    }

    async fn connect(&self) -> Result<CacheSession, CacheError> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = timeout(self.io_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| CacheError::new(format!("cache connect to {} timed out", addr)))??;
        Ok(CacheSession { stream, read_buf: Vec::with_capacity(512) })
    }

    /// Run one command round trip, reconnecting once if the cached
    /// session has gone stale.
    async fn round_trip(
        &self,
        command: &[u8],
        expect_value: bool,
    ) -> Result<(String, Option<Vec<u8>>), CacheError> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let session = guard.as_mut().expect("session populated above");

        let result = timeout(self.io_timeout, async {
            session.stream.write_all(command).await?;
            session.stream.flush().await?;
            let line = read_line(session).await?;
            if expect_value && line.starts_with("VALUE ") {
                let bytes: usize = line
                    .split_whitespace()
                    .nth(3)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| CacheError::new("malformed VALUE response"))?;
                let data = read_exact(session, bytes).await?;
                let end = read_line(session).await?;
                if end != "END" {
                    return Err(CacheError::new("missing END after VALUE"));
                }
                return Ok((line, Some(data)));
            }
            Ok((line, None))
        })
        .await
        .map_err(|_| CacheError::new("cache round trip timed out"))
        .and_then(|r| r);

        if result.is_err() {
            // Drop the broken session so the next call reconnects.
            *guard = None;
        }
        result
    }
}

#[async_trait::async_trait]
impl Cache for MemcachedClient {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        valid_key(key)?;
        let command = format!("get {}\r\n", key);
        let (line, value) = self.round_trip(command.as_bytes(), true).await?;
        if line == "END" {
            return Ok(None);
        }
        if value.is_some() {
            return Ok(value);
        }
        Err(CacheError::new(format!("unexpected get response: {}", line)))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        valid_key(key)?;
        let mut command =
            format!("set {} 0 {} {}\r\n", key, ttl.as_secs(), value.len()).into_bytes();
        command.extend_from_slice(value);
        command.extend_from_slice(b"\r\n");
        let (line, _) = self.round_trip(&command, false).await?;
        if line == "STORED" {
            return Ok(());
        }
        Err(CacheError::new(format!("unexpected set response: {}", line)))
    }

    async fn add(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, CacheError> {
        valid_key(key)?;
        let mut command =
            format!("add {} 0 {} {}\r\n", key, ttl.as_secs(), value.len()).into_bytes();
        command.extend_from_slice(value);
        command.extend_from_slice(b"\r\n");
        let (line, _) = self.round_trip(&command, false).await?;
        match line.as_str() {
            "STORED" => Ok(true),
            "NOT_STORED" => Ok(false),
            other => Err(CacheError::new(format!("unexpected add response: {}", other))),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        valid_key(key)?;
        let command = format!("delete {}\r\n", key);
        let (line, _) = self.round_trip(command.as_bytes(), false).await?;
        match line.as_str() {
            "DELETED" => Ok(true),
            "NOT_FOUND" => Ok(false),
            other => Err(CacheError::new(format!("unexpected delete response: {}", other))),
        }
    }

    async fn increment(&self, key: &str, delta: u64) -> Result<Option<u64>, CacheError> {
        valid_key(key)?;
        let command = format!("incr {} {}\r\n", key, delta);
        let (line, _) = self.round_trip(command.as_bytes(), false).await?;
        if line == "NOT_FOUND" {
            return Ok(None);
        }
        line.parse::<u64>()
            .map(Some)
            .map_err(|_| CacheError::new(format!("unexpected incr response: {}", line)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// A scripted one-connection memcached stand-in.
    async fn fake_server(listener: TcpListener) {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half);
        let mut line = String::new();
        let mut stored: Option<Vec<u8>> = None;
        loop {
            line.clear();
            if lines.read_line(&mut line).await.unwrap() == 0 {
                return;
            }
            let parts: Vec<String> = line.trim_end().split(' ').map(|s| s.to_string()).collect();
            match parts[0].as_str() {
                "set" | "add" => {
                    let bytes: usize = parts[4].parse().unwrap();
                    let mut data = vec![0u8; bytes + 2];
                    tokio::io::AsyncReadExt::read_exact(&mut lines, &mut data).await.unwrap();
                    data.truncate(bytes);
                    if parts[0] == "add" && stored.is_some() {
                        write_half.write_all(b"NOT_STORED\r\n").await.unwrap();
                    } else {
                        stored = Some(data);
                        write_half.write_all(b"STORED\r\n").await.unwrap();
                    }
                }
                "get" => match &stored {
                    Some(data) => {
                        let head = format!("VALUE {} 0 {}\r\n", parts[1], data.len());
                        write_half.write_all(head.as_bytes()).await.unwrap();
                        write_half.write_all(data).await.unwrap();
                        write_half.write_all(b"\r\nEND\r\n").await.unwrap();
                    }
                    None => write_half.write_all(b"END\r\n").await.unwrap(),
                },
                "delete" => {
                    let reply: &[u8] =
                        if stored.take().is_some() { b"DELETED\r\n" } else { b"NOT_FOUND\r\n" };
                    write_half.write_all(reply).await.unwrap();
                }
                _ => write_half.write_all(b"ERROR\r\n").await.unwrap(),
            }
        }
    }

    #[tokio::test]
    async fn wire_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(fake_server(listener));

        let client = MemcachedClient::new("127.0.0.1", port, Duration::from_secs(2));
        assert_eq!(client.get("magma.test").await.unwrap(), None);
        client.set("magma.test", b"value", Duration::from_secs(60)).await.unwrap();
        assert_eq!(client.get("magma.test").await.unwrap(), Some(b"value".to_vec()));
        assert!(!client.add("magma.test", b"other", Duration::from_secs(60)).await.unwrap());
        assert!(client.delete("magma.test").await.unwrap());
        assert!(!client.delete("magma.test").await.unwrap());
    }

    #[test]
    fn key_validation() {
        assert!(valid_key("magma.user.42").is_ok());
        assert!(valid_key("").is_err());
        assert!(valid_key("has space").is_err());
    }
}
