/*
 * connection.rs
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

//! One accepted client connection: the stream, the peer identity, the
//! line buffer, and the spin/violation budgets. Exactly one session
//! task owns a connection at a time; every read is bounded by the
//! server's I/O timeout.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;

use crate::net::MailStream;

use super::resolver::ReverseSlot;
use super::ServerInstance;

/// Default line buffer reservation; the hard cap comes from the server.
const LINE_BUFFER_DEFAULT: usize = 8 * 1024;

pub struct Connection {
    stream: Option<MailStream>,
    pub server: Arc<ServerInstance>,
    pub peer: SocketAddr,
    reverse: ReverseSlot,
    buffer: Vec<u8>,
    pub spins: u32,
    pub violations: u32,
}

impl Connection {
    pub fn new(
        stream: MailStream,
        server: Arc<ServerInstance>,
        peer: SocketAddr,
        reverse: ReverseSlot,
    ) -> Self {
        Self {
            stream: Some(stream),
            server,
            peer,
            reverse,
            buffer: Vec::with_capacity(LINE_BUFFER_DEFAULT),
            spins: 0,
            violations: 0,
        }
    }

    fn stream_mut(&mut self) -> io::Result<&mut MailStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stream was taken"))
    }

    pub fn is_secure(&self) -> bool {
        self.stream.as_ref().map(|s| s.is_secure()).unwrap_or(false)
    }

    /// Reverse DNS name, if the background lookup has delivered one.
    pub fn reverse_name(&self) -> Option<String> {
        self.reverse.get().cloned().flatten()
    }

    /// Read one CRLF-terminated line within the server timeout. The
    /// returned line excludes the terminator. Overlong lines and closed
    /// or timed-out peers surface as errors; the dispatch loop treats
    /// every error as a close.
    pub async fn read_line(&mut self) -> io::Result<String> {
        if self.stream.is_none() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "stream was taken"));
        }
        let deadline = self.server.spec.timeout;
        let cap = self.server.line_cap;
        self.buffer.clear();

        let read = async {
            loop {
                let mut byte = [0u8; 1];
                let n = self.stream.as_mut().unwrap().read(&mut byte).await?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed the connection",
                    ));
                }
                self.buffer.push(byte[0]);
                if self.buffer.len() > cap {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
                }
                if byte[0] == b'\n' {
                    return Ok(());
                }
            }
        };

        timeout(deadline, read)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))??;

        let mut end = self.buffer.len();
        while end > 0 && (self.buffer[end - 1] == b'\n' || self.buffer[end - 1] == b'\r') {
            end -= 1;
        }
        Ok(String::from_utf8_lossy(&self.buffer[..end]).to_string())
    }

    /// Read exactly `len` bytes (HTTP bodies, IMAP literals).
    pub async fn read_exact(&mut self, len: usize) -> io::Result<Vec<u8>> {
        if len > self.server.line_cap * 1024 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "body too large"));
        }
        let deadline = self.server.spec.timeout;
        let mut body = vec![0u8; len];
        let stream = self.stream_mut()?;
        timeout(deadline, stream.read_exact(&mut body))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))??;
        Ok(body)
    }

    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let deadline = self.server.spec.timeout;
        let stream = self.stream_mut()?;
        timeout(deadline, async {
            stream.write_all(line.as_bytes()).await?;
            stream.write_all(b"\r\n").await?;
            stream.flush().await
        })
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))?
    }

    pub async fn write_raw(&mut self, data: &[u8]) -> io::Result<()> {
        let deadline = self.server.spec.timeout;
        let stream = self.stream_mut()?;
        timeout(deadline, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))?
    }

    /// Charge an empty-line spin. True when the combined budget is
    /// exhausted and the connection should close.
    pub fn charge_spin(&mut self) -> bool {
        self.spins += 1;
        self.spins + self.violations > self.server.spec.violations.cutoff
    }

    /// Charge a protocol violation and apply the penalty delay. True
    /// when the budget is exhausted.
    pub async fn charge_violation(&mut self) -> bool {
        self.violations += 1;
        let policy = self.server.spec.violations;
        if !policy.delay.is_zero() {
            tokio::time::sleep(policy.delay).await;
        }
        self.violations > policy.cutoff
    }

    pub fn reset_spins(&mut self) {
        self.spins = 0;
    }

    /// STARTTLS upgrade in place.
    pub async fn upgrade_tls(&mut self, acceptor: &TlsAcceptor) -> io::Result<()> {
        let stream = self
            .stream
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stream was taken"))?;
        match stream.upgrade_to_tls(acceptor).await {
            Ok(secured) => {
                self.stream = Some(secured);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Half-close the stream on the way out.
    pub async fn shutdown(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            let _ = stream.shutdown().await;
        }
    }
}
