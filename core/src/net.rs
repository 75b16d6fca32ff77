/*
 * net.rs
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

//! TLS listener helpers: wrap accepted TcpStreams with rustls (implicit
//! TLS ports handshake immediately; STARTTLS upgrades a plain stream
//! after protocol negotiation). A connection is either plain or secure
//! behind the one [`MailStream`] type.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::server::TlsStream as TokioTlsStream;
use tokio_rustls::TlsAcceptor;

/// Load a PEM certificate chain and private key into a rustls server
/// config suitable for both implicit TLS and STARTTLS upgrades.
pub fn server_tls_config(certificate: &Path, key: &Path) -> io::Result<Arc<ServerConfig>> {
    let cert_bytes = std::fs::read(certificate)?;
    let mut cert_reader = io::BufReader::new(&cert_bytes[..]);
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_reader).collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no certificates in {}", certificate.display()),
        ));
    }

    let key_bytes = std::fs::read(key)?;
    let mut key_reader = io::BufReader::new(&key_bytes[..]);
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "no private key in the key file")
        })?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Arc::new(config))
}

pub fn tls_acceptor(config: Arc<ServerConfig>) -> TlsAcceptor {
    TlsAcceptor::from(config)
}

/// Stream for an accepted connection: plain TCP or server-side TLS.
pub enum MailStream {
    Plain(TcpStream),
    Tls(TokioTlsStream<TcpStream>),
}

impl MailStream {
    /// Perform the implicit-TLS handshake on a freshly accepted socket.
    pub async fn accept_tls(acceptor: &TlsAcceptor, tcp: TcpStream) -> io::Result<MailStream> {
        let tls = acceptor.accept(tcp).await?;
        Ok(MailStream::Tls(tls))
    }

    /// Upgrade a plain stream after STARTTLS was accepted. Consumes
    /// `self`; fails if the stream is already secure.
    pub async fn upgrade_to_tls(self, acceptor: &TlsAcceptor) -> io::Result<MailStream> {
        match self {
            MailStream::Plain(tcp) => {
                let tls = acceptor.accept(tcp).await?;
                Ok(MailStream::Tls(tls))
            }
            MailStream::Tls(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "stream is already secure",
            )),
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, MailStream::Tls(_))
    }

    /// Half-close the write side, letting the peer drain in-flight data.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        match self {
            MailStream::Plain(s) => s.shutdown().await,
            MailStream::Tls(s) => s.shutdown().await,
        }
    }
}

impl AsyncRead for MailStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MailStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MailStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MailStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MailStream::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MailStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
