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

//! The connection engine: listener instances, the accept loops, and the
//! hand-off into per-protocol sessions. TLS ports handshake before
//! dispatch; handshake failures destroy the connection silently.

pub mod connection;
pub mod context;
pub mod dispatch;
pub mod resolver;
pub mod stats;
pub mod status;

use std::io;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::config::ServerSpec;
use crate::net::{self, MailStream};

pub use connection::Connection;
pub use context::Magma;
pub use dispatch::{Command, CommandTable, MatchKind};

/// One configured listener, immutable after construction.
pub struct ServerInstance {
    pub spec: ServerSpec,
    /// Present whenever a certificate is configured, for implicit TLS
    /// and for STARTTLS upgrades on plaintext ports.
    pub acceptor: Option<TlsAcceptor>,
    pub line_cap: usize,
}

impl ServerInstance {
    pub fn from_spec(spec: ServerSpec, line_cap: usize) -> io::Result<Self> {
        let acceptor = match (&spec.certificate, &spec.key) {
            (Some(cert), Some(key)) => {
                Some(net::tls_acceptor(net::server_tls_config(cert, key)?))
            }
            _ => None,
        };
        Ok(Self { spec, acceptor, line_cap })
    }

    /// Display label like `POPS` or `POP`, TLS variant included.
    pub fn protocol_label(&self) -> String {
        if self.spec.tls {
            format!("{}S", self.spec.protocol.label())
        } else {
            self.spec.protocol.label().to_string()
        }
    }
}

/// Bind every configured listener and spawn its accept loop. The loops
/// exit when the status goes negative.
pub async fn serve(ctx: Arc<Magma>) -> io::Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(ctx.servers.len());
    for server in &ctx.servers {
        let listener =
            TcpListener::bind((server.spec.address.as_str(), server.spec.port)).await?;
        tracing::info!(
            server = %server.spec.name,
            protocol = %server.protocol_label(),
            port = server.spec.port,
            "listening"
        );
        handles.push(tokio::spawn(accept_loop(ctx.clone(), server.clone(), listener)));
    }
    Ok(handles)
}

async fn accept_loop(ctx: Arc<Magma>, server: Arc<ServerInstance>, listener: TcpListener) {
    let mut shutdown = ctx.status.subscribe();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_connection(ctx.clone(), server.clone(), stream, peer));
                    }
                    Err(e) => {
                        if !ctx.status.online() {
                            break;
                        }
                        tracing::warn!(server = %server.spec.name, error = %e, "accept failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                if !ctx.status.online() {
                    break;
                }
            }
        }
    }
    tracing::info!(server = %server.spec.name, "listener closed");
}

async fn handle_connection(
    ctx: Arc<Magma>,
    server: Arc<ServerInstance>,
    stream: tokio::net::TcpStream,
    peer: std::net::SocketAddr,
) {
    let reverse = ctx.resolver.enqueue(peer);

    // On TLS ports the handshake comes first; a failure is a silent
    // destroy with no statistics movement.
    let stream = if server.spec.tls {
        let Some(acceptor) = server.acceptor.as_ref() else {
            tracing::error!(server = %server.spec.name, "TLS port without an acceptor");
            return;
        };
        match MailStream::accept_tls(acceptor, stream).await {
            Ok(secured) => secured,
            Err(e) => {
                if ctx.status.online() {
                    tracing::debug!(%peer, error = %e, "TLS handshake failed");
                }
                return;
            }
        }
    } else {
        MailStream::Plain(stream)
    };

    let protocol = server.spec.protocol;
    let label = protocol.label().to_ascii_lowercase();
    ctx.stats.increment(&format!("{}.connections.total", label));
    let secure = stream.is_secure();
    if secure {
        ctx.stats.increment(&format!("{}.connections.secure", label));
    }

    let connection = Connection::new(stream, server, peer, reverse);
    crate::protocol::run_session(ctx.clone(), connection).await;

    if secure {
        ctx.stats.decrement(&format!("{}.connections.secure", label));
    }
    ctx.stats.decrement(&format!("{}.connections.total", label));
}
