/*
 * smtp.rs
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

//! SMTP server: envelope collection, dot-terminated DATA with
//! unstuffing, STARTTLS, AUTH PLAIN/LOGIN over STACIE, and the
//! experimental MODE switch that hands a secured session over to the
//! DMTP machine.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::mail;
use crate::meta::{self, status, FetchMask, Protocol};
use crate::server::{CommandTable, Connection, Magma, MatchKind};
use crate::storage::ObjectKind;

use super::Flow;

/// Upper bound on an accepted message body.
const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Helo,
    Ehlo,
    MailFrom,
    RcptTo,
    Data,
    Rset,
    Noop,
    Quit,
    Starttls,
    AuthPlain,
    AuthLogin,
    Vrfy,
    Help,
    Mode,
}

fn command_table() -> CommandTable<Verb> {
    CommandTable::new(&[
        ("HELO", MatchKind::Prefix, Verb::Helo),
        ("EHLO", MatchKind::Prefix, Verb::Ehlo),
        ("MAIL FROM", MatchKind::Prefix, Verb::MailFrom),
        ("RCPT TO", MatchKind::Prefix, Verb::RcptTo),
        ("DATA", MatchKind::Exact, Verb::Data),
        ("RSET", MatchKind::Exact, Verb::Rset),
        ("NOOP", MatchKind::Prefix, Verb::Noop),
        ("QUIT", MatchKind::Exact, Verb::Quit),
        ("STARTTLS", MatchKind::Exact, Verb::Starttls),
        ("AUTH PLAIN", MatchKind::Prefix, Verb::AuthPlain),
        ("AUTH LOGIN", MatchKind::Prefix, Verb::AuthLogin),
        ("VRFY", MatchKind::Prefix, Verb::Vrfy),
        ("HELP", MatchKind::Prefix, Verb::Help),
        ("MODE", MatchKind::Prefix, Verb::Mode),
    ])
}

struct Envelope {
    sender: Option<String>,
    recipients: Vec<(String, u64)>,
}

impl Envelope {
    fn clear(&mut self) {
        self.sender = None;
        self.recipients.clear();
    }
}

struct Session {
    helo: Option<String>,
    authenticated: Option<u64>,
    envelope: Envelope,
}

/// Pull the address out of `MAIL FROM:<a@b>` / `RCPT TO:<a@b>` syntax.
fn parse_path(args: &str) -> Option<String> {
    let rest = args.trim().trim_start_matches(':').trim();
    let inner = if let Some(start) = rest.find('<') {
        let end = rest.find('>')?;
        if end < start {
            return None;
        }
        &rest[start + 1..end]
    } else {
        rest.split_whitespace().next().unwrap_or("")
    };
    if inner.is_empty() && rest.contains('<') {
        // Null reverse path is legal for MAIL FROM.
        return Some(String::new());
    }
    if inner.is_empty() {
        None
    } else {
        Some(inner.to_string())
    }
}

fn local_part(address: &str) -> &str {
    address.split('@').next().unwrap_or(address)
}

pub async fn run(ctx: Arc<Magma>, mut con: Connection) {
    let table = command_table();
    let mut session = Session {
        helo: None,
        authenticated: None,
        envelope: Envelope { sender: None, recipients: Vec::new() },
    };

    if con
        .write_line(&format!("220 {} ESMTP magma", ctx.hostname()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        if !ctx.status.online() {
            let _ = con.write_line("421 service shutting down").await;
            break;
        }

        let line = match con.read_line().await {
            Ok(line) => line,
            Err(_) => break,
        };

        if line.is_empty() {
            if con.charge_spin() {
                let _ = con.write_line("421 idle budget exhausted").await;
                break;
            }
            continue;
        }

        let Some((command, args)) = table.lookup(&line) else {
            if con.charge_violation().await {
                let _ = con.write_line("421 violation budget exhausted").await;
                break;
            }
            let _ = con.write_line("500 command unrecognized").await;
            continue;
        };
        con.reset_spins();

        let flow = match command.handler {
            Verb::Helo => handle_helo(&ctx, &mut con, &mut session, args, false).await,
            Verb::Ehlo => handle_helo(&ctx, &mut con, &mut session, args, true).await,
            Verb::MailFrom => handle_mail(&mut con, &mut session, args).await,
            Verb::RcptTo => handle_rcpt(&ctx, &mut con, &mut session, args).await,
            Verb::Data => handle_data(&ctx, &mut con, &mut session).await,
            Verb::Rset => {
                session.envelope.clear();
                reply(&mut con, "250 OK").await
            }
            Verb::Noop => reply(&mut con, "250 OK").await,
            Verb::Quit => {
                let _ = con.write_line("221 goodbye").await;
                Flow::Quit
            }
            Verb::Starttls => handle_starttls(&mut con).await,
            Verb::AuthPlain => handle_auth_plain(&ctx, &mut con, &mut session, args).await,
            Verb::AuthLogin => handle_auth_login(&ctx, &mut con, &mut session).await,
            Verb::Vrfy => reply(&mut con, "252 send some mail, I'll try my best").await,
            Verb::Help => reply(&mut con, "214 see RFC 5321").await,
            Verb::Mode => handle_mode(&ctx, &mut con, &mut session, args).await,
        };

        match flow {
            Flow::Continue => {}
            Flow::Quit | Flow::Silent => break,
        }
    }

    if let Some(usernum) = session.authenticated.take() {
        ctx.meta.meta_release(usernum, Protocol::Smtp);
    }
    con.shutdown().await;
}

async fn reply(con: &mut Connection, line: &str) -> Flow {
    if con.write_line(line).await.is_err() {
        Flow::Silent
    } else {
        Flow::Continue
    }
}

async fn handle_helo(
    ctx: &Arc<Magma>,
    con: &mut Connection,
    session: &mut Session,
    args: &str,
    extended: bool,
) -> Flow {
    let domain = args.trim();
    if domain.is_empty() {
        return reply(con, "501 hostname required").await;
    }
    session.helo = Some(domain.to_string());
    session.envelope.clear();

    if !extended {
        return reply(con, &format!("250 {}", ctx.hostname())).await;
    }
    let mut lines = vec![
        format!("250-{} at your service", ctx.hostname()),
        format!("250-SIZE {}", MAX_MESSAGE_SIZE),
        "250-AUTH PLAIN LOGIN".to_string(),
    ];
    if !con.is_secure() && con.server.acceptor.is_some() {
        lines.push("250-STARTTLS".to_string());
    }
    lines.push("250 MODE".to_string());
    for line in lines {
        if con.write_line(&line).await.is_err() {
            return Flow::Silent;
        }
    }
    Flow::Continue
}

async fn handle_mail(con: &mut Connection, session: &mut Session, args: &str) -> Flow {
    if session.helo.is_none() {
        return reply(con, "503 say hello first").await;
    }
    let Some(sender) = parse_path(args) else {
        return reply(con, "501 syntax: MAIL FROM:<address>").await;
    };
    session.envelope.clear();
    session.envelope.sender = Some(sender);
    reply(con, "250 OK").await
}

async fn handle_rcpt(
    ctx: &Arc<Magma>,
    con: &mut Connection,
    session: &mut Session,
    args: &str,
) -> Flow {
    if session.envelope.sender.is_none() {
        return reply(con, "503 need MAIL before RCPT").await;
    }
    let Some(address) = parse_path(args).filter(|a| !a.is_empty()) else {
        return reply(con, "501 syntax: RCPT TO:<address>").await;
    };

    match ctx.source.user_by_username(local_part(&address)).await {
        Ok(Some(record)) => {
            session.envelope.recipients.push((address, record.usernum));
            reply(con, "250 OK").await
        }
        Ok(None) => reply(con, "550 no such mailbox here").await,
        Err(e) => {
            tracing::warn!(error = %e, "recipient lookup failed");
            reply(con, "451 temporary failure, try again later").await
        }
    }
}

/// Read the dot-terminated body, removing the transparency dots.
async fn read_data_body(con: &mut Connection) -> Result<Option<Vec<u8>>, ()> {
    let mut body = Vec::new();
    loop {
        let line = match con.read_line().await {
            Ok(line) => line,
            Err(_) => return Err(()),
        };
        if line == "." {
            return Ok(Some(body));
        }
        let text = if let Some(stripped) = line.strip_prefix('.') {
            stripped
        } else {
            line.as_str()
        };
        body.extend_from_slice(text.as_bytes());
        body.extend_from_slice(b"\r\n");
        if body.len() > MAX_MESSAGE_SIZE {
            return Ok(None);
        }
    }
}

async fn handle_data(ctx: &Arc<Magma>, con: &mut Connection, session: &mut Session) -> Flow {
    if session.envelope.recipients.is_empty() {
        return reply(con, "503 need RCPT before DATA").await;
    }
    if con.write_line("354 end data with <CRLF>.<CRLF>").await.is_err() {
        return Flow::Silent;
    }

    // DATA consumes follow-on lines inline, outside the dispatch loop.
    let body = match read_data_body(con).await {
        Ok(Some(body)) => body,
        Ok(None) => return reply(con, "552 message exceeds the size limit").await,
        Err(()) => return Flow::Silent,
    };

    let root = ctx.storage_root();
    let server_tag = ctx.active_server();
    let mut delivered = 0usize;
    for (address, usernum) in session.envelope.recipients.clone() {
        let foldernum = super::inbox_foldernum(ctx.source.as_ref(), usernum).await;

        let inserted = ctx
            .source
            .insert_message(usernum, foldernum, &server_tag, status::RECENT, body.len() as u64)
            .await;
        match inserted {
            Ok(messagenum) => {
                if let Err(e) = mail::store_message(&root, &server_tag, messagenum, &body).await {
                    tracing::error!(messagenum, error = %e, "body write failed after row insert");
                    let _ = ctx.source.delete_message(usernum, messagenum).await;
                    continue;
                }
                let _ = ctx.counters.increment(ObjectKind::Messages, usernum).await;
                delivered += 1;
                tracing::debug!(%address, messagenum, "message accepted");
            }
            Err(e) => {
                tracing::error!(%address, error = %e, "message insert failed");
            }
        }
    }

    session.envelope.clear();
    if delivered == 0 {
        reply(con, "451 delivery failed, try again later").await
    } else {
        reply(con, "250 OK message accepted for delivery").await
    }
}

async fn handle_starttls(con: &mut Connection) -> Flow {
    if con.is_secure() {
        return reply(con, "454 session already secure").await;
    }
    let Some(acceptor) = con.server.acceptor.clone() else {
        return reply(con, "454 TLS unavailable").await;
    };
    if con.write_line("220 ready to start TLS").await.is_err() {
        return Flow::Silent;
    }
    match con.upgrade_tls(&acceptor).await {
        Ok(()) => Flow::Continue,
        Err(e) => {
            tracing::debug!(error = %e, "STARTTLS upgrade failed");
            Flow::Silent
        }
    }
}

async fn authenticate(
    ctx: &Arc<Magma>,
    session: &mut Session,
    username: &str,
    password: &str,
) -> Result<(), meta::AuthError> {
    let outcome =
        meta::login(&ctx.meta, username, password, Protocol::Smtp, FetchMask::NONE).await?;
    session.authenticated = Some(outcome.user.usernum);
    Ok(())
}

/// AUTH PLAIN: base64 of `authzid NUL authcid NUL password`.
fn parse_plain(initial: &str) -> Option<(String, String)> {
    let decoded = BASE64.decode(initial.trim().as_bytes()).ok()?;
    let mut parts = decoded.split(|&b| b == 0);
    let _authzid = parts.next()?;
    let authcid = String::from_utf8(parts.next()?.to_vec()).ok()?;
    let password = String::from_utf8(parts.next()?.to_vec()).ok()?;
    Some((authcid, password))
}

async fn handle_auth_plain(
    ctx: &Arc<Magma>,
    con: &mut Connection,
    session: &mut Session,
    args: &str,
) -> Flow {
    if session.authenticated.is_some() {
        return reply(con, "503 already authenticated").await;
    }
    let initial = if args.trim().is_empty() {
        if con.write_line("334 ").await.is_err() {
            return Flow::Silent;
        }
        match con.read_line().await {
            Ok(line) => line,
            Err(_) => return Flow::Silent,
        }
    } else {
        args.trim().to_string()
    };

    let Some((username, password)) = parse_plain(&initial) else {
        return reply(con, "501 malformed AUTH response").await;
    };
    match authenticate(ctx, session, &username, &password).await {
        Ok(()) => reply(con, "235 authentication successful").await,
        Err(meta::AuthError::Transient(_)) => reply(con, "454 temporary failure").await,
        Err(_) => reply(con, "535 authentication failed").await,
    }
}

async fn handle_auth_login(ctx: &Arc<Magma>, con: &mut Connection, session: &mut Session) -> Flow {
    if session.authenticated.is_some() {
        return reply(con, "503 already authenticated").await;
    }
    // Challenge "Username:" then "Password:", both base64.
    if con.write_line("334 VXNlcm5hbWU6").await.is_err() {
        return Flow::Silent;
    }
    let Ok(user_line) = con.read_line().await else {
        return Flow::Silent;
    };
    if con.write_line("334 UGFzc3dvcmQ6").await.is_err() {
        return Flow::Silent;
    }
    let Ok(pass_line) = con.read_line().await else {
        return Flow::Silent;
    };

    let decoded = (
        BASE64.decode(user_line.trim().as_bytes()).ok().and_then(|b| String::from_utf8(b).ok()),
        BASE64.decode(pass_line.trim().as_bytes()).ok().and_then(|b| String::from_utf8(b).ok()),
    );
    let (Some(username), Some(password)) = decoded else {
        return reply(con, "501 malformed AUTH response").await;
    };
    match authenticate(ctx, session, &username, &password).await {
        Ok(()) => reply(con, "235 authentication successful").await,
        Err(meta::AuthError::Transient(_)) => reply(con, "454 temporary failure").await,
        Err(_) => reply(con, "535 authentication failed").await,
    }
}

/// The experimental SMTP-to-DMTP switch: a secured session may move to
/// the DMTP command machine mid-connection.
async fn handle_mode(
    ctx: &Arc<Magma>,
    con: &mut Connection,
    session: &mut Session,
    args: &str,
) -> Flow {
    let target = args.trim().to_ascii_uppercase();
    if target.is_empty() {
        return reply(con, "250 MODE SMTP").await;
    }
    if target != "DMTP" {
        return reply(con, "504 unknown mode").await;
    }
    if !con.is_secure() {
        return reply(con, "538 DMTP mode requires TLS").await;
    }
    if con.write_line("250 OK entering DMTP mode").await.is_err() {
        return Flow::Silent;
    }
    if let Some(usernum) = session.authenticated.take() {
        ctx.meta.meta_release(usernum, Protocol::Smtp);
    }
    super::dmtp::continue_session(ctx.clone(), con).await;
    Flow::Silent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_parsing() {
        assert_eq!(parse_path(":<bob@example.com>"), Some("bob@example.com".to_string()));
        assert_eq!(parse_path(": <bob@example.com>"), Some("bob@example.com".to_string()));
        assert_eq!(parse_path(":<>"), Some(String::new()));
        assert_eq!(parse_path(":bob@example.com"), Some("bob@example.com".to_string()));
        assert_eq!(parse_path(""), None);
        assert_eq!(local_part("bob@example.com"), "bob");
    }

    #[test]
    fn auth_plain_decoding() {
        // "\0bob\0secret"
        let encoded = BASE64.encode(b"\0bob\0secret");
        assert_eq!(parse_plain(&encoded), Some(("bob".to_string(), "secret".to_string())));
        assert_eq!(parse_plain("not base64!!"), None);
    }
}
