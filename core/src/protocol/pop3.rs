/*
 * pop3.rs
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

//! POP3 server: USER/PASS authentication, the enumeration commands over
//! the filtered mailbox view, deletion marks expunged at QUIT. Messages
//! created by IMAP APPEND and hidden messages never appear in the view;
//! sequence numbers are a dense 1-based renumbering of what remains.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::index::Index;
use crate::mail;
use crate::meta::{self, status, FetchMask, MetaMessage, MetaUser, Protocol};
use crate::server::{CommandTable, Connection, Magma, MatchKind};
use crate::storage::ObjectKind;

use super::Flow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    User,
    Pass,
    Stat,
    List,
    Uidl,
    Retr,
    Top,
    Dele,
    Rset,
    Noop,
    Last,
    Capa,
    Stls,
    Starttls,
    Quit,
}

fn command_table() -> CommandTable<Verb> {
    CommandTable::new(&[
        ("USER", MatchKind::Prefix, Verb::User),
        ("PASS", MatchKind::Prefix, Verb::Pass),
        ("STAT", MatchKind::Exact, Verb::Stat),
        ("LIST", MatchKind::Prefix, Verb::List),
        ("UIDL", MatchKind::Prefix, Verb::Uidl),
        ("RETR", MatchKind::Prefix, Verb::Retr),
        ("TOP", MatchKind::Prefix, Verb::Top),
        ("DELE", MatchKind::Prefix, Verb::Dele),
        ("RSET", MatchKind::Exact, Verb::Rset),
        ("NOOP", MatchKind::Exact, Verb::Noop),
        ("LAST", MatchKind::Exact, Verb::Last),
        ("CAPA", MatchKind::Exact, Verb::Capa),
        ("STLS", MatchKind::Exact, Verb::Stls),
        ("STARTTLS", MatchKind::Exact, Verb::Starttls),
        ("QUIT", MatchKind::Exact, Verb::Quit),
    ])
}

/// Messages visible to POP3, in ascending message number order.
pub fn visible_messages(messages: &Index<MetaMessage>) -> Vec<MetaMessage> {
    let mut out = Vec::new();
    let mut cursor = messages.cursor();
    while let Some(message) = cursor.next_value() {
        if !message.has_any(status::APPENDED | status::HIDDEN) {
            out.push(message);
        }
    }
    out
}

/// Count and total size of the visible view.
pub fn mailbox_totals(messages: &Index<MetaMessage>) -> (u64, u64) {
    let visible = visible_messages(messages);
    let size = visible.iter().map(|m| m.size).sum();
    (visible.len() as u64, size)
}

/// The LAST boundary: the highest visible sequence number before the
/// first message still flagged recent.
pub fn last_boundary(messages: &Index<MetaMessage>) -> u64 {
    let mut sequence = 0u64;
    for message in visible_messages(messages) {
        if message.has(status::RECENT) {
            return sequence;
        }
        sequence += 1;
    }
    sequence
}

/// Resolve a 1-based POP3 sequence number in the visible view.
pub fn message_by_sequence(messages: &Index<MetaMessage>, sequence: u64) -> Option<MetaMessage> {
    if sequence == 0 {
        return None;
    }
    visible_messages(messages).into_iter().nth(sequence as usize - 1)
}

struct Session {
    user: Option<Arc<MetaUser>>,
    pending_user: Option<String>,
    /// Message numbers marked by DELE, expunged at QUIT.
    deleted: BTreeSet<u64>,
}

impl Session {
    fn new() -> Self {
        Self { user: None, pending_user: None, deleted: BTreeSet::new() }
    }

    fn authenticated(&self) -> Option<&Arc<MetaUser>> {
        self.user.as_ref()
    }
}

pub async fn run(ctx: Arc<Magma>, mut con: Connection) {
    let table = command_table();
    let mut session = Session::new();

    if con
        .write_line(&format!("+OK {} POP3 service ready", ctx.hostname()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        if !ctx.status.online() {
            let _ = con.write_line("-ERR service shutting down").await;
            break;
        }

        let line = match con.read_line().await {
            Ok(line) => line,
            Err(_) => break,
        };

        if line.is_empty() {
            if con.charge_spin() {
                let _ = con.write_line("-ERR too many idle turns").await;
                break;
            }
            continue;
        }

        let Some((command, args)) = table.lookup(&line) else {
            if con.charge_violation().await {
                let _ = con.write_line("-ERR protocol violation limit reached").await;
                break;
            }
            let _ = con.write_line("-ERR invalid command").await;
            continue;
        };
        con.reset_spins();

        let flow = match command.handler {
            Verb::User => handle_user(&mut con, &mut session, args).await,
            Verb::Pass => handle_pass(&ctx, &mut con, &mut session, args).await,
            Verb::Stat => handle_stat(&mut con, &session).await,
            Verb::List => handle_list(&mut con, &session, args).await,
            Verb::Uidl => handle_uidl(&mut con, &session, args).await,
            Verb::Retr => handle_retr(&ctx, &mut con, &session, args).await,
            Verb::Top => handle_top(&ctx, &mut con, &session, args).await,
            Verb::Dele => handle_dele(&mut con, &mut session, args).await,
            Verb::Rset => handle_rset(&mut con, &mut session).await,
            Verb::Noop => reply(&mut con, "+OK").await,
            Verb::Last => handle_last(&mut con, &session).await,
            Verb::Capa => handle_capa(&mut con).await,
            Verb::Stls | Verb::Starttls => handle_stls(&mut con, &session).await,
            Verb::Quit => handle_quit(&ctx, &mut con, &mut session).await,
        };

        match flow {
            Flow::Continue => {}
            Flow::Quit | Flow::Silent => break,
        }
    }

    if let Some(user) = session.user.take() {
        ctx.meta.meta_release(user.usernum, Protocol::Pop);
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

async fn handle_user(con: &mut Connection, session: &mut Session, args: &str) -> Flow {
    if session.user.is_some() {
        return reply(con, "-ERR session already authenticated").await;
    }
    let username = args.trim();
    if username.is_empty() {
        return reply(con, "-ERR the USER command requires a mailbox name").await;
    }
    session.pending_user = Some(username.to_string());
    reply(con, "+OK").await
}

async fn handle_pass(
    ctx: &Arc<Magma>,
    con: &mut Connection,
    session: &mut Session,
    args: &str,
) -> Flow {
    if session.user.is_some() {
        return reply(con, "-ERR session already authenticated").await;
    }
    let Some(username) = session.pending_user.take() else {
        return reply(con, "-ERR send USER first").await;
    };
    match meta::login(
        &ctx.meta,
        &username,
        args,
        Protocol::Pop,
        FetchMask::MESSAGES.with(FetchMask::FOLDERS),
    )
    .await
    {
        Ok(outcome) => {
            let (count, size) = mailbox_totals(&outcome.user.messages);
            session.user = Some(outcome.user);
            reply(con, &format!("+OK maildrop has {} messages ({} octets)", count, size)).await
        }
        Err(meta::AuthError::Transient(e)) => {
            tracing::warn!(error = %e, "POP3 login hit a transient failure");
            reply(con, "-ERR temporary failure, try again later").await
        }
        Err(_) => reply(con, "-ERR invalid credentials").await,
    }
}

async fn handle_stat(con: &mut Connection, session: &Session) -> Flow {
    let Some(user) = session.authenticated() else {
        return reply(con, "-ERR authenticate first").await;
    };
    let _snapshot = user.read_lock().await;
    let (count, size) = mailbox_totals(&user.messages);
    reply(con, &format!("+OK {} {}", count, size)).await
}

async fn handle_list(con: &mut Connection, session: &Session, args: &str) -> Flow {
    let Some(user) = session.authenticated() else {
        return reply(con, "-ERR authenticate first").await;
    };
    let _snapshot = user.read_lock().await;
    let visible = visible_messages(&user.messages);

    let args = args.trim();
    if !args.is_empty() {
        let Some(message) = args.parse().ok().and_then(|n| message_by_sequence(&user.messages, n))
        else {
            return reply(con, "-ERR no such message").await;
        };
        let sequence: u64 = args.parse().unwrap_or(0);
        return reply(con, &format!("+OK {} {}", sequence, message.size)).await;
    }

    if con.write_line(&format!("+OK {} messages", visible.len())).await.is_err() {
        return Flow::Silent;
    }
    for (position, message) in visible.iter().enumerate() {
        if con.write_line(&format!("{} {}", position + 1, message.size)).await.is_err() {
            return Flow::Silent;
        }
    }
    reply(con, ".").await
}

async fn handle_uidl(con: &mut Connection, session: &Session, args: &str) -> Flow {
    let Some(user) = session.authenticated() else {
        return reply(con, "-ERR authenticate first").await;
    };
    let _snapshot = user.read_lock().await;

    let args = args.trim();
    if !args.is_empty() {
        let Some(message) = args.parse().ok().and_then(|n| message_by_sequence(&user.messages, n))
        else {
            return reply(con, "-ERR no such message").await;
        };
        return reply(con, &format!("+OK {} {}", args, message.messagenum)).await;
    }

    if con.write_line("+OK").await.is_err() {
        return Flow::Silent;
    }
    for (position, message) in visible_messages(&user.messages).iter().enumerate() {
        if con
            .write_line(&format!("{} {}", position + 1, message.messagenum))
            .await
            .is_err()
        {
            return Flow::Silent;
        }
    }
    reply(con, ".").await
}

async fn send_body(con: &mut Connection, body: &[u8], top_lines: Option<u64>) -> Flow {
    // Dot-stuff on the way out: a line starting with '.' gains one.
    let text = String::from_utf8_lossy(body);
    let mut headers_done = false;
    let mut body_lines = 0u64;
    for line in text.split("\r\n") {
        if headers_done {
            if let Some(limit) = top_lines {
                if body_lines >= limit {
                    break;
                }
                body_lines += 1;
            }
        } else if line.is_empty() {
            headers_done = true;
            if top_lines == Some(0) {
                if con.write_line("").await.is_err() {
                    return Flow::Silent;
                }
                break;
            }
        }
        let stuffed;
        let out = if line.starts_with('.') {
            stuffed = format!(".{}", line);
            stuffed.as_str()
        } else {
            line
        };
        if con.write_line(out).await.is_err() {
            return Flow::Silent;
        }
    }
    reply(con, ".").await
}

async fn handle_retr(
    ctx: &Arc<Magma>,
    con: &mut Connection,
    session: &Session,
    args: &str,
) -> Flow {
    let Some(user) = session.authenticated() else {
        return reply(con, "-ERR authenticate first").await;
    };
    let message = {
        let _snapshot = user.read_lock().await;
        args.trim().parse().ok().and_then(|n| message_by_sequence(&user.messages, n))
    };
    let Some(message) = message else {
        return reply(con, "-ERR no such message").await;
    };
    match mail::load_message(&ctx.storage_root(), &message.server, message.messagenum).await {
        Ok(body) => {
            if con.write_line(&format!("+OK {} octets", message.size)).await.is_err() {
                return Flow::Silent;
            }
            send_body(con, &body, None).await
        }
        Err(e) => {
            tracing::error!(messagenum = message.messagenum, error = %e, "message body unreadable");
            reply(con, "-ERR message unavailable").await
        }
    }
}

async fn handle_top(ctx: &Arc<Magma>, con: &mut Connection, session: &Session, args: &str) -> Flow {
    let Some(user) = session.authenticated() else {
        return reply(con, "-ERR authenticate first").await;
    };
    let mut parts = args.split_whitespace();
    let sequence: Option<u64> = parts.next().and_then(|s| s.parse().ok());
    let lines: Option<u64> = parts.next().and_then(|s| s.parse().ok());
    let (Some(sequence), Some(lines)) = (sequence, lines) else {
        return reply(con, "-ERR usage: TOP msg lines").await;
    };
    let message = {
        let _snapshot = user.read_lock().await;
        message_by_sequence(&user.messages, sequence)
    };
    let Some(message) = message else {
        return reply(con, "-ERR no such message").await;
    };
    match mail::load_message(&ctx.storage_root(), &message.server, message.messagenum).await {
        Ok(body) => {
            if con.write_line("+OK").await.is_err() {
                return Flow::Silent;
            }
            send_body(con, &body, Some(lines)).await
        }
        Err(_) => reply(con, "-ERR message unavailable").await,
    }
}

async fn handle_dele(con: &mut Connection, session: &mut Session, args: &str) -> Flow {
    let Some(user) = session.authenticated() else {
        return reply(con, "-ERR authenticate first").await;
    };
    let message = {
        let _snapshot = user.read_lock().await;
        args.trim().parse().ok().and_then(|n| message_by_sequence(&user.messages, n))
    };
    let Some(message) = message else {
        return reply(con, "-ERR no such message").await;
    };
    session.deleted.insert(message.messagenum);
    reply(con, &format!("+OK message {} deleted", args.trim())).await
}

async fn handle_rset(con: &mut Connection, session: &mut Session) -> Flow {
    if session.authenticated().is_none() {
        return reply(con, "-ERR authenticate first").await;
    }
    session.deleted.clear();
    reply(con, "+OK").await
}

async fn handle_last(con: &mut Connection, session: &Session) -> Flow {
    let Some(user) = session.authenticated() else {
        return reply(con, "-ERR authenticate first").await;
    };
    let _snapshot = user.read_lock().await;
    reply(con, &format!("+OK {}", last_boundary(&user.messages))).await
}

async fn handle_capa(con: &mut Connection) -> Flow {
    for line in ["+OK capability list follows", "USER", "TOP", "UIDL", "STLS", "."] {
        if con.write_line(line).await.is_err() {
            return Flow::Silent;
        }
    }
    Flow::Continue
}

async fn handle_stls(con: &mut Connection, session: &Session) -> Flow {
    if session.user.is_some() {
        return reply(con, "-ERR STLS only permitted before authentication").await;
    }
    if con.is_secure() {
        return reply(con, "-ERR session already secure").await;
    }
    let Some(acceptor) = con.server.acceptor.clone() else {
        return reply(con, "-ERR TLS unavailable").await;
    };
    if con.write_line("+OK begin TLS negotiation").await.is_err() {
        return Flow::Silent;
    }
    match con.upgrade_tls(&acceptor).await {
        Ok(()) => Flow::Continue,
        Err(e) => {
            tracing::debug!(error = %e, "STLS upgrade failed");
            Flow::Silent
        }
    }
}

async fn handle_quit(ctx: &Arc<Magma>, con: &mut Connection, session: &mut Session) -> Flow {
    if let Some(user) = session.authenticated() {
        let root = ctx.storage_root();
        let deleted: Vec<u64> = session.deleted.iter().copied().collect();
        if !deleted.is_empty() {
            let _hold = user.write_lock().await;
            for messagenum in deleted {
                let Some(message) = user.messages.find(&crate::index::Multi::U64(messagenum))
                else {
                    continue;
                };
                match mail::remove_message(
                    ctx.source.as_ref(),
                    &root,
                    &message.server,
                    user.usernum,
                    messagenum,
                )
                .await
                {
                    Ok(true) => {
                        user.messages.delete(&crate::index::Multi::U64(messagenum));
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(messagenum, error = %e, "expunge failed");
                    }
                }
            }
            user.bump_serial(&ctx.counters, ObjectKind::Messages).await;
        }
    }
    let _ = con.write_line("+OK goodbye").await;
    Flow::Quit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexKind, LockMode};

    fn message(messagenum: u64, size: u64, flags: u32) -> MetaMessage {
        MetaMessage {
            messagenum,
            foldernum: 1,
            server: "local".into(),
            status: flags,
            size,
            signature_num: 0,
            signature_key: 0,
            created: 0,
            tags: Vec::new(),
        }
    }

    fn mailbox(messages: &[MetaMessage]) -> Index<MetaMessage> {
        let index = Index::new(IndexKind::Tree, LockMode::Automatic);
        for m in messages {
            index.insert(m.key(), m.clone());
        }
        index
    }

    #[test]
    fn enumeration_excludes_appended() {
        // Five messages, number three APPENDED: STAT counts four and
        // the dense renumbering maps 1..4 onto {1, 2, 4, 5}.
        let index = mailbox(&[
            message(1, 10, 0),
            message(2, 20, 0),
            message(3, 30, status::APPENDED),
            message(4, 40, 0),
            message(5, 50, 0),
        ]);
        let (count, size) = mailbox_totals(&index);
        assert_eq!(count, 4);
        assert_eq!(size, 120);

        let ids: Vec<u64> =
            visible_messages(&index).iter().map(|m| m.messagenum).collect();
        assert_eq!(ids, vec![1, 2, 4, 5]);
        assert_eq!(message_by_sequence(&index, 3).unwrap().messagenum, 4);
        assert!(message_by_sequence(&index, 5).is_none());
        assert!(message_by_sequence(&index, 0).is_none());
    }

    #[test]
    fn hidden_messages_invisible() {
        let index = mailbox(&[
            message(1, 10, 0),
            message(2, 20, status::HIDDEN),
            message(3, 30, 0),
        ]);
        let (count, size) = mailbox_totals(&index);
        assert_eq!(count, 2);
        assert_eq!(size, 40);
        assert_eq!(message_by_sequence(&index, 2).unwrap().messagenum, 3);
    }

    #[test]
    fn last_boundary_before_first_recent() {
        let index = mailbox(&[
            message(1, 10, status::SEEN),
            message(2, 20, 0),
            message(3, 30, status::RECENT),
            message(4, 40, status::RECENT),
        ]);
        assert_eq!(last_boundary(&index), 2);

        let all_old = mailbox(&[message(1, 10, 0), message(2, 20, 0)]);
        assert_eq!(last_boundary(&all_old), 2);

        let all_new = mailbox(&[message(1, 10, status::RECENT)]);
        assert_eq!(last_boundary(&all_new), 0);
    }
}
