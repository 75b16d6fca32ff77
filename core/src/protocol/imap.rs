/*
 * imap.rs
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

//! IMAP server subset around the mailbox model: tagged commands,
//! LOGIN/SELECT/EXAMINE/CLOSE, serial-checkpointed session updates, and
//! the recent-clear rule — closing a writable selected folder clears
//! RECENT from every message in it.

use std::sync::Arc;

use crate::mail;
use crate::meta::{
    self, folder_by_full_name, folder_full_name, status, FetchMask, MetaMessage, MetaUser,
    Protocol,
};
use crate::server::{CommandTable, Connection, Magma, MatchKind};
use crate::storage::ObjectKind;

use super::Flow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Capability,
    Noop,
    Logout,
    Login,
    List,
    Select,
    Examine,
    Close,
    Check,
    Status,
    Fetch,
    Starttls,
}

fn command_table() -> CommandTable<Verb> {
    CommandTable::new(&[
        ("CAPABILITY", MatchKind::Exact, Verb::Capability),
        ("NOOP", MatchKind::Exact, Verb::Noop),
        ("LOGOUT", MatchKind::Exact, Verb::Logout),
        ("LOGIN", MatchKind::Prefix, Verb::Login),
        ("LIST", MatchKind::Prefix, Verb::List),
        ("SELECT", MatchKind::Prefix, Verb::Select),
        ("EXAMINE", MatchKind::Prefix, Verb::Examine),
        ("CLOSE", MatchKind::Exact, Verb::Close),
        ("CHECK", MatchKind::Exact, Verb::Check),
        ("STATUS", MatchKind::Prefix, Verb::Status),
        ("FETCH", MatchKind::Prefix, Verb::Fetch),
        ("STARTTLS", MatchKind::Exact, Verb::Starttls),
    ])
}

/// Result of the three-phase serial comparison against the cluster
/// counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionUpdate {
    Unchanged,
    /// The selected folder moved; report the new counts to the client.
    Changed { recent: u64, exists: u64 },
    /// The counters or the source were unreachable; retry later.
    Transient,
}

/// Per-session IMAP state.
pub struct Session {
    pub user: Option<Arc<MetaUser>>,
    pub selected: u64,
    pub read_only: bool,
    user_checkpoint: u64,
    folders_checkpoint: u64,
    messages_checkpoint: u64,
    pub recent: u64,
    pub exists: u64,
}

impl Session {
    pub fn new() -> Self {
        Self {
            user: None,
            selected: 0,
            read_only: false,
            user_checkpoint: 0,
            folders_checkpoint: 0,
            messages_checkpoint: 0,
            recent: 0,
            exists: 0,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a 1-based sequence number within a folder's IMAP view
/// (hidden messages excluded). Sequence zero never resolves.
fn message_by_folder_sequence(
    user: &MetaUser,
    foldernum: u64,
    sequence: u64,
) -> Option<MetaMessage> {
    if sequence == 0 {
        return None;
    }
    let mut position = 0u64;
    let mut cursor = user.messages.cursor();
    while let Some(message) = cursor.next_value() {
        if message.foldernum == foldernum && !message.has(status::HIDDEN) {
            position += 1;
            if position == sequence {
                return Some(message);
            }
        }
    }
    None
}

/// Count (recent, exists) for one folder.
fn folder_counts(user: &MetaUser, foldernum: u64) -> (u64, u64) {
    let mut recent = 0;
    let mut exists = 0;
    let mut cursor = user.messages.cursor();
    while let Some(message) = cursor.next_value() {
        if message.foldernum == foldernum && !message.has(status::HIDDEN) {
            exists += 1;
            if message.has(status::RECENT) {
                recent += 1;
            }
        }
    }
    (recent, exists)
}

/// Three-phase refresh: user, folders, messages, each fetched only when
/// its cluster serial has moved past the session checkpoint.
pub async fn session_update(ctx: &Magma, session: &mut Session) -> SessionUpdate {
    let Some(user) = session.user.clone() else {
        return SessionUpdate::Transient;
    };
    if session.selected == 0 {
        return SessionUpdate::Transient;
    }

    let mut report = None;

    let checkpoint = match ctx.counters.get(ObjectKind::User, user.usernum).await {
        Ok(v) => v,
        Err(_) => return SessionUpdate::Transient,
    };
    if checkpoint != session.user_checkpoint {
        if user.refresh(ctx.source.as_ref(), &ctx.counters, FetchMask::NONE).await.is_err() {
            return SessionUpdate::Transient;
        }
        session.user_checkpoint = checkpoint;
    }

    let checkpoint = match ctx.counters.get(ObjectKind::Folders, user.usernum).await {
        Ok(v) => v,
        Err(_) => return SessionUpdate::Transient,
    };
    if checkpoint != session.folders_checkpoint {
        if user
            .refresh(ctx.source.as_ref(), &ctx.counters, FetchMask::FOLDERS)
            .await
            .is_err()
        {
            return SessionUpdate::Transient;
        }
        session.folders_checkpoint = checkpoint;
    }

    let checkpoint = match ctx.counters.get(ObjectKind::Messages, user.usernum).await {
        Ok(v) => v,
        Err(_) => return SessionUpdate::Transient,
    };
    if checkpoint != session.messages_checkpoint {
        if user
            .refresh(ctx.source.as_ref(), &ctx.counters, FetchMask::MESSAGES)
            .await
            .is_err()
        {
            return SessionUpdate::Transient;
        }
        let _snapshot = user.read_lock().await;
        let (recent, exists) = folder_counts(&user, session.selected);
        if recent != session.recent || exists != session.exists {
            session.recent = recent;
            session.exists = exists;
            report = Some((recent, exists));
        }
        session.messages_checkpoint = checkpoint;
    }

    match report {
        Some((recent, exists)) => SessionUpdate::Changed { recent, exists },
        None => SessionUpdate::Unchanged,
    }
}

/// Clear RECENT from every message of a folder, both in the shared
/// projection and in storage, then advance the messages serial. Runs
/// under the user write lock.
pub async fn clear_recent(
    source: &dyn crate::storage::MetaSource,
    counters: &crate::storage::SerialCounters,
    user: &MetaUser,
    foldernum: u64,
) -> u64 {
    let _hold = user.write_lock().await;
    let mut cleared = 0;
    let mut cursor = user.messages.cursor();
    while let Some(mut message) = cursor.next_value() {
        if message.foldernum == foldernum && message.has(status::RECENT) {
            message.status &= !status::RECENT;
            if let Err(e) = source
                .update_message_status(user.usernum, message.messagenum, message.status)
                .await
            {
                tracing::warn!(messagenum = message.messagenum, error = %e, "recent clear not persisted");
            }
            user.messages.replace(message.key(), message);
            cleared += 1;
        }
    }
    if cleared > 0 {
        user.bump_serial(counters, ObjectKind::Messages).await;
    }
    cleared
}

/// Close the selected mailbox: writable sessions clear RECENT first.
pub async fn close_selected(ctx: &Magma, session: &mut Session) {
    if let Some(user) = session.user.clone() {
        if session.selected != 0 && !session.read_only {
            clear_recent(ctx.source.as_ref(), &ctx.counters, &user, session.selected).await;
        }
    }
    session.selected = 0;
    session.read_only = false;
    session.recent = 0;
    session.exists = 0;
}

pub async fn run(ctx: Arc<Magma>, mut con: Connection) {
    let table = command_table();
    let mut session = Session::new();

    if con
        .write_line(&format!("* OK {} IMAP service ready", ctx.hostname()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        if !ctx.status.online() {
            let _ = con.write_line("* BYE server shutting down").await;
            break;
        }

        let line = match con.read_line().await {
            Ok(line) => line,
            Err(_) => break,
        };

        if line.is_empty() {
            if con.charge_spin() {
                let _ = con.write_line("* BYE idle budget exhausted").await;
                break;
            }
            continue;
        }

        // IMAP prefixes every command with a client tag.
        let Some((tag, rest)) = line.split_once(' ') else {
            if con.charge_violation().await {
                let _ = con.write_line("* BYE violation budget exhausted").await;
                break;
            }
            let _ = con.write_line("* BAD missing command").await;
            continue;
        };

        let Some((command, args)) = table.lookup(rest) else {
            if con.charge_violation().await {
                let _ = con.write_line("* BYE violation budget exhausted").await;
                break;
            }
            let _ = con.write_line(&format!("{} BAD unrecognized command", tag)).await;
            continue;
        };
        con.reset_spins();

        let flow = match command.handler {
            Verb::Capability => handle_capability(&mut con, tag).await,
            Verb::Noop => handle_noop(&ctx, &mut con, &mut session, tag).await,
            Verb::Logout => handle_logout(&ctx, &mut con, &mut session, tag).await,
            Verb::Login => handle_login(&ctx, &mut con, &mut session, tag, args).await,
            Verb::List => handle_list(&mut con, &session, tag).await,
            Verb::Select => handle_select(&ctx, &mut con, &mut session, tag, args, false).await,
            Verb::Examine => handle_select(&ctx, &mut con, &mut session, tag, args, true).await,
            Verb::Close => handle_close(&ctx, &mut con, &mut session, tag).await,
            Verb::Check => handle_check(&ctx, &mut con, &mut session, tag).await,
            Verb::Status => handle_status(&mut con, &session, tag, args).await,
            Verb::Fetch => handle_fetch(&ctx, &mut con, &session, tag, args).await,
            Verb::Starttls => handle_starttls(&mut con, tag).await,
        };

        match flow {
            Flow::Continue => {}
            Flow::Quit | Flow::Silent => break,
        }
    }

    // Session teardown mirrors LOGOUT: recent-clear, then release.
    close_selected(&ctx, &mut session).await;
    if let Some(user) = session.user.take() {
        ctx.meta.meta_release(user.usernum, Protocol::Imap);
    }
    con.shutdown().await;
}

async fn respond(con: &mut Connection, lines: &[String]) -> Flow {
    for line in lines {
        if con.write_line(line).await.is_err() {
            return Flow::Silent;
        }
    }
    Flow::Continue
}

async fn handle_capability(con: &mut Connection, tag: &str) -> Flow {
    respond(
        con,
        &[
            "* CAPABILITY IMAP4rev1 STARTTLS".to_string(),
            format!("{} OK CAPABILITY completed", tag),
        ],
    )
    .await
}

async fn handle_noop(ctx: &Arc<Magma>, con: &mut Connection, session: &mut Session, tag: &str) -> Flow {
    if session.selected != 0 {
        match session_update(ctx, session).await {
            SessionUpdate::Changed { recent, exists } => {
                return respond(
                    con,
                    &[
                        format!("* {} EXISTS", exists),
                        format!("* {} RECENT", recent),
                        format!("{} OK NOOP completed", tag),
                    ],
                )
                .await;
            }
            SessionUpdate::Transient => {
                // Retry on the next poll; the mailbox state is stale
                // but valid.
                tracing::debug!("session update hit a transient failure");
            }
            SessionUpdate::Unchanged => {}
        }
    }
    respond(con, &[format!("{} OK NOOP completed", tag)]).await
}

async fn handle_login(
    ctx: &Arc<Magma>,
    con: &mut Connection,
    session: &mut Session,
    tag: &str,
    args: &str,
) -> Flow {
    if session.user.is_some() {
        return respond(con, &[format!("{} NO already authenticated", tag)]).await;
    }
    let mut parts = args.split_whitespace();
    let username = parts.next().map(unquote);
    let password = parts.next().map(unquote);
    let (Some(username), Some(password)) = (username, password) else {
        return respond(con, &[format!("{} BAD LOGIN requires a name and a password", tag)]).await;
    };

    match meta::login(
        &ctx.meta,
        &username,
        &password,
        Protocol::Imap,
        FetchMask::MESSAGES.with(FetchMask::FOLDERS),
    )
    .await
    {
        Ok(outcome) => {
            session.user = Some(outcome.user);
            respond(con, &[format!("{} OK LOGIN completed", tag)]).await
        }
        Err(meta::AuthError::Transient(e)) => {
            tracing::warn!(error = %e, "IMAP login hit a transient failure");
            respond(con, &[format!("{} NO temporary failure, try again later", tag)]).await
        }
        Err(_) => respond(con, &[format!("{} NO invalid credentials", tag)]).await,
    }
}

fn unquote(s: &str) -> String {
    s.trim_matches('"').to_string()
}

async fn handle_list(con: &mut Connection, session: &Session, tag: &str) -> Flow {
    let Some(user) = session.user.as_ref() else {
        return respond(con, &[format!("{} NO authenticate first", tag)]).await;
    };
    let _snapshot = user.read_lock().await;
    let mut lines = Vec::new();
    let mut cursor = user.message_folders.cursor();
    while let Some(folder) = cursor.next_value() {
        if let Some(full) = folder_full_name(&user.message_folders, &folder) {
            lines.push(format!("* LIST () \".\" \"{}\"", full));
        }
    }
    lines.push(format!("{} OK LIST completed", tag));
    respond(con, &lines).await
}

async fn handle_select(
    ctx: &Arc<Magma>,
    con: &mut Connection,
    session: &mut Session,
    tag: &str,
    args: &str,
    read_only: bool,
) -> Flow {
    let Some(user) = session.user.clone() else {
        return respond(con, &[format!("{} NO authenticate first", tag)]).await;
    };

    // Leaving a previously selected writable folder clears its recency.
    if session.selected != 0 {
        close_selected(ctx, session).await;
    }

    let name = unquote(args.trim());
    let folder = {
        let _snapshot = user.read_lock().await;
        folder_by_full_name(&user.message_folders, &name, true)
    };
    let Some(folder) = folder else {
        return respond(con, &[format!("{} NO no such mailbox", tag)]).await;
    };

    let (recent, exists) = {
        let _snapshot = user.read_lock().await;
        folder_counts(&user, folder.foldernum)
    };
    session.selected = folder.foldernum;
    session.read_only = read_only;
    session.recent = recent;
    session.exists = exists;
    session.messages_checkpoint =
        ctx.counters.get(ObjectKind::Messages, user.usernum).await.unwrap_or(0);

    let mode = if read_only { "READ-ONLY" } else { "READ-WRITE" };
    respond(
        con,
        &[
            format!("* {} EXISTS", exists),
            format!("* {} RECENT", recent),
            format!("* OK [UIDVALIDITY {}] UIDs valid", folder.foldernum),
            format!("{} OK [{}] {} completed", tag, mode, if read_only { "EXAMINE" } else { "SELECT" }),
        ],
    )
    .await
}

async fn handle_close(ctx: &Arc<Magma>, con: &mut Connection, session: &mut Session, tag: &str) -> Flow {
    if session.selected == 0 {
        return respond(con, &[format!("{} NO no mailbox selected", tag)]).await;
    }
    close_selected(ctx, session).await;
    respond(con, &[format!("{} OK CLOSE completed", tag)]).await
}

async fn handle_check(ctx: &Arc<Magma>, con: &mut Connection, session: &mut Session, tag: &str) -> Flow {
    if session.selected == 0 {
        return respond(con, &[format!("{} NO no mailbox selected", tag)]).await;
    }
    match session_update(ctx, session).await {
        SessionUpdate::Transient => {
            respond(con, &[format!("{} NO temporary failure, try again later", tag)]).await
        }
        _ => respond(con, &[format!("{} OK CHECK completed", tag)]).await,
    }
}

async fn handle_status(con: &mut Connection, session: &Session, tag: &str, args: &str) -> Flow {
    let Some(user) = session.user.as_ref() else {
        return respond(con, &[format!("{} NO authenticate first", tag)]).await;
    };
    let name = unquote(args.split_whitespace().next().unwrap_or(""));
    let _snapshot = user.read_lock().await;
    let Some(folder) = folder_by_full_name(&user.message_folders, &name, true) else {
        return respond(con, &[format!("{} NO no such mailbox", tag)]).await;
    };
    let (recent, exists) = folder_counts(user, folder.foldernum);
    respond(
        con,
        &[
            format!("* STATUS \"{}\" (MESSAGES {} RECENT {})", name, exists, recent),
            format!("{} OK STATUS completed", tag),
        ],
    )
    .await
}

async fn handle_fetch(
    ctx: &Arc<Magma>,
    con: &mut Connection,
    session: &Session,
    tag: &str,
    args: &str,
) -> Flow {
    let Some(user) = session.user.as_ref() else {
        return respond(con, &[format!("{} NO authenticate first", tag)]).await;
    };
    if session.selected == 0 {
        return respond(con, &[format!("{} NO no mailbox selected", tag)]).await;
    }

    let mut parts = args.split_whitespace();
    let Some(sequence) = parts.next().and_then(|s| s.parse::<u64>().ok()) else {
        return respond(con, &[format!("{} BAD FETCH requires a sequence number", tag)]).await;
    };
    let items = args[args.find(' ').map(|i| i + 1).unwrap_or(args.len())..].to_ascii_uppercase();

    let message = {
        let _snapshot = user.read_lock().await;
        message_by_folder_sequence(user, session.selected, sequence)
    };
    let Some(message) = message else {
        return respond(con, &[format!("{} NO no such message", tag)]).await;
    };

    let mut attributes = Vec::new();
    if items.contains("FLAGS") {
        let mut flags = Vec::new();
        if message.has(status::SEEN) {
            flags.push("\\Seen");
        }
        if message.has(status::ANSWERED) {
            flags.push("\\Answered");
        }
        if message.has(status::FLAGGED) {
            flags.push("\\Flagged");
        }
        if message.has(status::DELETED) {
            flags.push("\\Deleted");
        }
        if message.has(status::DRAFT) {
            flags.push("\\Draft");
        }
        if message.has(status::RECENT) {
            flags.push("\\Recent");
        }
        attributes.push(format!("FLAGS ({})", flags.join(" ")));
    }
    if items.contains("RFC822.SIZE") {
        attributes.push(format!("RFC822.SIZE {}", message.size));
    }

    if items.contains("BODY[]") {
        match mail::load_message(&ctx.storage_root(), &message.server, message.messagenum).await {
            Ok(body) => {
                let head = format!(
                    "* {} FETCH ({}BODY[] {{{}}}",
                    sequence,
                    attributes
                        .iter()
                        .map(|a| format!("{} ", a))
                        .collect::<String>(),
                    body.len()
                );
                if con.write_line(&head).await.is_err() {
                    return Flow::Silent;
                }
                if con.write_raw(&body).await.is_err() {
                    return Flow::Silent;
                }
                if con.write_line(")").await.is_err() {
                    return Flow::Silent;
                }
                return respond(con, &[format!("{} OK FETCH completed", tag)]).await;
            }
            Err(_) => {
                return respond(con, &[format!("{} NO message unavailable", tag)]).await;
            }
        }
    }

    respond(
        con,
        &[
            format!("* {} FETCH ({})", sequence, attributes.join(" ")),
            format!("{} OK FETCH completed", tag),
        ],
    )
    .await
}

async fn handle_starttls(con: &mut Connection, tag: &str) -> Flow {
    if con.is_secure() {
        return respond(con, &[format!("{} NO session already secure", tag)]).await;
    }
    let Some(acceptor) = con.server.acceptor.clone() else {
        return respond(con, &[format!("{} NO TLS unavailable", tag)]).await;
    };
    if con.write_line(&format!("{} OK begin TLS negotiation", tag)).await.is_err() {
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

async fn handle_logout(ctx: &Arc<Magma>, con: &mut Connection, session: &mut Session, tag: &str) -> Flow {
    close_selected(ctx, session).await;
    if let Some(user) = session.user.take() {
        ctx.meta.meta_release(user.usernum, Protocol::Imap);
    }
    let _ = con.write_line("* BYE logging out").await;
    let _ = con.write_line(&format!("{} OK LOGOUT completed", tag)).await;
    Flow::Quit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::meta::{MetaCache, MetaFolder, MetaMessage};
    use crate::storage::MetaSource;
    use crate::storage::{FolderKind, MemorySource, SerialCounters, UserRecord};

    fn seeded_ctx() -> (Arc<MemorySource>, MetaCache, SerialCounters) {
        let source = Arc::new(MemorySource::new());
        source.seed_user(
            UserRecord {
                usernum: 42,
                username: "magma".into(),
                salt: vec![0u8; 128],
                verification: b"token".to_vec(),
                bonus: 0,
            },
            crate::meta::UserDetail { verification: b"token".to_vec(), ..Default::default() },
        );
        source.seed_folder(
            42,
            FolderKind::Mail,
            MetaFolder { foldernum: 7, parent: 0, order: 0, name: "Inbox".into() },
        );
        for n in 1..=3 {
            source.seed_message(
                42,
                MetaMessage {
                    messagenum: n,
                    foldernum: 7,
                    server: "local".into(),
                    status: status::RECENT,
                    size: 100,
                    signature_num: 0,
                    signature_key: 0,
                    created: 0,
                    tags: Vec::new(),
                },
            );
        }
        let counters = SerialCounters::new(Arc::new(MemoryCache::new()));
        let cache = MetaCache::new(source.clone(), counters.clone());
        (source, cache, counters)
    }

    #[tokio::test]
    async fn writable_close_clears_recent_for_the_next_session() {
        let (source, cache, counters) = seeded_ctx();

        // Session A: select writable, observe three recent, close.
        let user_a = cache
            .meta_get(42, "magma", b"token", Protocol::Imap, FetchMask::ALL)
            .await
            .unwrap();
        let (recent, exists) = folder_counts(&user_a, 7);
        assert_eq!((recent, exists), (3, 3));

        let cleared = clear_recent(source.as_ref(), &counters, &user_a, 7).await;
        assert_eq!(cleared, 3);
        cache.meta_release(42, Protocol::Imap);

        // Session B: the shared projection and the source both agree.
        let user_b = cache
            .meta_get(42, "magma", b"token", Protocol::Imap, FetchMask::ALL)
            .await
            .unwrap();
        let (recent, exists) = folder_counts(&user_b, 7);
        assert_eq!((recent, exists), (0, 3));
        for message in source.messages(42).await.unwrap() {
            assert!(!message.has(status::RECENT));
        }
    }

    #[tokio::test]
    async fn fetch_sequence_resolution_guards_zero_and_hidden() {
        let (source, cache, _) = seeded_ctx();
        source.seed_message(
            42,
            MetaMessage {
                messagenum: 4,
                foldernum: 7,
                server: "local".into(),
                status: status::HIDDEN,
                size: 10,
                signature_num: 0,
                signature_key: 0,
                created: 0,
                tags: Vec::new(),
            },
        );
        let user = cache
            .meta_get(42, "magma", b"token", Protocol::Imap, FetchMask::ALL)
            .await
            .unwrap();

        // Sequence numbers are 1-based; zero never resolves.
        assert!(message_by_folder_sequence(&user, 7, 0).is_none());
        assert_eq!(message_by_folder_sequence(&user, 7, 1).unwrap().messagenum, 1);
        assert_eq!(message_by_folder_sequence(&user, 7, 3).unwrap().messagenum, 3);
        // The hidden message is not addressable and does not extend
        // the sequence.
        assert!(message_by_folder_sequence(&user, 7, 4).is_none());
        assert!(message_by_folder_sequence(&user, 8, 1).is_none());
    }

    #[tokio::test]
    async fn folder_counts_skip_hidden() {
        let (source, cache, _) = seeded_ctx();
        source.seed_message(
            42,
            MetaMessage {
                messagenum: 9,
                foldernum: 7,
                server: "local".into(),
                status: status::HIDDEN | status::RECENT,
                size: 10,
                signature_num: 0,
                signature_key: 0,
                created: 0,
                tags: Vec::new(),
            },
        );
        let user = cache
            .meta_get(42, "magma", b"token", Protocol::Imap, FetchMask::ALL)
            .await
            .unwrap();
        let (recent, exists) = folder_counts(&user, 7);
        assert_eq!((recent, exists), (3, 3));
    }
}
