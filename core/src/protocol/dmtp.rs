/*
 * dmtp.rs
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

//! DMTP server: the TLS-only transport for PRIME-encrypted mail.
//! Besides the SMTP-shaped envelope commands it serves signets (SGNT)
//! and signet history (HIST), and the payload of DATA is an encrypted
//! PRIME message rather than RFC 822 text.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::mail;
use crate::meta::status;
use crate::server::{CommandTable, Connection, Magma, MatchKind};
use crate::storage::ObjectKind;

use super::Flow;

/// Encrypted messages can be large; cap the armored transfer.
const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Ehlo,
    Helo,
    Noop,
    Mode,
    Rset,
    Quit,
    Mail,
    Rcpt,
    Data,
    Sgnt,
    Hist,
    Vrfy,
    Help,
    Verb,
}

fn command_table() -> CommandTable<Verb> {
    CommandTable::new(&[
        ("EHLO", MatchKind::Prefix, Verb::Ehlo),
        ("HELO", MatchKind::Prefix, Verb::Helo),
        ("NOOP", MatchKind::Prefix, Verb::Noop),
        ("MODE", MatchKind::Prefix, Verb::Mode),
        ("RSET", MatchKind::Exact, Verb::Rset),
        ("QUIT", MatchKind::Exact, Verb::Quit),
        ("MAIL", MatchKind::Prefix, Verb::Mail),
        ("RCPT", MatchKind::Prefix, Verb::Rcpt),
        ("DATA", MatchKind::Exact, Verb::Data),
        ("SGNT", MatchKind::Prefix, Verb::Sgnt),
        ("HIST", MatchKind::Prefix, Verb::Hist),
        ("VRFY", MatchKind::Prefix, Verb::Vrfy),
        ("HELP", MatchKind::Prefix, Verb::Help),
        ("VERB", MatchKind::Prefix, Verb::Verb),
    ])
}

struct Envelope {
    sender: Option<String>,
    recipients: Vec<(String, u64)>,
}

pub async fn run(ctx: Arc<Magma>, mut con: Connection) {
    if con
        .write_line(&format!("220 {} DMTP service ready", ctx.hostname()))
        .await
        .is_err()
    {
        return;
    }
    continue_session(ctx, &mut con).await;
    con.shutdown().await;
}

/// Drive the DMTP machine over an established connection. Also entered
/// from SMTP's MODE switch, where the greeting was already exchanged.
pub async fn continue_session(ctx: Arc<Magma>, con: &mut Connection) {
    let table = command_table();
    let mut envelope = Envelope { sender: None, recipients: Vec::new() };
    let mut verbose = false;

    loop {
        if !ctx.status.online() {
            let _ = con.write_line("421 service shutting down").await;
            return;
        }

        let line = match con.read_line().await {
            Ok(line) => line,
            Err(_) => return,
        };

        if line.is_empty() {
            if con.charge_spin() {
                let _ = con.write_line("421 idle budget exhausted").await;
                return;
            }
            continue;
        }

        let Some((command, args)) = table.lookup(&line) else {
            if con.charge_violation().await {
                let _ = con.write_line("421 violation budget exhausted").await;
                return;
            }
            let _ = con.write_line("500 command unrecognized").await;
            continue;
        };
        con.reset_spins();

        let flow = match command.handler {
            Verb::Ehlo | Verb::Helo => {
                let lines = [
                    format!("250-{} at your service", ctx.hostname()),
                    "250-SGNT".to_string(),
                    "250 HIST".to_string(),
                ];
                let mut ok = true;
                for l in &lines {
                    if con.write_line(l).await.is_err() {
                        ok = false;
                        break;
                    }
                }
                if ok {
                    Flow::Continue
                } else {
                    Flow::Silent
                }
            }
            Verb::Noop => reply(con, "250 OK").await,
            Verb::Mode => {
                let target = args.trim().to_ascii_uppercase();
                if target.is_empty() || target == "DMTP" {
                    reply(con, "250 MODE DMTP").await
                } else {
                    reply(con, "504 mode switch unavailable").await
                }
            }
            Verb::Rset => {
                envelope.sender = None;
                envelope.recipients.clear();
                reply(con, "250 OK").await
            }
            Verb::Quit => {
                let _ = con.write_line("221 goodbye").await;
                Flow::Quit
            }
            Verb::Mail => {
                envelope.sender = Some(args.trim().to_string());
                envelope.recipients.clear();
                reply(con, "250 OK").await
            }
            Verb::Rcpt => handle_rcpt(&ctx, con, &mut envelope, args).await,
            Verb::Data => handle_data(&ctx, con, &mut envelope).await,
            Verb::Sgnt => handle_sgnt(&ctx, con, args).await,
            Verb::Hist => handle_hist(con, args).await,
            Verb::Vrfy => reply(con, "252 signets say more than verification ever could").await,
            Verb::Help => reply(con, "214 commands: EHLO MODE MAIL RCPT DATA SGNT HIST QUIT").await,
            Verb::Verb => {
                verbose = !verbose;
                reply(con, if verbose { "250 verbose on" } else { "250 verbose off" }).await
            }
        };

        match flow {
            Flow::Continue => {}
            Flow::Quit | Flow::Silent => return,
        }
    }
}

async fn reply(con: &mut Connection, line: &str) -> Flow {
    if con.write_line(line).await.is_err() {
        Flow::Silent
    } else {
        Flow::Continue
    }
}

async fn handle_rcpt(
    ctx: &Arc<Magma>,
    con: &mut Connection,
    envelope: &mut Envelope,
    args: &str,
) -> Flow {
    if envelope.sender.is_none() {
        return reply(con, "503 need MAIL before RCPT").await;
    }
    let address = args.trim().trim_start_matches("TO:").trim().trim_matches(['<', '>']);
    if address.is_empty() {
        return reply(con, "501 syntax: RCPT TO:<address>").await;
    }
    let local = address.split('@').next().unwrap_or(address);
    match ctx.source.user_by_username(local).await {
        Ok(Some(record)) => {
            envelope.recipients.push((address.to_string(), record.usernum));
            reply(con, "250 OK").await
        }
        Ok(None) => reply(con, "550 no such mailbox here").await,
        Err(_) => reply(con, "451 temporary failure, try again later").await,
    }
}

/// DATA carries a base64-armored encrypted PRIME message, dot
/// terminated. The ciphertext is stored verbatim; only the chunk
/// headers are validated here.
async fn handle_data(ctx: &Arc<Magma>, con: &mut Connection, envelope: &mut Envelope) -> Flow {
    if envelope.recipients.is_empty() {
        return reply(con, "503 need RCPT before DATA").await;
    }
    if con.write_line("354 end armored message with <CRLF>.<CRLF>").await.is_err() {
        return Flow::Silent;
    }

    let mut armored = String::new();
    loop {
        let line = match con.read_line().await {
            Ok(line) => line,
            Err(_) => return Flow::Silent,
        };
        if line == "." {
            break;
        }
        armored.push_str(line.trim());
        if armored.len() > MAX_MESSAGE_SIZE {
            return reply(con, "552 message exceeds the size limit").await;
        }
    }

    let Ok(message) = BASE64.decode(armored.as_bytes()) else {
        return reply(con, "501 message armor is not valid base64").await;
    };
    if crate::prime::chunk_header_read(&message).is_err() {
        return reply(con, "554 message does not begin with a valid chunk").await;
    }

    let root = ctx.storage_root();
    let server_tag = ctx.active_server();
    let mut delivered = 0usize;
    for (address, usernum) in envelope.recipients.clone() {
        let foldernum = super::inbox_foldernum(ctx.source.as_ref(), usernum).await;
        match ctx
            .source
            .insert_message(
                usernum,
                foldernum,
                &server_tag,
                status::RECENT | status::ENCRYPTED,
                message.len() as u64,
            )
            .await
        {
            Ok(messagenum) => {
                if let Err(e) = mail::store_message(&root, &server_tag, messagenum, &message).await
                {
                    tracing::error!(messagenum, error = %e, "body write failed after row insert");
                    let _ = ctx.source.delete_message(usernum, messagenum).await;
                    continue;
                }
                let _ = ctx.counters.increment(ObjectKind::Messages, usernum).await;
                delivered += 1;
                tracing::debug!(%address, messagenum, "encrypted message accepted");
            }
            Err(e) => tracing::error!(%address, error = %e, "message insert failed"),
        }
    }

    envelope.sender = None;
    envelope.recipients.clear();
    if delivered == 0 {
        reply(con, "451 delivery failed, try again later").await
    } else {
        reply(con, "250 OK encrypted message accepted").await
    }
}

/// Serve this organization's signet (or refuse for addresses we do not
/// host). Signets travel base64 armored over the text channel.
async fn handle_sgnt(ctx: &Arc<Magma>, con: &mut Connection, args: &str) -> Flow {
    let subject = args.trim();
    if !subject.is_empty() && !subject.eq_ignore_ascii_case(&ctx.hostname()) {
        return reply(con, "554 no signet for that name here").await;
    }
    let armored = BASE64.encode(&ctx.org_signet);
    if con.write_line("280-organizational signet follows").await.is_err() {
        return Flow::Silent;
    }
    for piece in armored.as_bytes().chunks(76) {
        let line = format!("280-{}", String::from_utf8_lossy(piece));
        if con.write_line(&line).await.is_err() {
            return Flow::Silent;
        }
    }
    reply(con, "280 END").await
}

async fn handle_hist(con: &mut Connection, args: &str) -> Flow {
    if args.trim().is_empty() {
        return reply(con, "501 HIST requires a signet name").await;
    }
    // Only the current signet generation exists on this node.
    reply(con, "280 1").await
}
