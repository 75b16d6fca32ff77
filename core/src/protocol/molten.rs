/*
 * molten.rs
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

//! Molten: the operator statistics protocol. Three commands, plain
//! text, meant for a human with a telnet client or a scraper cron job.

use std::sync::Arc;

use crate::server::{CommandTable, Connection, Magma, MatchKind};

use super::Flow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Version,
    Stats,
    Quit,
}

fn command_table() -> CommandTable<Verb> {
    CommandTable::new(&[
        ("VERSION", MatchKind::Exact, Verb::Version),
        ("STATS", MatchKind::Exact, Verb::Stats),
        ("QUIT", MatchKind::Exact, Verb::Quit),
    ])
}

pub async fn run(ctx: Arc<Magma>, mut con: Connection) {
    let table = command_table();

    if con.write_line("MOLTEN ready").await.is_err() {
        return;
    }

    loop {
        if !ctx.status.online() {
            let _ = con.write_line("ERROR shutting down").await;
            break;
        }

        let line = match con.read_line().await {
            Ok(line) => line,
            Err(_) => break,
        };

        if line.is_empty() {
            if con.charge_spin() {
                break;
            }
            continue;
        }

        let Some((command, _)) = table.lookup(&line) else {
            if con.charge_violation().await {
                break;
            }
            let _ = con.write_line("ERROR unrecognized command").await;
            continue;
        };
        con.reset_spins();

        let flow = match command.handler {
            Verb::Version => {
                if con
                    .write_line(&format!("VERSION magma {}", env!("CARGO_PKG_VERSION")))
                    .await
                    .is_err()
                {
                    Flow::Silent
                } else {
                    Flow::Continue
                }
            }
            Verb::Stats => {
                let mut ok = true;
                for (name, value) in ctx.stats.snapshot() {
                    if con.write_line(&format!("{} {}", name, value)).await.is_err() {
                        ok = false;
                        break;
                    }
                }
                if ok && con.write_line("END").await.is_ok() {
                    Flow::Continue
                } else {
                    Flow::Silent
                }
            }
            Verb::Quit => {
                let _ = con.write_line("GOODBYE").await;
                Flow::Quit
            }
        };

        match flow {
            Flow::Continue => {}
            Flow::Quit | Flow::Silent => break,
        }
    }

    con.shutdown().await;
}
