/*
 * main.rs
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

//! magmad: load configuration, assemble the context, bind the
//! listeners, and run until a terminating signal drains the server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use magma_core::cache::{Cache, MemcachedClient, MemoryCache};
use magma_core::server::{self, Magma};
use magma_core::storage::{MemorySource, MetaSource, SqlSource, StatementPool};
use magma_core::Config;

#[derive(Parser)]
#[command(name = "magmad", about = "The magma mail server", disable_version_flag = true)]
struct Args {
    /// Path to the configuration file.
    #[arg(default_value = "magmad.config")]
    config: PathBuf,

    /// Override a configuration key (repeatable).
    #[arg(short = 'c', value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Dump the active configuration and exit.
    #[arg(short = 'd', long = "dump")]
    dump: bool,

    /// Print the version and exit.
    #[arg(short = 'v', long = "version")]
    version: bool,
}

fn load_config(args: &Args) -> Result<Config, String> {
    let mut config = if args.config.exists() {
        Config::load(&args.config).map_err(|e| e.message)?
    } else {
        tracing::warn!(path = %args.config.display(), "configuration file missing, starting empty");
        Config::new()
    };
    for pair in &args.overrides {
        config.apply_override(pair).map_err(|e| e.message)?;
    }
    Ok(config)
}

fn build_source(config: &Config) -> Arc<dyn MetaSource> {
    match config.get("magma.db.url") {
        Some(url) => {
            let size = config.get_u64("magma.db.pool", 8) as usize;
            Arc::new(SqlSource::new(Arc::new(StatementPool::new(url, size))))
        }
        None => {
            tracing::warn!("no magma.db.url configured, using the in-process source");
            Arc::new(MemorySource::new())
        }
    }
}

fn build_cache(config: &Config) -> Arc<dyn Cache> {
    match config.get("magma.cache.host") {
        Some(host) => {
            let port = config.get_u16("magma.cache.port", 11211);
            Arc::new(MemcachedClient::new(host, port, Duration::from_secs(5)))
        }
        None => {
            tracing::warn!("no magma.cache.host configured, using the in-process cache");
            Arc::new(MemoryCache::new())
        }
    }
}

async fn maintenance(ctx: Arc<Magma>) {
    let session_age = Duration::from_secs(
        ctx.config.get_u64("magma.web.session_timeout", 3600),
    );
    loop {
        tokio::time::sleep(Duration::from_secs(60)).await;
        if !ctx.status.online() {
            break;
        }
        // Sessions release their user references before the user scan.
        let sessions = ctx.web_sessions.prune(&ctx.meta, session_age);
        let users = ctx.meta.prune();
        if sessions > 0 || users.evicted > 0 {
            tracing::debug!(sessions, evicted = users.evicted, "maintenance sweep");
        }
    }
}

async fn signal_loop(ctx: Arc<Magma>, config_path: PathBuf, overrides: Vec<String>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("signal handler");
    let mut int = signal(SignalKind::interrupt()).expect("signal handler");
    let mut hup = signal(SignalKind::hangup()).expect("signal handler");

    loop {
        tokio::select! {
            _ = term.recv() => break,
            _ = int.recv() => break,
            _ = hup.recv() => {
                // Rebuild the reloadable configuration and swap it in.
                let mut fresh = match Config::load(&config_path) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::error!(error = %e, "SIGHUP reload failed, keeping the old configuration");
                        continue;
                    }
                };
                let mut ok = true;
                for pair in &overrides {
                    if let Err(e) = fresh.apply_override(pair) {
                        tracing::error!(error = %e, "SIGHUP override failed");
                        ok = false;
                        break;
                    }
                }
                if ok {
                    ctx.reload(fresh);
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.version {
        println!("magmad {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("magmad=info,magma_core=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("magmad: {}", e);
            std::process::exit(1);
        }
    };

    if args.dump {
        print!("{}", config.dump());
        return;
    }

    let source = build_source(&config);
    let cache = build_cache(&config);

    let ctx = match Magma::assemble(config, source, cache) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            eprintln!("magmad: {}", e);
            std::process::exit(1);
        }
    };

    let listeners = match server::serve(ctx.clone()).await {
        Ok(handles) => handles,
        Err(e) => {
            eprintln!("magmad: listener startup failed: {}", e);
            std::process::exit(1);
        }
    };
    if listeners.is_empty() {
        eprintln!("magmad: no servers configured");
        std::process::exit(1);
    }

    tokio::spawn(maintenance(ctx.clone()));

    signal_loop(ctx.clone(), args.config.clone(), args.overrides.clone()).await;

    ctx.shutdown().await;
    for handle in listeners {
        let _ = handle.await;
    }
    tracing::info!("clean shutdown");
}
