/*
 * context.rs
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

//! The process context: configuration, status, statistics, the cluster
//! cache, the meta-user cache, and the listener set, assembled once at
//! startup and threaded through accept and dispatch as a single value.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::config::Config;
use crate::meta::MetaCache;
use crate::prime::{OrgKey, OrgSignet};
use crate::protocol::http::WebSessions;
use crate::storage::{MetaSource, SerialCounters};

use super::resolver::{ReverseQueue, ReverseResolver, SystemResolver};
use super::stats::Stats;
use super::status::Status;
use super::ServerInstance;

/// Everything a session needs, one `Arc<Magma>` away.
pub struct Magma {
    /// Boot configuration; listener topology never changes after bind.
    pub config: Config,
    /// Reload-sensitive view, swapped whole on SIGHUP.
    runtime: std::sync::RwLock<Arc<Config>>,
    pub status: Status,
    pub stats: Stats,
    pub cache: Arc<dyn Cache>,
    pub counters: SerialCounters,
    pub meta: MetaCache,
    pub source: Arc<dyn MetaSource>,
    pub resolver: ReverseQueue,
    pub servers: Vec<Arc<ServerInstance>>,
    pub web_sessions: WebSessions,
    /// This node's organizational signet, packed for DMTP clients.
    pub org_signet: Vec<u8>,
}

impl Magma {
    /// Assemble the context from configuration and collaborators.
    pub fn assemble(
        config: Config,
        source: Arc<dyn MetaSource>,
        cache: Arc<dyn Cache>,
    ) -> Result<Self, String> {
        Self::assemble_with_resolver(config, source, cache, Arc::new(SystemResolver))
    }

    pub fn assemble_with_resolver(
        config: Config,
        source: Arc<dyn MetaSource>,
        cache: Arc<dyn Cache>,
        resolver: Arc<dyn ReverseResolver>,
    ) -> Result<Self, String> {
        let line_cap = config.get_u64("magma.network.buffer", 8 * 1024) as usize;
        let specs = config.servers().map_err(|e| e.message)?;
        let mut servers = Vec::with_capacity(specs.len());
        for spec in specs {
            let instance = ServerInstance::from_spec(spec, line_cap)
                .map_err(|e| format!("listener setup failed: {}", e))?;
            servers.push(Arc::new(instance));
        }

        let counters = SerialCounters::new(cache.clone());
        let meta = MetaCache::new(source.clone(), counters.clone());

        // The organizational identity must survive restarts: signets
        // endorsed against it stay verifiable only while the key does.
        let org_key = match config.get("magma.prime.org.key") {
            Some(path) => load_or_create_org_key(Path::new(path))?,
            None => {
                tracing::warn!(
                    "no magma.prime.org.key configured, the organizational identity will not survive a restart"
                );
                OrgKey::generate().map_err(|e| e.message)?
            }
        };
        let org_signet = OrgSignet::generate(&org_key)
            .and_then(|s| s.pack())
            .map_err(|e| e.message)?;

        Ok(Self {
            runtime: std::sync::RwLock::new(Arc::new(config.clone())),
            config,
            status: Status::new(),
            stats: Stats::new(),
            cache,
            counters,
            meta,
            source,
            resolver: ReverseQueue::spawn(resolver),
            servers,
            web_sessions: WebSessions::new(),
            org_signet,
        })
    }

    /// Current reload-sensitive configuration.
    pub fn runtime(&self) -> Arc<Config> {
        self.runtime.read().unwrap().clone()
    }

    /// Swap in a freshly loaded configuration (the SIGHUP path). The
    /// listener topology is not re-read; everything else takes effect
    /// on the next lookup.
    pub fn reload(&self, config: Config) {
        *self.runtime.write().unwrap() = Arc::new(config);
        tracing::info!("runtime configuration swapped");
    }

    pub fn storage_root(&self) -> PathBuf {
        PathBuf::from(self.runtime().get_or("magma.storage.root", "storage"))
    }

    /// Tag of the storage node new message bodies land on.
    pub fn active_server(&self) -> String {
        self.runtime().get_or("magma.storage.active", "local").to_string()
    }

    pub fn hostname(&self) -> String {
        self.runtime().get_or("magma.host.name", "magma.localdomain").to_string()
    }

    /// Begin a graceful drain: flip the status, wake the accept loops,
    /// then nap long enough for workers to notice between commands.
    pub async fn shutdown(&self) {
        self.status.set(-1);
        tracing::info!("drain started");
        // Wake interval 100 ms, at least one second in total.
        for _ in 0..12 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Load the organizational key from its configured path, generating and
/// persisting a fresh one on first start. The file holds the packed
/// PRIME key object and is created owner-only.
fn load_or_create_org_key(path: &Path) -> Result<OrgKey, String> {
    match std::fs::read(path) {
        Ok(bytes) => OrgKey::unpack(&bytes).map_err(|e| {
            format!("organizational key {} is unreadable: {}", path.display(), e.message)
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let key = OrgKey::generate().map_err(|e| e.message)?;
            let packed = key.pack().map_err(|e| e.message)?;
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        format!("cannot create {}: {}", parent.display(), e)
                    })?;
                }
            }
            std::fs::write(path, &packed)
                .map_err(|e| format!("cannot write {}: {}", path.display(), e))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
            }
            tracing::info!(path = %path.display(), "generated a new organizational key");
            Ok(key)
        }
        Err(e) => Err(format!("cannot read {}: {}", path.display(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn org_key_is_stable_across_loads() {
        let path = std::env::temp_dir().join(format!("magma-org-key-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let first = load_or_create_org_key(&path).unwrap();
        let second = load_or_create_org_key(&path).unwrap();
        assert_eq!(first.signing.to_bytes(), second.signing.to_bytes());
        assert_eq!(first.encryption.secret_bytes(), second.encryption.secret_bytes());

        // Signets endorsed before a restart verify against the signet
        // derived after it.
        let request = crate::prime::UserSigningRequest::generate(
            &crate::prime::UserKey::generate().unwrap(),
        )
        .unwrap();
        let signet = request.endorse(&first).unwrap();
        let org_signet = OrgSignet::generate(&second).unwrap();
        signet.verify(&org_signet).unwrap();

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupt_org_key_refuses_to_load() {
        let path =
            std::env::temp_dir().join(format!("magma-org-key-bad-{}", std::process::id()));
        std::fs::write(&path, b"not a key object").unwrap();
        let err = load_or_create_org_key(&path).unwrap_err();
        assert!(err.contains("unreadable"));
        let _ = std::fs::remove_file(&path);
    }
}
