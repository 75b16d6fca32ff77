/*
 * resolver.rs
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

//! Reverse-DNS enrichment. Lookups run on a background queue so accepts
//! never wait on the resolver; each connection carries a slot that the
//! worker fills in when (and if) the answer arrives. Consumers must
//! tolerate an empty slot.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::OnceLock;

use tokio::sync::mpsc;

/// Slot a lookup result lands in. `None` inside the slot means the
/// lookup completed without a name.
pub type ReverseSlot = Arc<OnceLock<Option<String>>>;

/// Pluggable reverse resolver.
#[async_trait::async_trait]
pub trait ReverseResolver: Send + Sync {
    async fn resolve(&self, ip: IpAddr) -> Option<String>;
}

/// PTR lookup through the platform resolver.
pub struct SystemResolver;

#[async_trait::async_trait]
impl ReverseResolver for SystemResolver {
    async fn resolve(&self, ip: IpAddr) -> Option<String> {
        tokio::task::spawn_blocking(move || lookup_addr(ip)).await.ok().flatten()
    }
}

#[cfg(unix)]
fn lookup_addr(ip: IpAddr) -> Option<String> {
    use std::mem;

    let mut host = [0 as libc::c_char; 1025];
    let result = unsafe {
        match ip {
            IpAddr::V4(v4) => {
                let mut addr: libc::sockaddr_in = mem::zeroed();
                addr.sin_family = libc::AF_INET as libc::sa_family_t;
                addr.sin_addr.s_addr = u32::from_ne_bytes(v4.octets());
                libc::getnameinfo(
                    &addr as *const libc::sockaddr_in as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                    host.as_mut_ptr(),
                    host.len() as libc::socklen_t,
                    std::ptr::null_mut(),
                    0,
                    libc::NI_NAMEREQD,
                )
            }
            IpAddr::V6(v6) => {
                let mut addr: libc::sockaddr_in6 = mem::zeroed();
                addr.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                addr.sin6_addr.s6_addr = v6.octets();
                libc::getnameinfo(
                    &addr as *const libc::sockaddr_in6 as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                    host.as_mut_ptr(),
                    host.len() as libc::socklen_t,
                    std::ptr::null_mut(),
                    0,
                    libc::NI_NAMEREQD,
                )
            }
        }
    };
    if result != 0 {
        return None;
    }
    let name = unsafe { std::ffi::CStr::from_ptr(host.as_ptr()) };
    name.to_str().ok().map(|s| s.to_string())
}

#[cfg(not(unix))]
fn lookup_addr(_ip: IpAddr) -> Option<String> {
    None
}

struct Job {
    ip: IpAddr,
    slot: ReverseSlot,
}

/// Queue feeding the background lookup worker.
pub struct ReverseQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl ReverseQueue {
    /// Spawn the worker task and hand back the queue.
    pub fn spawn(resolver: Arc<dyn ReverseResolver>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let name = resolver.resolve(job.ip).await;
                let _ = job.slot.set(name);
            }
        });
        Self { tx }
    }

    /// Enqueue a lookup for a freshly accepted peer.
    pub fn enqueue(&self, peer: SocketAddr) -> ReverseSlot {
        let slot: ReverseSlot = Arc::new(OnceLock::new());
        let job = Job { ip: peer.ip(), slot: slot.clone() };
        if self.tx.send(job).is_err() {
            tracing::debug!("reverse resolver queue is gone, skipping lookup");
        }
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FixedResolver;

    #[async_trait::async_trait]
    impl ReverseResolver for FixedResolver {
        async fn resolve(&self, ip: IpAddr) -> Option<String> {
            if ip.is_loopback() {
                Some("localhost.localdomain".to_string())
            } else {
                None
            }
        }
    }

    #[tokio::test]
    async fn slots_fill_lazily() {
        let queue = ReverseQueue::spawn(Arc::new(FixedResolver));
        let slot = queue.enqueue("127.0.0.1:9999".parse().unwrap());
        let missing = queue.enqueue("192.0.2.1:9999".parse().unwrap());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(slot.get(), Some(&Some("localhost.localdomain".to_string())));
        assert_eq!(missing.get(), Some(&None));
    }
}
