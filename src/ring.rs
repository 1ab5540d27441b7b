// Consistent hash ring with virtual nodes. Reacts to member
// table events directly: an `alive` server is added, a `faulty` or `leave`
// server is removed, keeping the ring always caught up.

use crate::member::{Member, Status};
use crate::table::Subscriber;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;

fn hash64(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    u64::from_be_bytes(digest[0..8].try_into().expect("sha256 digest is >= 8 bytes"))
}

fn vnode_hash(address: &str, vnode: u32) -> u64 {
    hash64(&format!("{address}#{vnode}"))
}

struct RingState {
    points: BTreeMap<(u64, String), String>,
    servers: HashSet<String>,
}

/// Consistent hash ring mapping arbitrary routing keys onto the current
/// set of alive servers. `vnodes` virtual points are placed per server so
/// that a server's departure redistributes its keys roughly evenly
/// across the rest of the ring rather than onto a single neighbor.
pub struct HashRing {
    vnodes: u32,
    state: RwLock<RingState>,
}

impl HashRing {
    pub fn new(vnodes: u32) -> Self {
        Self {
            vnodes,
            state: RwLock::new(RingState {
                points: BTreeMap::new(),
                servers: HashSet::new(),
            }),
        }
    }

    pub async fn add_server(&self, address: &str) {
        let mut state = self.state.write().await;
        if !state.servers.insert(address.to_string()) {
            return;
        }
        for vnode in 0..self.vnodes {
            let hash = vnode_hash(address, vnode);
            state
                .points
                .insert((hash, address.to_string()), address.to_string());
        }
    }

    pub async fn remove_server(&self, address: &str) {
        let mut state = self.state.write().await;
        if !state.servers.remove(address) {
            return;
        }
        for vnode in 0..self.vnodes {
            let hash = vnode_hash(address, vnode);
            state.points.remove(&(hash, address.to_string()));
        }
    }

    /// Returns the server owning `key`: the first ring point at or after
    /// `hash(key)`, wrapping around to the smallest point if `key` falls
    /// past the end. Ties between equal hashes are broken by address.
    pub async fn lookup(&self, key: &str) -> Option<String> {
        let state = self.state.read().await;
        if state.points.is_empty() {
            return None;
        }
        let target = (hash64(key), String::new());
        state
            .points
            .range(target..)
            .next()
            .or_else(|| state.points.iter().next())
            .map(|(_, owner)| owner.clone())
    }

    pub async fn servers(&self) -> Vec<String> {
        let mut servers: Vec<String> = self.state.read().await.servers.iter().cloned().collect();
        servers.sort();
        servers
    }

    pub async fn server_count(&self) -> usize {
        self.state.read().await.servers.len()
    }
}

#[async_trait]
impl Subscriber for HashRing {
    async fn on_new(&self, member: &Member) {
        if member.status == Status::Alive {
            self.add_server(&member.address).await;
        }
    }

    async fn on_alive(&self, member: &Member) {
        self.add_server(&member.address).await;
    }

    async fn on_faulty(&self, member: &Member) {
        self.remove_server(&member.address).await;
    }

    async fn on_leave(&self, member: &Member) {
        self.remove_server(&member.address).await;
    }
}
