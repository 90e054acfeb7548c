//! Producer / consumer / peer views owned by the gateway.
//!
//! Every accessor hands back a detached copy; the lock is held only for the
//! copy itself.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub remote_addr: String,
    pub appid: String,
    pub topic: String,
    pub ver: String,
    pub since: String,
}

impl ClientInfo {
    pub fn new(remote_addr: &str, appid: &str, topic: &str, ver: &str) -> Self {
        Self {
            remote_addr: remote_addr.to_string(),
            appid: appid.to_string(),
            topic: topic.to_string(),
            ver: ver.to_string(),
            since: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Who is publishing and subscribing through this gateway. The pub/sub
/// handlers mounted next to the admin router register clients here as they
/// attach and remove them on disconnect; `/producers` and `/consumers`
/// serve the snapshots.
#[derive(Default)]
pub struct ClientRegistry {
    producers: RwLock<BTreeMap<String, ClientInfo>>,
    consumers: RwLock<BTreeMap<String, ClientInfo>>,
    peers: RwLock<Vec<String>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================
    // PRODUCERS
    // ========================================

    pub fn add_producer(&self, info: ClientInfo) {
        self.producers.write().insert(info.remote_addr.clone(), info);
    }

    pub fn remove_producer(&self, remote_addr: &str) -> bool {
        self.producers.write().remove(remote_addr).is_some()
    }

    pub fn producers(&self) -> BTreeMap<String, ClientInfo> {
        self.producers.read().clone()
    }

    // ========================================
    // CONSUMERS
    // ========================================

    pub fn add_consumer(&self, info: ClientInfo) {
        self.consumers.write().insert(info.remote_addr.clone(), info);
    }

    pub fn remove_consumer(&self, remote_addr: &str) -> bool {
        self.consumers.write().remove(remote_addr).is_some()
    }

    pub fn consumers(&self) -> BTreeMap<String, ClientInfo> {
        self.consumers.read().clone()
    }

    // ========================================
    // PEERS
    // ========================================

    /// Replace the known gateway peers; order is normalized.
    pub fn set_peers(&self, mut peers: Vec<String>) {
        peers.sort();
        peers.dedup();
        *self.peers.write() = peers;
    }

    pub fn peers(&self) -> Vec<String> {
        self.peers.read().clone()
    }
}
