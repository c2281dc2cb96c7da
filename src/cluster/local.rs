// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Process-local [`ClusterFabric`]: the degrade path used when
//! `general.cluster_enabled = false` (`spec.md` §4.8), and the backbone
//! every test in this repo runs against since there is only ever one
//! process to contend with.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::ClusterFabric;
use crate::bus::{LocalMessageBus, MessageBus};
use crate::error::Error;
use crate::types::NodeId;

/// Polling interval while waiting for a contended named lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct LocalCluster {
    node_id: NodeId,
    bus: Arc<LocalMessageBus>,
    locks: Arc<StdMutex<HashSet<String>>>,
    kv: RwLock<HashMap<String, Vec<u8>>>,
}

impl LocalCluster {
    #[must_use]
    pub fn new(node_id: NodeId) -> Self {
        Self::with_shared(node_id, Arc::new(LocalMessageBus::new()), Arc::new(StdMutex::new(HashSet::new())))
    }

    /// Builds a node's view onto a bus and lock table shared with other
    /// `LocalCluster`s, so an in-process test can simulate a multi-node
    /// cluster without a real transport: each node gets its own
    /// `node_id` but publishes/locks land in the same place peers see
    /// (`spec.md` §8 Scenarios 4/5).
    #[must_use]
    pub fn with_shared(node_id: NodeId, bus: Arc<LocalMessageBus>, locks: Arc<StdMutex<HashSet<String>>>) -> Self {
        Self { node_id, bus, locks, kv: RwLock::new(HashMap::new()) }
    }
}

/// Held while a named lock is acquired; releases on drop. Owns no async
/// resources, so the release itself is synchronous.
pub struct LockGuard {
    name: String,
    locks: Arc<StdMutex<HashSet<String>>>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.locks.lock().unwrap().remove(&self.name);
    }
}

#[async_trait]
impl ClusterFabric for LocalCluster {
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn bus(&self) -> &dyn MessageBus {
        self.bus.as_ref()
    }

    async fn try_lock(&self, name: &str, timeout: Duration) -> Result<Option<LockGuard>, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.locks.lock().unwrap().insert(name.to_string()) {
                return Ok(Some(LockGuard { name: name.to_string(), locks: self.locks.clone() }));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    async fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.kv.read().unwrap().get(key).cloned())
    }

    async fn kv_set(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        self.kv.write().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn kv_delete(&self, key: &str) -> Result<(), Error> {
        self.kv.write().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_held_lock_blocks_a_second_acquirer_until_timeout() {
        let cluster = LocalCluster::new("node-1".to_string());
        let guard = cluster.try_lock("purge-lock-g1-primary", Duration::from_secs(1)).await.unwrap();
        assert!(guard.is_some());
        let second = cluster.try_lock("purge-lock-g1-primary", Duration::from_millis(100)).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn releasing_a_lock_lets_the_next_acquirer_in() {
        let cluster = LocalCluster::new("node-1".to_string());
        {
            let _guard = cluster.try_lock("purge-lock-g1-primary", Duration::from_secs(1)).await.unwrap();
        }
        let second = cluster.try_lock("purge-lock-g1-primary", Duration::from_millis(100)).await.unwrap();
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn kv_roundtrips() {
        let cluster = LocalCluster::new("node-1".to_string());
        cluster.kv_set("hint", b"v1".to_vec()).await.unwrap();
        assert_eq!(cluster.kv_get("hint").await.unwrap(), Some(b"v1".to_vec()));
        cluster.kv_delete("hint").await.unwrap();
        assert_eq!(cluster.kv_get("hint").await.unwrap(), None);
    }
}
