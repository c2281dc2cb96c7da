// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use mqtt_broker_core::cluster::LocalCluster;
use mqtt_broker_core::store::memory::{MemoryMessageStore, MemorySessionStore};
use mqtt_broker_core::store::{MessageStore, SessionStore};
use mqtt_broker_core::{AllowAll, ClusterFabric, LocalMessageBus, RetainedHandler, SessionHandler};

/// One simulated cluster node: a rebuilt, ready-to-use [`SessionHandler`].
pub struct TestNode {
    pub handler: Arc<SessionHandler>,
}

/// Builds a single isolated node with its own private store and cluster
/// fabric, already past `rebuild()`. Matches this crate's inline unit
/// tests; used by scenarios that need only one node.
pub async fn single_node(node_id: &str) -> TestNode {
    let session_store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let cluster: Arc<dyn ClusterFabric> = Arc::new(LocalCluster::new(node_id.to_string()));
    node_on_shared_store(node_id, session_store, cluster).await
}

/// Builds a node against a caller-supplied session store and cluster
/// fabric, for scenarios that need several nodes to see the same session
/// rows and/or the same bus and lock table (`spec.md` §8 Scenarios 4/5).
pub async fn node_on_shared_store(
    node_id: &str,
    session_store: Arc<dyn SessionStore>,
    cluster: Arc<dyn ClusterFabric>,
) -> TestNode {
    let message_store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
    let (retained, worker) = RetainedHandler::new(message_store);
    tokio::spawn(worker.run());
    let handler = SessionHandler::new(
        node_id.to_string(),
        session_store,
        retained,
        Vec::new(),
        Arc::new(AllowAll),
        cluster,
        None,
    );
    handler.rebuild().await.unwrap();
    TestNode { handler }
}

/// A bus and lock table shared by several [`LocalCluster`]s, so an
/// in-process test can stand up multiple simulated nodes without a real
/// transport (`spec.md` §8 Scenarios 4/5).
pub struct SharedFabric {
    bus: Arc<LocalMessageBus>,
    locks: Arc<StdMutex<HashSet<String>>>,
}

impl SharedFabric {
    #[must_use]
    pub fn new() -> Self {
        Self { bus: Arc::new(LocalMessageBus::new()), locks: Arc::new(StdMutex::new(HashSet::new())) }
    }

    #[must_use]
    pub fn cluster(&self, node_id: &str) -> Arc<dyn ClusterFabric> {
        Arc::new(LocalCluster::with_shared(node_id.to_string(), self.bus.clone(), self.locks.clone()))
    }
}
