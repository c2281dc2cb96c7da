// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Cluster Fabric (`spec.md` §4.8): a stable node identity, the
//! [`crate::bus::MessageBus`], a cluster-wide named lock with timeout,
//! and a cluster-wide key-value map for ephemeral routing hints. When
//! clustering is disabled every primitive degrades to a process-local
//! implementation and cross-node delivery collapses to a no-op; nothing
//! in the core reaches across nodes except through this trait.

mod local;

pub use local::{LocalCluster, LockGuard};

use std::time::Duration;

use async_trait::async_trait;

use crate::bus::MessageBus;
use crate::error::Error;
use crate::types::NodeId;

#[async_trait]
pub trait ClusterFabric: Send + Sync {
    fn node_id(&self) -> &NodeId;

    fn bus(&self) -> &dyn MessageBus;

    /// Acquires a cluster-wide named lock within `timeout`. Used by the
    /// Archive Group purge sweep (`spec.md` §4.5) so at most one node
    /// purges a given `(group, role)` per tick. Returns `Ok(None)` — not
    /// an error — on timeout; callers treat that as
    /// `ErrorKind::LockAcquisitionFailed` and skip the tick.
    ///
    /// # Errors
    /// Returns an error only on a fabric-level failure, never on timeout.
    async fn try_lock(&self, name: &str, timeout: Duration) -> Result<Option<LockGuard>, Error>;

    /// # Errors
    /// Returns an error on a fabric-level failure.
    async fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    /// # Errors
    /// Returns an error on a fabric-level failure.
    async fn kv_set(&self, key: &str, value: Vec<u8>) -> Result<(), Error>;

    /// # Errors
    /// Returns an error on a fabric-level failure.
    async fn kv_delete(&self, key: &str) -> Result<(), Error>;
}
