// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

/// General section in config: node identity and the ambient sweep/rebuild
/// timers shared by every component.
#[derive(Debug, Deserialize, Clone)]
pub struct General {
    /// Stable identifier of this cluster node. Default is a random value
    /// generated at startup by the caller; config only carries an explicit
    /// override.
    #[serde(default = "General::default_node_id")]
    node_id: String,

    /// Enables the Cluster Fabric. When false every cluster operation
    /// degrades to a process-local no-op (`spec.md` §4.8).
    #[serde(default = "General::default_cluster_enabled")]
    cluster_enabled: bool,

    /// Directory backing the in-memory store's optional snapshot file and
    /// any durable-store-adjacent scratch space.
    ///
    /// Default is "/var/lib/mqtt-broker-core".
    #[serde(default = "General::default_data_dir")]
    data_dir: PathBuf,

    /// Interval between Session Handler purge sweeps (delivered/expired
    /// links, clean-session rows). `spec.md` §4.2/§4.6.
    ///
    /// Default is 30s.
    #[serde(default = "General::default_sweep_interval")]
    sweep_interval: u32,

    /// Batch size drained from each bounded mpsc queue per wake-up.
    /// `spec.md` §5.
    ///
    /// Default is 1000.
    #[serde(default = "General::default_drain_batch_size")]
    drain_batch_size: usize,

    /// Capacity of each component's bounded mpsc command queue.
    /// `spec.md` §5.
    ///
    /// Default is 10000.
    #[serde(default = "General::default_queue_capacity")]
    queue_capacity: usize,
}

impl General {
    #[must_use]
    pub fn default_node_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    #[must_use]
    pub const fn default_cluster_enabled() -> bool {
        false
    }

    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        PathBuf::from("/var/lib/mqtt-broker-core")
    }

    #[must_use]
    pub const fn default_sweep_interval() -> u32 {
        30
    }

    #[must_use]
    pub const fn default_drain_batch_size() -> usize {
        1000
    }

    #[must_use]
    pub const fn default_queue_capacity() -> usize {
        10_000
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    #[must_use]
    pub const fn cluster_enabled(&self) -> bool {
        self.cluster_enabled
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        self.data_dir.as_path()
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval as u64)
    }

    #[must_use]
    pub const fn drain_batch_size(&self) -> usize {
        self.drain_batch_size
    }

    #[must_use]
    pub const fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Validate config.
    ///
    /// # Errors
    /// Returns error if `node_id` is blank.
    pub fn validate(&self) -> Result<(), Error> {
        if self.node_id.trim().is_empty() {
            return Err(Error::new(crate::error::ErrorKind::ConfigError, "general.node_id must not be blank"));
        }
        Ok(())
    }
}

impl Default for General {
    fn default() -> Self {
        Self {
            node_id: Self::default_node_id(),
            cluster_enabled: Self::default_cluster_enabled(),
            data_dir: Self::default_data_dir(),
            sweep_interval: Self::default_sweep_interval(),
            drain_batch_size: Self::default_drain_batch_size(),
            queue_capacity: Self::default_queue_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_blank_node_id() {
        let general = General {
            node_id: "  ".to_string(),
            ..General::default()
        };
        assert!(general.validate().is_err());
    }
}
