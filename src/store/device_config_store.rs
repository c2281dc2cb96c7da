// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! `DeviceConfigStore` contract (`spec.md` §4.7): CRUD over named device
//! integration configurations, assigned per cluster node. The device
//! bridges themselves are out of scope; the core only owns this registry.

use async_trait::async_trait;

use crate::error::Error;
use crate::types::NodeId;

/// Namespace pattern for device/config names, `spec.md` §6:
/// `[A-Za-z0-9_-]+`.
#[must_use]
pub fn is_valid_device_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: String,
    pub node_id: NodeId,
    pub enabled: bool,
    pub kind: String,
    pub settings: Vec<u8>,
}

#[async_trait]
pub trait DeviceConfigStore: Send + Sync {
    /// Upsert on `name`; enforces namespace uniqueness.
    ///
    /// # Errors
    /// Returns `ConfigError` if `device.name` fails
    /// [`is_valid_device_name`].
    async fn save_device(&self, device: DeviceConfig) -> Result<(), Error>;

    async fn get_device(&self, name: &str) -> Result<Option<DeviceConfig>, Error>;

    async fn delete_device(&self, name: &str) -> Result<(), Error>;

    async fn list_devices(&self) -> Result<Vec<DeviceConfig>, Error>;

    /// Called at bridge startup to fetch every device assigned to a node.
    async fn get_enabled_devices_by_node(&self, node_id: &NodeId) -> Result<Vec<DeviceConfig>, Error>;
}
