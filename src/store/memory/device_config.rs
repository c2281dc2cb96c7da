// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! In-memory [`DeviceConfigStore`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, ErrorKind};
use crate::store::device_config_store::{is_valid_device_name, DeviceConfig, DeviceConfigStore};
use crate::types::NodeId;

#[derive(Debug, Default)]
pub struct MemoryDeviceConfigStore {
    devices: RwLock<HashMap<String, DeviceConfig>>,
}

impl MemoryDeviceConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceConfigStore for MemoryDeviceConfigStore {
    async fn save_device(&self, device: DeviceConfig) -> Result<(), Error> {
        if !is_valid_device_name(&device.name) {
            return Err(Error::new(ErrorKind::ConfigError, format!("invalid device name: {}", device.name)));
        }
        self.devices.write().unwrap().insert(device.name.clone(), device);
        Ok(())
    }

    async fn get_device(&self, name: &str) -> Result<Option<DeviceConfig>, Error> {
        Ok(self.devices.read().unwrap().get(name).cloned())
    }

    async fn delete_device(&self, name: &str) -> Result<(), Error> {
        self.devices.write().unwrap().remove(name);
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<DeviceConfig>, Error> {
        Ok(self.devices.read().unwrap().values().cloned().collect())
    }

    async fn get_enabled_devices_by_node(&self, node_id: &NodeId) -> Result<Vec<DeviceConfig>, Error> {
        Ok(self
            .devices
            .read()
            .unwrap()
            .values()
            .filter(|d| &d.node_id == node_id && d.enabled)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str) -> DeviceConfig {
        DeviceConfig {
            name: name.to_string(),
            node_id: "node1".to_string(),
            enabled: true,
            kind: "test".to_string(),
            settings: Vec::new(),
        }
    }

    #[tokio::test]
    async fn save_rejects_invalid_name() {
        let store = MemoryDeviceConfigStore::new();
        let err = store.save_device(device("bad name!")).await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ConfigError);
    }

    #[tokio::test]
    async fn enabled_devices_filtered_by_node_and_flag() {
        let store = MemoryDeviceConfigStore::new();
        store.save_device(device("dev-1")).await.unwrap();
        let mut disabled = device("dev-2");
        disabled.enabled = false;
        store.save_device(disabled).await.unwrap();

        let found = store.get_enabled_devices_by_node(&"node1".to_string()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "dev-1");
    }
}
