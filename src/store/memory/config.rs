// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! In-memory [`ConfigStore`], used when archive groups are defined purely
//! from the static config file and never edited at runtime.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::Error;
use crate::store::config_store::{ArchiveGroupDef, ConfigStore};

#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    groups: RwLock<HashMap<String, ArchiveGroupDef>>,
}

impl MemoryConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_groups(groups: Vec<ArchiveGroupDef>) -> Self {
        let store = Self::new();
        for group in groups {
            store.groups.write().unwrap().insert(group.name.clone(), group);
        }
        store
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get_archive_group(&self, name: &str) -> Result<Option<ArchiveGroupDef>, Error> {
        Ok(self.groups.read().unwrap().get(name).cloned())
    }

    async fn list_archive_groups(&self) -> Result<Vec<ArchiveGroupDef>, Error> {
        Ok(self.groups.read().unwrap().values().cloned().collect())
    }

    async fn save_archive_group(&self, def: ArchiveGroupDef) -> Result<(), Error> {
        self.groups.write().unwrap().insert(def.name.clone(), def);
        Ok(())
    }

    async fn delete_archive_group(&self, name: &str) -> Result<(), Error> {
        self.groups.write().unwrap().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PayloadFormat;

    fn group(name: &str) -> ArchiveGroupDef {
        ArchiveGroupDef {
            name: name.to_string(),
            filters: vec!["a/#".to_string()],
            retained_only: false,
            payload_format: PayloadFormat::Raw,
            last_value_store_ref: None,
            archive_store_ref: None,
            last_value_retention: None,
            archive_retention: None,
            purge_interval: None,
        }
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let store = MemoryConfigStore::new();
        store.save_archive_group(group("g1")).await.unwrap();
        assert!(store.get_archive_group("g1").await.unwrap().is_some());
        store.delete_archive_group("g1").await.unwrap();
        assert!(store.get_archive_group("g1").await.unwrap().is_none());
    }
}
