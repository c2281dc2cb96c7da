// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! `ConfigStore` contract (`spec.md` §4.7): named archive-group
//! definitions.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Error;
use crate::message::PayloadFormat;

/// A persisted archive-group definition, as read by the Archive Group
/// pipeline at startup/reconfiguration.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveGroupDef {
    pub name: String,
    pub filters: Vec<String>,
    pub retained_only: bool,
    pub payload_format: PayloadFormat,
    pub last_value_store_ref: Option<String>,
    pub archive_store_ref: Option<String>,
    pub last_value_retention: Option<Duration>,
    pub archive_retention: Option<Duration>,
    pub purge_interval: Option<Duration>,
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_archive_group(&self, name: &str) -> Result<Option<ArchiveGroupDef>, Error>;

    async fn list_archive_groups(&self) -> Result<Vec<ArchiveGroupDef>, Error>;

    async fn save_archive_group(&self, def: ArchiveGroupDef) -> Result<(), Error>;

    async fn delete_archive_group(&self, name: &str) -> Result<(), Error>;
}
