// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Ambient configuration (`SPEC_FULL.md` §2.3). Parsing a TOML file into
//! [`Config`] is left to the caller (`spec.md` §1 scopes config-file
//! parsing out); this module only defines the `Deserialize` shape and the
//! [`ArchiveGroupConfig`] → [`crate::store::ArchiveGroupDef`] conversion.

use serde::Deserialize;

use crate::error::Error;

mod archive_groups;
mod general;
mod log;
mod storage;

pub use archive_groups::ArchiveGroupConfig;
pub use general::General;
pub use self::log::{Log, LogLevel};
pub use storage::{Storage, StorageBackend};

#[derive(Debug, Default, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    general: General,

    #[serde(default)]
    storage: Storage,

    #[serde(default)]
    archive_groups: Vec<ArchiveGroupConfig>,

    #[serde(default)]
    log: Log,
}

impl Config {
    #[must_use]
    pub const fn general(&self) -> &General {
        &self.general
    }

    #[must_use]
    pub const fn storage(&self) -> &Storage {
        &self.storage
    }

    #[must_use]
    pub fn archive_groups(&self) -> &[ArchiveGroupConfig] {
        &self.archive_groups
    }

    #[must_use]
    pub const fn log(&self) -> &Log {
        &self.log
    }

    /// Validate config.
    ///
    /// # Errors
    /// Returns error if any section fails its own validation.
    pub fn validate(&self) -> Result<(), Error> {
        self.general.validate()?;
        self.storage.validate()?;
        for group in &self.archive_groups {
            group.validate()?;
        }
        self.log.validate()
    }
}
