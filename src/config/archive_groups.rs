// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::Deserialize;
use std::time::Duration;

use crate::error::Error;
use crate::message::PayloadFormat;
use crate::store::config_store::ArchiveGroupDef;

/// One `[[archive_groups]]` table: the static seed an `ArchiveGroup`
/// pipeline is built from at startup (`spec.md` §4.5). A `ConfigStore`
/// backend may later add or edit groups at runtime; this is only the
/// config-file-provided starting set.
#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveGroupConfig {
    pub name: String,

    /// Topic filters this group's fan-out accepts.
    pub filters: Vec<String>,

    /// Only archive messages with the retain flag set.
    ///
    /// Default is false.
    #[serde(default = "ArchiveGroupConfig::default_retained_only")]
    pub retained_only: bool,

    /// Store payload bytes as-is, or attempt JSON reformatting.
    ///
    /// Default is raw.
    #[serde(default)]
    pub json_if_parseable: bool,

    pub last_value_store_ref: Option<String>,

    pub archive_store_ref: Option<String>,

    /// Seconds to retain last-value rows; `None` disables purge.
    pub last_value_retention_secs: Option<u64>,

    /// Seconds to retain archive rows; `None` disables purge.
    pub archive_retention_secs: Option<u64>,

    /// Purge sweep interval in seconds.
    ///
    /// Default is 3600 (1 hour).
    #[serde(default = "ArchiveGroupConfig::default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

impl ArchiveGroupConfig {
    #[must_use]
    pub const fn default_retained_only() -> bool {
        false
    }

    #[must_use]
    pub const fn default_purge_interval_secs() -> u64 {
        3600
    }

    #[must_use]
    pub fn into_def(self) -> ArchiveGroupDef {
        ArchiveGroupDef {
            name: self.name,
            filters: self.filters,
            retained_only: self.retained_only,
            payload_format: if self.json_if_parseable {
                PayloadFormat::JsonIfParseable
            } else {
                PayloadFormat::Raw
            },
            last_value_store_ref: self.last_value_store_ref,
            archive_store_ref: self.archive_store_ref,
            last_value_retention: self.last_value_retention_secs.map(Duration::from_secs),
            archive_retention: self.archive_retention_secs.map(Duration::from_secs),
            purge_interval: Some(Duration::from_secs(self.purge_interval_secs)),
        }
    }

    /// Validate config.
    ///
    /// # Errors
    /// Returns error if `name` is blank or `filters` is empty.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::new(crate::error::ErrorKind::ConfigError, "archive_groups[].name must not be blank"));
        }
        if self.filters.is_empty() {
            return Err(Error::new(
                crate::error::ErrorKind::ConfigError,
                format!("archive group {} must have at least one filter", self.name),
            ));
        }
        for filter in &self.filters {
            crate::topic::TopicFilter::parse(filter)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_filter_list() {
        let group = ArchiveGroupConfig {
            name: "g1".to_string(),
            filters: Vec::new(),
            retained_only: false,
            json_if_parseable: false,
            last_value_store_ref: None,
            archive_store_ref: None,
            last_value_retention_secs: None,
            archive_retention_secs: None,
            purge_interval_secs: ArchiveGroupConfig::default_purge_interval_secs(),
        };
        assert!(group.validate().is_err());
    }
}
