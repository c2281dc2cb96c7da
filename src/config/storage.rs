// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::Deserialize;

use crate::error::Error;

#[cfg(feature = "pgsql_conn")]
use crate::connectors::pgsql_conn::PgSQLConnConfig;

#[cfg(feature = "mongodb_conn")]
use crate::connectors::mongo_conn::MongoConnConfig;

/// Selects the backend used for the Session Handler's `SessionStore` and
/// the last-value/archive `MessageStore`/`MessageArchive` pair.
/// `spec.md` §4.7: "ship at least one in-memory and one durable
/// implementation."
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,

    #[cfg(feature = "pgsql_conn")]
    Postgres(PgSQLConnConfig),

    #[cfg(feature = "mongodb_conn")]
    MongoDb(MongoConnConfig),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::Memory
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Storage {
    /// Backend used for sessions, subscriptions and queued-message links.
    ///
    /// Default is `Memory`.
    #[serde(default)]
    session_backend: StorageBackend,

    /// Backend used for the retained/last-value table.
    ///
    /// Default is `Memory`.
    #[serde(default)]
    message_backend: StorageBackend,
}

impl Storage {
    #[must_use]
    pub const fn session_backend(&self) -> &StorageBackend {
        &self.session_backend
    }

    #[must_use]
    pub const fn message_backend(&self) -> &StorageBackend {
        &self.message_backend
    }

    /// Validate storage config.
    ///
    /// # Errors
    /// Always succeeds today; reserved for cross-field checks once a
    /// durable backend gains connection-string validation.
    pub const fn validate(&self) -> Result<(), Error> {
        Ok(())
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            session_backend: StorageBackend::default(),
            message_backend: StorageBackend::default(),
        }
    }
}
