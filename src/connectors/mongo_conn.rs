// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! `MongoDB` connection helper, an alternate durable backend to
//! [`crate::connectors::pgsql_conn`].

use mongodb::options::{ClientOptions, Credential, ServerAddress};
use serde::Deserialize;
use std::time::Duration;

use crate::error::Error;

/// Configuration for connection to a `MongoDB` server.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Deserialize, Clone)]
pub struct MongoConnConfig {
    /// `MongoDB` server ip or hostname.
    ///
    /// Default is "127.0.0.1"
    #[serde(default = "MongoConnConfig::default_host")]
    pub host: String,

    /// Server port number.
    ///
    /// Default is 27017.
    #[serde(default = "MongoConnConfig::default_port")]
    pub port: u16,

    /// `MongoDB` database name.
    ///
    /// Default is `mqtt-broker-core`.
    #[serde(default = "MongoConnConfig::default_database")]
    pub database: String,

    /// Connection username.
    ///
    /// Default is None.
    #[serde(default = "MongoConnConfig::default_username")]
    pub username: Option<String>,

    /// Connection password.
    ///
    /// Default is None.
    #[serde(default = "MongoConnConfig::default_password")]
    pub password: Option<String>,

    /// Connection/query timeout in seconds.
    ///
    /// Default is 5s.
    #[serde(default = "MongoConnConfig::default_query_timeout")]
    pub query_timeout: u32,
}

impl MongoConnConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    const fn default_port() -> u16 {
        27017
    }

    const fn default_username() -> Option<String> {
        None
    }

    const fn default_password() -> Option<String> {
        None
    }

    fn default_database() -> String {
        "mqtt-broker-core".to_string()
    }

    const fn default_query_timeout() -> u32 {
        5
    }
}

impl Default for MongoConnConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            database: Self::default_database(),
            username: Self::default_username(),
            password: Self::default_password(),
            query_timeout: Self::default_query_timeout(),
        }
    }
}

impl MongoConnConfig {
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.query_timeout))
    }

    fn get_options(&self) -> ClientOptions {
        let mut builder = ClientOptions::default();
        builder.hosts = vec![ServerAddress::Tcp {
            host: self.host.clone(),
            port: Some(self.port),
        }];
        builder.app_name = Some("mqtt-broker-core".to_string());
        builder.connect_timeout = Some(self.query_timeout());
        if self.username.is_some() || self.password.is_some() {
            builder.credential = Some(Credential::builder().username(self.username.clone()).password(self.password.clone()).build());
        }
        builder
    }
}

#[derive(Debug)]
pub struct MongoConn {
    _client: mongodb::Client,
    db: mongodb::Database,
}

impl MongoConn {
    /// Connect to `MongoDB`.
    ///
    /// # Errors
    /// Returns error if the client fails to build.
    pub fn connect(mongo_config: &MongoConnConfig) -> Result<Self, Error> {
        let options = mongo_config.get_options();
        let client = mongodb::Client::with_options(options)?;
        let db = client.database(&mongo_config.database);
        Ok(Self { _client: client, db })
    }

    #[must_use]
    pub const fn get_conn(&self) -> &mongodb::Database {
        &self.db
    }
}
