// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! `MessageArchive` contract (`spec.md` §4.7): append-only history keyed by
//! `(topic, time)`, plus an analytics extension.

use async_trait::async_trait;
use std::time::{Duration, SystemTime};

use crate::error::Error;
use crate::message::BrokerMessage;
use crate::store::message_store::ConnectionStatus;

/// One of the aggregation functions supported by `get_aggregated_history`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFn {
    Avg,
    Min,
    Max,
    Count,
}

/// A generic `{columns, rows}` result shape for analytics queries, matching
/// the column-oriented result sets the teacher's `mongo_conn`/`pgsql_conn`
/// adapters already return.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedHistory {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<AggregateValue>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateValue {
    Float(f64),
    Int(i64),
    Text(String),
    Timestamp(SystemTime),
    Null,
}

#[async_trait]
pub trait MessageArchive: Send + Sync {
    /// Appends `messages`; a duplicate `(topic, time)` key is treated as an
    /// update of payload/qos/client-id (`spec.md` §4.5).
    async fn add_history(&self, messages: Vec<BrokerMessage>) -> Result<(), Error>;

    async fn purge_old_messages(&self, cutoff: SystemTime) -> Result<(usize, Duration), Error>;

    async fn drop_storage(&self) -> Result<(), Error>;

    async fn connection_status(&self) -> ConnectionStatus;

    async fn table_exists(&self) -> Result<bool, Error>;

    async fn create_table(&self) -> Result<(), Error>;

    async fn get_history(
        &self,
        topic: &str,
        start_time: Option<SystemTime>,
        end_time: Option<SystemTime>,
        limit: usize,
    ) -> Result<Vec<BrokerMessage>, Error>;

    async fn get_aggregated_history(
        &self,
        topics: &[String],
        start_time: SystemTime,
        end_time: SystemTime,
        bucket_minutes: u32,
        funcs: &[AggregateFn],
        fields: &[String],
    ) -> Result<AggregatedHistory, Error>;
}
