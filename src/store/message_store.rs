// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! `MessageStore` contract (`spec.md` §4.7): the last-value / retained
//! store, keyed by topic name.

use async_trait::async_trait;
use std::time::{Duration, SystemTime};

use crate::error::Error;
use crate::message::BrokerMessage;
use crate::topic::TopicFilter;

/// Backend reachability, surfaced so the session/archive handlers can
/// decide whether to degrade (`spec.md` §7 `StoreUnavailable`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn get(&self, topic_name: &str) -> Result<Option<BrokerMessage>, Error>;

    /// Upserts every message in `messages`, keyed by topic name.
    async fn add_all(&self, messages: Vec<BrokerMessage>) -> Result<(), Error>;

    /// Deletes the retained entry for every topic in `topics`.
    async fn del_all(&self, topics: Vec<String>) -> Result<(), Error>;

    /// Honors MQTT wildcard semantics against `pattern`; `cb` returns
    /// `false` to stop early.
    async fn find_matching_messages(
        &self,
        pattern: &TopicFilter,
        cb: &mut (dyn FnMut(&BrokerMessage) -> bool + Send),
    ) -> Result<(), Error>;

    /// Returns distinct topic prefixes at `pattern`'s depth, for
    /// tree-browsing use cases (`SPEC_FULL.md` §3).
    async fn find_matching_topics(
        &self,
        pattern: &TopicFilter,
        cb: &mut (dyn FnMut(&str) -> bool + Send),
    ) -> Result<(), Error>;

    /// Deletes every row with `time <= cutoff`. Returns `(deleted_count,
    /// elapsed)`.
    async fn purge_old_messages(&self, cutoff: SystemTime) -> Result<(usize, Duration), Error>;

    async fn drop_storage(&self) -> Result<(), Error>;

    async fn connection_status(&self) -> ConnectionStatus;
}
