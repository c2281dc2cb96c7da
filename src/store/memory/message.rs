// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! In-memory [`MessageStore`]: the retained / last-value table, keyed by
//! topic name.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant, SystemTime};

use crate::error::Error;
use crate::message::BrokerMessage;
use crate::store::message_store::{ConnectionStatus, MessageStore};
use crate::topic::{Topic, TopicFilter};

#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    rows: RwLock<HashMap<String, BrokerMessage>>,
}

impl MemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn get(&self, topic_name: &str) -> Result<Option<BrokerMessage>, Error> {
        Ok(self.rows.read().unwrap().get(topic_name).cloned())
    }

    async fn add_all(&self, messages: Vec<BrokerMessage>) -> Result<(), Error> {
        let mut rows = self.rows.write().unwrap();
        for msg in messages {
            rows.insert(msg.topic_name.to_string(), msg);
        }
        Ok(())
    }

    async fn del_all(&self, topics: Vec<String>) -> Result<(), Error> {
        let mut rows = self.rows.write().unwrap();
        for topic in topics {
            rows.remove(&topic);
        }
        Ok(())
    }

    async fn find_matching_messages(
        &self,
        pattern: &TopicFilter,
        cb: &mut (dyn FnMut(&BrokerMessage) -> bool + Send),
    ) -> Result<(), Error> {
        let rows = self.rows.read().unwrap();
        for msg in rows.values() {
            if pattern.is_match(&msg.topic_name) && !cb(msg) {
                break;
            }
        }
        Ok(())
    }

    async fn find_matching_topics(
        &self,
        pattern: &TopicFilter,
        cb: &mut (dyn FnMut(&str) -> bool + Send),
    ) -> Result<(), Error> {
        let rows = self.rows.read().unwrap();
        let mut seen = std::collections::HashSet::new();
        for topic_name in rows.keys() {
            let topic = Topic::parse(topic_name)?;
            if pattern.is_match(&topic) && seen.insert(topic_name.clone()) && !cb(topic_name) {
                break;
            }
        }
        Ok(())
    }

    async fn purge_old_messages(&self, cutoff: SystemTime) -> Result<(usize, Duration), Error> {
        let started = Instant::now();
        let mut rows = self.rows.write().unwrap();
        let before = rows.len();
        rows.retain(|_, msg| msg.time > cutoff);
        Ok((before - rows.len(), started.elapsed()))
    }

    async fn drop_storage(&self) -> Result<(), Error> {
        self.rows.write().unwrap().clear();
        Ok(())
    }

    async fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClientId, QoS};

    fn msg(topic: &str) -> BrokerMessage {
        BrokerMessage::new(Topic::parse(topic).unwrap(), b"v".to_vec(), QoS::AtMostOnce, true, ClientId::from("pub"))
    }

    #[tokio::test]
    async fn find_matching_messages_honors_wildcards() {
        let store = MemoryMessageStore::new();
        store.add_all(vec![msg("a/b"), msg("a/c"), msg("x/y")]).await.unwrap();

        let mut found = Vec::new();
        store
            .find_matching_messages(&TopicFilter::parse("a/+").unwrap(), &mut |m| {
                found.push(m.topic_name.to_string());
                true
            })
            .await
            .unwrap();
        found.sort();
        assert_eq!(found, vec!["a/b".to_string(), "a/c".to_string()]);
    }

    #[tokio::test]
    async fn del_all_removes_only_named_topics() {
        let store = MemoryMessageStore::new();
        store.add_all(vec![msg("a/b"), msg("a/c")]).await.unwrap();
        store.del_all(vec!["a/b".to_string()]).await.unwrap();
        assert!(store.get("a/b").await.unwrap().is_none());
        assert!(store.get("a/c").await.unwrap().is_some());
    }
}
