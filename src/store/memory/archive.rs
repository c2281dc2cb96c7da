// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! In-memory [`MessageArchive`]: an append-only `Vec` per topic, suitable
//! for tests and small deployments without a durable history backend.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant, SystemTime};

use crate::error::Error;
use crate::message::BrokerMessage;
use crate::store::archive_store::{AggregateFn, AggregateValue, AggregatedHistory, MessageArchive};
use crate::store::message_store::ConnectionStatus;

#[derive(Debug, Default)]
pub struct MemoryMessageArchive {
    rows: RwLock<HashMap<String, Vec<BrokerMessage>>>,
}

impl MemoryMessageArchive {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageArchive for MemoryMessageArchive {
    async fn add_history(&self, messages: Vec<BrokerMessage>) -> Result<(), Error> {
        let mut rows = self.rows.write().unwrap();
        for msg in messages {
            let topic = msg.topic_name.to_string();
            let series = rows.entry(topic).or_default();
            if let Some(existing) = series.iter_mut().find(|existing| existing.time == msg.time) {
                *existing = msg;
            } else {
                series.push(msg);
            }
        }
        Ok(())
    }

    async fn purge_old_messages(&self, cutoff: SystemTime) -> Result<(usize, Duration), Error> {
        let started = Instant::now();
        let mut rows = self.rows.write().unwrap();
        let mut removed = 0;
        for series in rows.values_mut() {
            let before = series.len();
            series.retain(|msg| msg.time > cutoff);
            removed += before - series.len();
        }
        Ok((removed, started.elapsed()))
    }

    async fn drop_storage(&self) -> Result<(), Error> {
        self.rows.write().unwrap().clear();
        Ok(())
    }

    async fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::Connected
    }

    async fn table_exists(&self) -> Result<bool, Error> {
        Ok(true)
    }

    async fn create_table(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn get_history(
        &self,
        topic: &str,
        start_time: Option<SystemTime>,
        end_time: Option<SystemTime>,
        limit: usize,
    ) -> Result<Vec<BrokerMessage>, Error> {
        let rows = self.rows.read().unwrap();
        let Some(series) = rows.get(topic) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<BrokerMessage> = series
            .iter()
            .filter(|msg| start_time.map_or(true, |start| msg.time >= start))
            .filter(|msg| end_time.map_or(true, |end| msg.time <= end))
            .cloned()
            .collect();
        out.sort_by_key(|msg| msg.time);
        out.truncate(limit);
        Ok(out)
    }

    async fn get_aggregated_history(
        &self,
        topics: &[String],
        start_time: SystemTime,
        end_time: SystemTime,
        _bucket_minutes: u32,
        funcs: &[AggregateFn],
        _fields: &[String],
    ) -> Result<AggregatedHistory, Error> {
        let rows = self.rows.read().unwrap();
        let mut result = AggregatedHistory {
            columns: vec!["topic".to_string()],
            rows: Vec::new(),
        };
        result.columns.extend(funcs.iter().map(|f| format!("{f:?}").to_lowercase()));

        for topic in topics {
            let Some(series) = rows.get(topic) else {
                continue;
            };
            let windowed: Vec<f64> = series
                .iter()
                .filter(|msg| msg.time >= start_time && msg.time <= end_time)
                .map(|msg| msg.payload.len() as f64)
                .collect();
            if windowed.is_empty() {
                continue;
            }
            let mut row = vec![AggregateValue::Text(topic.clone())];
            for func in funcs {
                row.push(aggregate(func, &windowed));
            }
            result.rows.push(row);
        }
        Ok(result)
    }
}

fn aggregate(func: &AggregateFn, values: &[f64]) -> AggregateValue {
    match func {
        AggregateFn::Avg => AggregateValue::Float(values.iter().sum::<f64>() / values.len() as f64),
        AggregateFn::Min => AggregateValue::Float(values.iter().copied().fold(f64::INFINITY, f64::min)),
        AggregateFn::Max => AggregateValue::Float(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        AggregateFn::Count => AggregateValue::Int(values.len() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::Topic;
    use crate::types::QoS;

    fn msg_at(topic: &str, time: SystemTime) -> BrokerMessage {
        let mut m = BrokerMessage::new(Topic::parse(topic).unwrap(), b"1".to_vec(), QoS::AtMostOnce, false, "pub".to_string());
        m.time = time;
        m
    }

    #[tokio::test]
    async fn duplicate_topic_time_key_updates_in_place() {
        let archive = MemoryMessageArchive::new();
        let t = SystemTime::UNIX_EPOCH;
        archive.add_history(vec![msg_at("a/b", t)]).await.unwrap();
        let mut updated = msg_at("a/b", t);
        updated.payload = b"2".to_vec();
        archive.add_history(vec![updated]).await.unwrap();

        let history = archive.get_history("a/b", None, None, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].payload, b"2".to_vec());
    }

    #[tokio::test]
    async fn purge_old_messages_respects_cutoff() {
        let archive = MemoryMessageArchive::new();
        let old = SystemTime::UNIX_EPOCH;
        let now = SystemTime::now();
        archive.add_history(vec![msg_at("a/b", old), msg_at("a/b", now)]).await.unwrap();
        let (removed, _) = archive.purge_old_messages(old).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(archive.get_history("a/b", None, None, 10).await.unwrap().len(), 1);
    }
}
