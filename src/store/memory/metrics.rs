// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! In-memory [`MetricsStore`]: bounded per-name history, oldest entries
//! dropped first.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::SystemTime;

use crate::error::Error;
use crate::store::metrics_store::{MetricKind, MetricsStore};

/// Entries kept per `(kind, name)` before the oldest is dropped.
const MAX_HISTORY: usize = 1024;

#[derive(Debug, Default)]
pub struct MemoryMetricsStore {
    series: RwLock<HashMap<(MetricKind, String), Vec<(SystemTime, i64)>>>,
}

impl MemoryMetricsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsStore for MemoryMetricsStore {
    async fn record(&self, kind: MetricKind, name: &str, value: i64) -> Result<(), Error> {
        let mut series = self.series.write().unwrap();
        let entries = series.entry((kind, name.to_string())).or_default();
        entries.push((SystemTime::now(), value));
        if entries.len() > MAX_HISTORY {
            entries.remove(0);
        }
        Ok(())
    }

    async fn latest(&self, kind: MetricKind, name: &str) -> Result<Option<i64>, Error> {
        Ok(self
            .series
            .read()
            .unwrap()
            .get(&(kind, name.to_string()))
            .and_then(|entries| entries.last())
            .map(|(_, value)| *value))
    }

    async fn history_since(
        &self,
        kind: MetricKind,
        name: &str,
        since: SystemTime,
    ) -> Result<Vec<(SystemTime, i64)>, Error> {
        Ok(self
            .series
            .read()
            .unwrap()
            .get(&(kind, name.to_string()))
            .map(|entries| entries.iter().filter(|(t, _)| *t >= since).copied().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_reflects_most_recent_record() {
        let store = MemoryMetricsStore::new();
        store.record(MetricKind::Broker, "queued", 1).await.unwrap();
        store.record(MetricKind::Broker, "queued", 2).await.unwrap();
        assert_eq!(store.latest(MetricKind::Broker, "queued").await.unwrap(), Some(2));
    }
}
