// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! `MetricsStore` contract (`spec.md` §4.7): thin, optional counters tagged
//! by kind. A scrape/reporting endpoint is out of scope; this only needs to
//! give the Session Handler and Archive Group somewhere to record counts.

use async_trait::async_trait;
use std::time::SystemTime;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Broker,
    Session,
    Bridge,
}

#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn record(&self, kind: MetricKind, name: &str, value: i64) -> Result<(), Error>;

    async fn latest(&self, kind: MetricKind, name: &str) -> Result<Option<i64>, Error>;

    async fn history_since(
        &self,
        kind: MetricKind,
        name: &str,
        since: SystemTime,
    ) -> Result<Vec<(SystemTime, i64)>, Error>;
}
