// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! `spec.md` §8 Scenario 5: on a two-node cluster, one node's purge tick
//! wins the cluster-wide lock and reports `deletedCount=10`; the other
//! observes the lock unavailable and skips. A second tick, with nothing
//! left to delete, reports 0 on both.

mod common;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use mqtt_broker_core::store::memory::MemoryMessageArchive;
use mqtt_broker_core::store::{ArchiveGroupDef, MessageArchive};
use mqtt_broker_core::{ArchiveGroup, BrokerMessage, ClusterFabric, QoS, Topic};

use common::SharedFabric;

fn group_def() -> ArchiveGroupDef {
    ArchiveGroupDef {
        name: "g1".to_string(),
        filters: vec!["sensors/#".to_string()],
        retained_only: false,
        payload_format: mqtt_broker_core::message::PayloadFormat::Raw,
        last_value_store_ref: None,
        archive_store_ref: None,
        last_value_retention: None,
        archive_retention: Some(Duration::from_secs(3600)),
        purge_interval: Some(Duration::from_secs(300)),
    }
}

fn old_message(i: usize, time: SystemTime) -> BrokerMessage {
    let mut msg = BrokerMessage::new(Topic::parse(&format!("sensors/t{i}")).unwrap(), b"v".to_vec(), QoS::AtMostOnce, false, "pub".to_string());
    msg.time = time;
    msg
}

// `ArchiveGroup::purge`'s lock-acquire timeout is a fixed 30s; paused
// virtual time lets N2's contended attempt run out that timeout without
// the test actually taking 30 real seconds.
#[tokio::test(start_paused = true)]
async fn only_one_node_purges_per_tick_under_a_shared_lock() {
    let fabric = SharedFabric::new();
    let n1_cluster = fabric.cluster("n1");
    let n2_cluster = fabric.cluster("n2");

    let archive: Arc<dyn MessageArchive> = Arc::new(MemoryMessageArchive::new());
    let t0 = SystemTime::now() - Duration::from_secs(3600 * 2);
    let old_messages: Vec<BrokerMessage> = (0..10).map(|i| old_message(i, t0)).collect();
    archive.add_history(old_messages).await.unwrap();

    let group_n1 = ArchiveGroup::new(group_def(), None, Some(archive.clone()), None).unwrap();
    let group_n2 = ArchiveGroup::new(group_def(), None, Some(archive.clone()), None).unwrap();

    // N1 holds the lock for the whole first tick; N2's purge attempt
    // must observe it unavailable and report no tick at all.
    let guard = n1_cluster.try_lock("purge-lock-g1-primary", Duration::from_millis(50)).await.unwrap().unwrap();
    let n2_first_tick = group_n2.purge(n2_cluster.as_ref(), "primary").await.unwrap();
    assert!(n2_first_tick.is_none(), "a contended lock must skip the tick, not error");
    drop(guard);

    let n1_first_tick = group_n1.purge(n1_cluster.as_ref(), "primary").await.unwrap().unwrap();
    assert_eq!(n1_first_tick.archive_deleted, 10);

    // Second tick: nothing left older than the retention cutoff.
    let n1_second_tick = group_n1.purge(n1_cluster.as_ref(), "primary").await.unwrap().unwrap();
    assert_eq!(n1_second_tick.archive_deleted, 0);
    let n2_second_tick = group_n2.purge(n2_cluster.as_ref(), "primary").await.unwrap().unwrap();
    assert_eq!(n2_second_tick.archive_deleted, 0);
}
