// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Process-local [`MessageBus`]: one broadcast channel per address,
//! created lazily on first use. This is the cluster-disabled degrade
//! path (`spec.md` §4.8) and also backs single-node tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{BusEvent, MessageBus};
use crate::error::Error;

/// Per-address channel capacity. A slow subscriber that falls behind this
/// many events starts missing the oldest ones (`broadcast::Receiver::recv`
/// surfaces `Lagged`); best-effort delivery tolerates this.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
pub struct LocalMessageBus {
    channels: RwLock<HashMap<String, broadcast::Sender<BusEvent>>>,
}

impl LocalMessageBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, address: &str) -> broadcast::Sender<BusEvent> {
        if let Some(tx) = self.channels.read().unwrap().get(address) {
            return tx.clone();
        }
        self.channels
            .write()
            .unwrap()
            .entry(address.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl MessageBus for LocalMessageBus {
    async fn publish(&self, address: &str, event: BusEvent) -> Result<(), Error> {
        // A `SendError` here only means there are currently no
        // subscribers, which is not a transport failure.
        let _ = self.sender(address).send(event);
        Ok(())
    }

    async fn subscribe(&self, address: &str) -> broadcast::Receiver<BusEvent> {
        self.sender(address).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::BrokerMessage;
    use crate::topic::Topic;
    use crate::types::QoS;

    #[tokio::test]
    async fn subscriber_receives_a_later_publish_on_the_same_address() {
        let bus = LocalMessageBus::new();
        let mut rx = bus.subscribe("store/sessions/add").await;
        bus.publish("store/sessions/add", BusEvent::IndexChange(vec!["c1".to_string()]))
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            BusEvent::IndexChange(changed) => assert_eq!(changed, vec!["c1".to_string()]),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn distinct_addresses_do_not_cross_talk() {
        let bus = LocalMessageBus::new();
        let mut rx_a = bus.subscribe("node/a/deliver").await;
        let msg = BrokerMessage::new(Topic::parse("x").unwrap(), b"p".to_vec(), QoS::AtMostOnce, false, "pub".to_string());
        bus.publish(
            "node/b/deliver",
            BusEvent::Deliver(crate::bus::RoutedDelivery { client_id: "c1".to_string(), message: msg }),
        )
        .await
        .unwrap();
        assert!(rx_a.try_recv().is_err());
    }
}
