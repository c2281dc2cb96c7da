// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Core data model (`spec.md` §3): the immutable message envelope, the
//! subscription row, the session row, and the queued-message link that the
//! delivery state machine tracks.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

use crate::topic::{Topic, TopicFilter};
use crate::types::{ClientId, MessageUuid, NodeId, PacketId, QoS};

/// An immutable publish, once constructed. `spec.md` §3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub message_uuid: MessageUuid,
    pub message_id: PacketId,
    pub topic_name: Topic,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub time: SystemTime,
    pub publisher_client_id: ClientId,
}

impl BrokerMessage {
    #[must_use]
    pub fn new(
        topic_name: Topic,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
        publisher_client_id: ClientId,
    ) -> Self {
        Self {
            message_uuid: MessageUuid::generate(),
            message_id: 0,
            topic_name,
            payload,
            qos,
            retain,
            dup: false,
            time: SystemTime::now(),
            publisher_client_id,
        }
    }

    /// Returns a copy with `dup` set, used on QoS≥1 redelivery.
    #[must_use]
    pub fn as_redelivery(&self) -> Self {
        let mut copy = self.clone();
        copy.dup = true;
        copy
    }
}

/// How a retained message is (or is not) replayed on a fresh SUBSCRIBE.
/// `spec.md` §3/§4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetainHandling {
    SendOnSubscribe,
    SendOnNewSubscribe,
    DoNotSend,
}

/// `spec.md` §3. Uniqueness key is `(client_id, topic_filter)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub client_id: ClientId,
    pub topic_filter: TopicFilter,
    pub qos: QoS,
    pub no_local: bool,
    pub retain_as_published: bool,
    pub retain_handling: RetainHandling,
}

impl Subscription {
    #[must_use]
    pub fn key(&self) -> (ClientId, String) {
        (self.client_id.clone(), self.topic_filter.as_str().to_string())
    }
}

/// A will message scheduled for publication on ungraceful disconnect,
/// unless cleared by a normal DISCONNECT. `spec.md` §3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastWill {
    pub message: BrokerMessage,
    pub delay: Duration,
}

/// `spec.md` §3: the session row. `node_id` is the current owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub client_id: ClientId,
    pub node_id: NodeId,
    pub clean_session: bool,
    pub connected: bool,
    pub update_time: SystemTime,
    pub information: Vec<u8>,
    pub last_will: Option<LastWill>,
}

impl Session {
    #[must_use]
    pub fn new(client_id: ClientId, node_id: NodeId, clean_session: bool) -> Self {
        Self {
            client_id,
            node_id,
            clean_session,
            connected: true,
            update_time: SystemTime::now(),
            information: Vec::new(),
            last_will: None,
        }
    }
}

/// `spec.md` §3: the globally-keyed queued message body, separate from the
/// per-client delivery link (see [`crate::delivery`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub message_uuid: MessageUuid,
    pub message_id: PacketId,
    pub topic_name: Topic,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub publisher_client_id: ClientId,
}

impl From<&BrokerMessage> for QueuedMessage {
    fn from(msg: &BrokerMessage) -> Self {
        Self {
            message_uuid: msg.message_uuid,
            message_id: msg.message_id,
            topic_name: msg.topic_name.clone(),
            payload: msg.payload.clone(),
            qos: msg.qos,
            retain: msg.retain,
            publisher_client_id: msg.publisher_client_id.clone(),
        }
    }
}

impl QueuedMessage {
    /// Rehydrates a dequeued row back into a [`BrokerMessage`] for
    /// delivery; `dup` reflects whether this is a redelivery attempt.
    #[must_use]
    pub fn into_broker_message(self, dup: bool) -> BrokerMessage {
        BrokerMessage {
            message_uuid: self.message_uuid,
            message_id: self.message_id,
            topic_name: self.topic_name,
            payload: self.payload,
            qos: self.qos,
            retain: self.retain,
            dup,
            time: SystemTime::now(),
            publisher_client_id: self.publisher_client_id,
        }
    }
}

/// Payload storage policy for an archive group. `spec.md` §3/§4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    #[default]
    Raw,
    JsonIfParseable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redelivery_sets_dup_without_changing_uuid() {
        let msg = BrokerMessage::new(
            Topic::parse("a/b").unwrap(),
            b"hi".to_vec(),
            QoS::AtLeastOnce,
            false,
            "pub1".to_string(),
        );
        let redelivered = msg.as_redelivery();
        assert!(redelivered.dup);
        assert_eq!(redelivered.message_uuid, msg.message_uuid);
    }
}
