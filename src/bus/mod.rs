// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Message Bus (`spec.md` §4.3): an abstraction over the cluster
//! transport. The core never reaches across nodes except through this
//! trait; a real deployment would back it with NATS, Kafka, or a
//! cluster-internal gossip protocol (an external collaborator, `spec.md`
//! §1). [`LocalMessageBus`] is the in-process degrade path used when
//! clustering is disabled (`spec.md` §4.8).

mod local;

pub use local::LocalMessageBus;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Error;
use crate::message::BrokerMessage;
use crate::types::{ClientId, NodeId};

/// Bridge admin/value-injection addresses (`spec.md` §6). The bridges
/// themselves are out of scope; the core only needs to agree with peers
/// on these exact strings.
pub const DEVICE_CONFIG_CHANGED: &str = "winccoa.device.config.changed";
pub const VALUE_PUBLISH: &str = "winccoa.value.publish";
pub const BRIDGE_CONNECTORS_LIST: &str = "winccoa.bridge.connectors.list";

/// `node/<nodeId>/deliver`: a PUBLISH routed to the node that owns the
/// subscriber. `spec.md` §6.
#[must_use]
pub fn deliver_address(node_id: &NodeId) -> String {
    format!("node/{node_id}/deliver")
}

/// `store/<storeName>/add`: index-change broadcast, payload is an array
/// of topic strings. `spec.md` §6.
#[must_use]
pub fn store_add_address(store_name: &str) -> String {
    format!("store/{store_name}/add")
}

/// `store/<storeName>/del`, symmetric with [`store_add_address`].
#[must_use]
pub fn store_del_address(store_name: &str) -> String {
    format!("store/{store_name}/del")
}

/// A PUBLISH frame routed to a remote node, `spec.md` §4.3: "Messages
/// crossing nodes carry the full `BrokerMessage` plus the destination
/// clientId."
#[derive(Debug, Clone)]
pub struct RoutedDelivery {
    pub client_id: ClientId,
    pub message: BrokerMessage,
}

/// One event carried on a bus address. The wire codec is out of scope
/// (`spec.md` §1); addresses exchange these structured events directly
/// rather than pre-serialized bytes, since every peer in this repo is a
/// Rust process linking the same core.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// Posted to `node/<id>/deliver`: a QoS 0 publish forwarded straight
    /// to a subscriber owned by this node.
    Deliver(RoutedDelivery),
    /// Posted to `node/<id>/deliver`: a QoS≥1 message was just enqueued
    /// for `ClientId` on this node's shared store; the receiver runs the
    /// same queue-first dispatch as a local publish (`spec.md` §4.3:
    /// "Receivers on the owning node route into the delivery state
    /// machine identically to local publishes").
    DispatchHint(ClientId),
    /// Posted to `store/<name>/add|del`: the changed topic/client-id set.
    IndexChange(Vec<String>),
    /// Posted to the bridge admin addresses; payload format is owned by
    /// the (out-of-scope) bridge collaborator.
    Raw(Vec<u8>),
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes `event` to every current subscriber of `address`.
    /// Best-effort at-least-once for local consumers, best-effort for
    /// remote (`spec.md` §4.3): a publish with no subscribers is not an
    /// error.
    ///
    /// # Errors
    /// Returns an error only if the underlying transport itself failed,
    /// never for "no subscribers".
    async fn publish(&self, address: &str, event: BusEvent) -> Result<(), Error>;

    /// Subscribes to `address`. Past events are not replayed; a receiver
    /// created after a publish misses it, matching best-effort delivery.
    async fn subscribe(&self, address: &str) -> broadcast::Receiver<BusEvent>;
}
