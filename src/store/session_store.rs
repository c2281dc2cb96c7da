// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! `SessionStore` contract (`spec.md` §4.7): source of truth for sessions,
//! subscriptions, and the queued-message-to-client links that back QoS≥1
//! delivery.

use async_trait::async_trait;
use std::time::{Duration, SystemTime};

use crate::delivery::LinkStatus;
use crate::error::Error;
use crate::message::{QueuedMessage, Session, Subscription};
use crate::types::{ClientId, MessageUuid, NodeId};

/// One row of the `QueuedMessagesClients` table (`spec.md` §6): links a
/// globally-keyed [`QueuedMessage`] to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientLink {
    pub client_id: ClientId,
    pub message_uuid: MessageUuid,
    pub status: LinkStatus,
    /// When `status` last changed; the delivery sweep compares this
    /// against `IN_FLIGHT_TIMEOUT` to decide whether an `InFlight` link
    /// has gone stale (`spec.md` §6).
    pub last_status_change: SystemTime,
    /// Per-message expiry instant, if one was configured. `spec.md` §6
    /// lists this as optional; `None` means the link never expires on
    /// its own.
    pub expiry_at: Option<SystemTime>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Streams every client currently known to be offline.
    async fn iterate_offline_clients(
        &self,
        cb: &mut (dyn FnMut(&ClientId) + Send),
    ) -> Result<(), Error>;

    /// Streams every connected `(client_id, node_id)` pair.
    async fn iterate_connected_clients(
        &self,
        cb: &mut (dyn FnMut(&ClientId, &NodeId) + Send),
    ) -> Result<(), Error>;

    /// Streams every session row, connected or not.
    async fn iterate_all_sessions(
        &self,
        cb: &mut (dyn FnMut(&Session) + Send),
    ) -> Result<(), Error>;

    /// Streams every session owned by `node_id`.
    async fn iterate_node_clients(
        &self,
        node_id: &NodeId,
        cb: &mut (dyn FnMut(&ClientId) + Send),
    ) -> Result<(), Error>;

    /// Streams every subscription row, used to rebuild the in-memory topic
    /// index at startup (`spec.md` §4.2).
    async fn iterate_subscriptions(
        &self,
        cb: &mut (dyn FnMut(&Subscription) + Send),
    ) -> Result<(), Error>;

    /// Upserts the session row. Must be atomic on `client_id`: last writer
    /// wins, `update_time` reflects server clock.
    async fn set_client(&self, session: Session) -> Result<(), Error>;

    async fn set_last_will(&self, client_id: &ClientId, will: Option<crate::message::LastWill>) -> Result<(), Error>;

    async fn set_connected(&self, client_id: &ClientId, connected: bool) -> Result<(), Error>;

    async fn is_connected(&self, client_id: &ClientId) -> Result<bool, Error>;

    async fn is_present(&self, client_id: &ClientId) -> Result<bool, Error>;

    async fn add_subscriptions(&self, subs: Vec<Subscription>) -> Result<(), Error>;

    async fn del_subscriptions(&self, subs: Vec<Subscription>) -> Result<(), Error>;

    /// Deletes a client's session, subscriptions, and queued-message links.
    /// `row_cb` is invoked once per deleted subscription row so the caller
    /// can unwind the in-memory topic index.
    async fn del_client(
        &self,
        client_id: &ClientId,
        row_cb: &mut (dyn FnMut(&Subscription) + Send),
    ) -> Result<(), Error>;

    /// Enqueues `message` for every `client_id` in `targets`, each as a
    /// PENDING link. Idempotent: re-enqueuing an existing
    /// `(client_id, message_uuid)` pair is a no-op (`DuplicateUuid`).
    async fn enqueue_messages(
        &self,
        entries: Vec<(QueuedMessage, Vec<ClientId>)>,
    ) -> Result<(), Error>;

    /// Streams a client's queued messages in ascending `message_uuid`
    /// order; `cb` returns `false` to stop early.
    async fn dequeue_messages(
        &self,
        client_id: &ClientId,
        cb: &mut (dyn FnMut(&QueuedMessage) -> bool + Send),
    ) -> Result<(), Error>;

    async fn remove_messages(&self, links: Vec<(ClientId, MessageUuid)>) -> Result<(), Error>;

    async fn fetch_next_pending_message(
        &self,
        client_id: &ClientId,
    ) -> Result<Option<QueuedMessage>, Error>;

    async fn fetch_pending_messages(
        &self,
        client_id: &ClientId,
        limit: usize,
    ) -> Result<Vec<QueuedMessage>, Error>;

    async fn mark_message_in_flight(&self, client_id: &ClientId, uuid: MessageUuid) -> Result<(), Error>;

    async fn mark_messages_in_flight(&self, client_id: &ClientId, uuids: Vec<MessageUuid>) -> Result<(), Error>;

    async fn mark_message_delivered(&self, client_id: &ClientId, uuid: MessageUuid) -> Result<(), Error>;

    /// Sets the link's status directly; used by the delivery state machine
    /// for the expanded QoS 2 handshake states.
    async fn set_link_status(
        &self,
        client_id: &ClientId,
        uuid: MessageUuid,
        status: LinkStatus,
    ) -> Result<(), Error>;

    /// Resets every IN_FLIGHT link for `client_id` back to PENDING, used on
    /// reconnect of a persistent session.
    async fn reset_in_flight_messages(&self, client_id: &ClientId) -> Result<(), Error>;

    async fn purge_delivered_messages(&self) -> Result<usize, Error>;

    async fn purge_expired_messages(&self) -> Result<usize, Error>;

    /// Transitions every `InFlight`/`AwaitingPubrel` link whose
    /// `last_status_change` is older than `timeout` to `Expired`, giving
    /// up on redelivery (`spec.md` §4.6). Returns the number of links
    /// transitioned; a later `purge_expired_messages` call removes them.
    async fn expire_stale_in_flight_messages(&self, timeout: Duration) -> Result<usize, Error>;

    async fn purge_queued_messages(&self) -> Result<(), Error>;

    /// Deletes every session row with `clean_session = true` and
    /// `connected = false`, along with their subscriptions and queued-
    /// message links (`spec.md` §8 invariant).
    async fn purge_sessions(&self) -> Result<usize, Error>;

    async fn count_queued_messages(&self) -> Result<usize, Error>;

    async fn count_queued_messages_for_client(&self, client_id: &ClientId) -> Result<usize, Error>;
}
