// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Delivery State Machine (`spec.md` §4.6): tracks one queued message's
//! progress towards one subscriber, independent of the message's own
//! lifetime in the message store.
//!
//! QoS 0 links are never recorded; they are fire-and-forget. QoS 1 only
//! ever visits `Pending` → `InFlight` → `Delivered`. QoS 2 additionally
//! steps through the PUBREC/PUBREL/PUBCOMP handshake states, resolving
//! Open Question 3 (`SPEC_FULL.md` §4) in favor of widening `LinkStatus`
//! itself rather than keeping a side table.

use std::time::Duration;

use crate::message::QueuedMessage;
use crate::store::session_store::{ClientLink, SessionStore};
use crate::types::{ClientId, MessageUuid, QoS};

/// Status of one `(client_id, message_uuid)` link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStatus {
    /// Queued, not yet sent to the client.
    Pending,
    /// Sent; awaiting PUBACK (QoS 1) or PUBREC (QoS 2).
    InFlight,
    /// QoS 2 only: PUBREC received, PUBREL sent, awaiting PUBCOMP.
    AwaitingPubrel,
    /// QoS 2 only: mirrors the receiver side, PUBREL received, awaiting our
    /// own PUBCOMP; present for symmetry with a future bridge/relay use.
    AwaitingPubcomp,
    /// Fully acknowledged; eligible for purge by a periodic sweep.
    Delivered,
    /// In flight past [`IN_FLIGHT_TIMEOUT`] without acknowledgement: the
    /// sweep has given up retrying this link, and a later purge deletes
    /// it (`spec.md` §4.6's `EXPIRED ──purge──► removed` arrow).
    Expired,
}

impl LinkStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// How long an `InFlight`/`AwaitingPubrel` link may sit unacknowledged
/// before the delivery sweep gives up on it and marks it `Expired`.
/// `spec.md` §4.6 leaves the exact value to the implementation; the
/// teacher's reconnect/retry timers use whole seconds, so this follows
/// suit.
pub const IN_FLIGHT_TIMEOUT: Duration = Duration::from_secs(20);

/// Drives one client's outstanding links forward. Holds no channel of its
/// own: the Session Handler calls through this on the PUBACK/PUBREC/PUBREL/
/// PUBCOMP path and on its periodic sweep, so state transitions stay in one
/// place instead of being duplicated at each call site.
pub struct DeliveryMachine<'a> {
    store: &'a (dyn SessionStore),
}

impl<'a> DeliveryMachine<'a> {
    #[must_use]
    pub const fn new(store: &'a dyn SessionStore) -> Self {
        Self { store }
    }

    /// Transitions a freshly dequeued message to `InFlight` before handing
    /// it to the transport. QoS 0 messages never reach here.
    pub async fn mark_sent(
        &self,
        client_id: &ClientId,
        message: &QueuedMessage,
    ) -> Result<(), crate::error::Error> {
        debug_assert_ne!(message.qos, QoS::AtMostOnce);
        self.store
            .mark_message_in_flight(client_id, message.message_uuid)
            .await
    }

    /// PUBACK (QoS 1): the link is complete.
    pub async fn on_puback(
        &self,
        client_id: &ClientId,
        uuid: MessageUuid,
    ) -> Result<(), crate::error::Error> {
        self.store.mark_message_delivered(client_id, uuid).await
    }

    /// PUBREC (QoS 2 step 1): move to awaiting our own PUBREL's PUBCOMP.
    pub async fn on_pubrec(
        &self,
        client_id: &ClientId,
        uuid: MessageUuid,
    ) -> Result<(), crate::error::Error> {
        self.store
            .set_link_status(client_id, uuid, LinkStatus::AwaitingPubrel)
            .await
    }

    /// PUBCOMP (QoS 2 step 2): the handshake is complete.
    pub async fn on_pubcomp(
        &self,
        client_id: &ClientId,
        uuid: MessageUuid,
    ) -> Result<(), crate::error::Error> {
        self.store.mark_message_delivered(client_id, uuid).await
    }

    /// Periodic sweep (`spec.md` §4.6): any `InFlight`/`AwaitingPubrel`
    /// link whose `last_status_change` is older than [`IN_FLIGHT_TIMEOUT`]
    /// is marked `Expired`, then purged. Returns the number of links
    /// deleted by the purge.
    pub async fn sweep_expired(&self) -> Result<usize, crate::error::Error> {
        self.store.expire_stale_in_flight_messages(IN_FLIGHT_TIMEOUT).await?;
        self.store.purge_expired_messages().await
    }

    /// True once every link in `links` is [`LinkStatus::Delivered`].
    #[must_use]
    pub fn all_delivered(links: &[ClientLink]) -> bool {
        links.iter().all(|link| link.status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_delivered_is_terminal() {
        assert!(LinkStatus::Delivered.is_terminal());
        assert!(!LinkStatus::Pending.is_terminal());
        assert!(!LinkStatus::InFlight.is_terminal());
        assert!(!LinkStatus::AwaitingPubrel.is_terminal());
        assert!(!LinkStatus::AwaitingPubcomp.is_terminal());
        assert!(!LinkStatus::Expired.is_terminal());
    }

    #[test]
    fn all_delivered_requires_every_link_terminal() {
        let now = std::time::SystemTime::now();
        let links = vec![
            ClientLink {
                client_id: "c1".to_string(),
                message_uuid: MessageUuid::generate(),
                status: LinkStatus::Delivered,
                last_status_change: now,
                expiry_at: None,
            },
            ClientLink {
                client_id: "c1".to_string(),
                message_uuid: MessageUuid::generate(),
                status: LinkStatus::InFlight,
                last_status_change: now,
                expiry_at: None,
            },
        ];
        assert!(!DeliveryMachine::all_delivered(&links));
    }
}
