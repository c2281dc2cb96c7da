// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! In-memory [`SessionStore`]: sessions, subscriptions, and queued-message
//! links, all keyed the way the durable backends key their tables
//! (`spec.md` §6).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use crate::delivery::LinkStatus;
use crate::error::{Error, ErrorKind};
use crate::message::{LastWill, QueuedMessage, Session, Subscription};
use crate::store::session_store::SessionStore;
use crate::types::{ClientId, MessageUuid, NodeId};

/// One link's status plus the bookkeeping the delivery sweep needs.
#[derive(Debug, Clone, Copy)]
struct LinkRecord {
    status: LinkStatus,
    last_status_change: SystemTime,
}

impl LinkRecord {
    fn new(status: LinkStatus) -> Self {
        Self { status, last_status_change: SystemTime::now() }
    }
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<ClientId, Session>,
    subscriptions: HashMap<(ClientId, String), Subscription>,
    /// Message body, independent of which clients still hold a link to it.
    messages: HashMap<MessageUuid, QueuedMessage>,
    /// `(client_id, message_uuid) -> link record`.
    links: HashMap<(ClientId, MessageUuid), LinkRecord>,
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    inner: RwLock<Inner>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn iterate_offline_clients(&self, cb: &mut (dyn FnMut(&ClientId) + Send)) -> Result<(), Error> {
        let inner = self.inner.read().unwrap();
        for session in inner.sessions.values().filter(|s| !s.connected) {
            cb(&session.client_id);
        }
        Ok(())
    }

    async fn iterate_connected_clients(
        &self,
        cb: &mut (dyn FnMut(&ClientId, &NodeId) + Send),
    ) -> Result<(), Error> {
        let inner = self.inner.read().unwrap();
        for session in inner.sessions.values().filter(|s| s.connected) {
            cb(&session.client_id, &session.node_id);
        }
        Ok(())
    }

    async fn iterate_all_sessions(&self, cb: &mut (dyn FnMut(&Session) + Send)) -> Result<(), Error> {
        let inner = self.inner.read().unwrap();
        for session in inner.sessions.values() {
            cb(session);
        }
        Ok(())
    }

    async fn iterate_node_clients(
        &self,
        node_id: &NodeId,
        cb: &mut (dyn FnMut(&ClientId) + Send),
    ) -> Result<(), Error> {
        let inner = self.inner.read().unwrap();
        for session in inner.sessions.values().filter(|s| &s.node_id == node_id) {
            cb(&session.client_id);
        }
        Ok(())
    }

    async fn iterate_subscriptions(&self, cb: &mut (dyn FnMut(&Subscription) + Send)) -> Result<(), Error> {
        let inner = self.inner.read().unwrap();
        for sub in inner.subscriptions.values() {
            cb(sub);
        }
        Ok(())
    }

    async fn set_client(&self, session: Session) -> Result<(), Error> {
        self.inner.write().unwrap().sessions.insert(session.client_id.clone(), session);
        Ok(())
    }

    async fn set_last_will(&self, client_id: &ClientId, will: Option<LastWill>) -> Result<(), Error> {
        let mut inner = self.inner.write().unwrap();
        let session = inner
            .sessions
            .get_mut(client_id)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("no session for {client_id}")))?;
        session.last_will = will;
        Ok(())
    }

    async fn set_connected(&self, client_id: &ClientId, connected: bool) -> Result<(), Error> {
        let mut inner = self.inner.write().unwrap();
        let session = inner
            .sessions
            .get_mut(client_id)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("no session for {client_id}")))?;
        session.connected = connected;
        Ok(())
    }

    async fn is_connected(&self, client_id: &ClientId) -> Result<bool, Error> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .sessions
            .get(client_id)
            .is_some_and(|s| s.connected))
    }

    async fn is_present(&self, client_id: &ClientId) -> Result<bool, Error> {
        Ok(self.inner.read().unwrap().sessions.contains_key(client_id))
    }

    async fn add_subscriptions(&self, subs: Vec<Subscription>) -> Result<(), Error> {
        let mut inner = self.inner.write().unwrap();
        for sub in subs {
            inner.subscriptions.insert(sub.key(), sub);
        }
        Ok(())
    }

    async fn del_subscriptions(&self, subs: Vec<Subscription>) -> Result<(), Error> {
        let mut inner = self.inner.write().unwrap();
        for sub in subs {
            inner.subscriptions.remove(&sub.key());
        }
        Ok(())
    }

    async fn del_client(
        &self,
        client_id: &ClientId,
        row_cb: &mut (dyn FnMut(&Subscription) + Send),
    ) -> Result<(), Error> {
        let mut inner = self.inner.write().unwrap();
        inner.sessions.remove(client_id);
        let removed: Vec<Subscription> = inner
            .subscriptions
            .iter()
            .filter(|(key, _)| &key.0 == client_id)
            .map(|(_, sub)| sub.clone())
            .collect();
        for sub in &removed {
            inner.subscriptions.remove(&sub.key());
            row_cb(sub);
        }
        inner.links.retain(|(cid, _), _| cid != client_id);
        Ok(())
    }

    async fn enqueue_messages(&self, entries: Vec<(QueuedMessage, Vec<ClientId>)>) -> Result<(), Error> {
        let mut inner = self.inner.write().unwrap();
        for (message, targets) in entries {
            let uuid = message.message_uuid;
            inner.messages.entry(uuid).or_insert(message);
            for client_id in targets {
                inner.links.entry((client_id, uuid)).or_insert_with(|| LinkRecord::new(LinkStatus::Pending));
            }
        }
        Ok(())
    }

    async fn dequeue_messages(
        &self,
        client_id: &ClientId,
        cb: &mut (dyn FnMut(&QueuedMessage) -> bool + Send),
    ) -> Result<(), Error> {
        let inner = self.inner.read().unwrap();
        let mut uuids: Vec<MessageUuid> = inner
            .links
            .keys()
            .filter(|(cid, _)| cid == client_id)
            .map(|(_, uuid)| *uuid)
            .collect();
        uuids.sort_unstable();
        for uuid in uuids {
            if let Some(message) = inner.messages.get(&uuid) {
                if !cb(message) {
                    break;
                }
            }
        }
        Ok(())
    }

    async fn remove_messages(&self, links: Vec<(ClientId, MessageUuid)>) -> Result<(), Error> {
        let mut inner = self.inner.write().unwrap();
        for link in &links {
            inner.links.remove(link);
        }
        let still_linked: std::collections::HashSet<MessageUuid> =
            inner.links.keys().map(|(_, uuid)| *uuid).collect();
        inner.messages.retain(|uuid, _| still_linked.contains(uuid));
        Ok(())
    }

    async fn fetch_next_pending_message(&self, client_id: &ClientId) -> Result<Option<QueuedMessage>, Error> {
        Ok(self.fetch_pending_messages(client_id, 1).await?.into_iter().next())
    }

    async fn fetch_pending_messages(&self, client_id: &ClientId, limit: usize) -> Result<Vec<QueuedMessage>, Error> {
        let inner = self.inner.read().unwrap();
        let mut pending: Vec<(MessageUuid, QueuedMessage)> = inner
            .links
            .iter()
            .filter(|((cid, _), record)| cid == client_id && record.status == LinkStatus::Pending)
            .filter_map(|((_, uuid), _)| inner.messages.get(uuid).map(|m| (*uuid, m.clone())))
            .collect();
        pending.sort_by_key(|(uuid, _)| *uuid);
        pending.truncate(limit);
        Ok(pending.into_iter().map(|(_, m)| m).collect())
    }

    async fn mark_message_in_flight(&self, client_id: &ClientId, uuid: MessageUuid) -> Result<(), Error> {
        self.set_link_status(client_id, uuid, LinkStatus::InFlight).await
    }

    async fn mark_messages_in_flight(&self, client_id: &ClientId, uuids: Vec<MessageUuid>) -> Result<(), Error> {
        let mut inner = self.inner.write().unwrap();
        for uuid in uuids {
            inner.links.insert((client_id.clone(), uuid), LinkRecord::new(LinkStatus::InFlight));
        }
        Ok(())
    }

    async fn mark_message_delivered(&self, client_id: &ClientId, uuid: MessageUuid) -> Result<(), Error> {
        self.set_link_status(client_id, uuid, LinkStatus::Delivered).await
    }

    async fn set_link_status(&self, client_id: &ClientId, uuid: MessageUuid, status: LinkStatus) -> Result<(), Error> {
        let mut inner = self.inner.write().unwrap();
        let key = (client_id.clone(), uuid);
        let Some(record) = inner.links.get_mut(&key) else {
            return Err(Error::new(ErrorKind::NotFound, format!("no link for {client_id}/{uuid}")));
        };
        record.status = status;
        record.last_status_change = SystemTime::now();
        Ok(())
    }

    async fn reset_in_flight_messages(&self, client_id: &ClientId) -> Result<(), Error> {
        let mut inner = self.inner.write().unwrap();
        let now = SystemTime::now();
        for (key, record) in inner.links.iter_mut() {
            if &key.0 == client_id && matches!(record.status, LinkStatus::InFlight | LinkStatus::AwaitingPubrel) {
                record.status = LinkStatus::Pending;
                record.last_status_change = now;
            }
        }
        Ok(())
    }

    async fn purge_delivered_messages(&self) -> Result<usize, Error> {
        let mut inner = self.inner.write().unwrap();
        let before = inner.links.len();
        inner.links.retain(|_, record| record.status != LinkStatus::Delivered);
        let still_linked: std::collections::HashSet<MessageUuid> =
            inner.links.keys().map(|(_, uuid)| *uuid).collect();
        inner.messages.retain(|uuid, _| still_linked.contains(uuid));
        Ok(before - inner.links.len())
    }

    async fn purge_expired_messages(&self) -> Result<usize, Error> {
        let mut inner = self.inner.write().unwrap();
        let before = inner.links.len();
        inner.links.retain(|_, record| record.status != LinkStatus::Expired);
        let still_linked: std::collections::HashSet<MessageUuid> =
            inner.links.keys().map(|(_, uuid)| *uuid).collect();
        inner.messages.retain(|uuid, _| still_linked.contains(uuid));
        Ok(before - inner.links.len())
    }

    async fn expire_stale_in_flight_messages(&self, timeout: Duration) -> Result<usize, Error> {
        let mut inner = self.inner.write().unwrap();
        let now = SystemTime::now();
        let mut count = 0;
        for record in inner.links.values_mut() {
            if matches!(record.status, LinkStatus::InFlight | LinkStatus::AwaitingPubrel)
                && now.duration_since(record.last_status_change).unwrap_or_default() >= timeout
            {
                record.status = LinkStatus::Expired;
                record.last_status_change = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn purge_queued_messages(&self) -> Result<(), Error> {
        let mut inner = self.inner.write().unwrap();
        inner.links.clear();
        inner.messages.clear();
        Ok(())
    }

    async fn purge_sessions(&self) -> Result<usize, Error> {
        let mut inner = self.inner.write().unwrap();
        let to_remove: Vec<ClientId> = inner
            .sessions
            .values()
            .filter(|s| s.clean_session && !s.connected)
            .map(|s| s.client_id.clone())
            .collect();
        for client_id in &to_remove {
            inner.sessions.remove(client_id);
            inner.subscriptions.retain(|key, _| &key.0 != client_id);
            inner.links.retain(|key, _| &key.0 != client_id);
        }
        Ok(to_remove.len())
    }

    async fn count_queued_messages(&self) -> Result<usize, Error> {
        Ok(self.inner.read().unwrap().links.len())
    }

    async fn count_queued_messages_for_client(&self, client_id: &ClientId) -> Result<usize, Error> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .links
            .keys()
            .filter(|(cid, _)| cid == client_id)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::{Topic, TopicFilter};
    use crate::types::QoS;

    fn sample_message(topic: &str) -> QueuedMessage {
        use crate::message::BrokerMessage;
        QueuedMessage::from(&BrokerMessage::new(
            Topic::parse(topic).unwrap(),
            b"v".to_vec(),
            QoS::AtLeastOnce,
            false,
            "pub1".to_string(),
        ))
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_in_uuid_order() {
        let store = MemorySessionStore::new();
        let m1 = sample_message("a/b");
        let m2 = sample_message("a/c");
        store
            .enqueue_messages(vec![
                (m1.clone(), vec!["c1".to_string()]),
                (m2.clone(), vec!["c1".to_string()]),
            ])
            .await
            .unwrap();

        let mut seen = Vec::new();
        store
            .dequeue_messages(&"c1".to_string(), &mut |m| {
                seen.push(m.message_uuid);
                true
            })
            .await
            .unwrap();
        assert_eq!(seen, vec![m1.message_uuid, m2.message_uuid]);
    }

    #[tokio::test]
    async fn expired_links_are_deleted_not_redelivered() {
        let store = MemorySessionStore::new();
        let msg = sample_message("a/b");
        store.enqueue_messages(vec![(msg.clone(), vec!["c1".to_string()])]).await.unwrap();
        store.mark_message_in_flight(&"c1".to_string(), msg.message_uuid).await.unwrap();

        let expired = store.expire_stale_in_flight_messages(std::time::Duration::ZERO).await.unwrap();
        assert_eq!(expired, 1);

        let purged = store.purge_expired_messages().await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.count_queued_messages_for_client(&"c1".to_string()).await.unwrap(), 0);

        let mut seen = Vec::new();
        store.dequeue_messages(&"c1".to_string(), &mut |m| { seen.push(m.message_uuid); true }).await.unwrap();
        assert!(seen.is_empty(), "an expired link must not redeliver");
    }

    #[tokio::test]
    async fn del_client_yields_each_removed_subscription() {
        let store = MemorySessionStore::new();
        store
            .set_client(Session::new("c1".to_string(), "node1".to_string(), true))
            .await
            .unwrap();
        store
            .add_subscriptions(vec![Subscription {
                client_id: "c1".to_string(),
                topic_filter: TopicFilter::parse("a/#").unwrap(),
                qos: QoS::AtMostOnce,
                no_local: false,
                retain_as_published: false,
                retain_handling: crate::message::RetainHandling::SendOnSubscribe,
            }])
            .await
            .unwrap();

        let mut removed = Vec::new();
        store
            .del_client(&"c1".to_string(), &mut |sub| removed.push(sub.client_id.clone()))
            .await
            .unwrap();
        assert_eq!(removed, vec!["c1".to_string()]);
        assert!(!store.is_present(&"c1".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn purge_sessions_only_removes_clean_disconnected() {
        let store = MemorySessionStore::new();
        store
            .set_client(Session::new("keep".to_string(), "n1".to_string(), false))
            .await
            .unwrap();
        let mut gone = Session::new("gone".to_string(), "n1".to_string(), true);
        gone.connected = false;
        store.set_client(gone).await.unwrap();

        let purged = store.purge_sessions().await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.is_present(&"keep".to_string()).await.unwrap());
        assert!(!store.is_present(&"gone".to_string()).await.unwrap());
    }
}
