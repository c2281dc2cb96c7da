// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Session Handler (`spec.md` §4.2): source of truth for the cluster-wide
//! routing table, owner of the local session registry, and dispatcher for
//! outbound traffic.
//!
//! The wire codec and the network reactor that owns client sockets are
//! out of scope (`spec.md` §1); this module models "push to a locally
//! connected socket" as an `mpsc::Sender<BrokerMessage>` the connection
//! layer registers per client via [`SessionHandler::register_local_sink`].

mod queues;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::{broadcast, mpsc};

use crate::archive_group::ArchiveGroup;
use crate::authorizer::{Authorizer, Decision};
use crate::bus::{self, BusEvent};
use crate::cluster::ClusterFabric;
use crate::delivery::DeliveryMachine;
use crate::error::{Error, ErrorKind};
use crate::message::{BrokerMessage, QueuedMessage, Subscription};
use crate::retained::RetainedHandler;
use crate::store::{MetricKind, MetricsStore, SessionStore};
use crate::topic::{Topic, TopicFilter, TopicIndex};
use crate::types::{ClientId, MessageUuid, NodeId, QoS};

use queues::QueueWorkers;

pub use queues::{DRAIN_BATCH_SIZE, QUEUE_CAPACITY};

/// A locally connected subscriber's delivery options: the `V` half of the
/// topic index's `(K, V)` pair (`spec.md` §3 `TopicIndex`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberOptions {
    pub qos: QoS,
    pub no_local: bool,
    pub retain_as_published: bool,
}

/// Registered by the connection layer so the handler can push a message
/// straight to an online subscriber. `spec.md` §4.2: "direct push to
/// locally-connected sockets."
pub type LocalSink = mpsc::Sender<BrokerMessage>;

pub struct SessionHandler {
    node_id: NodeId,
    store: Arc<dyn SessionStore>,
    retained: RetainedHandler,
    archive_groups: Vec<ArchiveGroup>,
    authorizer: Arc<dyn Authorizer>,
    cluster: Arc<dyn ClusterFabric>,
    index: TopicIndex<ClientId, SubscriberOptions>,
    local_sinks: RwLock<HashMap<ClientId, LocalSink>>,
    /// `client_id -> owning node_id` for every client known to be
    /// connected anywhere in the cluster, kept current by `set_client`
    /// locally and [`Self::handle_presence_event`] for peers.
    presence: RwLock<HashMap<ClientId, NodeId>>,
    offline: RwLock<HashSet<ClientId>>,
    ready: AtomicBool,
    queues: QueueWorkers,
    metrics: Option<Arc<dyn MetricsStore>>,
}

impl SessionHandler {
    /// Builds the handler and spawns its background workers: the staged
    /// write drainers (`queues::QueueWorkers`) and a receiver task
    /// subscribed to this node's own `node/<id>/deliver` address
    /// (`spec.md` §4.3). The handler is returned already wrapped in `Arc`
    /// since the receiver task needs to outlive the caller's stack frame.
    #[must_use]
    pub fn new(
        node_id: NodeId,
        store: Arc<dyn SessionStore>,
        retained: RetainedHandler,
        archive_groups: Vec<ArchiveGroup>,
        authorizer: Arc<dyn Authorizer>,
        cluster: Arc<dyn ClusterFabric>,
        metrics: Option<Arc<dyn MetricsStore>>,
    ) -> Arc<Self> {
        let queues = QueueWorkers::spawn(store.clone());
        let handler = Arc::new(Self {
            node_id,
            store,
            retained,
            archive_groups,
            authorizer,
            cluster,
            index: TopicIndex::new(),
            local_sinks: RwLock::new(HashMap::new()),
            presence: RwLock::new(HashMap::new()),
            offline: RwLock::new(HashSet::new()),
            ready: AtomicBool::new(false),
            queues,
            metrics,
        });
        Self::spawn_bus_receiver(&handler);
        handler
    }

    /// Subscribes to this node's `node/<id>/deliver` address and routes
    /// incoming events into the same local push/dispatch logic a local
    /// publish uses (`spec.md` §4.3), so cross-node delivery is not
    /// publish-only.
    fn spawn_bus_receiver(handler: &Arc<Self>) {
        let handler = Arc::clone(handler);
        let address = bus::deliver_address(&handler.node_id);
        tokio::spawn(async move {
            let mut rx = handler.cluster.bus().subscribe(&address).await;
            loop {
                match rx.recv().await {
                    Ok(BusEvent::Deliver(delivery)) => {
                        let sink = handler.local_sinks.read().unwrap().get(&delivery.client_id).cloned();
                        if let Some(sink) = sink {
                            if sink.try_send(delivery.message).is_err() {
                                log::warn!(
                                    "session handler: dropping bus-forwarded qos0 publish to {}, subscriber at capacity",
                                    delivery.client_id
                                );
                            }
                        }
                    }
                    Ok(BusEvent::DispatchHint(client_id)) => {
                        handler.try_dispatch(&client_id).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("session handler: bus receiver for {address} lagged, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn ensure_ready(&self) -> Result<(), Error> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::NotReady, "session handler startup rebuild is still running"))
        }
    }

    /// Rebuilds the local topic index from the session store's
    /// subscriptions and the presence/offline sets from its session rows
    /// (`spec.md` §4.2). While this runs, [`Self::is_ready`] is false and
    /// callers must reject CONNECT with `ErrorKind::NotReady`.
    ///
    /// # Errors
    /// Propagates store errors; the handler is left not-ready on failure.
    pub async fn rebuild(&self) -> Result<(), Error> {
        self.store
            .iterate_subscriptions(&mut |sub| {
                let opts = SubscriberOptions {
                    qos: sub.qos,
                    no_local: sub.no_local,
                    retain_as_published: sub.retain_as_published,
                };
                if let Err(err) = self.index.add(&sub.topic_filter, sub.client_id.clone(), opts) {
                    log::error!("session handler rebuild: failed to index subscription: {err}");
                }
            })
            .await?;

        self.store
            .iterate_offline_clients(&mut |client_id| {
                self.offline.write().unwrap().insert(client_id.clone());
            })
            .await?;

        self.store
            .iterate_connected_clients(&mut |client_id, node_id| {
                self.presence.write().unwrap().insert(client_id.clone(), node_id.clone());
            })
            .await?;

        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    pub async fn authorize_publish(&self, client_id: &ClientId, topic: &Topic) -> Decision {
        self.authorizer.authorize_publish(client_id, topic).await
    }

    pub async fn authorize_subscribe(&self, client_id: &ClientId, filter: &TopicFilter) -> Decision {
        self.authorizer.authorize_subscribe(client_id, filter).await
    }

    /// Registers a locally-connected subscriber's push handle, then
    /// immediately resumes any `Pending` backlog the client already has
    /// (`spec.md` §8 Scenario 2): a client that reconnects with queued
    /// QoS≥1 messages must not wait for new traffic to receive them.
    pub async fn register_local_sink(&self, client_id: ClientId, sink: LocalSink) {
        self.local_sinks.write().unwrap().insert(client_id.clone(), sink);
        self.drain_pending(&client_id).await;
    }

    pub fn unregister_local_sink(&self, client_id: &ClientId) {
        self.local_sinks.write().unwrap().remove(client_id);
    }

    /// Called by the bus receiver task on a `store/sessions/add|del`
    /// event from a peer, so this node's presence map converges without
    /// a full rebuild.
    pub fn handle_presence_event(&self, client_id: ClientId, node_id: NodeId, online: bool) {
        if online {
            self.presence.write().unwrap().insert(client_id, node_id);
        } else {
            self.presence.write().unwrap().remove(&client_id);
        }
    }

    /// `setClient` (`spec.md` §4.2): upserts the session row and
    /// publishes a presence event so peer caches converge. If
    /// `clean_session` and a prior session exists, its subscriptions and
    /// queued messages are purged first (`spec.md` §3 Session lifecycle).
    ///
    /// # Errors
    /// Propagates store/bus errors; returns `ErrorKind::NotReady` during
    /// startup rebuild.
    pub async fn set_client(
        &self,
        client_id: ClientId,
        node_id: NodeId,
        clean_session: bool,
        connected: bool,
        info: Vec<u8>,
    ) -> Result<(), Error> {
        self.ensure_ready()?;

        if clean_session && self.store.is_present(&client_id).await? {
            let mut removed_filters = Vec::new();
            self.store
                .del_client(&client_id, &mut |sub| removed_filters.push(sub.topic_filter.clone()))
                .await?;
            for filter in &removed_filters {
                self.index.remove(filter, &client_id);
            }
        }

        let mut session = crate::message::Session::new(client_id.clone(), node_id.clone(), clean_session);
        session.connected = connected;
        session.information = info;
        self.store.set_client(session).await?;

        if connected {
            self.presence.write().unwrap().insert(client_id.clone(), node_id);
            self.offline.write().unwrap().remove(&client_id);
        } else {
            self.presence.write().unwrap().remove(&client_id);
            self.offline.write().unwrap().insert(client_id.clone());
        }

        let store_name = "sessions";
        let address = if connected { bus::store_add_address(store_name) } else { bus::store_del_address(store_name) };
        self.cluster.bus().publish(&address, BusEvent::IndexChange(vec![client_id])).await
    }

    /// `addSubscription` (`spec.md` §4.2): the in-memory index update is
    /// immediate; persistence is staged onto a bounded queue so a slow
    /// store never blocks the caller.
    ///
    /// # Errors
    /// Returns `BackpressureExceeded` if the subscription-add queue is
    /// full.
    pub async fn add_subscription(&self, sub: Subscription) -> Result<(), Error> {
        self.ensure_ready()?;
        let opts = SubscriberOptions { qos: sub.qos, no_local: sub.no_local, retain_as_published: sub.retain_as_published };
        self.index.add(&sub.topic_filter, sub.client_id.clone(), opts)?;
        self.queues
            .sub_add
            .try_send(sub.clone())
            .map_err(|_| Error::new(ErrorKind::BackpressureExceeded, "subscription add queue is full"))?;
        self.cluster
            .bus()
            .publish(&bus::store_add_address("subscriptions"), BusEvent::IndexChange(vec![sub.topic_filter.as_str().to_string()]))
            .await
    }

    /// `delSubscription`, symmetric with [`Self::add_subscription`].
    ///
    /// # Errors
    /// Returns `BackpressureExceeded` if the subscription-del queue is
    /// full.
    pub async fn del_subscription(&self, sub: Subscription) -> Result<(), Error> {
        self.ensure_ready()?;
        self.index.remove(&sub.topic_filter, &sub.client_id);
        self.queues
            .sub_del
            .try_send(sub.clone())
            .map_err(|_| Error::new(ErrorKind::BackpressureExceeded, "subscription del queue is full"))?;
        self.cluster
            .bus()
            .publish(&bus::store_del_address("subscriptions"), BusEvent::IndexChange(vec![sub.topic_filter.as_str().to_string()]))
            .await
    }

    /// Combines [`Self::add_subscription`] with retained-message replay
    /// on SUBSCRIBE (`spec.md` §4.4). `already_subscribed` tells the
    /// handler whether `(client_id, filter)` existed before this call,
    /// needed for `RetainHandling::SendOnNewSubscribe`; the caller (which
    /// owns the subscription-uniqueness check) is best placed to know
    /// this without a second store round trip here.
    ///
    /// # Errors
    /// Propagates [`Self::add_subscription`] and store errors.
    pub async fn subscribe(&self, sub: Subscription, already_subscribed: bool) -> Result<(), Error> {
        self.add_subscription(sub.clone()).await?;
        let client_id = sub.client_id.clone();
        let sinks = &self.local_sinks;
        self.retained
            .replay_for_subscribe(&sub, already_subscribed, |msg| {
                if let Some(sink) = sinks.read().unwrap().get(&client_id).cloned() {
                    let _ = sink.try_send(msg);
                }
            })
            .await
    }

    /// `findClients` (`spec.md` §4.2): index match against the topic of
    /// an incoming PUBLISH.
    #[must_use]
    pub fn find_clients(&self, topic: &Topic) -> Vec<(ClientId, SubscriberOptions)> {
        self.index.match_topic(topic)
    }

    /// `enqueueMessage` (`spec.md` §4.2): stages a durable link for every
    /// target client.
    ///
    /// # Errors
    /// Returns `BackpressureExceeded` if the message write queue is full.
    pub fn enqueue_message(&self, message: QueuedMessage, targets: Vec<ClientId>) -> Result<(), Error> {
        self.queues
            .msg_add
            .try_send((message, targets))
            .map_err(|_| Error::new(ErrorKind::BackpressureExceeded, "message enqueue queue is full"))
    }

    /// Stages removal of one delivered/expired link.
    ///
    /// # Errors
    /// Returns `BackpressureExceeded` if the message remove queue is full.
    pub fn queue_remove(&self, client_id: ClientId, uuid: MessageUuid) -> Result<(), Error> {
        self.queues
            .msg_del
            .try_send((client_id, uuid))
            .map_err(|_| Error::new(ErrorKind::BackpressureExceeded, "message remove queue is full"))
    }

    /// `dequeueMessages` (`spec.md` §4.2): a client's queued messages in
    /// ascending `message_uuid` order.
    ///
    /// # Errors
    /// Propagates store errors.
    pub async fn dequeue_messages(&self, client_id: &ClientId) -> Result<Vec<QueuedMessage>, Error> {
        let mut out = Vec::new();
        self.store
            .dequeue_messages(client_id, &mut |msg| {
                out.push(msg.clone());
                true
            })
            .await?;
        Ok(out)
    }

    /// `publishMessage` (`spec.md` §4.2): the full publish pipeline.
    /// Assumes the caller already authorized the publish
    /// (`spec.md` §2: "client frame → authorizer → Session Handler").
    ///
    /// # Errors
    /// Returns `ErrorKind::NotReady` during startup rebuild, or propagates
    /// store/queue errors from any stage.
    pub async fn publish_message(&self, msg: BrokerMessage) -> Result<(), Error> {
        self.ensure_ready()?;
        self.record_metric("messages_published", 1).await;

        if msg.retain {
            self.retained.save_message(msg.clone())?;
        }

        for group in &self.archive_groups {
            if group.accepts(&msg) {
                group.ingest(&msg).await;
            }
        }

        for (client_id, opts) in self.index.match_topic(&msg.topic_name) {
            if opts.no_local && client_id == msg.publisher_client_id {
                continue;
            }

            let mut delivered = msg.clone();
            delivered.qos = msg.qos.min(opts.qos);
            delivered.retain = opts.retain_as_published && msg.retain;

            if delivered.qos == QoS::AtMostOnce {
                self.push_live(&client_id, delivered).await;
                continue;
            }

            let queued = QueuedMessage::from(&delivered);
            self.enqueue_message(queued, vec![client_id.clone()])?;
            self.try_dispatch(&client_id).await;
        }
        Ok(())
    }

    /// QoS 0 fan-out (`spec.md` §4.6): never enters the queue; delivered
    /// only to a currently-online subscriber, dropped under backpressure.
    async fn push_live(&self, client_id: &ClientId, msg: BrokerMessage) {
        if let Some(sink) = self.local_sinks.read().unwrap().get(client_id).cloned() {
            if sink.try_send(msg).is_err() {
                log::warn!("session handler: dropping qos0 publish to {client_id}, subscriber at capacity");
            }
            return;
        }
        if let Some(node_id) = self.presence.read().unwrap().get(client_id).cloned() {
            if node_id != self.node_id {
                let event = BusEvent::Deliver(bus::RoutedDelivery { client_id: client_id.clone(), message: msg });
                if let Err(err) = self.cluster.bus().publish(&bus::deliver_address(&node_id), event).await {
                    log::error!("session handler: forwarding qos0 publish to node {node_id} failed: {err}");
                }
            }
        }
    }

    /// Queue-first dispatch (`spec.md` §4.6): fetches one pending message
    /// for a locally-connected client and pushes it, marking the link
    /// `InFlight`. No new live publish may be sent ahead of the backlog,
    /// which `publish_message` honors by never calling this for
    /// QoS-0 traffic. If `client_id` is not connected to this node, nudges
    /// whichever node owns it instead of silently doing nothing. Returns
    /// `true` if a pending message was found (dispatched or not), so
    /// [`Self::drain_pending`] knows whether to keep looping.
    async fn try_dispatch(&self, client_id: &ClientId) -> bool {
        let sink = self.local_sinks.read().unwrap().get(client_id).cloned();
        let Some(sink) = sink else {
            self.forward_dispatch_hint(client_id).await;
            return false;
        };

        match self.store.fetch_next_pending_message(client_id).await {
            Ok(Some(pending)) => {
                let machine = DeliveryMachine::new(&*self.store);
                if let Err(err) = machine.mark_sent(client_id, &pending).await {
                    log::error!("session handler: mark_sent failed for {client_id}: {err}");
                    return false;
                }
                let broker_msg = pending.into_broker_message(false);
                if sink.try_send(broker_msg).is_err() {
                    log::warn!("session handler: dispatch push to {client_id} failed, will retry on next sweep");
                }
                true
            }
            Ok(None) => false,
            Err(err) => {
                log::error!("session handler: fetch_next_pending_message failed for {client_id}: {err}");
                false
            }
        }
    }

    /// Repeatedly calls [`Self::try_dispatch`] until `client_id` has no
    /// more `Pending` backlog, used after a reconnect or a freshly
    /// registered local sink so queued QoS≥1 messages resume without
    /// waiting for new traffic (`spec.md` §8 Scenario 2).
    async fn drain_pending(&self, client_id: &ClientId) {
        while self.try_dispatch(client_id).await {}
    }

    /// `client_id` has no local sink on this node; if the presence map
    /// says a peer owns it, nudge that node's bus receiver to run its own
    /// `try_dispatch` against the shared store (`spec.md` §4.3).
    async fn forward_dispatch_hint(&self, client_id: &ClientId) {
        let Some(node_id) = self.presence.read().unwrap().get(client_id).cloned() else { return };
        if node_id == self.node_id {
            return;
        }
        let event = BusEvent::DispatchHint(client_id.clone());
        if let Err(err) = self.cluster.bus().publish(&bus::deliver_address(&node_id), event).await {
            log::error!("session handler: forwarding dispatch hint for {client_id} to node {node_id} failed: {err}");
        }
    }

    async fn record_metric(&self, name: &str, value: i64) {
        if let Some(metrics) = &self.metrics {
            if let Err(err) = metrics.record(MetricKind::Session, name, value).await {
                log::error!("session handler: recording metric {name} failed: {err}");
            }
        }
    }

    /// PUBACK (QoS 1).
    ///
    /// # Errors
    /// Propagates store errors.
    pub async fn on_puback(&self, client_id: &ClientId, uuid: MessageUuid) -> Result<(), Error> {
        DeliveryMachine::new(&*self.store).on_puback(client_id, uuid).await
    }

    /// PUBREC (QoS 2 step 1).
    ///
    /// # Errors
    /// Propagates store errors.
    pub async fn on_pubrec(&self, client_id: &ClientId, uuid: MessageUuid) -> Result<(), Error> {
        DeliveryMachine::new(&*self.store).on_pubrec(client_id, uuid).await
    }

    /// PUBCOMP (QoS 2 step 2).
    ///
    /// # Errors
    /// Propagates store errors.
    pub async fn on_pubcomp(&self, client_id: &ClientId, uuid: MessageUuid) -> Result<(), Error> {
        DeliveryMachine::new(&*self.store).on_pubcomp(client_id, uuid).await
    }

    /// Reconnect of a persistent session (`spec.md` §4.6): every
    /// `InFlight` link is reset to `Pending` so delivery resumes from the
    /// head, then immediately redrained so the backlog does not wait for
    /// new traffic (`spec.md` §8 Scenario 2).
    ///
    /// # Errors
    /// Propagates store errors.
    pub async fn on_reconnect(&self, client_id: &ClientId) -> Result<(), Error> {
        self.store.reset_in_flight_messages(client_id).await?;
        self.drain_pending(client_id).await;
        Ok(())
    }

    /// Periodic maintenance (`spec.md` §4.6/§5): redrains every
    /// locally-connected client's backlog (catching up any message whose
    /// staged enqueue write landed after the publish path's own dispatch
    /// attempt already ran), purges delivered/expired links and
    /// clean-disconnected sessions, then runs each archive group's
    /// retention purge under its cluster lock.
    pub async fn sweep(&self) {
        let connected: Vec<ClientId> = self.local_sinks.read().unwrap().keys().cloned().collect();
        for client_id in connected {
            self.drain_pending(&client_id).await;
        }
        if let Err(err) = self.store.purge_delivered_messages().await {
            log::error!("session handler sweep: purge_delivered_messages failed: {err}");
        }
        if let Err(err) = DeliveryMachine::new(&*self.store).sweep_expired().await {
            log::error!("session handler sweep: sweep_expired failed: {err}");
        }
        if let Err(err) = self.store.purge_sessions().await {
            log::error!("session handler sweep: purge_sessions failed: {err}");
        }
        for group in &self.archive_groups {
            match group.purge(&*self.cluster, ARCHIVE_PURGE_ROLE).await {
                Ok(Some(report)) => log::info!("archive group {} purge: {:?}", group.name(), report),
                Ok(None) => {}
                Err(err) => log::error!("archive group {} purge failed: {err}", group.name()),
            }
        }
    }
}

/// `role` passed to [`ArchiveGroup::purge`]'s lock name. A fixed, shared
/// string rather than `self.node_id`: the lock must contend across every
/// node running the same group's sweep (`spec.md` §8 Scenario 5 — one node
/// purges, the other observes `LockAcquisitionFailed`), which a
/// per-node-id lock name could never produce.
const ARCHIVE_PURGE_ROLE: &str = "primary";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorizer::AllowAll;
    use crate::cluster::LocalCluster;
    use crate::message::RetainHandling;
    use crate::store::memory::{MemoryMessageStore, MemorySessionStore};
    use crate::store::MessageStore;

    fn handler() -> Arc<SessionHandler> {
        let session_store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let message_store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
        let (retained, worker) = RetainedHandler::new(message_store);
        tokio::spawn(worker.run());
        let cluster: Arc<dyn ClusterFabric> = Arc::new(LocalCluster::new("node-1".to_string()));
        SessionHandler::new("node-1".to_string(), session_store, retained, Vec::new(), Arc::new(AllowAll), cluster, None)
    }

    fn sub(client_id: &str, filter: &str, qos: QoS) -> Subscription {
        Subscription {
            client_id: client_id.to_string(),
            topic_filter: TopicFilter::parse(filter).unwrap(),
            qos,
            no_local: false,
            retain_as_published: true,
            retain_handling: RetainHandling::DoNotSend,
        }
    }

    #[tokio::test]
    async fn scenario_6_wildcard_index_match() {
        let handler = handler();
        handler.rebuild().await.unwrap();
        handler.add_subscription(sub("C1", "a/+", QoS::AtMostOnce)).await.unwrap();
        handler.add_subscription(sub("C2", "a/b", QoS::AtMostOnce)).await.unwrap();
        handler.add_subscription(sub("C3", "a/#", QoS::AtMostOnce)).await.unwrap();

        let mut matched: Vec<ClientId> = handler.find_clients(&Topic::parse("a/b").unwrap()).into_iter().map(|(c, _)| c).collect();
        matched.sort();
        assert_eq!(matched, vec!["C1".to_string(), "C2".to_string(), "C3".to_string()]);

        let matched: Vec<ClientId> = handler.find_clients(&Topic::parse("a/b/c").unwrap()).into_iter().map(|(c, _)| c).collect();
        assert_eq!(matched, vec!["C3".to_string()]);

        assert!(handler.find_clients(&Topic::parse("a").unwrap()).is_empty());
    }

    #[tokio::test]
    async fn scenario_3_no_local_suppression() {
        let handler = handler();
        handler.rebuild().await.unwrap();
        let mut noisy = sub("C", "t/#", QoS::AtMostOnce);
        noisy.no_local = true;
        handler.add_subscription(noisy).await.unwrap();
        handler.add_subscription(sub("D", "t/#", QoS::AtMostOnce)).await.unwrap();

        let (c_tx, mut c_rx) = mpsc::channel(8);
        let (d_tx, mut d_rx) = mpsc::channel(8);
        handler.register_local_sink("C".to_string(), c_tx).await;
        handler.register_local_sink("D".to_string(), d_tx).await;

        let msg = BrokerMessage::new(Topic::parse("t/a").unwrap(), b"hi".to_vec(), QoS::AtMostOnce, false, "C".to_string());
        handler.publish_message(msg).await.unwrap();

        assert!(c_rx.try_recv().is_err());
        assert_eq!(d_rx.recv().await.unwrap().payload, b"hi");
    }

    #[tokio::test]
    async fn not_ready_before_rebuild_rejects_operations() {
        let handler = handler();
        let err = handler.add_subscription(sub("C1", "a/b", QoS::AtMostOnce)).await.unwrap_err();
        assert_eq!(err.kind(), &crate::error::ErrorKind::NotReady);
    }
}
