// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Bounded mpsc queues backing the Session Handler's staged persistence
//! writes (`spec.md` §4.2/§5): subscription add/del and message
//! enqueue/remove each get their own independently-capacitied queue and
//! drainer, so a slow store never blocks the in-memory topic index update
//! that happens immediately at the call site.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::message::{QueuedMessage, Subscription};
use crate::store::SessionStore;
use crate::types::{ClientId, MessageUuid};

/// Capacity of each bounded queue (`spec.md` §4.2/§5: ~10,000).
pub const QUEUE_CAPACITY: usize = 10_000;
/// Messages drained per batch (`spec.md` §5: up to 1,000).
pub const DRAIN_BATCH_SIZE: usize = 1_000;

/// Senders into the four staged queues (`spec.md` §5: subAdd, subDel,
/// msgAdd, msgDel); a background drainer per queue owns the receiving
/// half.
pub struct QueueWorkers {
    pub sub_add: mpsc::Sender<Subscription>,
    pub sub_del: mpsc::Sender<Subscription>,
    pub msg_add: mpsc::Sender<(QueuedMessage, Vec<ClientId>)>,
    pub msg_del: mpsc::Sender<(ClientId, MessageUuid)>,
}

impl QueueWorkers {
    #[must_use]
    pub fn spawn(store: Arc<dyn SessionStore>) -> Self {
        let (sub_add_tx, sub_add_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (sub_del_tx, sub_del_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (msg_add_tx, msg_add_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (msg_del_tx, msg_del_rx) = mpsc::channel(QUEUE_CAPACITY);

        tokio::spawn(Self::drain_subs(sub_add_rx, store.clone(), true));
        tokio::spawn(Self::drain_subs(sub_del_rx, store.clone(), false));
        tokio::spawn(Self::drain_msg_add(msg_add_rx, store.clone()));
        tokio::spawn(Self::drain_msg_del(msg_del_rx, store));

        Self { sub_add: sub_add_tx, sub_del: sub_del_tx, msg_add: msg_add_tx, msg_del: msg_del_tx }
    }

    async fn drain_subs(mut rx: mpsc::Receiver<Subscription>, store: Arc<dyn SessionStore>, is_add: bool) {
        loop {
            let Some(first) = rx.recv().await else { break };
            let mut batch = vec![first];
            while batch.len() < DRAIN_BATCH_SIZE {
                match rx.try_recv() {
                    Ok(sub) => batch.push(sub),
                    Err(_) => break,
                }
            }
            let result = if is_add {
                store.add_subscriptions(batch).await
            } else {
                store.del_subscriptions(batch).await
            };
            if let Err(err) = result {
                log::error!("session handler: subscription write failed: {err}");
            }
        }
    }

    async fn drain_msg_add(mut rx: mpsc::Receiver<(QueuedMessage, Vec<ClientId>)>, store: Arc<dyn SessionStore>) {
        loop {
            let Some(first) = rx.recv().await else { break };
            let mut batch = vec![first];
            while batch.len() < DRAIN_BATCH_SIZE {
                match rx.try_recv() {
                    Ok(entry) => batch.push(entry),
                    Err(_) => break,
                }
            }
            if let Err(err) = store.enqueue_messages(batch).await {
                log::error!("session handler: message enqueue failed: {err}");
            }
        }
    }

    async fn drain_msg_del(mut rx: mpsc::Receiver<(ClientId, MessageUuid)>, store: Arc<dyn SessionStore>) {
        loop {
            let Some(first) = rx.recv().await else { break };
            let mut batch = vec![first];
            while batch.len() < DRAIN_BATCH_SIZE {
                match rx.try_recv() {
                    Ok(entry) => batch.push(entry),
                    Err(_) => break,
                }
            }
            if let Err(err) = store.remove_messages(batch).await {
                log::error!("session handler: message removal failed: {err}");
            }
        }
    }
}
