// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Retained Handler (`spec.md` §4.4): a buffered write queue in front of
//! the retained/last-value [`MessageStore`], plus wildcard lookup for
//! replay on SUBSCRIBE.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{Error, ErrorKind};
use crate::message::{BrokerMessage, RetainHandling, Subscription};
use crate::store::MessageStore;
use crate::topic::TopicFilter;

/// Capacity of the buffered write queue (`spec.md` §5: ~10,000).
const QUEUE_CAPACITY: usize = 10_000;
/// Messages drained per batch (`spec.md` §4.4/§5: up to 1,000).
const DRAIN_BATCH: usize = 1_000;

enum Write {
    Upsert(BrokerMessage),
    Delete(String),
}

/// Cloneable handle used by publishers; the queue itself is drained by
/// [`RetainedWorker::run`] on a background task.
#[derive(Clone)]
pub struct RetainedHandler {
    writes: mpsc::Sender<Write>,
    store: Arc<dyn MessageStore>,
}

impl RetainedHandler {
    /// Builds a handler/worker pair. The caller is responsible for
    /// `tokio::spawn`ing the returned [`RetainedWorker`].
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>) -> (Self, RetainedWorker) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let worker = RetainedWorker { rx, store: store.clone() };
        (Self { writes: tx, store }, worker)
    }

    /// `saveMessage` (`spec.md` §4.4): an empty payload schedules a
    /// delete of the retained entry for that topic, else an upsert.
    ///
    /// # Errors
    /// Returns `BackpressureExceeded` if the write queue is full.
    pub fn save_message(&self, msg: BrokerMessage) -> Result<(), Error> {
        let write = if msg.payload.is_empty() {
            Write::Delete(msg.topic_name.to_string())
        } else {
            Write::Upsert(msg)
        };
        self.writes
            .try_send(write)
            .map_err(|_| Error::new(ErrorKind::BackpressureExceeded, "retained write queue is full"))
    }

    /// `findMatching` (`spec.md` §4.4): invokes the store's wildcard
    /// match; `cb` returning `false` stops early. `max == 0` means
    /// unlimited.
    ///
    /// # Errors
    /// Propagates store errors.
    pub async fn find_matching(
        &self,
        filter: &TopicFilter,
        max: usize,
        mut cb: impl FnMut(&BrokerMessage) -> bool + Send,
    ) -> Result<(), Error> {
        let mut seen = 0usize;
        self.store
            .find_matching_messages(filter, &mut |msg| {
                if max != 0 && seen >= max {
                    return false;
                }
                seen += 1;
                cb(msg)
            })
            .await
    }

    /// Retain-handling-on-subscribe (`spec.md` §4.4): replays matching
    /// retained messages to a freshly subscribing client via `deliver`,
    /// downgrading qos to `min(msg.qos, sub.qos)` and forcing
    /// `retain = true`. `already_subscribed` is whether
    /// `(client_id, filter)` existed before this SUBSCRIBE, needed for
    /// `SendOnNewSubscribe`.
    ///
    /// # Errors
    /// Propagates store errors.
    pub async fn replay_for_subscribe(
        &self,
        sub: &Subscription,
        already_subscribed: bool,
        mut deliver: impl FnMut(BrokerMessage) + Send,
    ) -> Result<(), Error> {
        match sub.retain_handling {
            RetainHandling::DoNotSend => return Ok(()),
            RetainHandling::SendOnNewSubscribe if already_subscribed => return Ok(()),
            RetainHandling::SendOnSubscribe | RetainHandling::SendOnNewSubscribe => {}
        }
        self.find_matching(&sub.topic_filter, 0, |msg| {
            let mut replay = msg.clone();
            replay.qos = replay.qos.min(sub.qos);
            replay.retain = true;
            deliver(replay);
            true
        })
        .await
    }
}

/// Drains the write queue in batches of up to [`DRAIN_BATCH`], calling
/// `add_all`/`del_all` on the configured store.
pub struct RetainedWorker {
    rx: mpsc::Receiver<Write>,
    store: Arc<dyn MessageStore>,
}

impl RetainedWorker {
    /// Runs until every [`RetainedHandler`] clone sharing this queue is
    /// dropped.
    pub async fn run(mut self) {
        loop {
            let Some(first) = self.rx.recv().await else { break };
            let mut upserts = Vec::new();
            let mut deletes = Vec::new();
            Self::bucket(first, &mut upserts, &mut deletes);
            while upserts.len() + deletes.len() < DRAIN_BATCH {
                match self.rx.try_recv() {
                    Ok(write) => Self::bucket(write, &mut upserts, &mut deletes),
                    Err(_) => break,
                }
            }
            if !upserts.is_empty() {
                if let Err(err) = self.store.add_all(upserts).await {
                    log::error!("retained handler: add_all failed: {err}");
                }
            }
            if !deletes.is_empty() {
                if let Err(err) = self.store.del_all(deletes).await {
                    log::error!("retained handler: del_all failed: {err}");
                }
            }
        }
    }

    fn bucket(write: Write, upserts: &mut Vec<BrokerMessage>, deletes: &mut Vec<String>) {
        match write {
            Write::Upsert(msg) => upserts.push(msg),
            Write::Delete(topic) => deletes.push(topic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Subscription;
    use crate::store::memory::MemoryMessageStore;
    use crate::types::QoS;

    fn sub(client_id: &str, filter: &str, qos: QoS, retain_handling: RetainHandling) -> Subscription {
        Subscription {
            client_id: client_id.to_string(),
            topic_filter: TopicFilter::parse(filter).unwrap(),
            qos,
            no_local: false,
            retain_as_published: true,
            retain_handling,
        }
    }

    #[tokio::test]
    async fn scenario_1_retained_replay_on_subscribe() {
        let store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
        let (handler, worker) = RetainedHandler::new(store);
        let drain = tokio::spawn(worker.run());

        let msg = BrokerMessage::new(
            crate::topic::Topic::parse("sensors/t1").unwrap(),
            b"22.5".to_vec(),
            QoS::AtMostOnce,
            true,
            "publisher".to_string(),
        );
        handler.save_message(msg).unwrap();
        // Give the drain task a chance to run before we query the store
        // it writes to.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let a_sub = sub("A", "sensors/#", QoS::AtLeastOnce, RetainHandling::SendOnSubscribe);
        let mut replayed = Vec::new();
        handler
            .replay_for_subscribe(&a_sub, false, |msg| replayed.push(msg))
            .await
            .unwrap();

        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].topic_name.to_string(), "sensors/t1");
        assert!(replayed[0].retain);
        assert_eq!(replayed[0].qos, QoS::AtMostOnce);

        drop(handler);
        drain.abort();
    }

    #[tokio::test]
    async fn do_not_send_skips_replay() {
        let store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
        let (handler, worker) = RetainedHandler::new(store);
        let drain = tokio::spawn(worker.run());

        let msg = BrokerMessage::new(
            crate::topic::Topic::parse("sensors/t1").unwrap(),
            b"22.5".to_vec(),
            QoS::AtMostOnce,
            true,
            "publisher".to_string(),
        );
        handler.save_message(msg).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let a_sub = sub("A", "sensors/#", QoS::AtLeastOnce, RetainHandling::DoNotSend);
        let mut replayed = Vec::new();
        handler
            .replay_for_subscribe(&a_sub, false, |msg| replayed.push(msg))
            .await
            .unwrap();
        assert!(replayed.is_empty());

        drop(handler);
        drain.abort();
    }
}
