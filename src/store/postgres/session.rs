// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Postgres-backed [`SessionStore`]: `sessions`, `subscriptions`,
//! `queued_messages` and `queued_messages_clients` tables.

use async_trait::async_trait;
use std::time::{Duration, SystemTime};
use tokio_postgres::Client;

use crate::connectors::pgsql_conn::PgSQLConn;
use crate::delivery::LinkStatus;
use crate::error::Error;
use crate::message::{LastWill, QueuedMessage, RetainHandling, Session, Subscription};
use crate::store::session_store::SessionStore;
use crate::topic::{Topic, TopicFilter};
use crate::types::{ClientId, MessageUuid, NodeId, QoS};

pub struct PostgresSessionStore {
    conn: PgSQLConn,
}

impl PostgresSessionStore {
    #[must_use]
    pub const fn new(conn: PgSQLConn) -> Self {
        Self { conn }
    }

    fn client(&self) -> &Client {
        self.conn.get_conn()
    }

    /// Creates every table this store owns if absent.
    ///
    /// # Errors
    /// Returns error on a connection/query failure.
    pub async fn create_tables(&self) -> Result<(), Error> {
        self.client()
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS sessions (
                    client_id TEXT PRIMARY KEY,
                    node_id TEXT NOT NULL,
                    clean_session BOOLEAN NOT NULL,
                    connected BOOLEAN NOT NULL,
                    update_time TIMESTAMPTZ NOT NULL,
                    information BYTEA NOT NULL,
                    last_will JSONB
                );
                CREATE TABLE IF NOT EXISTS subscriptions (
                    client_id TEXT NOT NULL,
                    topic_filter TEXT NOT NULL,
                    qos SMALLINT NOT NULL,
                    no_local BOOLEAN NOT NULL,
                    retain_as_published BOOLEAN NOT NULL,
                    retain_handling SMALLINT NOT NULL,
                    PRIMARY KEY (client_id, topic_filter)
                );
                CREATE TABLE IF NOT EXISTS queued_messages (
                    message_uuid UUID PRIMARY KEY,
                    message_id INTEGER NOT NULL,
                    topic_name TEXT NOT NULL,
                    payload BYTEA NOT NULL,
                    qos SMALLINT NOT NULL,
                    retain_flag BOOLEAN NOT NULL,
                    publisher_client_id TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS queued_messages_clients (
                    client_id TEXT NOT NULL,
                    message_uuid UUID NOT NULL,
                    status SMALLINT NOT NULL,
                    last_status_change TIMESTAMPTZ NOT NULL DEFAULT now(),
                    expiry_at TIMESTAMPTZ,
                    PRIMARY KEY (client_id, message_uuid)
                )",
            )
            .await?;
        Ok(())
    }

    fn row_to_session(row: &tokio_postgres::Row) -> Result<Session, Error> {
        let last_will_json: Option<serde_json::Value> = row.get("last_will");
        let last_will = last_will_json
            .map(|json| serde_json::from_value::<LastWill>(json))
            .transpose()
            .map_err(|err| Error::new(crate::error::ErrorKind::IoError, format!("invalid last_will json: {err}")))?;
        Ok(Session {
            client_id: row.get("client_id"),
            node_id: row.get("node_id"),
            clean_session: row.get("clean_session"),
            connected: row.get("connected"),
            update_time: row.get("update_time"),
            information: row.get("information"),
            last_will,
        })
    }

    fn row_to_subscription(row: &tokio_postgres::Row) -> Result<Subscription, Error> {
        let qos: i16 = row.get("qos");
        let retain_handling: i16 = row.get("retain_handling");
        Ok(Subscription {
            client_id: row.get("client_id"),
            topic_filter: TopicFilter::parse(&row.get::<_, String>("topic_filter"))?,
            qos: QoS::from_u8(qos as u8).unwrap_or_default(),
            no_local: row.get("no_local"),
            retain_as_published: row.get("retain_as_published"),
            retain_handling: retain_handling_from_i16(retain_handling),
        })
    }

    fn row_to_queued_message(row: &tokio_postgres::Row) -> Result<QueuedMessage, Error> {
        let qos: i16 = row.get("qos");
        Ok(QueuedMessage {
            message_uuid: MessageUuid::from_uuid(row.get("message_uuid")),
            message_id: row.get::<_, i32>("message_id") as u16,
            topic_name: Topic::parse(&row.get::<_, String>("topic_name"))?,
            payload: row.get("payload"),
            qos: QoS::from_u8(qos as u8).unwrap_or_default(),
            retain: row.get("retain_flag"),
            publisher_client_id: row.get("publisher_client_id"),
        })
    }
}

fn retain_handling_from_i16(value: i16) -> RetainHandling {
    match value {
        1 => RetainHandling::SendOnNewSubscribe,
        2 => RetainHandling::DoNotSend,
        _ => RetainHandling::SendOnSubscribe,
    }
}

const fn retain_handling_to_i16(value: RetainHandling) -> i16 {
    match value {
        RetainHandling::SendOnSubscribe => 0,
        RetainHandling::SendOnNewSubscribe => 1,
        RetainHandling::DoNotSend => 2,
    }
}

const fn link_status_to_i16(status: LinkStatus) -> i16 {
    match status {
        LinkStatus::Pending => 0,
        LinkStatus::InFlight => 1,
        LinkStatus::AwaitingPubrel => 2,
        LinkStatus::AwaitingPubcomp => 3,
        LinkStatus::Delivered => 4,
        LinkStatus::Expired => 5,
    }
}

fn link_status_from_i16(value: i16) -> LinkStatus {
    match value {
        1 => LinkStatus::InFlight,
        2 => LinkStatus::AwaitingPubrel,
        3 => LinkStatus::AwaitingPubcomp,
        4 => LinkStatus::Delivered,
        5 => LinkStatus::Expired,
        _ => LinkStatus::Pending,
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn iterate_offline_clients(&self, cb: &mut (dyn FnMut(&ClientId) + Send)) -> Result<(), Error> {
        let rows = self.client().query("SELECT client_id FROM sessions WHERE connected = false", &[]).await?;
        for row in &rows {
            cb(&row.get::<_, String>("client_id"));
        }
        Ok(())
    }

    async fn iterate_connected_clients(
        &self,
        cb: &mut (dyn FnMut(&ClientId, &NodeId) + Send),
    ) -> Result<(), Error> {
        let rows = self.client().query("SELECT client_id, node_id FROM sessions WHERE connected = true", &[]).await?;
        for row in &rows {
            cb(&row.get::<_, String>("client_id"), &row.get::<_, String>("node_id"));
        }
        Ok(())
    }

    async fn iterate_all_sessions(&self, cb: &mut (dyn FnMut(&Session) + Send)) -> Result<(), Error> {
        let rows = self.client().query("SELECT * FROM sessions", &[]).await?;
        for row in &rows {
            cb(&Self::row_to_session(row)?);
        }
        Ok(())
    }

    async fn iterate_node_clients(
        &self,
        node_id: &NodeId,
        cb: &mut (dyn FnMut(&ClientId) + Send),
    ) -> Result<(), Error> {
        let rows = self.client().query("SELECT client_id FROM sessions WHERE node_id = $1", &[node_id]).await?;
        for row in &rows {
            cb(&row.get::<_, String>("client_id"));
        }
        Ok(())
    }

    async fn iterate_subscriptions(&self, cb: &mut (dyn FnMut(&Subscription) + Send)) -> Result<(), Error> {
        let rows = self.client().query("SELECT * FROM subscriptions", &[]).await?;
        for row in &rows {
            cb(&Self::row_to_subscription(row)?);
        }
        Ok(())
    }

    async fn set_client(&self, session: Session) -> Result<(), Error> {
        let last_will_json = session
            .last_will
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|err| Error::new(crate::error::ErrorKind::IoError, format!("failed to encode last_will: {err}")))?;
        self.client()
            .execute(
                "INSERT INTO sessions (client_id, node_id, clean_session, connected, update_time, information, last_will)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (client_id) DO UPDATE SET
                    node_id = EXCLUDED.node_id,
                    clean_session = EXCLUDED.clean_session,
                    connected = EXCLUDED.connected,
                    update_time = EXCLUDED.update_time,
                    information = EXCLUDED.information,
                    last_will = EXCLUDED.last_will",
                &[
                    &session.client_id,
                    &session.node_id,
                    &session.clean_session,
                    &session.connected,
                    &session.update_time,
                    &session.information,
                    &last_will_json,
                ],
            )
            .await?;
        Ok(())
    }

    async fn set_last_will(&self, client_id: &ClientId, will: Option<LastWill>) -> Result<(), Error> {
        let last_will_json = will
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|err| Error::new(crate::error::ErrorKind::IoError, format!("failed to encode last_will: {err}")))?;
        self.client()
            .execute("UPDATE sessions SET last_will = $1 WHERE client_id = $2", &[&last_will_json, client_id])
            .await?;
        Ok(())
    }

    async fn set_connected(&self, client_id: &ClientId, connected: bool) -> Result<(), Error> {
        self.client()
            .execute("UPDATE sessions SET connected = $1 WHERE client_id = $2", &[&connected, client_id])
            .await?;
        Ok(())
    }

    async fn is_connected(&self, client_id: &ClientId) -> Result<bool, Error> {
        let row = self
            .client()
            .query_opt("SELECT connected FROM sessions WHERE client_id = $1", &[client_id])
            .await?;
        Ok(row.is_some_and(|row| row.get("connected")))
    }

    async fn is_present(&self, client_id: &ClientId) -> Result<bool, Error> {
        let row = self.client().query_opt("SELECT 1 FROM sessions WHERE client_id = $1", &[client_id]).await?;
        Ok(row.is_some())
    }

    async fn add_subscriptions(&self, subs: Vec<Subscription>) -> Result<(), Error> {
        for sub in subs {
            self.client()
                .execute(
                    "INSERT INTO subscriptions (client_id, topic_filter, qos, no_local, retain_as_published, retain_handling)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     ON CONFLICT (client_id, topic_filter) DO UPDATE SET
                        qos = EXCLUDED.qos,
                        no_local = EXCLUDED.no_local,
                        retain_as_published = EXCLUDED.retain_as_published,
                        retain_handling = EXCLUDED.retain_handling",
                    &[
                        &sub.client_id,
                        &sub.topic_filter.as_str(),
                        &i16::from(sub.qos.as_u8()),
                        &sub.no_local,
                        &sub.retain_as_published,
                        &retain_handling_to_i16(sub.retain_handling),
                    ],
                )
                .await?;
        }
        Ok(())
    }

    async fn del_subscriptions(&self, subs: Vec<Subscription>) -> Result<(), Error> {
        for sub in subs {
            self.client()
                .execute(
                    "DELETE FROM subscriptions WHERE client_id = $1 AND topic_filter = $2",
                    &[&sub.client_id, &sub.topic_filter.as_str()],
                )
                .await?;
        }
        Ok(())
    }

    async fn del_client(
        &self,
        client_id: &ClientId,
        row_cb: &mut (dyn FnMut(&Subscription) + Send),
    ) -> Result<(), Error> {
        let rows = self.client().query("SELECT * FROM subscriptions WHERE client_id = $1", &[client_id]).await?;
        let removed: Vec<Subscription> = rows.iter().map(Self::row_to_subscription).collect::<Result<_, _>>()?;
        self.client().execute("DELETE FROM sessions WHERE client_id = $1", &[client_id]).await?;
        self.client().execute("DELETE FROM subscriptions WHERE client_id = $1", &[client_id]).await?;
        self.client()
            .execute("DELETE FROM queued_messages_clients WHERE client_id = $1", &[client_id])
            .await?;
        for sub in &removed {
            row_cb(sub);
        }
        Ok(())
    }

    async fn enqueue_messages(&self, entries: Vec<(QueuedMessage, Vec<ClientId>)>) -> Result<(), Error> {
        for (message, targets) in entries {
            self.client()
                .execute(
                    "INSERT INTO queued_messages (message_uuid, message_id, topic_name, payload, qos, retain_flag, publisher_client_id)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     ON CONFLICT (message_uuid) DO NOTHING",
                    &[
                        &message.message_uuid.as_uuid(),
                        &i32::from(message.message_id),
                        &message.topic_name.to_string(),
                        &message.payload,
                        &i16::from(message.qos.as_u8()),
                        &message.retain,
                        &message.publisher_client_id,
                    ],
                )
                .await?;
            for client_id in targets {
                self.client()
                    .execute(
                        "INSERT INTO queued_messages_clients (client_id, message_uuid, status, last_status_change)
                         VALUES ($1, $2, $3, $4)
                         ON CONFLICT (client_id, message_uuid) DO NOTHING",
                        &[
                            &client_id,
                            &message.message_uuid.as_uuid(),
                            &link_status_to_i16(LinkStatus::Pending),
                            &SystemTime::now(),
                        ],
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn dequeue_messages(
        &self,
        client_id: &ClientId,
        cb: &mut (dyn FnMut(&QueuedMessage) -> bool + Send),
    ) -> Result<(), Error> {
        let rows = self
            .client()
            .query(
                "SELECT m.* FROM queued_messages m
                 JOIN queued_messages_clients c ON c.message_uuid = m.message_uuid
                 WHERE c.client_id = $1
                 ORDER BY m.message_uuid ASC",
                &[client_id],
            )
            .await?;
        for row in &rows {
            if !cb(&Self::row_to_queued_message(row)?) {
                break;
            }
        }
        Ok(())
    }

    async fn remove_messages(&self, links: Vec<(ClientId, MessageUuid)>) -> Result<(), Error> {
        for (client_id, uuid) in links {
            self.client()
                .execute(
                    "DELETE FROM queued_messages_clients WHERE client_id = $1 AND message_uuid = $2",
                    &[&client_id, &uuid.as_uuid()],
                )
                .await?;
        }
        self.client()
            .execute(
                "DELETE FROM queued_messages m WHERE NOT EXISTS (
                    SELECT 1 FROM queued_messages_clients c WHERE c.message_uuid = m.message_uuid
                 )",
                &[],
            )
            .await?;
        Ok(())
    }

    async fn fetch_next_pending_message(&self, client_id: &ClientId) -> Result<Option<QueuedMessage>, Error> {
        Ok(self.fetch_pending_messages(client_id, 1).await?.into_iter().next())
    }

    async fn fetch_pending_messages(&self, client_id: &ClientId, limit: usize) -> Result<Vec<QueuedMessage>, Error> {
        let rows = self
            .client()
            .query(
                "SELECT m.* FROM queued_messages m
                 JOIN queued_messages_clients c ON c.message_uuid = m.message_uuid
                 WHERE c.client_id = $1 AND c.status = $2
                 ORDER BY m.message_uuid ASC
                 LIMIT $3",
                &[client_id, &link_status_to_i16(LinkStatus::Pending), &(limit as i64)],
            )
            .await?;
        rows.iter().map(Self::row_to_queued_message).collect()
    }

    async fn mark_message_in_flight(&self, client_id: &ClientId, uuid: MessageUuid) -> Result<(), Error> {
        self.set_link_status(client_id, uuid, LinkStatus::InFlight).await
    }

    async fn mark_messages_in_flight(&self, client_id: &ClientId, uuids: Vec<MessageUuid>) -> Result<(), Error> {
        for uuid in uuids {
            self.mark_message_in_flight(client_id, uuid).await?;
        }
        Ok(())
    }

    async fn mark_message_delivered(&self, client_id: &ClientId, uuid: MessageUuid) -> Result<(), Error> {
        self.set_link_status(client_id, uuid, LinkStatus::Delivered).await
    }

    async fn set_link_status(&self, client_id: &ClientId, uuid: MessageUuid, status: LinkStatus) -> Result<(), Error> {
        let affected = self
            .client()
            .execute(
                "UPDATE queued_messages_clients SET status = $1, last_status_change = $2
                 WHERE client_id = $3 AND message_uuid = $4",
                &[&link_status_to_i16(status), &SystemTime::now(), client_id, &uuid.as_uuid()],
            )
            .await?;
        if affected == 0 {
            return Err(Error::new(crate::error::ErrorKind::NotFound, format!("no link for {client_id}/{uuid}")));
        }
        Ok(())
    }

    async fn reset_in_flight_messages(&self, client_id: &ClientId) -> Result<(), Error> {
        self.client()
            .execute(
                "UPDATE queued_messages_clients SET status = $1, last_status_change = $2
                 WHERE client_id = $3 AND status IN ($4, $5)",
                &[
                    &link_status_to_i16(LinkStatus::Pending),
                    &SystemTime::now(),
                    client_id,
                    &link_status_to_i16(LinkStatus::InFlight),
                    &link_status_to_i16(LinkStatus::AwaitingPubrel),
                ],
            )
            .await?;
        Ok(())
    }

    async fn purge_delivered_messages(&self) -> Result<usize, Error> {
        let affected = self
            .client()
            .execute(
                "DELETE FROM queued_messages_clients WHERE status = $1",
                &[&link_status_to_i16(LinkStatus::Delivered)],
            )
            .await?;
        self.client()
            .execute(
                "DELETE FROM queued_messages m WHERE NOT EXISTS (
                    SELECT 1 FROM queued_messages_clients c WHERE c.message_uuid = m.message_uuid
                 )",
                &[],
            )
            .await?;
        Ok(affected as usize)
    }

    async fn purge_expired_messages(&self) -> Result<usize, Error> {
        let affected = self
            .client()
            .execute(
                "DELETE FROM queued_messages_clients WHERE status = $1",
                &[&link_status_to_i16(LinkStatus::Expired)],
            )
            .await?;
        self.client()
            .execute(
                "DELETE FROM queued_messages m WHERE NOT EXISTS (
                    SELECT 1 FROM queued_messages_clients c WHERE c.message_uuid = m.message_uuid
                 )",
                &[],
            )
            .await?;
        Ok(affected as usize)
    }

    async fn expire_stale_in_flight_messages(&self, timeout: Duration) -> Result<usize, Error> {
        let now = SystemTime::now();
        let cutoff = now.checked_sub(timeout).unwrap_or(SystemTime::UNIX_EPOCH);
        let affected = self
            .client()
            .execute(
                "UPDATE queued_messages_clients SET status = $1, last_status_change = $2
                 WHERE status IN ($3, $4) AND last_status_change < $5",
                &[
                    &link_status_to_i16(LinkStatus::Expired),
                    &now,
                    &link_status_to_i16(LinkStatus::InFlight),
                    &link_status_to_i16(LinkStatus::AwaitingPubrel),
                    &cutoff,
                ],
            )
            .await?;
        Ok(affected as usize)
    }

    async fn purge_queued_messages(&self) -> Result<(), Error> {
        self.client().batch_execute("TRUNCATE queued_messages_clients, queued_messages").await?;
        Ok(())
    }

    async fn purge_sessions(&self) -> Result<usize, Error> {
        let rows = self
            .client()
            .query("SELECT client_id FROM sessions WHERE clean_session = true AND connected = false", &[])
            .await?;
        for row in &rows {
            let client_id: String = row.get("client_id");
            self.client().execute("DELETE FROM sessions WHERE client_id = $1", &[&client_id]).await?;
            self.client().execute("DELETE FROM subscriptions WHERE client_id = $1", &[&client_id]).await?;
            self.client()
                .execute("DELETE FROM queued_messages_clients WHERE client_id = $1", &[&client_id])
                .await?;
        }
        Ok(rows.len())
    }

    async fn count_queued_messages(&self) -> Result<usize, Error> {
        let row = self.client().query_one("SELECT COUNT(*) AS n FROM queued_messages_clients", &[]).await?;
        Ok(row.get::<_, i64>("n") as usize)
    }

    async fn count_queued_messages_for_client(&self, client_id: &ClientId) -> Result<usize, Error> {
        let row = self
            .client()
            .query_one("SELECT COUNT(*) AS n FROM queued_messages_clients WHERE client_id = $1", &[client_id])
            .await?;
        Ok(row.get::<_, i64>("n") as usize)
    }
}
