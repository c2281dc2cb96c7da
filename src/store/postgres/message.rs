// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Postgres-backed [`MessageStore`]: one row per topic in
//! `retained_messages`.

use async_trait::async_trait;
use std::time::{Duration, Instant, SystemTime};
use tokio_postgres::Client;

use crate::connectors::pgsql_conn::PgSQLConn;
use crate::error::Error;
use crate::message::BrokerMessage;
use crate::store::message_store::{ConnectionStatus, MessageStore};
use crate::topic::{Topic, TopicFilter};
use crate::types::{MessageUuid, QoS};

pub struct PostgresMessageStore {
    conn: PgSQLConn,
}

impl PostgresMessageStore {
    #[must_use]
    pub const fn new(conn: PgSQLConn) -> Self {
        Self { conn }
    }

    fn client(&self) -> &Client {
        self.conn.get_conn()
    }

    fn row_to_message(row: &tokio_postgres::Row) -> Result<BrokerMessage, Error> {
        let topic_name: String = row.get("topic_name");
        let qos: i16 = row.get("qos");
        Ok(BrokerMessage {
            message_uuid: MessageUuid::from_uuid(row.get("message_uuid")),
            message_id: row.get::<_, i32>("message_id") as u16,
            topic_name: Topic::parse(&topic_name)?,
            payload: row.get("payload"),
            qos: QoS::from_u8(qos as u8).unwrap_or_default(),
            retain: row.get("retain_flag"),
            dup: row.get("dup_flag"),
            time: row.get("time"),
            publisher_client_id: row.get("publisher_client_id"),
        })
    }

    /// Creates `retained_messages` if absent. Not part of the trait: called
    /// once at startup by whichever component wires the store together.
    ///
    /// # Errors
    /// Returns error on a connection/query failure.
    pub async fn create_table(&self) -> Result<(), Error> {
        self.client()
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS retained_messages (
                    topic_name TEXT PRIMARY KEY,
                    message_uuid UUID NOT NULL,
                    message_id INTEGER NOT NULL,
                    payload BYTEA NOT NULL,
                    qos SMALLINT NOT NULL,
                    retain_flag BOOLEAN NOT NULL,
                    dup_flag BOOLEAN NOT NULL,
                    time TIMESTAMPTZ NOT NULL,
                    publisher_client_id TEXT NOT NULL
                )",
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    async fn get(&self, topic_name: &str) -> Result<Option<BrokerMessage>, Error> {
        let row = self
            .client()
            .query_opt("SELECT * FROM retained_messages WHERE topic_name = $1", &[&topic_name])
            .await?;
        row.as_ref().map(Self::row_to_message).transpose()
    }

    async fn add_all(&self, messages: Vec<BrokerMessage>) -> Result<(), Error> {
        for msg in messages {
            self.client()
                .execute(
                    "INSERT INTO retained_messages
                        (topic_name, message_uuid, message_id, payload, qos, retain_flag, dup_flag, time, publisher_client_id)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                     ON CONFLICT (topic_name) DO UPDATE SET
                        message_uuid = EXCLUDED.message_uuid,
                        message_id = EXCLUDED.message_id,
                        payload = EXCLUDED.payload,
                        qos = EXCLUDED.qos,
                        retain_flag = EXCLUDED.retain_flag,
                        dup_flag = EXCLUDED.dup_flag,
                        time = EXCLUDED.time,
                        publisher_client_id = EXCLUDED.publisher_client_id",
                    &[
                        &msg.topic_name.to_string(),
                        &msg.message_uuid.as_uuid(),
                        &i32::from(msg.message_id),
                        &msg.payload,
                        &i16::from(msg.qos.as_u8()),
                        &msg.retain,
                        &msg.dup,
                        &msg.time,
                        &msg.publisher_client_id,
                    ],
                )
                .await?;
        }
        Ok(())
    }

    async fn del_all(&self, topics: Vec<String>) -> Result<(), Error> {
        for topic in topics {
            self.client()
                .execute("DELETE FROM retained_messages WHERE topic_name = $1", &[&topic])
                .await?;
        }
        Ok(())
    }

    async fn find_matching_messages(
        &self,
        pattern: &TopicFilter,
        cb: &mut (dyn FnMut(&BrokerMessage) -> bool + Send),
    ) -> Result<(), Error> {
        let rows = self.client().query("SELECT * FROM retained_messages", &[]).await?;
        for row in &rows {
            let msg = Self::row_to_message(row)?;
            if pattern.is_match(&msg.topic_name) && !cb(&msg) {
                break;
            }
        }
        Ok(())
    }

    async fn find_matching_topics(
        &self,
        pattern: &TopicFilter,
        cb: &mut (dyn FnMut(&str) -> bool + Send),
    ) -> Result<(), Error> {
        let rows = self.client().query("SELECT topic_name FROM retained_messages", &[]).await?;
        for row in &rows {
            let topic_name: String = row.get("topic_name");
            let topic = Topic::parse(&topic_name)?;
            if pattern.is_match(&topic) && !cb(&topic_name) {
                break;
            }
        }
        Ok(())
    }

    async fn purge_old_messages(&self, cutoff: SystemTime) -> Result<(usize, Duration), Error> {
        let started = Instant::now();
        let affected = self
            .client()
            .execute("DELETE FROM retained_messages WHERE time <= $1", &[&cutoff])
            .await?;
        Ok((affected as usize, started.elapsed()))
    }

    async fn drop_storage(&self) -> Result<(), Error> {
        self.client().batch_execute("DROP TABLE IF EXISTS retained_messages").await?;
        Ok(())
    }

    async fn connection_status(&self) -> ConnectionStatus {
        if self.client().simple_query("SELECT 1").await.is_ok() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }
}
