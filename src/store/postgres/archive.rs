// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Postgres-backed [`MessageArchive`]: append-only `archive_history`
//! table keyed by `(topic_name, time)`.

use async_trait::async_trait;
use std::time::{Duration, Instant, SystemTime};
use tokio_postgres::Client;

use crate::connectors::pgsql_conn::PgSQLConn;
use crate::error::Error;
use crate::message::BrokerMessage;
use crate::store::archive_store::{AggregateFn, AggregateValue, AggregatedHistory, MessageArchive};
use crate::store::message_store::ConnectionStatus;
use crate::topic::Topic;
use crate::types::{MessageUuid, QoS};

pub struct PostgresMessageArchive {
    conn: PgSQLConn,
}

impl PostgresMessageArchive {
    #[must_use]
    pub const fn new(conn: PgSQLConn) -> Self {
        Self { conn }
    }

    fn client(&self) -> &Client {
        self.conn.get_conn()
    }

    fn row_to_message(row: &tokio_postgres::Row) -> Result<BrokerMessage, Error> {
        let qos: i16 = row.get("qos");
        Ok(BrokerMessage {
            message_uuid: MessageUuid::from_uuid(row.get("message_uuid")),
            message_id: row.get::<_, i32>("message_id") as u16,
            topic_name: Topic::parse(&row.get::<_, String>("topic_name"))?,
            payload: row.get("payload"),
            qos: QoS::from_u8(qos as u8).unwrap_or_default(),
            retain: row.get("retain_flag"),
            dup: false,
            time: row.get("time"),
            publisher_client_id: row.get("publisher_client_id"),
        })
    }
}

#[async_trait]
impl MessageArchive for PostgresMessageArchive {
    async fn add_history(&self, messages: Vec<BrokerMessage>) -> Result<(), Error> {
        for msg in messages {
            self.client()
                .execute(
                    "INSERT INTO archive_history
                        (topic_name, time, message_uuid, message_id, payload, qos, retain_flag, publisher_client_id)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                     ON CONFLICT (topic_name, time) DO UPDATE SET
                        message_uuid = EXCLUDED.message_uuid,
                        payload = EXCLUDED.payload,
                        qos = EXCLUDED.qos,
                        retain_flag = EXCLUDED.retain_flag,
                        publisher_client_id = EXCLUDED.publisher_client_id",
                    &[
                        &msg.topic_name.to_string(),
                        &msg.time,
                        &msg.message_uuid.as_uuid(),
                        &i32::from(msg.message_id),
                        &msg.payload,
                        &i16::from(msg.qos.as_u8()),
                        &msg.retain,
                        &msg.publisher_client_id,
                    ],
                )
                .await?;
        }
        Ok(())
    }

    async fn purge_old_messages(&self, cutoff: SystemTime) -> Result<(usize, Duration), Error> {
        let started = Instant::now();
        let affected = self.client().execute("DELETE FROM archive_history WHERE time <= $1", &[&cutoff]).await?;
        Ok((affected as usize, started.elapsed()))
    }

    async fn drop_storage(&self) -> Result<(), Error> {
        self.client().batch_execute("DROP TABLE IF EXISTS archive_history").await?;
        Ok(())
    }

    async fn connection_status(&self) -> ConnectionStatus {
        if self.client().simple_query("SELECT 1").await.is_ok() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    async fn table_exists(&self) -> Result<bool, Error> {
        let row = self
            .client()
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = 'archive_history') AS present",
                &[],
            )
            .await?;
        Ok(row.get("present"))
    }

    async fn create_table(&self) -> Result<(), Error> {
        self.client()
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS archive_history (
                    topic_name TEXT NOT NULL,
                    time TIMESTAMPTZ NOT NULL,
                    message_uuid UUID NOT NULL,
                    message_id INTEGER NOT NULL,
                    payload BYTEA NOT NULL,
                    qos SMALLINT NOT NULL,
                    retain_flag BOOLEAN NOT NULL,
                    publisher_client_id TEXT NOT NULL,
                    PRIMARY KEY (topic_name, time)
                )",
            )
            .await?;
        Ok(())
    }

    async fn get_history(
        &self,
        topic: &str,
        start_time: Option<SystemTime>,
        end_time: Option<SystemTime>,
        limit: usize,
    ) -> Result<Vec<BrokerMessage>, Error> {
        let rows = self
            .client()
            .query(
                "SELECT * FROM archive_history
                 WHERE topic_name = $1
                   AND ($2::timestamptz IS NULL OR time >= $2)
                   AND ($3::timestamptz IS NULL OR time <= $3)
                 ORDER BY time ASC
                 LIMIT $4",
                &[&topic, &start_time, &end_time, &(limit as i64)],
            )
            .await?;
        rows.iter().map(Self::row_to_message).collect()
    }

    async fn get_aggregated_history(
        &self,
        topics: &[String],
        start_time: SystemTime,
        end_time: SystemTime,
        bucket_minutes: u32,
        funcs: &[AggregateFn],
        _fields: &[String],
    ) -> Result<AggregatedHistory, Error> {
        let bucket_seconds = i64::from(bucket_minutes) * 60;
        let mut columns = vec!["topic_name".to_string(), "bucket".to_string()];
        let select_funcs: Vec<String> = funcs
            .iter()
            .map(|f| match f {
                AggregateFn::Avg => "AVG(length(payload))".to_string(),
                AggregateFn::Min => "MIN(length(payload))".to_string(),
                AggregateFn::Max => "MAX(length(payload))".to_string(),
                AggregateFn::Count => "COUNT(*)".to_string(),
            })
            .collect();
        columns.extend(funcs.iter().map(|f| format!("{f:?}").to_lowercase()));

        let query = format!(
            "SELECT topic_name,
                    to_timestamp(floor(extract(epoch FROM time) / $1) * $1) AS bucket,
                    {}
             FROM archive_history
             WHERE topic_name = ANY($2) AND time >= $3 AND time <= $4
             GROUP BY topic_name, bucket
             ORDER BY topic_name, bucket",
            select_funcs.join(", ")
        );
        let rows = self
            .client()
            .query(&query, &[&(bucket_seconds as f64), &topics, &start_time, &end_time])
            .await?;

        let mut result = AggregatedHistory { columns, rows: Vec::new() };
        for row in &rows {
            let mut out_row = vec![
                AggregateValue::Text(row.get::<_, String>("topic_name")),
                AggregateValue::Timestamp(row.get("bucket")),
            ];
            for (idx, func) in funcs.iter().enumerate() {
                let value = match func {
                    AggregateFn::Count => AggregateValue::Int(row.get::<_, i64>(2 + idx)),
                    _ => AggregateValue::Float(row.get::<_, f64>(2 + idx)),
                };
                out_row.push(value);
            }
            result.rows.push(out_row);
        }
        Ok(result)
    }
}
