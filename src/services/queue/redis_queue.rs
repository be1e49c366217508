use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{QueueAddress, QueueError, QueueGateway, ReceiveOptions};
use crate::models::message::QueueMessage;

/// Entry stored in the Redis lists.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    id: String,
    body: String,
}

/// Redis-backed job queue.
///
/// Each queue is a pair of lists, `<name>:pending` and `<name>:processing`,
/// plus a `<name>:leases` hash of entry to deadline (epoch millis).
/// Receiving moves entries into the processing list and leases them; the
/// moved entry is the receipt, and deleting removes it and its lease.
/// Entries whose lease ran out (their worker died) go back to pending.
pub struct RedisQueue {
    client: redis::Client,
    options: ReceiveOptions,
}

impl RedisQueue {
    pub fn new(redis_url: &str, options: ReceiveOptions) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client, options })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    fn deadline(&self, now_ms: i64) -> i64 {
        now_ms + i64::from(self.options.lease_secs) * 1000
    }

    /// Move entries with an expired lease back to pending. In-flight entries
    /// without a lease get one, so they are reclaimed if never acknowledged.
    async fn reclaim(
        &self,
        conn: &mut MultiplexedConnection,
        queue: &QueueAddress,
    ) -> Result<usize, QueueError> {
        let pending = pending_key(queue);
        let processing = processing_key(queue);
        let leases = lease_key(queue);
        let now = Utc::now().timestamp_millis();

        let deadlines: HashMap<String, i64> =
            conn.hgetall(&leases).await.map_err(QueueError::Redis)?;
        let in_flight: Vec<String> = conn
            .lrange(&processing, 0, -1)
            .await
            .map_err(QueueError::Redis)?;

        for entry in unleased(&in_flight, &deadlines) {
            conn.hset_nx::<_, _, _, ()>(&leases, entry, self.deadline(now))
                .await
                .map_err(QueueError::Redis)?;
        }

        let mut reclaimed = 0;
        // Newest first, so the oldest entry ends up at the pop end.
        for entry in expired_entries(deadlines, now).into_iter().rev() {
            let removed: i64 = conn
                .lrem(&processing, 1, &entry)
                .await
                .map_err(QueueError::Redis)?;
            if removed == 0 && in_flight.contains(&entry) {
                // Another worker reclaimed or deleted it first.
                continue;
            }
            conn.hdel::<_, _, ()>(&leases, &entry)
                .await
                .map_err(QueueError::Redis)?;
            if removed > 0 {
                conn.rpush::<_, _, ()>(&pending, &entry)
                    .await
                    .map_err(QueueError::Redis)?;
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            warn!(queue = %queue, count = reclaimed, "Requeued messages whose lease expired");
        }
        Ok(reclaimed)
    }
}

fn pending_key(queue: &QueueAddress) -> String {
    format!("{}:pending", queue.as_str())
}

fn processing_key(queue: &QueueAddress) -> String {
    format!("{}:processing", queue.as_str())
}

fn lease_key(queue: &QueueAddress) -> String {
    format!("{}:leases", queue.as_str())
}

/// Leased entries past their deadline, oldest deadline first.
fn expired_entries(deadlines: HashMap<String, i64>, now_ms: i64) -> Vec<String> {
    let mut expired: Vec<(i64, String)> = deadlines
        .into_iter()
        .filter(|(_, deadline)| *deadline <= now_ms)
        .map(|(entry, deadline)| (deadline, entry))
        .collect();
    expired.sort();
    expired.into_iter().map(|(_, entry)| entry).collect()
}

/// In-flight entries that have no lease.
fn unleased<'a>(in_flight: &'a [String], deadlines: &HashMap<String, i64>) -> Vec<&'a String> {
    in_flight
        .iter()
        .filter(|entry| !deadlines.contains_key(entry.as_str()))
        .collect()
}

/// Turn a raw list entry into a message. Entries pushed by other producers
/// without an envelope are delivered as-is.
fn decode(entry: String) -> QueueMessage {
    match serde_json::from_str::<Envelope>(&entry) {
        Ok(envelope) => QueueMessage::new(Some(envelope.id), envelope.body, Some(entry)),
        Err(_) => QueueMessage::new(None, entry.clone(), Some(entry)),
    }
}

#[async_trait]
impl QueueGateway for RedisQueue {
    async fn create_or_resolve(&self, name: &str) -> Result<QueueAddress, QueueError> {
        // Lists are created on first push. Resolving proves the server is
        // reachable and requeues anything a dead worker left behind.
        let queue = QueueAddress::new(name);
        self.health_check(&queue).await?;
        let mut conn = self.connection().await?;
        self.reclaim(&mut conn, &queue).await?;
        Ok(queue)
    }

    async fn receive(&self, queue: &QueueAddress) -> Result<Vec<QueueMessage>, QueueError> {
        let mut conn = self.connection().await?;
        self.reclaim(&mut conn, queue).await?;

        let pending = pending_key(queue);
        let processing = processing_key(queue);
        let leases = lease_key(queue);

        let mut messages = Vec::new();
        for _ in 0..self.options.batch_size {
            let entry: Option<String> = conn
                .rpoplpush(&pending, &processing)
                .await
                .map_err(QueueError::Redis)?;
            let Some(entry) = entry else { break };
            let deadline = self.deadline(Utc::now().timestamp_millis());
            conn.hset::<_, _, _, ()>(&leases, &entry, deadline)
                .await
                .map_err(QueueError::Redis)?;
            messages.push(decode(entry));
        }

        debug!(queue = %queue, count = messages.len(), "Received Redis messages");
        Ok(messages)
    }

    async fn delete(&self, queue: &QueueAddress, receipt: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lrem::<_, _, ()>(processing_key(queue), 1, receipt)
            .await
            .map_err(QueueError::Redis)?;
        conn.hdel::<_, _, ()>(lease_key(queue), receipt)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn send(&self, queue: &QueueAddress, body: &str) -> Result<Option<String>, QueueError> {
        let mut conn = self.connection().await?;
        let envelope = Envelope {
            id: Uuid::new_v4().to_string(),
            body: body.to_string(),
        };
        let payload = serde_json::to_string(&envelope).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(pending_key(queue), &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(Some(envelope.id))
    }

    async fn health_check(&self, _queue: &QueueAddress) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}
