//! Durable queue stored in a Redis list.
//!
//! Producers `LPUSH` JSON-encoded tasks; consumers `BRPOP` from the other
//! end, which gives FIFO order for a single producer. Each waiting consumer
//! blocks on its own connection so producers never queue behind a pop.

use std::{
    fmt,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use courier_core::Task;
use redis::{
    aio::{ConnectionManager, MultiplexedConnection},
    Client, RedisResult,
};
use tracing::{debug, warn};

use super::TaskQueue;
use crate::error::QueueError;

/// List key used when none is configured.
pub const DEFAULT_QUEUE_KEY: &str = "notification_queue";

/// Redis queue connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisQueueConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379/0`.
    pub url: String,
    /// List key holding queued tasks.
    pub key: String,
    /// Pause before a consumer reconnects after a connection error.
    pub reconnect_delay: Duration,
    /// Limit on opening a connection, handshake included.
    pub connect_timeout: Duration,
}

impl Default for RedisQueueConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            key: DEFAULT_QUEUE_KEY.to_string(),
            reconnect_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Task queue backed by a Redis list.
///
/// Connection failures while waiting for work are absorbed here: the
/// consumer drops the connection, waits `reconnect_delay` and tries again,
/// indefinitely. Opening a connection is bounded by `connect_timeout`, so a
/// server that accepts TCP but never answers counts as a failure too.
/// Entries that do not decode as a [`Task`] are logged and discarded.
pub struct RedisQueue {
    client: Client,
    producer: ConnectionManager,
    idle_consumers: Mutex<Vec<MultiplexedConnection>>,
    config: RedisQueueConfig,
}

impl RedisQueue {
    /// Opens the producer connection and returns a ready queue.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Backend` if the URL is invalid, or the server
    /// cannot be reached within `connect_timeout`.
    pub async fn connect(config: RedisQueueConfig) -> Result<Self, QueueError> {
        let client = Client::open(config.url.as_str())?;
        let connecting = ConnectionManager::new(client.clone());
        let producer = match tokio::time::timeout(config.connect_timeout, connecting).await {
            Ok(connected) => connected?,
            Err(_) => return Err(connect_timed_out(config.connect_timeout)),
        };

        debug!(key = %config.key, "redis queue connected");

        Ok(Self { client, producer, idle_consumers: Mutex::new(Vec::new()), config })
    }

    /// List key this queue uses.
    pub fn key(&self) -> &str {
        &self.config.key
    }

    async fn checkout_consumer(&self) -> Result<MultiplexedConnection, QueueError> {
        let idle = self.idle_consumers.lock().unwrap_or_else(PoisonError::into_inner).pop();
        if let Some(connection) = idle {
            return Ok(connection);
        }

        let connecting = self.client.get_multiplexed_async_connection();
        match tokio::time::timeout(self.config.connect_timeout, connecting).await {
            Ok(connected) => Ok(connected?),
            Err(_) => Err(connect_timed_out(self.config.connect_timeout)),
        }
    }

    fn checkin_consumer(&self, connection: MultiplexedConnection) {
        self.idle_consumers.lock().unwrap_or_else(PoisonError::into_inner).push(connection);
    }

    async fn pause_before_reconnect(&self) {
        tokio::time::sleep(self.config.reconnect_delay).await;
    }
}

fn connect_timed_out(timeout: Duration) -> QueueError {
    QueueError::Backend { message: format!("redis connection timed out after {timeout:?}") }
}

impl fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQueue")
            .field("key", &self.config.key)
            .field("reconnect_delay", &self.config.reconnect_delay)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TaskQueue for RedisQueue {
    async fn submit(&self, task: Task) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&task)?;
        let mut connection = self.producer.clone();

        let _: i64 = redis::cmd("LPUSH")
            .arg(&self.config.key)
            .arg(payload)
            .query_async(&mut connection)
            .await?;

        Ok(())
    }

    async fn retrieve(&self) -> Result<Task, QueueError> {
        let delay_ms = u64::try_from(self.config.reconnect_delay.as_millis()).unwrap_or(u64::MAX);

        loop {
            let mut connection = match self.checkout_consumer().await {
                Ok(connection) => connection,
                Err(error) => {
                    warn!(
                        key = %self.config.key,
                        error = %error,
                        delay_ms,
                        "redis consumer connection failed, retrying"
                    );
                    self.pause_before_reconnect().await;
                    continue;
                },
            };

            let popped: RedisResult<Option<(String, String)>> =
                redis::cmd("BRPOP").arg(&self.config.key).arg(0).query_async(&mut connection).await;

            match popped {
                Ok(Some((_, payload))) => {
                    self.checkin_consumer(connection);
                    match serde_json::from_str::<Task>(&payload) {
                        Ok(task) => return Ok(task),
                        Err(error) => {
                            warn!(
                                key = %self.config.key,
                                error = %error,
                                payload = %payload,
                                "discarding malformed queue entry"
                            );
                        },
                    }
                },
                Ok(None) => self.checkin_consumer(connection),
                Err(error) => {
                    warn!(
                        key = %self.config.key,
                        error = %error,
                        delay_ms,
                        "redis pop failed, reconnecting"
                    );
                    drop(connection);
                    self.pause_before_reconnect().await;
                },
            }
        }
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        let mut connection = self.producer.clone();
        let length: usize =
            redis::cmd("LLEN").arg(&self.config.key).query_async(&mut connection).await?;
        Ok(length)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
