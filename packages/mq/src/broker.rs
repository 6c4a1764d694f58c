use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{info, warn};

use crate::error::MqError;

/// Queue drained by the judge worker pool.
pub const JUDGE_QUEUE: &str = "judge_queue";
/// Queue drained by the plagiarism worker.
pub const PLAGIARISM_QUEUE: &str = "plagiarism_queue";

/// Client for the two submission work queues.
///
/// Payloads are bare decimal submission ids. Delivery is at-least-once: the
/// consumers tolerate redelivery because verdict writes and report upserts
/// are idempotent.
#[derive(Clone)]
pub struct QueueBroker {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl QueueBroker {
    /// Connect to the broker and verify the connection with a ping.
    ///
    /// Accepts `redis://` and `rediss://` URLs; a bare `host:port` is treated
    /// as `redis://host:port`.
    pub async fn connect(url: &str) -> Result<Self, MqError> {
        let url = if url.contains("://") {
            url.to_string()
        } else {
            format!("redis://{url}")
        };

        let client = redis::Client::open(url.as_str())
            .map_err(|e| MqError::Connection(format!("invalid queue URL: {e}")))?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;

        Ok(Self { client, conn })
    }

    /// Connect with a fixed number of attempts, sleeping between failures.
    pub async fn connect_with_retry(url: &str, attempts: u32) -> Result<Self, MqError> {
        let mut last_err = None;
        for attempt in 1..=attempts {
            match Self::connect(url).await {
                Ok(broker) => {
                    info!("Connected to queue broker");
                    return Ok(broker);
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Queue broker connection failed");
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| MqError::Connection("no attempts made".into())))
    }

    /// Push a submission id onto both work queues atomically, in a single
    /// round trip. Either both queues see the id or neither does.
    pub async fn enqueue_submission(&self, submission_id: i32) -> Result<(), MqError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .lpush(JUDGE_QUEUE, submission_id)
            .ignore()
            .lpush(PLAGIARISM_QUEUE, submission_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Best-effort removal of a submission id from both queues.
    /// Compensation path for a failed intake; never load-bearing.
    pub async fn remove_submission(&self, submission_id: i32) -> Result<(), MqError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .lrem(JUDGE_QUEUE, 1, submission_id)
            .ignore()
            .lrem(PLAGIARISM_QUEUE, 1, submission_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Push a submission id back onto a single queue for redelivery after a
    /// transient failure in a worker.
    pub async fn requeue(&self, queue: &str, submission_id: i32) -> Result<(), MqError> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(queue, submission_id).await?;
        Ok(())
    }

    /// Create a consumer for the given queue.
    ///
    /// Each consumer owns a dedicated connection: a blocking pop would stall
    /// every other command on a shared one.
    pub async fn consumer(&self, queue: &str) -> Result<QueueConsumer, MqError> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(QueueConsumer {
            conn,
            queue: queue.to_string(),
        })
    }
}

/// A blocking consumer of one work queue.
pub struct QueueConsumer {
    conn: MultiplexedConnection,
    queue: String,
}

impl QueueConsumer {
    /// Blocking pop with indefinite wait. Returns the next submission id.
    pub async fn next(&mut self) -> Result<i32, MqError> {
        let (_queue, payload): (String, String) = redis::cmd("BRPOP")
            .arg(&self.queue)
            .arg(0)
            .query_async(&mut self.conn)
            .await?;

        payload
            .trim()
            .parse::<i32>()
            .map_err(|_| MqError::InvalidPayload(payload))
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}
