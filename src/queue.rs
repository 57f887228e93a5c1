//! Durable FIFO carrying task messages from the dispatcher to workers.
//!
//! Delivery is at-least-once: `pop` leases the oldest available message and
//! only `ack` removes it. A message whose lease runs out is handed out again.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::config::{QUEUE_LEASE_SECS, QUEUE_POLL_INTERVAL_MS};
use crate::model::TaskMessage;
use crate::store::ts;

/// A leased queue message. The payload is kept raw so an undecodable message
/// can still be acked.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: i64,
    pub attempts: i64,
    pub payload: String,
}

impl Delivery {
    pub fn decode(&self) -> serde_json::Result<TaskMessage> {
        serde_json::from_str(&self.payload)
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn push(&self, task: &TaskMessage) -> anyhow::Result<()>;

    /// Wait up to `wait` for a message. `Ok(None)` on timeout.
    async fn pop(&self, wait: Duration) -> anyhow::Result<Option<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> anyhow::Result<()>;

    /// Messages not yet acked, leased ones included.
    async fn depth(&self) -> anyhow::Result<i64>;
}

pub struct SqliteQueue {
    conn: Mutex<Connection>,
    #[allow(dead_code)]
    db_path: PathBuf,
    lease: chrono::Duration,
    poll_interval: Duration,
    consumer: String,
}

impl SqliteQueue {
    pub fn new(data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("queue.db");
        let conn = Connection::open(&db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS task_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                enqueued_at TEXT NOT NULL,
                claimed_at TEXT,
                claimed_by TEXT,
                attempts INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_task_queue_claimed ON task_queue(claimed_at);
        ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            lease: chrono::Duration::seconds(QUEUE_LEASE_SECS as i64),
            poll_interval: Duration::from_millis(QUEUE_POLL_INTERVAL_MS),
            consumer: uuid::Uuid::new_v4().to_string(),
        })
    }

    /// Override the lease after which an unacked message is redelivered.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = chrono::Duration::from_std(lease).unwrap_or(self.lease);
        self
    }

    fn try_claim(&self) -> anyhow::Result<Option<Delivery>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();
        let expired_before = ts(&(now - self.lease));

        let candidate = tx
            .query_row(
                "SELECT id, payload, attempts FROM task_queue
                 WHERE claimed_at IS NULL OR claimed_at < ?1
                 ORDER BY id LIMIT 1",
                params![expired_before],
                |row| {
                    Ok(Delivery {
                        id: row.get(0)?,
                        payload: row.get(1)?,
                        attempts: row.get(2)?,
                    })
                },
            )
            .optional()?;

        let delivery = match candidate {
            Some(mut delivery) => {
                tx.execute(
                    "UPDATE task_queue SET claimed_at = ?1, claimed_by = ?2, attempts = attempts + 1
                     WHERE id = ?3",
                    params![ts(&now), self.consumer, delivery.id],
                )?;
                delivery.attempts += 1;
                Some(delivery)
            }
            None => None,
        };
        tx.commit()?;
        Ok(delivery)
    }
}

#[async_trait]
impl TaskQueue for SqliteQueue {
    async fn push(&self, task: &TaskMessage) -> anyhow::Result<()> {
        let payload = serde_json::to_string(task)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO task_queue (payload, enqueued_at) VALUES (?1, ?2)",
            params![payload, ts(&Utc::now())],
        )?;
        Ok(())
    }

    async fn pop(&self, wait: Duration) -> anyhow::Result<Option<Delivery>> {
        let started = Instant::now();
        loop {
            if let Some(delivery) = self.try_claim()? {
                return Ok(Some(delivery));
            }
            if started.elapsed() >= wait {
                return Ok(None);
            }
            sleep(self.poll_interval.min(wait)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM task_queue WHERE id = ?1", params![delivery.id])?;
        Ok(())
    }

    async fn depth(&self) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM task_queue", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StepRecord;
    use tempfile::TempDir;

    fn task(run_id: i64) -> TaskMessage {
        TaskMessage {
            run_id,
            steps: vec![StepRecord::visit("https://x.test")],
            network_mocks: vec![],
        }
    }

    #[tokio::test]
    async fn test_fifo_order_and_ack() {
        let dir = TempDir::new().unwrap();
        let queue = SqliteQueue::new(dir.path()).unwrap();
        queue.push(&task(1)).await.unwrap();
        queue.push(&task(2)).await.unwrap();

        let first = queue.pop(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.decode().unwrap().run_id, 1);
        assert_eq!(first.attempts, 1);

        let second = queue.pop(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(second.decode().unwrap().run_id, 2);

        // Both leased, nothing left to hand out.
        assert!(queue.pop(Duration::ZERO).await.unwrap().is_none());
        assert_eq!(queue.depth().await.unwrap(), 2);

        queue.ack(&first).await.unwrap();
        queue.ack(&second).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let dir = TempDir::new().unwrap();
        let queue = SqliteQueue::new(dir.path())
            .unwrap()
            .with_lease(Duration::ZERO);
        queue.push(&task(7)).await.unwrap();

        let first = queue.pop(Duration::ZERO).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let again = queue.pop(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test]
    async fn test_pop_times_out_on_empty_queue() {
        let dir = TempDir::new().unwrap();
        let queue = SqliteQueue::new(dir.path()).unwrap();
        let popped = queue.pop(Duration::from_millis(30)).await.unwrap();
        assert!(popped.is_none());
    }
}
