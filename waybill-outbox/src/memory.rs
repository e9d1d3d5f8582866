//! In-memory outbox store.
//!
//! One lock guards every table, so a claim is atomic with respect to other
//! claims exactly like `FOR UPDATE SKIP LOCKED` makes it in PostgreSQL.
//! Writes go through [`InMemoryTransaction`], which only becomes visible on
//! [`commit`](InMemoryTransaction::commit).

use crate::error::{OutboxError, OutboxResult};
use crate::record::{OutboxRecord, OutboxStatus};
use crate::store::{OutboxStore, OutboxTransaction, ensure_terminal};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;
use waybill_log::debug;

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<String, Vec<OutboxRecord>>,
    failing_claims: usize,
}

impl Tables {
    fn table(&self, schema: &str) -> &[OutboxRecord] {
        self.rows.get(schema).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Outbox store kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOutboxStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryOutboxStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transaction for the outbox writer.
    pub fn begin(&self) -> InMemoryTransaction {
        InMemoryTransaction {
            tables: self.tables.clone(),
            staged: Vec::new(),
        }
    }

    /// Make the next `count` claims fail as if the database were unreachable.
    pub async fn fail_next_claims(&self, count: usize) {
        self.tables.lock().await.failing_claims += count;
    }

    /// Snapshot of a schema's table in insertion order.
    pub async fn records(&self, schema: &str) -> Vec<OutboxRecord> {
        self.tables.lock().await.table(schema).to_vec()
    }

    /// Number of records in `schema` with `status`.
    pub async fn count(&self, schema: &str, status: OutboxStatus) -> usize {
        self.tables
            .lock()
            .await
            .table(schema)
            .iter()
            .filter(|r| r.status == status)
            .count()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn claim_batch(&self, schema: &str, batch_size: usize) -> OutboxResult<Vec<OutboxRecord>> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }

        let mut tables = self.tables.lock().await;
        if tables.failing_claims > 0 {
            tables.failing_claims -= 1;
            return Err(OutboxError::Store(format!(
                "claim on {} failed: connection reset",
                schema
            )));
        }

        let Some(rows) = tables.rows.get_mut(schema) else {
            return Ok(Vec::new());
        };

        let mut pending: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status == OutboxStatus::New)
            .map(|(i, _)| i)
            .collect();
        pending.sort_by_key(|&i| rows[i].created_at);
        pending.truncate(batch_size);

        let now = Utc::now();
        let claimed: Vec<OutboxRecord> = pending
            .into_iter()
            .map(|i| {
                let row = &mut rows[i];
                row.status = OutboxStatus::Processing;
                row.claimed_at = Some(now);
                row.clone()
            })
            .collect();

        debug!({ "schema" => schema, "claimed" => claimed.len() }, "Claimed outbox records");
        Ok(claimed)
    }

    async fn finalize(&self, schema: &str, id: Uuid, terminal: OutboxStatus) -> OutboxResult<bool> {
        ensure_terminal(terminal)?;

        let mut tables = self.tables.lock().await;
        let row = tables
            .rows
            .get_mut(schema)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == id));

        match row {
            Some(row) if row.status == OutboxStatus::Processing => {
                row.status = terminal;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find(&self, schema: &str, id: Uuid) -> OutboxResult<Option<OutboxRecord>> {
        Ok(self
            .tables
            .lock()
            .await
            .table(schema)
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn find_by_aggregate(
        &self,
        schema: &str,
        aggregate_id: Uuid,
    ) -> OutboxResult<Vec<OutboxRecord>> {
        let mut found: Vec<OutboxRecord> = self
            .tables
            .lock()
            .await
            .table(schema)
            .iter()
            .filter(|r| r.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn reclaim_stale(&self, schema: &str, older_than: Duration) -> OutboxResult<u64> {
        let Some(claimed_before) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };

        let mut tables = self.tables.lock().await;
        let mut reset = 0;
        if let Some(rows) = tables.rows.get_mut(schema) {
            for row in rows.iter_mut().filter(|r| {
                r.status == OutboxStatus::Processing
                    && r.claimed_at.is_some_and(|at| at < claimed_before)
            }) {
                row.status = OutboxStatus::New;
                row.claimed_at = None;
                reset += 1;
            }
        }
        Ok(reset)
    }
}

/// Pending writes against an [`InMemoryOutboxStore`].
///
/// Dropping it without committing discards the writes.
#[derive(Debug)]
pub struct InMemoryTransaction {
    tables: Arc<Mutex<Tables>>,
    staged: Vec<(String, OutboxRecord)>,
}

impl InMemoryTransaction {
    /// Make the staged records visible.
    pub async fn commit(self) -> OutboxResult<()> {
        let mut tables = self.tables.lock().await;
        for (schema, record) in &self.staged {
            if tables.table(schema).iter().any(|r| r.id == record.id) {
                return Err(OutboxError::Store(format!(
                    "duplicate key {} in {}.outbox",
                    record.id, schema
                )));
            }
        }
        for (schema, record) in self.staged {
            tables.rows.entry(schema).or_default().push(record);
        }
        Ok(())
    }

    /// Discard the staged records.
    pub fn rollback(self) {}

    /// Number of staged records.
    pub fn staged(&self) -> usize {
        self.staged.len()
    }
}

#[async_trait]
impl OutboxTransaction for InMemoryTransaction {
    async fn insert_records(&mut self, schema: &str, records: &[OutboxRecord]) -> OutboxResult<u64> {
        for record in records {
            if self
                .staged
                .iter()
                .any(|(s, staged)| s == schema && staged.id == record.id)
            {
                return Err(OutboxError::Store(format!(
                    "duplicate key {} in {}.outbox",
                    record.id, schema
                )));
            }
            self.staged.push((schema.to_string(), record.clone()));
        }
        Ok(records.len() as u64)
    }
}
