//! Storage seams for the outbox.

use crate::error::OutboxResult;
use crate::record::{OutboxRecord, OutboxStatus};
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Name of the per-schema outbox table.
pub const OUTBOX_TABLE: &str = "outbox";

/// Relay-side access to the outbox tables, one table per schema.
#[async_trait]
pub trait OutboxStore: Send + Sync + 'static {
    /// Atomically move up to `batch_size` of the oldest `NEW` records to
    /// `PROCESSING` and return them oldest first.
    ///
    /// Records locked by a concurrent claimer are skipped, never waited on,
    /// so no record is ever returned to two claimers. A `batch_size` of zero
    /// returns nothing and changes nothing.
    async fn claim_batch(&self, schema: &str, batch_size: usize) -> OutboxResult<Vec<OutboxRecord>>;

    /// Move a `PROCESSING` record to `terminal`.
    ///
    /// Returns whether a row transitioned. Records in any other state are
    /// left alone, which makes repeated finalization a no-op.
    async fn finalize(&self, schema: &str, id: Uuid, terminal: OutboxStatus) -> OutboxResult<bool>;

    /// Look up a record by ID.
    async fn find(&self, schema: &str, id: Uuid) -> OutboxResult<Option<OutboxRecord>>;

    /// All records raised by an aggregate, oldest first.
    async fn find_by_aggregate(
        &self,
        schema: &str,
        aggregate_id: Uuid,
    ) -> OutboxResult<Vec<OutboxRecord>>;

    /// Return `PROCESSING` records claimed more than `older_than` ago to `NEW`.
    ///
    /// Age is measured on the clock that stamped `claimed_at`. Returns how
    /// many records were reset.
    async fn reclaim_stale(&self, schema: &str, older_than: Duration) -> OutboxResult<u64>;
}

/// The caller's open transaction, as seen by the outbox writer.
///
/// Records inserted through it commit or roll back together with the
/// aggregate change made in the same transaction.
#[async_trait]
pub trait OutboxTransaction: Send {
    /// Insert `NEW` records into `schema`'s outbox table.
    async fn insert_records(&mut self, schema: &str, records: &[OutboxRecord]) -> OutboxResult<u64>;
}

/// Reject finalization to a non-terminal state.
pub(crate) fn ensure_terminal(terminal: OutboxStatus) -> OutboxResult<()> {
    if terminal.is_terminal() {
        Ok(())
    } else {
        Err(crate::OutboxError::InvalidRecord(format!(
            "cannot finalize to non-terminal status {}",
            terminal
        )))
    }
}
