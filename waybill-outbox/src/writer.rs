//! Outbox writer.

use crate::error::OutboxResult;
use crate::record::OutboxRecord;
use crate::store::OutboxTransaction;
use std::fmt::Debug;
use waybill_events::{AggregateRoot, DomainEvent};
use waybill_log::debug;

/// Persists domain events as outbox records inside the caller's transaction.
pub struct OutboxWriter;

impl OutboxWriter {
    /// Insert one `NEW` record per event into `schema`'s outbox.
    ///
    /// Must be called with the transaction that also carries the aggregate
    /// change. An empty slice writes nothing and returns `0`.
    pub async fn save<T>(tx: &mut T, schema: &str, events: &[Box<dyn DomainEvent>]) -> OutboxResult<usize>
    where
        T: OutboxTransaction + ?Sized,
    {
        if events.is_empty() {
            return Ok(0);
        }

        let records = events
            .iter()
            .map(|event| OutboxRecord::from_event(event.as_ref()))
            .collect::<OutboxResult<Vec<_>>>()?;

        tx.insert_records(schema, &records).await?;

        debug!({ "schema" => schema, "count" => records.len() }, "Saved events to outbox");
        Ok(records.len())
    }

    /// Save the aggregate's pending events, then clear them.
    ///
    /// The events stay pending if the insert fails.
    pub async fn save_aggregate<T, S>(
        tx: &mut T,
        schema: &str,
        aggregate: &mut AggregateRoot<S>,
    ) -> OutboxResult<usize>
    where
        T: OutboxTransaction + ?Sized,
        S: Debug,
    {
        let saved = Self::save(tx, schema, aggregate.pending_events()).await?;
        aggregate.take_events();
        Ok(saved)
    }
}
