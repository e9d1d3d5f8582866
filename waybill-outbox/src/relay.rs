//! One relay pass: claim, decode, publish.

use crate::error::OutboxResult;
use crate::finalizer::{ConfirmHandler, OutcomeFinalizer};
use crate::publisher::EventPublisher;
use crate::record::OutboxRecord;
use crate::store::OutboxStore;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use waybill_events::EventRegistry;
use waybill_log::{debug, error, info, warn};
use waybill_messaging::MessageBroker;

/// What a single pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Records moved from `NEW` to `PROCESSING`
    pub claimed: usize,
    /// Records handed to the broker
    pub dispatched: usize,
    /// Claimed records that could not be decoded or sent
    pub skipped: usize,
    /// Stale `PROCESSING` records returned to `NEW` before claiming
    pub reclaimed: u64,
}

impl ProcessReport {
    pub fn is_idle(&self) -> bool {
        self.claimed == 0 && self.reclaimed == 0
    }
}

impl fmt::Display for ProcessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "claimed={} dispatched={} skipped={} reclaimed={}",
            self.claimed, self.dispatched, self.skipped, self.reclaimed
        )
    }
}

/// Moves claimed outbox records onto the broker.
pub struct OutboxRelay<S: OutboxStore, B: MessageBroker> {
    store: Arc<S>,
    registry: Arc<EventRegistry>,
    publisher: Arc<EventPublisher<B>>,
    handler: Arc<dyn ConfirmHandler>,
    stale_after: Option<Duration>,
}

impl<S: OutboxStore, B: MessageBroker + 'static> OutboxRelay<S, B> {
    /// A relay whose confirmations finalize records in `store`.
    pub fn new(store: Arc<S>, registry: Arc<EventRegistry>, broker: Arc<B>) -> Self {
        let handler: Arc<dyn ConfirmHandler> = Arc::new(OutcomeFinalizer::new(store.clone()));
        Self {
            store,
            registry,
            publisher: Arc::new(EventPublisher::new(broker)),
            handler,
            stale_after: None,
        }
    }

    /// Replace the publisher, e.g. to set a confirm timeout.
    pub fn with_publisher(mut self, publisher: EventPublisher<B>) -> Self {
        self.publisher = Arc::new(publisher);
        self
    }

    /// Route confirmations to a custom handler.
    pub fn with_handler(mut self, handler: Arc<dyn ConfirmHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Before each claim, return records stuck in `PROCESSING` for longer
    /// than `after` to `NEW`. Off unless set.
    pub fn with_stale_after(mut self, after: Duration) -> Self {
        self.stale_after = Some(after);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn publisher(&self) -> &Arc<EventPublisher<B>> {
        &self.publisher
    }

    /// Claim up to `batch_size` records from `schema` and publish each one.
    ///
    /// Claim failures are returned. A record that cannot be decoded or sent
    /// is logged and counted as skipped; it stays `PROCESSING`.
    pub async fn process(&self, schema: &str, batch_size: usize) -> OutboxResult<ProcessReport> {
        let mut report = ProcessReport::default();

        if let Some(after) = self.stale_after {
            report.reclaimed = self.store.reclaim_stale(schema, after).await?;
            if report.reclaimed > 0 {
                warn!(
                    { "schema" => schema, "count" => report.reclaimed },
                    "Returned stale PROCESSING records to NEW"
                );
            }
        }

        let records = self.store.claim_batch(schema, batch_size).await?;
        report.claimed = records.len();
        if records.is_empty() {
            return Ok(report);
        }

        for record in &records {
            if self.dispatch(schema, record).await {
                report.dispatched += 1;
            } else {
                report.skipped += 1;
            }
        }

        info!({ "schema" => schema, "report" => report }, "Relay pass finished");
        Ok(report)
    }

    async fn dispatch(&self, schema: &str, record: &OutboxRecord) -> bool {
        let event = match self
            .registry
            .decode(schema, &record.event_type, &record.content)
        {
            Ok(event) => event,
            Err(e) => {
                error!(
                    { "schema" => schema, "record_id" => record.id, "type" => record.event_type, "error" => e },
                    "Cannot decode outbox record, leaving it PROCESSING"
                );
                return false;
            }
        };

        match self
            .publisher
            .publish(event.as_ref(), record.id, schema, self.handler.clone())
            .await
        {
            Ok(()) => {
                debug!({ "schema" => schema, "record_id" => record.id }, "Dispatched outbox record");
                true
            }
            Err(e) => {
                error!(
                    { "schema" => schema, "record_id" => record.id, "transient" => e.is_transient(), "error" => e },
                    "Failed to send outbox record, leaving it PROCESSING"
                );
                false
            }
        }
    }
}
