//! # Waybill Outbox
//!
//! Transactional outbox for Waybill modules.
//!
//! Domain events are written to the module's `outbox` table in the same
//! transaction as the aggregate change ([`OutboxWriter`]). A relay claims
//! pending records ([`OutboxStore::claim_batch`]), publishes them with
//! publisher confirms ([`EventPublisher`]), and finalizes each record as
//! `PUBLISHED` or `FAILED` once the broker answers ([`OutcomeFinalizer`]).
//!
//! ## Relaying
//!
//! ```rust
//! use std::sync::Arc;
//! use waybill_events::EventRegistry;
//! use waybill_messaging::memory::InMemoryBroker;
//! use waybill_outbox::{InMemoryOutboxStore, OutboxRelay};
//!
//! # tokio_test::block_on(async {
//! let relay = OutboxRelay::new(
//!     Arc::new(InMemoryOutboxStore::new()),
//!     Arc::new(EventRegistry::new()),
//!     Arc::new(InMemoryBroker::new()),
//! );
//!
//! let report = relay.process("company", 10).await.unwrap();
//! assert!(report.is_idle());
//! # });
//! ```
//!
//! ## Features
//!
//! - `postgres` (default): [`PgOutboxStore`] over routed diesel pools
//! - `rabbitmq`: the lapin-backed broker from `waybill-messaging`

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod finalizer;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod publisher;
pub mod record;
pub mod relay;
pub mod scheduler;
pub mod store;
pub mod writer;

pub use config::RelayConfig;
pub use error::{OutboxError, OutboxResult};
pub use finalizer::{ConfirmHandler, ConfirmMetadata, DeliveryConfirmation, OutcomeFinalizer};
pub use memory::{InMemoryOutboxStore, InMemoryTransaction};
#[cfg(feature = "postgres")]
pub use postgres::{PgOutboxStore, outbox_ddl};
pub use publisher::EventPublisher;
pub use record::{MAX_TYPE_LEN, OutboxRecord, OutboxStatus};
pub use relay::{OutboxRelay, ProcessReport};
pub use scheduler::{RelayScheduler, require_write};
pub use store::{OUTBOX_TABLE, OutboxStore, OutboxTransaction};
pub use writer::OutboxWriter;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::RelayConfig;
    pub use crate::error::{OutboxError, OutboxResult};
    pub use crate::finalizer::{ConfirmHandler, ConfirmMetadata, OutcomeFinalizer};
    pub use crate::record::{OutboxRecord, OutboxStatus};
    pub use crate::relay::{OutboxRelay, ProcessReport};
    pub use crate::scheduler::RelayScheduler;
    pub use crate::store::{OutboxStore, OutboxTransaction};
    pub use crate::writer::OutboxWriter;
}
