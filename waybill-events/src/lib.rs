//! Domain events for Waybill.
//!
//! Events are raised by aggregates, stored in the transactional outbox as
//! JSON, and re-hydrated by the relay through an [`EventRegistry`] so routing
//! metadata can be computed from the concrete event.
//!
//! ## Features
//!
//! - **Typed events** - implement [`Event`] and get [`DomainEvent`] for free
//! - **Explicit registry** - `(module, type)` to decoder, populated at startup
//! - **Aggregates** - [`AggregateRoot`] stages events until they are saved
//!
//! ## Quick Start
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use uuid::Uuid;
//! use waybill_events::*;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! #[serde(rename_all = "camelCase")]
//! struct CompanyDeleted {
//!     #[serde(flatten)]
//!     metadata: EventMetadata,
//! }
//!
//! impl Event for CompanyDeleted {
//!     const MODULE: &'static str = "company";
//!     const TYPE: &'static str = "CompanyDeleted";
//!
//!     fn event_metadata(&self) -> &EventMetadata {
//!         &self.metadata
//!     }
//! }
//!
//! let registry = EventRegistry::new().with::<CompanyDeleted>();
//!
//! let event = CompanyDeleted { metadata: EventMetadata::new(Uuid::new_v4()) };
//! let content = event.encode().unwrap();
//! let decoded = registry.decode("company", "CompanyDeleted", &content).unwrap();
//! assert_eq!(decoded.metadata().domain_event_id, event.metadata.domain_event_id);
//! ```

pub mod aggregate;
pub mod error;
pub mod event;
pub mod registry;

pub use aggregate::AggregateRoot;
pub use error::{EventError, EventResult};
pub use event::{DEFAULT_ROUTER, DomainEvent, Event, EventMetadata, default_routing_key};
pub use registry::{Decoder, EventRegistry};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::aggregate::AggregateRoot;
    pub use crate::error::{EventError, EventResult};
    pub use crate::event::{DomainEvent, Event, EventMetadata};
    pub use crate::registry::EventRegistry;
}
