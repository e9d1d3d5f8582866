// Waybill - transactional outbox relay and CQRS datasource routing
//
// Modules write domain events to their own outbox table in the same
// transaction as the state change; the relay publishes them to RabbitMQ with
// publisher confirms and records the outcome.

pub mod company;
pub mod shipment_order;

// Re-export member crates
pub use waybill_cqrs as cqrs;
pub use waybill_events as events;
pub use waybill_log as log;
pub use waybill_messaging as messaging;
pub use waybill_outbox as outbox;

#[cfg(feature = "postgres")]
pub use waybill_diesel as diesel;

/// Registry with every event this deployment relays.
pub fn default_registry() -> waybill_events::EventRegistry {
    let mut registry = waybill_events::EventRegistry::new();
    company::register_company_events(&mut registry);
    shipment_order::register_shipment_order_events(&mut registry);
    registry
}

/// Prelude for common imports.
pub mod prelude {
    pub use crate::company::{
        AgreementRemoved, AgreementUpdated, CompanyCreated, CompanyDeleted, CompanyUpdated,
    };
    pub use crate::default_registry;
    pub use crate::shipment_order::ShipmentOrderCreated;
    pub use waybill_cqrs::prelude::*;
    pub use waybill_events::prelude::*;
    pub use waybill_messaging::{Confirmation, Message, MessageBroker, PublishOptions};
    pub use waybill_outbox::prelude::*;

    #[cfg(feature = "postgres")]
    pub use waybill_diesel::{DataSourceConfig, DieselConfig, PgPool, RoutedPool, connect_routed};
    #[cfg(feature = "postgres")]
    pub use waybill_outbox::PgOutboxStore;
}
