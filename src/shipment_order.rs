//! Shipment order module events.
//!
//! Relayed from the `shipmentorder` schema's outbox. The company module
//! consumes `ShipmentOrderCreated` to keep its per-company order counters.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use waybill_events::{Event, EventMetadata, EventRegistry};

/// Module (and schema) name.
pub const MODULE: &str = "shipmentorder";

/// A shipment order was placed for a company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentOrderCreated {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub shipment_order_id: Uuid,
    pub company_id: Uuid,
    /// Order reference in the shipper's own system
    pub external_id: String,
}

impl ShipmentOrderCreated {
    pub fn new(shipment_order_id: Uuid, company_id: Uuid, external_id: impl Into<String>) -> Self {
        Self {
            metadata: EventMetadata::new(shipment_order_id),
            shipment_order_id,
            company_id,
            external_id: external_id.into(),
        }
    }
}

impl Event for ShipmentOrderCreated {
    const MODULE: &'static str = MODULE;
    const TYPE: &'static str = "ShipmentOrderCreated";

    fn event_metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}

/// Register every shipment order event.
pub fn register_shipment_order_events(registry: &mut EventRegistry) -> &mut EventRegistry {
    registry.register::<ShipmentOrderCreated>()
}
