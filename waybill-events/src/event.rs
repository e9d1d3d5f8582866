//! Domain event types.

use crate::error::{EventError, EventResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::Debug;
use uuid::Uuid;

/// Exchange every event is published to unless it says otherwise.
pub const DEFAULT_ROUTER: &str = "tms.events";

/// Routing key used for events that keep the default routing.
pub fn default_routing_key(module: &str, event_type: &str) -> String {
    format!("integration.{}.{}", module, event_type)
}

/// Identity and timing shared by all domain events.
///
/// Serialized in camelCase and flattened into the event body, so stored
/// content looks like `{"domainEventId": ..., "occurredOn": ..., "aggregateId": ..., ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// Unique event ID; becomes the outbox record ID
    pub domain_event_id: Uuid,

    /// When the event happened
    pub occurred_on: DateTime<Utc>,

    /// Aggregate that raised the event
    pub aggregate_id: Uuid,
}

impl EventMetadata {
    /// New metadata for an event raised now by `aggregate_id`.
    pub fn new(aggregate_id: Uuid) -> Self {
        Self {
            domain_event_id: Uuid::new_v4(),
            occurred_on: Utc::now(),
            aggregate_id,
        }
    }

    /// Use a specific event ID.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.domain_event_id = id;
        self
    }

    /// Use a specific occurrence time.
    pub fn with_occurred_on(mut self, occurred_on: DateTime<Utc>) -> Self {
        self.occurred_on = occurred_on;
        self
    }
}

/// A domain event as seen by the outbox: type-erased, routable and encodable.
///
/// Implemented automatically for every [`Event`]; implement it by hand only
/// for events that need routing computed at runtime.
pub trait DomainEvent: Send + Sync + Debug {
    /// Event identity
    fn metadata(&self) -> &EventMetadata;

    /// Short type name stored in the outbox `type` column
    fn event_type(&self) -> &str;

    /// Owning module; doubles as the database schema name
    fn module(&self) -> &str;

    /// Exchange to publish to
    fn router(&self) -> &str {
        DEFAULT_ROUTER
    }

    /// Routing key to publish with
    fn routing_key(&self) -> String {
        default_routing_key(self.module(), self.event_type())
    }

    /// Serialize to the JSON stored in the outbox `content` column
    fn encode(&self) -> EventResult<String>;

    /// Downcast support
    fn as_any(&self) -> &dyn Any;

    /// Clone into a box
    fn clone_event(&self) -> Box<dyn DomainEvent>;
}

impl Clone for Box<dyn DomainEvent> {
    fn clone(&self) -> Self {
        self.clone_event()
    }
}

impl dyn DomainEvent {
    /// Downcast to a concrete event type.
    pub fn downcast_ref<E: DomainEvent + 'static>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }
}

/// A concrete, statically typed domain event.
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use uuid::Uuid;
/// use waybill_events::{DomainEvent, Event, EventMetadata};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// #[serde(rename_all = "camelCase")]
/// struct CompanyCreated {
///     #[serde(flatten)]
///     metadata: EventMetadata,
///     name: String,
/// }
///
/// impl Event for CompanyCreated {
///     const MODULE: &'static str = "company";
///     const TYPE: &'static str = "CompanyCreated";
///
///     fn event_metadata(&self) -> &EventMetadata {
///         &self.metadata
///     }
/// }
///
/// let event = CompanyCreated {
///     metadata: EventMetadata::new(Uuid::new_v4()),
///     name: "Acme".into(),
/// };
/// assert_eq!(event.routing_key(), "integration.company.CompanyCreated");
/// ```
pub trait Event: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Owning module
    const MODULE: &'static str;

    /// Short type name
    const TYPE: &'static str;

    /// Exchange override
    const ROUTER: &'static str = DEFAULT_ROUTER;

    /// Event identity
    fn event_metadata(&self) -> &EventMetadata;
}

impl<E: Event> DomainEvent for E {
    fn metadata(&self) -> &EventMetadata {
        self.event_metadata()
    }

    fn event_type(&self) -> &str {
        E::TYPE
    }

    fn module(&self) -> &str {
        E::MODULE
    }

    fn router(&self) -> &str {
        E::ROUTER
    }

    fn encode(&self) -> EventResult<String> {
        serde_json::to_string(self).map_err(|source| EventError::Serialization {
            type_name: E::TYPE.to_string(),
            source,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_event(&self) -> Box<dyn DomainEvent> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ShipmentDispatched {
        #[serde(flatten)]
        metadata: EventMetadata,
        carrier: String,
    }

    impl Event for ShipmentDispatched {
        const MODULE: &'static str = "shipment";
        const TYPE: &'static str = "ShipmentDispatched";
        const ROUTER: &'static str = "tms.shipments";

        fn event_metadata(&self) -> &EventMetadata {
            &self.metadata
        }
    }

    fn dispatched() -> ShipmentDispatched {
        ShipmentDispatched {
            metadata: EventMetadata::new(Uuid::new_v4()),
            carrier: "DHL".into(),
        }
    }

    #[test]
    fn test_metadata_builders() {
        let id = Uuid::new_v4();
        let at = Utc::now();
        let metadata = EventMetadata::new(Uuid::new_v4())
            .with_id(id)
            .with_occurred_on(at);

        assert_eq!(metadata.domain_event_id, id);
        assert_eq!(metadata.occurred_on, at);
    }

    #[test]
    fn test_default_routing_key() {
        assert_eq!(
            default_routing_key("company", "CompanyCreated"),
            "integration.company.CompanyCreated"
        );
    }

    #[test]
    fn test_router_override() {
        let event = dispatched();
        assert_eq!(DomainEvent::router(&event), "tms.shipments");
        assert_eq!(event.routing_key(), "integration.shipment.ShipmentDispatched");
    }

    #[test]
    fn test_encode_flattens_metadata() {
        let event = dispatched();
        let json = tokio_test::assert_ok!(event.encode());
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(
            value["domainEventId"],
            event.metadata.domain_event_id.to_string()
        );
        assert_eq!(value["aggregateId"], event.metadata.aggregate_id.to_string());
        assert_eq!(value["carrier"], "DHL");
    }

    #[test]
    fn test_boxed_clone_and_downcast() {
        let boxed: Box<dyn DomainEvent> = Box::new(dispatched());
        let cloned = boxed.clone();

        let concrete = cloned.downcast_ref::<ShipmentDispatched>().unwrap();
        assert_eq!(concrete.carrier, "DHL");
        assert_eq!(cloned.metadata(), boxed.metadata());
    }
}
