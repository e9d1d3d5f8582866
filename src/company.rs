//! Company module events.
//!
//! Raised by the company aggregate and relayed from the `company` schema's
//! outbox to `tms.events` under `integration.company.<Type>`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use waybill_events::{Event, EventMetadata, EventRegistry};

/// Module (and schema) name.
pub const MODULE: &str = "company";

macro_rules! company_event {
    ($name:ident) => {
        impl Event for $name {
            const MODULE: &'static str = MODULE;
            const TYPE: &'static str = stringify!($name);

            fn event_metadata(&self) -> &EventMetadata {
                &self.metadata
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyCreated {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub company_id: Uuid,
    /// Company snapshot as JSON
    pub company: String,
}

impl CompanyCreated {
    pub fn new(company_id: Uuid, company: impl Into<String>) -> Self {
        Self {
            metadata: EventMetadata::new(company_id),
            company_id,
            company: company.into(),
        }
    }
}

company_event!(CompanyCreated);

/// A single property change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyUpdated {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub company_id: Uuid,
    pub property: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl CompanyUpdated {
    pub fn new(
        company_id: Uuid,
        property: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        Self {
            metadata: EventMetadata::new(company_id),
            company_id,
            property: property.into(),
            old_value,
            new_value,
        }
    }
}

company_event!(CompanyUpdated);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyDeleted {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub company_id: Uuid,
    pub company: String,
}

impl CompanyDeleted {
    pub fn new(company_id: Uuid, company: impl Into<String>) -> Self {
        Self {
            metadata: EventMetadata::new(company_id),
            company_id,
            company: company.into(),
        }
    }
}

company_event!(CompanyDeleted);

/// A field of an agreement between two companies changed. Raised by the
/// source company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementUpdated {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub source_company_id: Uuid,
    pub agreement_id: Uuid,
    pub field_changed: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl AgreementUpdated {
    pub fn new(
        source_company_id: Uuid,
        agreement_id: Uuid,
        field_changed: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        Self {
            metadata: EventMetadata::new(source_company_id),
            source_company_id,
            agreement_id,
            field_changed: field_changed.into(),
            old_value,
            new_value,
        }
    }
}

company_event!(AgreementUpdated);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementRemoved {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub source_company_id: Uuid,
    pub agreement_id: Uuid,
    pub destination_company_id: Uuid,
}

impl AgreementRemoved {
    pub fn new(source_company_id: Uuid, agreement_id: Uuid, destination_company_id: Uuid) -> Self {
        Self {
            metadata: EventMetadata::new(source_company_id),
            source_company_id,
            agreement_id,
            destination_company_id,
        }
    }
}

company_event!(AgreementRemoved);

/// Register every company event.
pub fn register_company_events(registry: &mut EventRegistry) -> &mut EventRegistry {
    registry
        .register::<CompanyCreated>()
        .register::<CompanyUpdated>()
        .register::<CompanyDeleted>()
        .register::<AgreementUpdated>()
        .register::<AgreementRemoved>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use waybill_events::DomainEvent;

    #[test]
    fn test_all_events_registered() {
        let mut registry = EventRegistry::new();
        register_company_events(&mut registry);

        assert_eq!(registry.len(), 5);
        for type_name in [
            "CompanyCreated",
            "CompanyUpdated",
            "CompanyDeleted",
            "AgreementUpdated",
            "AgreementRemoved",
        ] {
            assert!(registry.contains(MODULE, type_name), "{} missing", type_name);
        }
    }

    #[test]
    fn test_agreement_event_routes_under_company() {
        let source = Uuid::new_v4();
        let event = AgreementRemoved::new(source, Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(event.metadata().aggregate_id, source);
        assert_eq!(event.routing_key(), "integration.company.AgreementRemoved");
        assert_eq!(event.router(), "tms.events");
    }

    #[test]
    fn test_updated_wire_format() {
        let id = Uuid::new_v4();
        let event = CompanyUpdated::new(id, "name", Some("Acme".into()), Some("Acme Ltd".into()));

        let json: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
        assert_eq!(json["companyId"], id.to_string());
        assert_eq!(json["aggregateId"], id.to_string());
        assert_eq!(json["oldValue"], "Acme");
        assert_eq!(json["newValue"], "Acme Ltd");
    }
}
