//! Typed event registry.
//!
//! Maps a `(module, type)` pair, as stored on an outbox record, to a decoder
//! for the concrete event shape. Registration is explicit and happens once at
//! startup; the finished registry is shared behind an `Arc`.

use crate::error::{EventError, EventResult};
use crate::event::{DomainEvent, Event};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use waybill_log::{debug, warn};

/// Re-hydrates stored JSON content into a boxed event.
pub type Decoder = Arc<dyn Fn(&str) -> EventResult<Box<dyn DomainEvent>> + Send + Sync>;

/// Registry of decodable event types.
#[derive(Clone, Default)]
pub struct EventRegistry {
    decoders: HashMap<(String, String), Decoder>,
}

impl EventRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed event under its `MODULE` and `TYPE`.
    ///
    /// Registering the same pair twice replaces the earlier decoder.
    pub fn register<E: Event>(&mut self) -> &mut Self {
        let key = (E::MODULE.to_string(), E::TYPE.to_string());

        let decoder: Decoder = Arc::new(|content: &str| {
            serde_json::from_str::<E>(content)
                .map(|event| Box::new(event) as Box<dyn DomainEvent>)
                .map_err(|source| EventError::Malformed {
                    module: E::MODULE.to_string(),
                    type_name: E::TYPE.to_string(),
                    source,
                })
        });

        if self.decoders.insert(key, decoder).is_some() {
            warn!(
                { "module" => E::MODULE, "type" => E::TYPE },
                "Event type registered twice, keeping the latest decoder"
            );
        } else {
            debug!({ "module" => E::MODULE, "type" => E::TYPE }, "Registered event type");
        }

        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<E: Event>(mut self) -> Self {
        self.register::<E>();
        self
    }

    /// Look up the decoder for a `(module, type)` pair.
    pub fn resolve(&self, module: &str, type_name: &str) -> EventResult<Decoder> {
        self.decoders
            .get(&(module.to_string(), type_name.to_string()))
            .cloned()
            .ok_or_else(|| EventError::UnknownEventType {
                module: module.to_string(),
                type_name: type_name.to_string(),
            })
    }

    /// Decode stored content into the concrete event registered for the pair.
    pub fn decode(
        &self,
        module: &str,
        type_name: &str,
        content: &str,
    ) -> EventResult<Box<dyn DomainEvent>> {
        let decoder = self.resolve(module, type_name)?;
        decoder(content)
    }

    /// Whether a decoder exists for the pair.
    pub fn contains(&self, module: &str, type_name: &str) -> bool {
        self.decoders
            .contains_key(&(module.to_string(), type_name.to_string()))
    }

    /// Number of registered event types.
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .decoders
            .keys()
            .map(|(module, type_name)| format!("{}.{}", module, type_name))
            .collect();
        keys.sort();
        f.debug_struct("EventRegistry").field("types", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventMetadata;
    use serde::{Deserialize, Serialize};
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct CompanyCreated {
        #[serde(flatten)]
        metadata: EventMetadata,
        company_id: Uuid,
        name: String,
    }

    impl Event for CompanyCreated {
        const MODULE: &'static str = "company";
        const TYPE: &'static str = "CompanyCreated";

        fn event_metadata(&self) -> &EventMetadata {
            &self.metadata
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct CompanyDeleted {
        #[serde(flatten)]
        metadata: EventMetadata,
    }

    impl Event for CompanyDeleted {
        const MODULE: &'static str = "company";
        const TYPE: &'static str = "CompanyDeleted";

        fn event_metadata(&self) -> &EventMetadata {
            &self.metadata
        }
    }

    fn registry() -> EventRegistry {
        EventRegistry::new()
            .with::<CompanyCreated>()
            .with::<CompanyDeleted>()
    }

    #[test]
    fn test_decode_round_trip() {
        let aggregate = Uuid::new_v4();
        let event = CompanyCreated {
            metadata: EventMetadata::new(aggregate),
            company_id: aggregate,
            name: "Acme Freight".into(),
        };
        let content = assert_ok!(event.encode());

        let decoded = assert_ok!(registry().decode("company", "CompanyCreated", &content));

        assert_eq!(decoded.metadata(), &event.metadata);
        assert_eq!(decoded.event_type(), "CompanyCreated");
        assert_eq!(decoded.module(), "company");
        assert_eq!(decoded.downcast_ref::<CompanyCreated>(), Some(&event));
    }

    #[test]
    fn test_unknown_type() {
        let err = assert_err!(registry().resolve("company", "CompanyMerged"));
        assert!(matches!(
            err,
            EventError::UnknownEventType { ref module, ref type_name }
                if module == "company" && type_name == "CompanyMerged"
        ));
    }

    #[test]
    fn test_same_type_in_other_module_is_unknown() {
        assert!(registry().contains("company", "CompanyDeleted"));
        assert!(!registry().contains("billing", "CompanyDeleted"));
    }

    #[test]
    fn test_malformed_content() {
        let err = assert_err!(registry().decode("company", "CompanyCreated", "{\"name\": 1}"));
        assert!(matches!(err, EventError::Malformed { .. }));
        assert_eq!(err.module(), Some("company"));
    }

    #[test]
    fn test_duplicate_registration_replaces() {
        let mut registry = registry();
        registry.register::<CompanyCreated>();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_debug_lists_types() {
        let rendered = format!("{:?}", registry());
        assert!(rendered.contains("company.CompanyCreated"));
        assert!(rendered.contains("company.CompanyDeleted"));
    }
}
