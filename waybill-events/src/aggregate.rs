//! Aggregate root carrying pending domain events.

use crate::event::DomainEvent;
use std::fmt::Debug;
use uuid::Uuid;

/// Wraps aggregate state together with the events raised while a use case
/// runs against it. The outbox writer drains the events at commit time.
#[derive(Debug, Clone)]
pub struct AggregateRoot<T: Debug> {
    /// Aggregate ID
    pub id: Uuid,

    /// Aggregate state
    pub state: T,

    pending: Vec<Box<dyn DomainEvent>>,
}

impl<T: Debug> AggregateRoot<T> {
    /// Wrap existing state.
    pub fn new(id: Uuid, state: T) -> Self {
        Self {
            id,
            state,
            pending: Vec::new(),
        }
    }

    /// Stage an event, preserving the order events were raised in.
    pub fn record(&mut self, event: impl DomainEvent + 'static) {
        self.pending.push(Box::new(event));
    }

    /// Events staged so far.
    pub fn pending_events(&self) -> &[Box<dyn DomainEvent>] {
        &self.pending
    }

    /// Whether any events are staged.
    pub fn has_pending_events(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Remove and return the staged events.
    pub fn take_events(&mut self) -> Vec<Box<dyn DomainEvent>> {
        std::mem::take(&mut self.pending)
    }

    pub fn state(&self) -> &T {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut T {
        &mut self.state
    }
}
