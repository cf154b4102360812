//! Projectors: groups of targets wired onto the domain event bus.

use domain::{DomainEvent, DomainEventBus, SubscriberHandle};

use crate::invoker::{ReportCallback, SerialInvoker};
use crate::target::EventTarget;

/// A named group of targets maintaining read models.
///
/// Connected projectors raise errors: a target failure disconnects the whole
/// projector from the bus, since its read model can no longer be trusted.
pub struct Projector<E> {
    name: String,
    targets: Vec<Box<dyn EventTarget<E>>>,
    on_report: Option<ReportCallback>,
}

impl<E: DomainEvent> Projector<E> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            targets: Vec::new(),
            on_report: None,
        }
    }

    pub fn with_target(mut self, target: impl EventTarget<E> + 'static) -> Self {
        self.targets.push(Box::new(target));
        self
    }

    /// Receives the timings of every replay this projector goes through.
    pub fn on_report(mut self, callback: ReportCallback) -> Self {
        self.on_report = Some(callback);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn into_invoker(self) -> SerialInvoker<E> {
        let invoker = SerialInvoker::new(self.name, self.targets).raise_errors(true);
        match self.on_report {
            Some(callback) => invoker.on_report(callback),
            None => invoker,
        }
    }
}

/// Projector wiring for [`DomainEventBus`].
pub trait ProjectorBusExt<E> {
    fn connect_projector(&self, projector: Projector<E>) -> SubscriberHandle;
}

impl<E: DomainEvent> ProjectorBusExt<E> for DomainEventBus<E> {
    fn connect_projector(&self, projector: Projector<E>) -> SubscriberHandle {
        tracing::debug!(projector = projector.name(), "Connecting projector");
        self.connect(projector.into_invoker())
    }
}
