//! Event-sourced entities.

use common::EntityUid;
use event_store::Version;

use crate::error::EntityError;
use crate::event::{DomainEvent, Event};

/// State shared by every entity: identity, version and the events triggered
/// since the last commit.
#[derive(Debug, Clone)]
pub struct EntityCore<E> {
    uid: EntityUid,
    version: Version,
    pending_events: Vec<Event<E>>,
}

impl<E> EntityCore<E> {
    /// Creates the core of a blank entity (version 0, nothing pending).
    pub fn new(uid: EntityUid) -> Self {
        Self {
            uid,
            version: Version::initial(),
            pending_events: Vec::new(),
        }
    }
}

/// A versioned aggregate whose state is derived from its ordered events.
///
/// Implementors only provide construction, access to their [`EntityCore`] and
/// a `handle` function that folds one event into the entity-specific state,
/// usually a `match` over the event kinds. `handle` is a plain synchronous
/// function: state transitions cannot suspend.
///
/// ```ignore
/// impl Entity for Account {
///     type Event = BankEvent;
///
///     fn entity_type() -> &'static str { "Account" }
///     fn new(uid: EntityUid) -> Self { Self { core: EntityCore::new(uid), balance: 0 } }
///     fn core(&self) -> &EntityCore<BankEvent> { &self.core }
///     fn core_mut(&mut self) -> &mut EntityCore<BankEvent> { &mut self.core }
///
///     fn handle(&mut self, event: &Event<BankEvent>) {
///         if let BankEvent::Deposited { amount } = event.payload() {
///             self.balance += amount;
///         }
///     }
/// }
/// ```
pub trait Entity: Clone + Send + Sync + 'static {
    /// The closed set of event kinds this entity understands.
    type Event: DomainEvent;

    /// Returns the entity kind name, used in logs and errors.
    fn entity_type() -> &'static str;

    /// Creates a blank instance at version 0.
    fn new(uid: EntityUid) -> Self;

    fn core(&self) -> &EntityCore<Self::Event>;

    fn core_mut(&mut self) -> &mut EntityCore<Self::Event>;

    /// Folds one event into the entity state. Kinds without an effect on
    /// this entity are ignored.
    fn handle(&mut self, event: &Event<Self::Event>);

    fn uid(&self) -> &EntityUid {
        &self.core().uid
    }

    fn version(&self) -> Version {
        self.core().version
    }

    /// Events triggered since the last commit, in trigger order.
    fn pending_events(&self) -> &[Event<Self::Event>] {
        &self.core().pending_events
    }

    /// Records a new event on this entity and applies it immediately.
    ///
    /// The event targets this entity at `version + 1`. Historic kinds are
    /// rejected.
    fn trigger(&mut self, payload: Self::Event) -> Result<(), EntityError> {
        if payload.is_historic() {
            return Err(EntityError::HistoricEvent(payload.event_type()));
        }
        let event = Event::new(self.uid().clone(), self.version().next(), payload);
        self.apply_event(&event)?;
        self.core_mut().pending_events.push(event);
        Ok(())
    }

    /// Applies a live event.
    ///
    /// The event must target this entity and carry exactly the next version.
    /// On failure neither the state nor the version changes.
    fn apply_event(&mut self, event: &Event<Self::Event>) -> Result<(), EntityError> {
        check_uid(self, event)?;
        let expected = self.version().next();
        if event.entity_version() != expected {
            return Err(EntityError::VersionMismatch {
                current: self.version(),
                expected,
                actual: event.entity_version(),
            });
        }
        fold(self, event);
        Ok(())
    }

    /// Applies an event read back from the store while rehydrating.
    ///
    /// Stored histories may skip versions, so the event only has to be newer
    /// than the current version.
    fn apply_stored_event(&mut self, event: &Event<Self::Event>) -> Result<(), EntityError> {
        check_uid(self, event)?;
        if event.entity_version() <= self.version() {
            return Err(EntityError::StaleVersion {
                current: self.version(),
                actual: event.entity_version(),
            });
        }
        fold(self, event);
        Ok(())
    }

    /// Drops the pending events once they are committed.
    fn clear_pending_events(&mut self) {
        self.core_mut().pending_events.clear();
    }
}

fn check_uid<T: Entity>(entity: &T, event: &Event<T::Event>) -> Result<(), EntityError> {
    if event.entity_uid() != entity.uid() {
        return Err(EntityError::UidMismatch {
            expected: entity.uid().clone(),
            actual: event.entity_uid().clone(),
        });
    }
    Ok(())
}

fn fold<T: Entity>(entity: &mut T, event: &Event<T::Event>) {
    entity.handle(event);
    entity.core_mut().version = event.entity_version();
}
