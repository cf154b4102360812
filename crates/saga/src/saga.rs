//! The saga contract and what a running instance gets to work with.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use domain::{
    BoxError, Command, CommandBus, DomainEvent, EntityUid, Event, Result, RunningCommand,
};

/// A process reacting to a window of domain events.
///
/// An instance is created for an event accepted by
/// [`is_started_by`](Saga::is_started_by). It then receives that event and
/// every later bus event, one at a time, until it terminates through its
/// [`SagaContext`].
#[async_trait]
pub trait Saga<E: DomainEvent>: Send + 'static {
    /// Shared configuration handed to every new instance.
    type Params: Send + Sync + 'static;

    /// Saga kind name, used in logs and metrics.
    fn saga_type() -> &'static str;

    fn is_started_by(event: &Event<E>) -> bool;

    fn start(context: SagaContext<E>, params: &Self::Params) -> Self
    where
        Self: Sized;

    async fn on_event(&mut self, event: &Event<E>) -> std::result::Result<(), BoxError>;
}

/// Ends a saga instance. Shared between the instance and its router.
#[derive(Debug, Clone, Default)]
pub struct Terminator {
    terminated: Arc<AtomicBool>,
}

impl Terminator {
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

/// Capabilities of one saga instance.
pub struct SagaContext<E> {
    uid: EntityUid,
    command_bus: CommandBus<E>,
    terminator: Terminator,
}

impl<E> Clone for SagaContext<E> {
    fn clone(&self) -> Self {
        Self {
            uid: self.uid.clone(),
            command_bus: self.command_bus.clone(),
            terminator: self.terminator.clone(),
        }
    }
}

impl<E: DomainEvent> SagaContext<E> {
    pub(crate) fn new(uid: EntityUid, command_bus: CommandBus<E>, terminator: Terminator) -> Self {
        Self {
            uid,
            command_bus,
            terminator,
        }
    }

    /// Identifier of this instance.
    pub fn uid(&self) -> &EntityUid {
        &self.uid
    }

    pub fn command_bus(&self) -> &CommandBus<E> {
        &self.command_bus
    }

    /// Queues a command. The saga keeps receiving events while it runs.
    pub fn dispatch<C: Command>(&self, command: C) -> Result<RunningCommand> {
        self.command_bus.dispatch(command)
    }

    /// Generates a uid for an entity the saga is about to create.
    pub fn make_uid(&self) -> EntityUid {
        EntityUid::new()
    }

    /// Stops routing events to this instance once the current event is
    /// handled.
    pub fn terminate(&self) {
        self.terminator.terminate()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator.is_terminated()
    }
}
