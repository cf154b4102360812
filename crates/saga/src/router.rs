//! Routing of bus events to saga instances.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    BoxError, BusMessage, CommandBus, DomainEvent, DomainEventBus, EntityUid, Event,
    EventSubscriber, SubscriberHandle,
};
use projections::{EventTarget, SerialInvoker};
use tracing::{debug, error, info};

use crate::saga::{Saga, SagaContext, Terminator};

/// How start events map to instances.
pub enum SagaRouting<E> {
    /// At most one active instance. Start events arriving while it runs are
    /// delivered to it like any other event but start nothing.
    Singleton,

    /// At most one active instance per correlation key, computed from the
    /// start event. Every active instance receives every event.
    Keyed(Arc<dyn Fn(&Event<E>) -> String + Send + Sync>),
}

impl<E> SagaRouting<E> {
    pub fn keyed(correlate: impl Fn(&Event<E>) -> String + Send + Sync + 'static) -> Self {
        SagaRouting::Keyed(Arc::new(correlate))
    }
}

impl<E> Default for SagaRouting<E> {
    fn default() -> Self {
        SagaRouting::Singleton
    }
}

impl<E> Clone for SagaRouting<E> {
    fn clone(&self) -> Self {
        match self {
            SagaRouting::Singleton => SagaRouting::Singleton,
            SagaRouting::Keyed(correlate) => SagaRouting::Keyed(Arc::clone(correlate)),
        }
    }
}

impl<E> fmt::Debug for SagaRouting<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SagaRouting::Singleton => f.write_str("Singleton"),
            SagaRouting::Keyed(_) => f.write_str("Keyed"),
        }
    }
}

struct SagaTarget<G> {
    name: String,
    saga: G,
}

#[async_trait]
impl<E, G> EventTarget<E> for SagaTarget<G>
where
    E: DomainEvent,
    G: Saga<E>,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&mut self, event: &Event<E>) -> Result<(), BoxError> {
        self.saga.on_event(event).await
    }
}

struct ActiveSaga<E> {
    uid: EntityUid,
    key: Option<String>,
    terminator: Terminator,
    invoker: SerialInvoker<E>,
}

/// Bus subscriber starting saga instances and feeding them events.
///
/// Instance failures are logged and do not stop the instance or the router.
pub struct SagaRouter<G, E>
where
    G: Saga<E>,
    E: DomainEvent,
{
    command_bus: CommandBus<E>,
    params: G::Params,
    routing: SagaRouting<E>,
    active: Vec<ActiveSaga<E>>,
    _saga: PhantomData<fn() -> G>,
}

impl<G, E> SagaRouter<G, E>
where
    G: Saga<E>,
    E: DomainEvent,
{
    pub fn new(command_bus: CommandBus<E>, params: G::Params, routing: SagaRouting<E>) -> Self {
        Self {
            command_bus,
            params,
            routing,
            active: Vec::new(),
            _saga: PhantomData,
        }
    }

    /// Number of instances currently receiving events.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Delivers one bus message, starting an instance first when the event
    /// calls for it.
    pub async fn route(&mut self, message: &BusMessage<E>) {
        if let BusMessage::Event(event) = message {
            self.start_if_needed(event);
        }

        for saga in &mut self.active {
            if let Err(err) = saga.invoker.invoke(message).await {
                error!(saga_type = G::saga_type(), saga_uid = %saga.uid, error = %err, "Saga failed to handle event");
            }
        }

        self.active.retain(|saga| {
            let terminated = saga.terminator.is_terminated();
            if terminated {
                info!(saga_type = G::saga_type(), saga_uid = %saga.uid, "Saga terminated");
                metrics::counter!("sagas_terminated_total", "saga_type" => G::saga_type())
                    .increment(1);
            }
            !terminated
        });
    }

    fn start_if_needed(&mut self, event: &Event<E>) {
        if !G::is_started_by(event) {
            return;
        }

        let key = match &self.routing {
            SagaRouting::Singleton => None,
            SagaRouting::Keyed(correlate) => Some(correlate(event)),
        };
        let running = match &key {
            None => !self.active.is_empty(),
            Some(key) => self
                .active
                .iter()
                .any(|saga| saga.key.as_deref() == Some(key.as_str())),
        };
        if running {
            debug!(
                saga_type = G::saga_type(),
                event_type = event.event_type(),
                key = ?key,
                "Start event ignored, an instance is already active"
            );
            return;
        }

        let uid = EntityUid::new();
        let terminator = Terminator::default();
        let context = SagaContext::new(uid.clone(), self.command_bus.clone(), terminator.clone());
        let saga = G::start(context, &self.params);
        let target: Box<dyn EventTarget<E>> = Box::new(SagaTarget {
            name: G::saga_type().to_string(),
            saga,
        });

        info!(
            saga_type = G::saga_type(),
            saga_uid = %uid,
            entity_uid = %event.entity_uid(),
            event_type = event.event_type(),
            "Saga started"
        );
        metrics::counter!("sagas_started_total", "saga_type" => G::saga_type()).increment(1);

        self.active.push(ActiveSaga {
            invoker: SerialInvoker::new(G::saga_type(), vec![target]),
            uid,
            key,
            terminator,
        });
    }
}

#[async_trait]
impl<G, E> EventSubscriber<E> for SagaRouter<G, E>
where
    G: Saga<E>,
    E: DomainEvent,
{
    fn name(&self) -> &str {
        G::saga_type()
    }

    async fn receive(&mut self, message: &BusMessage<E>) -> Result<(), BoxError> {
        self.route(message).await;
        Ok(())
    }
}

/// Saga wiring for [`DomainEventBus`].
pub trait SagaBusExt<E: DomainEvent> {
    fn connect_saga<G: Saga<E>>(
        &self,
        command_bus: CommandBus<E>,
        params: G::Params,
        routing: SagaRouting<E>,
    ) -> SubscriberHandle;
}

impl<E: DomainEvent> SagaBusExt<E> for DomainEventBus<E> {
    fn connect_saga<G: Saga<E>>(
        &self,
        command_bus: CommandBus<E>,
        params: G::Params,
        routing: SagaRouting<E>,
    ) -> SubscriberHandle {
        debug!(saga_type = G::saga_type(), routing = ?routing, "Connecting saga");
        self.connect(SagaRouter::<G, E>::new(command_bus, params, routing))
    }
}
