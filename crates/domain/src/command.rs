//! Serialized command processing.
//!
//! Commands are validated and routed to their handler when dispatched, then
//! queued. A single worker task drains the queue in FIFO order: each handler
//! runs to completion and its unit of work is committed before the next
//! command starts. This is the only serialization point for domain
//! mutations.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use common::EntityUid;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::entity::Entity;
use crate::error::{DomainError, Result, ValidationError};
use crate::event::DomainEvent;
use crate::repository::DomainRepository;
use crate::unit_of_work::{EntityRef, UnitOfWork};

/// An instruction sent into the domain.
pub trait Command: Send + 'static {
    /// Checks the command before it is queued.
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        Ok(())
    }

    /// Name of the command kind, used in logs and errors. Defaults to the
    /// type name without its path and generic parameters.
    fn command_type(&self) -> &'static str {
        let name = std::any::type_name::<Self>();
        let base = name.split('<').next().unwrap_or(name);
        base.rsplit("::").next().unwrap_or(base)
    }
}

/// What a handler gets to work with: entity loading and creation, both
/// registering the entity in the command's unit of work.
pub struct HandlerContext<E> {
    repository: Arc<DomainRepository<E>>,
    unit_of_work: Arc<Mutex<UnitOfWork<E>>>,
}

impl<E> Clone for HandlerContext<E> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            unit_of_work: Arc::clone(&self.unit_of_work),
        }
    }
}

impl<E: DomainEvent> HandlerContext<E> {
    fn unit_of_work(&self) -> MutexGuard<'_, UnitOfWork<E>> {
        self.unit_of_work
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads an existing entity. Loading the same uid twice within one
    /// command returns the same instance.
    pub async fn load<T>(&self, entity_uid: &EntityUid) -> Result<EntityRef<T>>
    where
        T: Entity<Event = E>,
    {
        let registered = self.unit_of_work().get::<T>(entity_uid)?;
        if let Some(entity) = registered {
            return Ok(entity);
        }
        let entity = self
            .repository
            .load_entity_by_uid::<T>(entity_uid)
            .await?;
        self.unit_of_work().add(entity)
    }

    /// Creates a blank entity.
    pub fn create<T>(&self, entity_uid: EntityUid) -> Result<EntityRef<T>>
    where
        T: Entity<Event = E>,
    {
        self.unit_of_work().add(T::new(entity_uid))
    }

    pub fn repository(&self) -> &DomainRepository<E> {
        &self.repository
    }

    fn take_unit_of_work(&self) -> UnitOfWork<E> {
        std::mem::take(&mut *self.unit_of_work())
    }
}

type ErasedHandler<E> =
    Arc<dyn Fn(HandlerContext<E>, Box<dyn Any + Send>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct QueuedCommand<E> {
    uid: Uuid,
    command_type: &'static str,
    command: Box<dyn Any + Send>,
    handler: ErasedHandler<E>,
    done: oneshot::Sender<Result<()>>,
}

/// An accepted command. Await [`wait`](RunningCommand::wait) to learn its
/// outcome; dropping it does not cancel the command.
#[derive(Debug)]
pub struct RunningCommand {
    uid: Uuid,
    outcome: oneshot::Receiver<Result<()>>,
}

impl RunningCommand {
    /// Identifier used to correlate the command in logs.
    pub fn uid(&self) -> Uuid {
        self.uid
    }

    /// Resolves once the handler ran and its unit of work was committed,
    /// with the error of either if one failed.
    pub async fn wait(self) -> Result<()> {
        self.outcome
            .await
            .map_err(|_| DomainError::CommandAbandoned(self.uid))?
    }
}

struct CommandBusInner<E> {
    handlers: RwLock<HashMap<TypeId, ErasedHandler<E>>>,
    queue: mpsc::UnboundedSender<QueuedCommand<E>>,
    pending: Arc<AtomicUsize>,
}

/// Single-writer command queue in front of a [`DomainRepository`].
pub struct CommandBus<E> {
    inner: Arc<CommandBusInner<E>>,
}

impl<E> Clone for CommandBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: DomainEvent> CommandBus<E> {
    /// Creates the bus and spawns its worker on the current tokio runtime.
    /// The worker stops once every clone of the bus is dropped.
    pub fn new(repository: Arc<DomainRepository<E>>) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        tokio::spawn(drain_queue(repository, receiver, Arc::clone(&pending)));
        Self {
            inner: Arc::new(CommandBusInner {
                handlers: RwLock::new(HashMap::new()),
                queue,
                pending,
            }),
        }
    }

    /// Registers the handler for a command kind, replacing any previous one.
    pub fn register_command_handler<C, F, Fut>(&self, handler: F)
    where
        C: Command,
        F: Fn(HandlerContext<E>, C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let erased: ErasedHandler<E> = Arc::new(
            move |context: HandlerContext<E>,
                  command: Box<dyn Any + Send>|
                  -> BoxFuture<'static, Result<()>> {
                match command.downcast::<C>() {
                    Ok(command) => handler(context, *command).boxed(),
                    Err(_) => async {
                        Err(DomainError::handler(format!(
                            "queued command is not a {}",
                            std::any::type_name::<C>()
                        )))
                    }
                    .boxed(),
                }
            },
        );
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<C>(), erased);
    }

    /// Validates and queues a command, returning as soon as it is accepted.
    ///
    /// Fails without queueing anything when the command is invalid or has no
    /// registered handler.
    pub fn dispatch<C: Command>(&self, command: C) -> Result<RunningCommand> {
        let command_type = command.command_type();
        command.validate()?;

        let handler = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<C>())
            .cloned()
            .ok_or(DomainError::CommandHandlerNotFound(command_type))?;

        let uid = Uuid::new_v4();
        let (done, outcome) = oneshot::channel();
        let queue = self.inner.pending.fetch_add(1, Ordering::SeqCst) + 1;
        let queued = QueuedCommand {
            uid,
            command_type,
            command: Box::new(command),
            handler,
            done,
        };
        if self.inner.queue.send(queued).is_err() {
            self.inner.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(DomainError::CommandBusClosed);
        }

        metrics::counter!("commands_dispatched_total").increment(1);
        info!(command_uid = %uid, command_type, queue, "Command added to queue");
        Ok(RunningCommand { uid, outcome })
    }

    /// Dispatches a command and waits for its outcome.
    pub async fn execute<C: Command>(&self, command: C) -> Result<()> {
        self.dispatch(command)?.wait().await
    }

    /// Number of accepted commands whose handler has not started yet.
    pub fn queue_len(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }
}

async fn drain_queue<E: DomainEvent>(
    repository: Arc<DomainRepository<E>>,
    mut receiver: mpsc::UnboundedReceiver<QueuedCommand<E>>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(queued) = receiver.recv().await {
        let queue = pending.fetch_sub(1, Ordering::SeqCst) - 1;
        let QueuedCommand {
            uid,
            command_type,
            command,
            handler,
            done,
        } = queued;

        let span = info_span!("command", command_uid = %uid, command_type);
        let started = Instant::now();
        info!(parent: &span, queue, "Executing command handler");

        let outcome = AssertUnwindSafe(process(&repository, command, handler))
            .catch_unwind()
            .instrument(span.clone())
            .await
            .unwrap_or_else(|_| Err(DomainError::handler("command handler panicked")));

        metrics::histogram!("command_duration_seconds").record(started.elapsed().as_secs_f64());
        match &outcome {
            Ok(()) => info!(parent: &span, queue, "Command succeeded"),
            Err(err) => {
                metrics::counter!("commands_failed_total").increment(1);
                error!(parent: &span, queue, error = %err, "Command failed");
            }
        }
        let _ = done.send(outcome);
    }
}

async fn process<E: DomainEvent>(
    repository: &Arc<DomainRepository<E>>,
    command: Box<dyn Any + Send>,
    handler: ErasedHandler<E>,
) -> Result<()> {
    let context = HandlerContext {
        repository: Arc::clone(repository),
        unit_of_work: Arc::new(Mutex::new(repository.start_unit_of_work())),
    };
    handler(context.clone(), command).await?;
    let unit_of_work = context.take_unit_of_work();
    repository.commit(&unit_of_work).await
}
