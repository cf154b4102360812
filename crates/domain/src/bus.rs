//! Ordered broadcast of committed and replayed events.
//!
//! The bus is a single input point: messages are published one at a time and
//! every connected subscriber sees them in that order. Each subscriber runs
//! in its own task behind a bounded channel, so a slow or failing subscriber
//! cannot stall or break its siblings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::BoxError;
use crate::event::{DomainEvent, Event};

/// Terminal marker published after the last event of a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayFinished {
    /// Number of events delivered by the replay.
    pub replayed: u64,
}

/// What flows through the bus.
#[derive(Debug, Clone)]
pub enum BusMessage<E> {
    Event(Arc<Event<E>>),
    ReplayFinished(ReplayFinished),
}

impl<E: DomainEvent> BusMessage<E> {
    pub fn as_event(&self) -> Option<&Event<E>> {
        match self {
            BusMessage::Event(event) => Some(event),
            BusMessage::ReplayFinished(_) => None,
        }
    }
}

/// A consumer connected to the bus.
///
/// Messages are delivered one at a time, in bus order. Returning an error
/// disconnects the subscriber; siblings are not affected.
#[async_trait]
pub trait EventSubscriber<E: DomainEvent>: Send + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn receive(&mut self, message: &BusMessage<E>) -> Result<(), BoxError>;
}

/// Bus settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Messages buffered per subscriber before the publisher waits for it.
    pub subscriber_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 64,
        }
    }
}

impl BusConfig {
    /// Reads `BUS_SUBSCRIBER_CAPACITY`, falling back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            subscriber_capacity: lookup("BUS_SUBSCRIBER_CAPACITY")
                .and_then(|n| n.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.subscriber_capacity),
        }
    }
}

enum Envelope<E> {
    Message(BusMessage<E>),
    Flush(oneshot::Sender<()>),
}

struct Branch<E> {
    id: u64,
    name: String,
    sender: mpsc::Sender<Envelope<E>>,
}

impl<E> Clone for Branch<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            sender: self.sender.clone(),
        }
    }
}

struct Inner<E> {
    config: BusConfig,
    branches: std::sync::Mutex<Vec<Branch<E>>>,
    input: Mutex<()>,
    next_id: AtomicU64,
}

impl<E> Inner<E> {
    fn branches(&self) -> Vec<Branch<E>> {
        self.branches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remove(&self, id: u64) {
        self.branches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|branch| branch.id != id);
    }
}

/// Handle to a connected subscriber task.
#[derive(Debug)]
pub struct SubscriberHandle {
    id: u64,
    name: String,
    task: JoinHandle<()>,
}

impl SubscriberHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits until the subscriber has stopped, after a failure or once the
    /// bus is closed and every buffered message is handled.
    pub async fn finished(self) {
        if let Err(err) = self.task.await {
            error!(subscriber = %self.name, error = %err, "Subscriber task panicked");
        }
    }
}

/// Broadcast hub for domain events.
pub struct DomainEventBus<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for DomainEventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: DomainEvent> Default for DomainEventBus<E> {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl<E: DomainEvent> DomainEventBus<E> {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                branches: std::sync::Mutex::new(Vec::new()),
                input: Mutex::new(()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Connects a subscriber. It receives every message published from now on.
    pub fn connect<S>(&self, mut subscriber: S) -> SubscriberHandle
    where
        S: EventSubscriber<E>,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let name = subscriber.name().to_string();
        let (sender, mut receiver) = mpsc::channel(self.inner.config.subscriber_capacity);

        self.inner
            .branches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Branch {
                id,
                name: name.clone(),
                sender,
            });

        let bus: Weak<Inner<E>> = Arc::downgrade(&self.inner);
        let task_name = name.clone();
        let task = tokio::spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                match envelope {
                    Envelope::Message(message) => {
                        if let Err(err) = subscriber.receive(&message).await {
                            error!(subscriber = %task_name, error = %err, "Subscriber failed, disconnecting it");
                            break;
                        }
                    }
                    Envelope::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
            if let Some(bus) = bus.upgrade() {
                bus.remove(id);
            }
            debug!(subscriber = %task_name, "Subscriber disconnected");
        });

        debug!(subscriber = %name, "Subscriber connected");
        SubscriberHandle { id, name, task }
    }

    /// Broadcasts one event to every connected subscriber.
    pub async fn publish(&self, event: Event<E>) {
        self.publish_message(BusMessage::Event(Arc::new(event)))
            .await
    }

    /// Broadcasts the replay terminal marker.
    pub async fn publish_replay_finished(&self, marker: ReplayFinished) {
        self.publish_message(BusMessage::ReplayFinished(marker))
            .await
    }

    async fn publish_message(&self, message: BusMessage<E>) {
        let _input = self.inner.input.lock().await;

        if let BusMessage::Event(event) = &message {
            debug!(
                entity_uid = %event.entity_uid(),
                event_type = event.event_type(),
                replay = event.is_being_replayed(),
                "Broadcasting event"
            );
        }

        let mut blocked = Vec::new();
        for branch in self.inner.branches() {
            match branch
                .sender
                .try_send(Envelope::Message(message.clone()))
            {
                Ok(()) => {}
                Err(TrySendError::Full(envelope)) => blocked.push((branch, envelope)),
                Err(TrySendError::Closed(_)) => self.inner.remove(branch.id),
            }
        }

        for (branch, envelope) in blocked {
            debug!(subscriber = %branch.name, "Waiting for a slow subscriber");
            if branch.sender.send(envelope).await.is_err() {
                warn!(subscriber = %branch.name, "Subscriber went away while waiting");
                self.inner.remove(branch.id);
            }
        }
    }

    /// Resolves once every live subscriber has handled every message
    /// published before this call.
    pub async fn flush(&self) {
        let mut acks = Vec::new();
        {
            let _input = self.inner.input.lock().await;
            for branch in self.inner.branches() {
                let (ack, done) = oneshot::channel();
                if branch.sender.send(Envelope::Flush(ack)).await.is_ok() {
                    acks.push(done);
                }
            }
        }
        for done in acks {
            // A subscriber that fails before acknowledging has nothing left to drain.
            let _ = done.await;
        }
    }

    /// Disconnects every subscriber. They finish the messages already
    /// buffered and then stop.
    pub fn close(&self) {
        self.inner
            .branches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .branches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
