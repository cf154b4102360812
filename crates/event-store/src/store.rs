use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_core::Stream;

use crate::{EntityUid, EventStoreError, Result, StoredEvent};

/// A stream of stored events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StoredEvent>> + Send>>;

/// Transactional append sink returned by [`EventStore::open_write_events_stream`].
///
/// Every write is validated and staged. Staged events only become readable when
/// [`finish`](WriteEventsStream::finish) succeeds; a failed write, or dropping
/// the stream without finishing it, discards the whole batch.
#[async_trait]
pub trait WriteEventsStream: Send {
    /// Validates and stages one event.
    async fn write(&mut self, event: StoredEvent) -> Result<()>;

    /// Makes every staged event visible at once.
    async fn finish(self: Box<Self>) -> Result<()>;
}

/// Core trait for event store implementations.
///
/// The contract is shared by the in-memory and PostgreSQL stores: they must be
/// interchangeable for everything above this crate.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Starts the store. Fails if it is already started.
    async fn start(&self) -> Result<()>;

    /// Stops the store. Fails if it is not started.
    async fn stop(&self) -> Result<()>;

    /// Erases every stored event without touching the schema.
    async fn drop_all_events(&self) -> Result<()>;

    /// Opens a transactional append sink.
    async fn open_write_events_stream(&self) -> Result<Box<dyn WriteEventsStream>>;

    /// Streams all events of one entity in ascending version order.
    async fn find_events_by_entity_uid(&self, entity_uid: &EntityUid) -> Result<EventStream>;

    /// Streams every stored event in storage order.
    async fn stream_all_events(&self) -> Result<EventStream>;

    /// Returns the number of stored events.
    async fn count_all_events(&self) -> Result<u64>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a batch of events atomically.
    async fn append_events(&self, events: Vec<StoredEvent>) -> Result<()> {
        let mut stream = self.open_write_events_stream().await?;
        for event in events {
            stream.write(event).await?;
        }
        stream.finish().await
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Validates an event before it is staged for writing.
pub fn validate_event_for_write(event: &StoredEvent) -> Result<()> {
    if event.entity_uid.as_str().is_empty() {
        return Err(EventStoreError::InvalidEvent("Missing entityUid".to_string()));
    }
    if !event.entity_uid.is_uuid_shaped() {
        return Err(EventStoreError::InvalidEvent(format!(
            "Not a uid: {}",
            event.entity_uid
        )));
    }
    if event.entity_version.as_i64() < 1 {
        return Err(EventStoreError::InvalidEvent(format!(
            "Invalid entityVersion {} for entityUid {}",
            event.entity_version, event.entity_uid
        )));
    }
    Ok(())
}

/// Started/stopped bookkeeping shared by the store implementations.
#[derive(Debug, Clone)]
pub(crate) struct Lifecycle {
    store: &'static str,
    started: Arc<AtomicBool>,
}

impl Lifecycle {
    pub(crate) fn new(store: &'static str) -> Self {
        Self {
            store,
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn start(&self) -> Result<()> {
        self.started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| EventStoreError::AlreadyStarted { store: self.store })
    }

    pub(crate) fn stop(&self) -> Result<()> {
        self.started
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| EventStoreError::NotStarted { store: self.store })
    }

    pub(crate) fn assert_started(&self) -> Result<()> {
        if self.started.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EventStoreError::NotStarted { store: self.store })
        }
    }
}
