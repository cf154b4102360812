use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::RwLock;

use crate::{
    EntityUid, EventStoreError, Result, StoredEvent,
    store::{EventStore, EventStream, Lifecycle, WriteEventsStream, validate_event_for_write},
};

/// In-memory event store implementation for testing.
///
/// This implementation stores all events in memory and provides
/// the same interface as the PostgreSQL implementation.
#[derive(Clone)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<Vec<StoredEvent>>>,
    lifecycle: Lifecycle,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self {
            events: Arc::default(),
            lifecycle: Lifecycle::new("InMemoryEventStore"),
        }
    }
}

impl InMemoryEventStore {
    /// Creates a new, stopped, empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and starts a new in-memory event store.
    pub async fn started() -> Result<Self> {
        let store = Self::new();
        store.start().await?;
        Ok(store)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn start(&self) -> Result<()> {
        self.lifecycle.start()?;
        tracing::debug!("in-memory event store started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.lifecycle.stop()?;
        self.events.write().await.clear();
        tracing::debug!("in-memory event store stopped");
        Ok(())
    }

    async fn drop_all_events(&self) -> Result<()> {
        self.lifecycle.assert_started()?;
        self.events.write().await.clear();
        Ok(())
    }

    async fn open_write_events_stream(&self) -> Result<Box<dyn WriteEventsStream>> {
        self.lifecycle.assert_started()?;
        Ok(Box::new(MemoryWriteEventsStream {
            events: Arc::clone(&self.events),
            staged: Vec::new(),
            failed: false,
        }))
    }

    async fn find_events_by_entity_uid(&self, entity_uid: &EntityUid) -> Result<EventStream> {
        self.lifecycle.assert_started()?;
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| &e.entity_uid == entity_uid)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.entity_version);
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        self.lifecycle.assert_started()?;
        let events = self.events.read().await.clone();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn count_all_events(&self) -> Result<u64> {
        self.lifecycle.assert_started()?;
        Ok(self.events.read().await.len() as u64)
    }
}

/// Staging buffer committed to the shared event list on `finish`.
struct MemoryWriteEventsStream {
    events: Arc<RwLock<Vec<StoredEvent>>>,
    staged: Vec<StoredEvent>,
    failed: bool,
}

#[async_trait]
impl WriteEventsStream for MemoryWriteEventsStream {
    async fn write(&mut self, event: StoredEvent) -> Result<()> {
        if self.failed {
            return Err(EventStoreError::StreamClosed);
        }
        tracing::trace!(entity_uid = %event.entity_uid, event_type = %event.event_type, "write");
        if let Err(err) = validate_event_for_write(&event) {
            self.failed = true;
            self.staged.clear();
            return Err(err);
        }
        self.staged.push(event);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        if self.failed {
            return Err(EventStoreError::StreamClosed);
        }
        metrics::counter!("events_appended_total", "backend" => "memory")
            .increment(self.staged.len() as u64);
        let mut store = self.events.write().await;
        let base = store.len() as i64;
        store.extend(
            self.staged
                .into_iter()
                .enumerate()
                .map(|(offset, event)| event.sequenced(base + offset as i64 + 1)),
        );
        Ok(())
    }
}
