//! Persistence, broadcast and rehydration of entities.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use common::EntityUid;
use event_store::{EventStore, Version};
use futures_util::TryStreamExt;
use tracing::{debug, info};

use crate::bus::{DomainEventBus, ReplayFinished};
use crate::entity::Entity;
use crate::error::{DomainError, Result};
use crate::event::{DomainEvent, Event};
use crate::unit_of_work::UnitOfWork;

/// Running counts reported while replaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayProgress {
    pub replayed: u64,
    pub total: u64,
}

/// Options for [`DomainRepository::replay_all_events`].
#[derive(Clone, Default)]
pub struct ReplayOptions {
    /// Close the bus once the replay marker has been published, letting
    /// every subscriber finish and stop.
    pub end: bool,

    /// Called after each replayed event.
    pub monitor: Option<Arc<dyn Fn(ReplayProgress) + Send + Sync>>,
}

impl fmt::Debug for ReplayOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayOptions")
            .field("end", &self.end)
            .field("monitor", &self.monitor.is_some())
            .finish()
    }
}

/// Outcome of a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub replayed: u64,
    pub duration: Duration,
}

/// Persists the events of units of work, broadcasts them and restores
/// entities from their history.
///
/// Holds an identity cache of clean entity snapshots. The cache is only
/// written after a successful commit or a complete rehydration and callers
/// always receive their own copy.
pub struct DomainRepository<E> {
    store: Arc<dyn EventStore>,
    bus: DomainEventBus<E>,
    cache: RwLock<HashMap<EntityUid, Arc<dyn Any + Send + Sync>>>,
}

impl<E: DomainEvent> DomainRepository<E> {
    pub fn new(bus: DomainEventBus<E>, store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            bus,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &DomainEventBus<E> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn start_unit_of_work(&self) -> UnitOfWork<E> {
        UnitOfWork::new()
    }

    /// Stores every pending event of the unit of work in one atomic write,
    /// then broadcasts them in creation order and caches the entities.
    ///
    /// When the store rejects the batch nothing is broadcast, nothing is
    /// cached and the entities keep their pending events.
    #[tracing::instrument(skip_all, fields(entities = unit_of_work.len()))]
    pub async fn commit(&self, unit_of_work: &UnitOfWork<E>) -> Result<()> {
        let events = unit_of_work.all_events().await;
        debug!(events = events.len(), "Commit started");

        if !events.is_empty() {
            let mut sink = self.store.open_write_events_stream().await?;
            for event in &events {
                debug!(
                    entity_uid = %event.entity_uid(),
                    event_type = event.event_type(),
                    version = %event.entity_version(),
                    "Storing event"
                );
                sink.write(event.to_stored()?).await?;
            }
            sink.finish().await?;
        }

        let committed = events.len() as u64;
        for event in events {
            self.bus.publish(event).await;
        }

        let snapshots = unit_of_work.settle().await;
        {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            cache.extend(snapshots);
        }

        metrics::counter!("events_committed_total").increment(committed);
        debug!(events = committed, "Commit finished");
        Ok(())
    }

    /// Restores an entity from its stored events.
    ///
    /// Returns a copy of the cached instance when there is one. Otherwise the
    /// entity's history is folded onto a blank instance, which is cached
    /// only if every event loads and applies.
    #[tracing::instrument(skip(self), fields(entity_type = T::entity_type()))]
    pub async fn load_entity_by_uid<T>(&self, entity_uid: &EntityUid) -> Result<T>
    where
        T: Entity<Event = E>,
    {
        if let Some(cached) = self.cached::<T>(entity_uid)? {
            return Ok(cached);
        }

        let mut entity = T::new(entity_uid.clone());
        let mut stored_events = self.store.find_events_by_entity_uid(entity_uid).await?;
        while let Some(stored) = stored_events.try_next().await? {
            let event = Event::<E>::from_stored(stored)?;
            entity.apply_stored_event(&event)?;
        }

        if entity.version() == Version::initial() {
            return Err(DomainError::NoSuchEntity(entity_uid.clone()));
        }

        debug!(version = %entity.version(), "Entity loaded from store");
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_uid.clone(), Arc::new(entity.clone()));
        Ok(entity)
    }

    fn cached<T>(&self, entity_uid: &EntityUid) -> Result<Option<T>>
    where
        T: Entity<Event = E>,
    {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        match cache.get(entity_uid) {
            None => Ok(None),
            Some(cached) => cached
                .downcast_ref::<T>()
                .cloned()
                .map(Some)
                .ok_or_else(|| DomainError::EntityKindMismatch {
                    entity_uid: entity_uid.clone(),
                    expected: T::entity_type(),
                }),
        }
    }

    /// Forgets the cached instance of an entity.
    pub fn evict(&self, entity_uid: &EntityUid) -> bool {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(entity_uid)
            .is_some()
    }

    pub fn cached_entity_count(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Broadcasts every stored event, in storage order and flagged as
    /// replayed, followed by a single [`ReplayFinished`] marker.
    ///
    /// Resolves once the store has been read to the end and every message is
    /// handed to the bus. Subscribers may still be processing; await
    /// [`DomainEventBus::flush`] to wait for them.
    #[tracing::instrument(skip_all)]
    pub async fn replay_all_events(&self, options: ReplayOptions) -> Result<ReplaySummary> {
        let started = Instant::now();
        let total = self.store.count_all_events().await?;
        info!(total, "Replaying all events");

        let mut replayed = 0u64;
        let mut stored_events = self.store.stream_all_events().await?;
        while let Some(stored) = stored_events.try_next().await? {
            let event = Event::<E>::from_stored(stored)?.replayed();
            self.bus.publish(event).await;
            replayed += 1;
            if let Some(monitor) = &options.monitor {
                monitor(ReplayProgress { replayed, total });
            }
        }

        self.bus
            .publish_replay_finished(ReplayFinished { replayed })
            .await;
        if options.end {
            self.bus.close();
        }

        metrics::counter!("events_replayed_total").increment(replayed);
        let duration = started.elapsed();
        info!(replayed, ?duration, "Replay finished");
        Ok(ReplaySummary { replayed, duration })
    }
}
