//! Collects the entities touched while handling one command.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use common::EntityUid;
use tokio::sync::Mutex;

use crate::entity::Entity;
use crate::error::{DomainError, Result};
use crate::event::{DomainEvent, Event};

/// Shared, lockable handle to an entity registered in a unit of work.
pub type EntityRef<T> = Arc<Mutex<T>>;

/// Kind-erased view of a registered entity.
pub(crate) trait EntityRecord<E>: Send {
    fn uid(&self) -> &EntityUid;

    fn pending_events(&self) -> &[Event<E>];

    fn clear_pending_events(&mut self);

    /// Clean copy (no pending events) suitable for the identity cache.
    fn snapshot(&self) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Entity> EntityRecord<T::Event> for T {
    fn uid(&self) -> &EntityUid {
        Entity::uid(self)
    }

    fn pending_events(&self) -> &[Event<T::Event>] {
        Entity::pending_events(self)
    }

    fn clear_pending_events(&mut self) {
        Entity::clear_pending_events(self)
    }

    fn snapshot(&self) -> Arc<dyn Any + Send + Sync> {
        let mut copy = self.clone();
        Entity::clear_pending_events(&mut copy);
        Arc::new(copy)
    }
}

type SharedRecord<E> = Arc<Mutex<dyn EntityRecord<E>>>;

/// The set of entities, and their pending events, produced by one command.
pub struct UnitOfWork<E> {
    records: Vec<SharedRecord<E>>,
    handles: HashMap<EntityUid, Arc<dyn Any + Send + Sync>>,
}

impl<E: DomainEvent> UnitOfWork<E> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            handles: HashMap::new(),
        }
    }

    /// Registers an entity and returns the handle to mutate it through.
    ///
    /// An entity is registered once per uid: registering the same uid again
    /// returns the handle of the first registration.
    pub fn add<T>(&mut self, entity: T) -> Result<EntityRef<T>>
    where
        T: Entity<Event = E>,
    {
        let uid = Entity::uid(&entity).clone();
        if let Some(existing) = self.get::<T>(&uid)? {
            return Ok(existing);
        }

        let handle: EntityRef<T> = Arc::new(Mutex::new(entity));
        let record: SharedRecord<E> = handle.clone();
        self.records.push(record);
        self.handles.insert(uid, Arc::new(handle.clone()));
        Ok(handle)
    }

    /// Returns the handle of an already registered entity.
    pub fn get<T>(&self, uid: &EntityUid) -> Result<Option<EntityRef<T>>>
    where
        T: Entity<Event = E>,
    {
        match self.handles.get(uid) {
            None => Ok(None),
            Some(handle) => handle
                .downcast_ref::<EntityRef<T>>()
                .cloned()
                .map(Some)
                .ok_or_else(|| DomainError::EntityKindMismatch {
                    entity_uid: uid.clone(),
                    expected: T::entity_type(),
                }),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns every pending event of every registered entity, ordered by
    /// creation (sequence number) across entities.
    pub async fn all_events(&self) -> Vec<Event<E>> {
        let mut events = Vec::new();
        for record in &self.records {
            events.extend(record.lock().await.pending_events().iter().cloned());
        }
        events.sort_by_key(Event::sequence_number);
        events
    }

    /// Clears pending events and returns a clean snapshot of every entity.
    pub(crate) async fn settle(&self) -> Vec<(EntityUid, Arc<dyn Any + Send + Sync>)> {
        let mut snapshots = Vec::with_capacity(self.records.len());
        for record in &self.records {
            let mut record = record.lock().await;
            record.clear_pending_events();
            snapshots.push((record.uid().clone(), record.snapshot()));
        }
        snapshots
    }
}

impl<E: DomainEvent> Default for UnitOfWork<E> {
    fn default() -> Self {
        Self::new()
    }
}
