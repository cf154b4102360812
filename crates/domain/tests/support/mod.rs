#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use domain::{
    BoxError, BusMessage, DomainEvent, Entity, EntityCore, EntityUid, Event, EventSubscriber,
};
use serde::{Deserialize, Serialize};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PersonEvent {
    PersonCreated { name: String },
    PersonMoved { x: i32, y: i32 },
    MessageShouted { message: String },
    PersonRenamed { name: String },
}

impl DomainEvent for PersonEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PersonEvent::PersonCreated { .. } => "PersonCreated",
            PersonEvent::PersonMoved { .. } => "PersonMoved",
            PersonEvent::MessageShouted { .. } => "MessageShouted",
            PersonEvent::PersonRenamed { .. } => "PersonRenamed",
        }
    }

    fn is_historic(&self) -> bool {
        matches!(self, PersonEvent::PersonRenamed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Person {
    core: EntityCore<PersonEvent>,
    pub name: Option<String>,
    pub location: Option<(i32, i32)>,
    pub shouted: Vec<String>,
}

impl PartialEq for Person {
    fn eq(&self, other: &Self) -> bool {
        self.uid() == other.uid()
            && self.version() == other.version()
            && self.name == other.name
            && self.location == other.location
            && self.shouted == other.shouted
    }
}

impl Entity for Person {
    type Event = PersonEvent;

    fn entity_type() -> &'static str {
        "Person"
    }

    fn new(uid: EntityUid) -> Self {
        Self {
            core: EntityCore::new(uid),
            name: None,
            location: None,
            shouted: Vec::new(),
        }
    }

    fn core(&self) -> &EntityCore<PersonEvent> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore<PersonEvent> {
        &mut self.core
    }

    fn handle(&mut self, event: &Event<PersonEvent>) {
        match event.payload() {
            PersonEvent::PersonCreated { name } | PersonEvent::PersonRenamed { name } => {
                self.name = Some(name.clone())
            }
            PersonEvent::PersonMoved { x, y } => self.location = Some((*x, *y)),
            PersonEvent::MessageShouted { message } => self.shouted.push(message.clone()),
        }
    }
}

pub type Seen = Arc<Mutex<Vec<BusMessage<PersonEvent>>>>;

/// Subscriber keeping every message it receives.
pub struct Collector {
    name: String,
    seen: Seen,
}

impl Collector {
    pub fn new(name: &str) -> (Self, Seen) {
        let seen = Seen::default();
        (
            Self {
                name: name.to_string(),
                seen: seen.clone(),
            },
            seen,
        )
    }
}

#[async_trait]
impl EventSubscriber<PersonEvent> for Collector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&mut self, message: &BusMessage<PersonEvent>) -> Result<(), BoxError> {
        self.seen.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub fn events_of(seen: &Seen) -> Vec<Event<PersonEvent>> {
    seen.lock()
        .unwrap()
        .iter()
        .filter_map(|message| message.as_event().cloned())
        .collect()
}
