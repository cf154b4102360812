pub mod config;
pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::EntityUid;
pub use config::PgConfig;
pub use error::{EventStoreError, Result};
pub use event::{StoredEvent, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{EventStore, EventStoreExt, EventStream, WriteEventsStream};
