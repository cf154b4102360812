//! Domain layer of the event-sourcing runtime.
//!
//! This crate provides:
//! - `Event` and the `DomainEvent` trait for an application's event kinds
//! - the `Entity` trait for versioned, event-sourced entities
//! - `UnitOfWork`, collecting what one command changed
//! - `DomainRepository`, committing units of work and restoring entities
//! - `DomainEventBus`, the ordered broadcast hub
//! - `CommandBus`, the serialized command queue

pub mod bus;
pub mod command;
pub mod entity;
pub mod error;
pub mod event;
pub mod repository;
pub mod unit_of_work;

#[cfg(test)]
mod test_support;

pub use bus::{
    BusConfig, BusMessage, DomainEventBus, EventSubscriber, ReplayFinished, SubscriberHandle,
};
pub use command::{Command, CommandBus, HandlerContext, RunningCommand};
pub use common::EntityUid;
pub use entity::{Entity, EntityCore};
pub use error::{BoxError, DomainError, EntityError, Result, ValidationError};
pub use event::{DomainEvent, Event};
pub use event_store::Version;
pub use repository::{DomainRepository, ReplayOptions, ReplayProgress, ReplaySummary};
pub use unit_of_work::{EntityRef, UnitOfWork};
