//! Projections for the event-sourcing runtime.
//!
//! This crate provides:
//! - [`EventTarget`], a named handler for domain events
//! - [`SerialInvoker`], delivering bus messages to targets one at a time and
//!   reporting how long each target spent on a replay
//! - [`Projector`] and [`ProjectorBusExt::connect_projector`] to wire read
//!   model updaters onto the domain event bus

pub mod error;
pub mod invoker;
pub mod projector;
pub mod target;

pub use error::{ProjectionError, Result};
pub use invoker::{ReplayReport, ReportCallback, SerialInvoker, TargetTiming};
pub use projector::{Projector, ProjectorBusExt};
pub use target::EventTarget;
