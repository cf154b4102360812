//! Sagas for the event-sourcing runtime.
//!
//! A saga kind declares which event starts an instance. The router connected
//! to the domain event bus creates instances, delivers every following event
//! to them in bus order and drops them once they terminate. Sagas usually
//! react by dispatching commands.

pub mod router;
pub mod saga;

pub use router::{SagaBusExt, SagaRouter, SagaRouting};
pub use saga::{Saga, SagaContext, Terminator};
