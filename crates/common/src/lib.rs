//! Shared types for the event-sourcing runtime.

pub mod eventually;
pub mod types;

pub use eventually::{RetryOptions, eventually};
pub use types::EntityUid;
