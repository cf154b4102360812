//! Per-event handlers.

use async_trait::async_trait;
use domain::{BoxError, DomainEvent, Event};

/// Something that reacts to domain events, such as a read model updater.
///
/// `on_event` receives every event; kinds the target does not care about
/// are simply ignored by returning `Ok(())`.
#[async_trait]
pub trait EventTarget<E: DomainEvent>: Send {
    /// Name used in logs and replay reports.
    fn name(&self) -> &str;

    async fn on_event(&mut self, event: &Event<E>) -> Result<(), BoxError>;
}
