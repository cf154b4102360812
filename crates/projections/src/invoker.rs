//! Sequential delivery of bus messages to a list of targets, with replay
//! timings.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use domain::{BoxError, BusMessage, DomainEvent, Event, EventSubscriber, ReplayFinished};
use tracing::{error, info};

use crate::error::{ProjectionError, Result};
use crate::target::EventTarget;

/// Time one target spent on replayed events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTiming {
    pub target: String,
    pub duration: Duration,
}

/// Summary produced when a replay finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    /// Name of the invoker that handled the replay.
    pub invoker: String,
    /// Number of replayed events, as announced by the replay marker.
    pub replayed: u64,
    /// Sum of the per-target durations.
    pub total: Duration,
    pub targets: Vec<TargetTiming>,
}

/// Callback receiving replay reports.
pub type ReportCallback = Arc<dyn Fn(&ReplayReport) + Send + Sync>;

/// Invokes each target in turn for every event and awaits it before moving
/// on to the next target and the next event.
///
/// With `raise_errors` the first target failure stops delivery of that event
/// and is returned; otherwise failures are logged and the remaining targets
/// still run.
pub struct SerialInvoker<E> {
    name: String,
    targets: Vec<Box<dyn EventTarget<E>>>,
    raise_errors: bool,
    timings: Vec<Duration>,
    on_report: Option<ReportCallback>,
}

impl<E> fmt::Debug for SerialInvoker<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialInvoker")
            .field("name", &self.name)
            .field("targets", &self.targets.len())
            .field("raise_errors", &self.raise_errors)
            .finish()
    }
}

impl<E: DomainEvent> SerialInvoker<E> {
    pub fn new(name: impl Into<String>, targets: Vec<Box<dyn EventTarget<E>>>) -> Self {
        let timings = vec![Duration::ZERO; targets.len()];
        Self {
            name: name.into(),
            targets,
            raise_errors: false,
            timings,
            on_report: None,
        }
    }

    pub fn raise_errors(mut self, raise_errors: bool) -> Self {
        self.raise_errors = raise_errors;
        self
    }

    /// Registers a callback invoked with every replay report.
    pub fn on_report(mut self, callback: ReportCallback) -> Self {
        self.on_report = Some(callback);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delivers one bus message.
    pub async fn invoke(&mut self, message: &BusMessage<E>) -> Result<()> {
        match message {
            BusMessage::Event(event) => self.invoke_event(event).await,
            BusMessage::ReplayFinished(marker) => {
                self.finish_replay(*marker);
                Ok(())
            }
        }
    }

    async fn invoke_event(&mut self, event: &Event<E>) -> Result<()> {
        let replaying = event.is_being_replayed();

        for (target, spent) in self.targets.iter_mut().zip(self.timings.iter_mut()) {
            let started = Instant::now();
            let outcome = target.on_event(event).await;
            if replaying {
                *spent += started.elapsed();
            }

            if let Err(source) = outcome {
                if self.raise_errors {
                    return Err(ProjectionError::Target {
                        target: target.name().to_string(),
                        event_type: event.event_type(),
                        entity_uid: event.entity_uid().to_string(),
                        source,
                    });
                }
                error!(
                    target_name = target.name(),
                    event_type = event.event_type(),
                    entity_uid = %event.entity_uid(),
                    version = %event.entity_version(),
                    error = %source,
                    "Error handling event"
                );
            }
        }
        Ok(())
    }

    fn finish_replay(&mut self, marker: ReplayFinished) {
        let targets: Vec<TargetTiming> = self
            .targets
            .iter()
            .zip(self.timings.iter())
            .map(|(target, duration)| TargetTiming {
                target: target.name().to_string(),
                duration: *duration,
            })
            .collect();
        let report = ReplayReport {
            invoker: self.name.clone(),
            replayed: marker.replayed,
            total: targets.iter().map(|t| t.duration).sum(),
            targets,
        };

        info!(
            invoker = %report.invoker,
            replayed = report.replayed,
            total = ?report.total,
            "Replay finished"
        );
        for timing in &report.targets {
            info!(invoker = %report.invoker, target_name = %timing.target, duration = ?timing.duration, "Replay target duration");
            metrics::histogram!("replay_target_duration_seconds", "target" => timing.target.clone())
                .record(timing.duration.as_secs_f64());
        }
        if let Some(callback) = &self.on_report {
            callback(&report);
        }

        self.timings.iter_mut().for_each(|d| *d = Duration::ZERO);
    }
}

#[async_trait]
impl<E: DomainEvent> EventSubscriber<E> for SerialInvoker<E> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&mut self, message: &BusMessage<E>) -> std::result::Result<(), BoxError> {
        self.invoke(message).await.map_err(BoxError::from)
    }
}
