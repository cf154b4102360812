use std::sync::Arc;

use async_trait::async_trait;
use common::EntityUid;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{BoxError, BusMessage, DomainEvent, Event, ReplayFinished, Version};
use projections::{EventTarget, SerialInvoker};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
enum BenchEvent {
    Counted { amount: u64 },
}

impl DomainEvent for BenchEvent {
    fn event_type(&self) -> &'static str {
        "Counted"
    }
}

struct Sum(u64);

#[async_trait]
impl EventTarget<BenchEvent> for Sum {
    fn name(&self) -> &str {
        "sum"
    }

    async fn on_event(&mut self, event: &Event<BenchEvent>) -> Result<(), BoxError> {
        let BenchEvent::Counted { amount } = event.payload();
        self.0 += amount;
        Ok(())
    }
}

fn replayed_messages(n: u64) -> Vec<BusMessage<BenchEvent>> {
    let uid = EntityUid::new();
    let mut messages: Vec<_> = (1..=n)
        .map(|i| {
            let event = Event::new(uid.clone(), Version::new(i as i64), BenchEvent::Counted { amount: i });
            BusMessage::Event(Arc::new(event.replayed()))
        })
        .collect();
    messages.push(BusMessage::ReplayFinished(ReplayFinished { replayed: n }));
    messages
}

fn bench_replay_through_invoker(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let messages = replayed_messages(1000);

    c.bench_function("invoker/replay_1000_events_3_targets", |b| {
        b.iter(|| {
            rt.block_on(async {
                let targets: Vec<Box<dyn EventTarget<BenchEvent>>> =
                    vec![Box::new(Sum(0)), Box::new(Sum(0)), Box::new(Sum(0))];
                let mut invoker = SerialInvoker::new("bench", targets);
                for message in &messages {
                    invoker.invoke(message).await.unwrap();
                }
            });
        });
    });
}

criterion_group!(benches, bench_replay_through_invoker);
criterion_main!(benches);
