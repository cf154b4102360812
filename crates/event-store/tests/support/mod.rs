//! Event store contract shared by every implementation.
//!
//! Each function receives a started, empty store and asserts one clause of the
//! contract. The memory and PostgreSQL suites both run all of them.

use event_store::{
    EntityUid, EventStore, EventStoreError, EventStoreExt, StoredEvent, Version,
};
use futures_util::StreamExt;

pub fn make_test_event() -> StoredEvent {
    make_event(EntityUid::new(), 1)
}

pub fn make_event(entity_uid: EntityUid, version: i64) -> StoredEvent {
    StoredEvent::new(
        entity_uid,
        Version::new(version),
        "TestEvent",
        serde_json::json!({"payload": "value"}),
    )
}

async fn read_all(store: &dyn EventStore) -> Vec<StoredEvent> {
    store
        .stream_all_events()
        .await
        .unwrap()
        .map(|e| e.unwrap())
        .collect()
        .await
}

fn identity(events: &[StoredEvent]) -> Vec<(EntityUid, Version, String)> {
    events
        .iter()
        .map(|e| (e.entity_uid.clone(), e.entity_version, e.event_type.clone()))
        .collect()
}

pub async fn can_handle_an_empty_stream(store: &dyn EventStore) {
    let stream = store.open_write_events_stream().await.unwrap();
    stream.finish().await.unwrap();
    assert_eq!(store.count_all_events().await.unwrap(), 0);
}

pub async fn reads_entity_events_in_the_order_they_were_written(store: &dyn EventStore) {
    let entity_uid = EntityUid::new();
    let event1 = make_event(entity_uid.clone(), 1);
    let event2 = make_event(EntityUid::new(), 1);
    let event3 = make_event(entity_uid.clone(), 2);

    store
        .append_events(vec![event1.clone(), event2, event3.clone()])
        .await
        .unwrap();

    let read: Vec<StoredEvent> = store
        .find_events_by_entity_uid(&entity_uid)
        .await
        .unwrap()
        .map(|e| e.unwrap())
        .collect()
        .await;

    assert_eq!(identity(&read), identity(&[event1, event3]));
}

pub async fn reads_all_events_in_order(store: &dyn EventStore) {
    let events = vec![make_test_event(), make_test_event(), make_test_event()];
    store.append_events(events.clone()).await.unwrap();

    let read = read_all(store).await;
    assert_eq!(identity(&read), identity(&events));

    let sequence: Vec<i64> = read.iter().filter_map(|e| e.sequence_number).collect();
    assert_eq!(sequence.len(), 3);
    assert!(sequence.windows(2).all(|w| w[0] < w[1]));
}

pub async fn keeps_payload_and_timestamp(store: &dyn EventStore) {
    let event = make_test_event();
    store.append_events(vec![event.clone()]).await.unwrap();

    let read = read_all(store).await;
    assert_eq!(read[0].payload, event.payload);
    assert_eq!(
        read[0].timestamp.timestamp_millis(),
        event.timestamp.timestamp_millis()
    );
}

pub async fn rolls_back_all_events_when_a_later_write_fails(store: &dyn EventStore) {
    let result = store
        .append_events(vec![
            make_test_event(),
            make_event(EntityUid::from("this is not a valid UUID"), 1),
        ])
        .await;

    assert!(matches!(result, Err(EventStoreError::InvalidEvent(_))));
    assert!(read_all(store).await.is_empty());
    assert_eq!(store.count_all_events().await.unwrap(), 0);
}

pub async fn tells_how_many_events_are_stored(store: &dyn EventStore) {
    store
        .append_events(vec![make_test_event(), make_test_event(), make_test_event()])
        .await
        .unwrap();
    assert_eq!(store.count_all_events().await.unwrap(), 3);
}

pub async fn drops_all_events(store: &dyn EventStore) {
    store
        .append_events(vec![make_test_event(), make_test_event()])
        .await
        .unwrap();
    store.drop_all_events().await.unwrap();

    assert_eq!(store.count_all_events().await.unwrap(), 0);
    store.append_events(vec![make_test_event()]).await.unwrap();
    assert_eq!(store.count_all_events().await.unwrap(), 1);
}
