//! Event store contract against the in-memory store.

mod support;

use event_store::InMemoryEventStore;

async fn started_store() -> InMemoryEventStore {
    InMemoryEventStore::started().await.unwrap()
}

#[tokio::test]
async fn can_handle_an_empty_stream() {
    support::can_handle_an_empty_stream(&started_store().await).await;
}

#[tokio::test]
async fn reads_entity_events_in_the_order_they_were_written() {
    support::reads_entity_events_in_the_order_they_were_written(&started_store().await).await;
}

#[tokio::test]
async fn reads_all_events_in_order() {
    support::reads_all_events_in_order(&started_store().await).await;
}

#[tokio::test]
async fn keeps_payload_and_timestamp() {
    support::keeps_payload_and_timestamp(&started_store().await).await;
}

#[tokio::test]
async fn rolls_back_all_events_when_a_later_write_fails() {
    support::rolls_back_all_events_when_a_later_write_fails(&started_store().await).await;
}

#[tokio::test]
async fn tells_how_many_events_are_stored() {
    support::tells_how_many_events_are_stored(&started_store().await).await;
}

#[tokio::test]
async fn drops_all_events() {
    support::drops_all_events(&started_store().await).await;
}
