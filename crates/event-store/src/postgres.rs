use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{TryStreamExt, stream};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::{
    EntityUid, EventStoreError, Result, StoredEvent, Version,
    store::{EventStore, EventStream, Lifecycle, WriteEventsStream, validate_event_for_write},
};

/// Rows fetched per round trip when streaming.
const PAGE_SIZE: i64 = 500;

/// PostgreSQL-backed event store implementation.
///
/// The pool is created once by the process (see [`crate::PgConfig`]) and handed
/// in; the store never opens connections of its own accord.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    lifecycle: Lifecycle,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lifecycle: Lifecycle::new("PostgresEventStore"),
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<StoredEvent> {
        let sequence_number: i64 = row.try_get("sequence_number")?;
        let entity_uid: String = row.try_get("entity_uid")?;
        let event_type: String = row.try_get("type")?;

        let decode = || -> std::result::Result<StoredEvent, sqlx::Error> {
            Ok(StoredEvent {
                sequence_number: Some(sequence_number),
                entity_uid: EntityUid::from(entity_uid.as_str()),
                entity_version: Version::new(row.try_get("entity_version")?),
                timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
                event_type: event_type.clone(),
                payload: row.try_get("data")?,
            })
        };

        decode().map_err(|source| EventStoreError::RowDecode {
            event_type: event_type.clone(),
            sequence_number,
            entity_uid: EntityUid::from(entity_uid.as_str()),
            source,
        })
    }

    /// Streams rows in keyset-paginated batches so that a full-log read never
    /// holds more than one page in memory.
    fn paged_events(&self, entity_uid: Option<EntityUid>) -> EventStream {
        let pool = self.pool.clone();
        let pages = stream::try_unfold(Some(0_i64), move |cursor| {
            let pool = pool.clone();
            let entity_uid = entity_uid.clone();
            async move {
                let Some(after) = cursor else {
                    return Ok::<_, EventStoreError>(None);
                };
                let rows = match entity_uid {
                    Some(uid) => {
                        sqlx::query(
                            r#"
                            SELECT sequence_number, entity_uid, entity_version, timestamp, type, data
                            FROM events
                            WHERE entity_uid = $1 AND sequence_number > $2
                            ORDER BY sequence_number ASC
                            LIMIT $3
                            "#,
                        )
                        .bind(uid.as_str())
                        .bind(after)
                        .bind(PAGE_SIZE)
                        .fetch_all(&pool)
                        .await?
                    }
                    None => {
                        sqlx::query(
                            r#"
                            SELECT sequence_number, entity_uid, entity_version, timestamp, type, data
                            FROM events
                            WHERE sequence_number > $1
                            ORDER BY sequence_number ASC
                            LIMIT $2
                            "#,
                        )
                        .bind(after)
                        .bind(PAGE_SIZE)
                        .fetch_all(&pool)
                        .await?
                    }
                };

                let events = rows
                    .into_iter()
                    .map(Self::row_to_event)
                    .collect::<Result<Vec<_>>>()?;
                let next = if (events.len() as i64) < PAGE_SIZE {
                    None
                } else {
                    events.last().and_then(|e| e.sequence_number)
                };
                Ok::<_, EventStoreError>(Some((events, next)))
            }
        });

        Box::pin(
            pages
                .map_ok(|events| stream::iter(events.into_iter().map(Ok)))
                .try_flatten(),
        )
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn start(&self) -> Result<()> {
        self.lifecycle.start()?;
        tracing::debug!("postgres event store started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.lifecycle.stop()?;
        tracing::debug!("postgres event store stopped");
        Ok(())
    }

    async fn drop_all_events(&self) -> Result<()> {
        self.lifecycle.assert_started()?;
        sqlx::query("TRUNCATE events RESTART IDENTITY")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn open_write_events_stream(&self) -> Result<Box<dyn WriteEventsStream>> {
        self.lifecycle.assert_started()?;
        Ok(Box::new(PgWriteEventsStream {
            pool: self.pool.clone(),
            tx: None,
            written: 0,
            failed: false,
        }))
    }

    async fn find_events_by_entity_uid(&self, entity_uid: &EntityUid) -> Result<EventStream> {
        self.lifecycle.assert_started()?;
        Ok(self.paged_events(Some(entity_uid.clone())))
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        self.lifecycle.assert_started()?;
        Ok(self.paged_events(None))
    }

    async fn count_all_events(&self) -> Result<u64> {
        self.lifecycle.assert_started()?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(sequence_number) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

/// One SQL transaction per write stream: `BEGIN` on the first write, `COMMIT`
/// on finish. Dropping the transaction rolls it back.
struct PgWriteEventsStream {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
    written: u64,
    failed: bool,
}

impl PgWriteEventsStream {
    async fn rollback(&mut self) {
        self.failed = true;
        if let Some(tx) = self.tx.take()
            && let Err(err) = tx.rollback().await
        {
            tracing::error!(error = %err, "ROLLBACK failed");
        }
    }

    async fn insert(&mut self, event: &StoredEvent) -> Result<()> {
        if self.tx.is_none() {
            self.tx = Some(self.pool.begin().await?);
        }
        let Some(tx) = self.tx.as_mut() else {
            return Err(EventStoreError::StreamClosed);
        };

        sqlx::query(
            r#"
            INSERT INTO events (entity_uid, entity_version, timestamp, type, data)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.entity_uid.as_str())
        .bind(event.entity_version.as_i64())
        .bind(event.timestamp)
        .bind(&event.event_type)
        .bind(&event.payload)
        .execute(&mut **tx)
        .await?;

        self.written += 1;
        Ok(())
    }
}

#[async_trait]
impl WriteEventsStream for PgWriteEventsStream {
    async fn write(&mut self, event: StoredEvent) -> Result<()> {
        if self.failed {
            return Err(EventStoreError::StreamClosed);
        }
        tracing::trace!(entity_uid = %event.entity_uid, event_type = %event.event_type, "write");

        let result = match validate_event_for_write(&event) {
            Ok(()) => self.insert(&event).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            tracing::error!(error = %err, "event write failed, rolling back");
            self.rollback().await;
            return Err(err);
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        if self.failed {
            return Err(EventStoreError::StreamClosed);
        }
        match self.tx.take() {
            Some(tx) => {
                tx.commit().await?;
                metrics::counter!("events_appended_total", "backend" => "postgres")
                    .increment(self.written);
                tracing::trace!(events = self.written, "transaction committed");
            }
            None => tracing::trace!("empty transaction, no need to commit"),
        }
        Ok(())
    }
}
