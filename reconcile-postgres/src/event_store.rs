use chrono::{DateTime, Utc};
use reconcile_types::{
    BatchSize, Channel, Event, EventId, EventStore, EventStoreError, EventType, LockCategory,
    LockFactory, NewEvent, Operation, ResourceId, Source, SourceId,
};
use sqlx::{postgres::PgRow, query, Pool, Postgres, Row};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::{connect_pool, PostgresConfig, PostgresError, PostgresLockFactory};

const EVENT_COLUMNS: &str =
    "id, created_at, updated_at, deleted_at, source, source_id, event_type, reconciled_at";

/// Raw `events` row before validation.
struct EventRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    source: String,
    source_id: String,
    event_type: String,
    reconciled_at: Option<DateTime<Utc>>,
}

impl TryFrom<PgRow> for EventRow {
    type Error = sqlx::Error;

    fn try_from(row: PgRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
            source: row.try_get("source")?,
            source_id: row.try_get("source_id")?,
            event_type: row.try_get("event_type")?,
            reconciled_at: row.try_get("reconciled_at")?,
        })
    }
}

impl EventRow {
    fn into_event(self) -> Result<Event, EventStoreError> {
        let malformed = |detail: String| {
            error!(
                event_id = %self.id,
                detail = %detail,
                "[postgres.malformed_row] stored event failed validation"
            );
            EventStoreError::MalformedRow { detail }
        };
        let source = Source::try_new(self.source.clone())
            .map_err(|error| malformed(format!("source: {error}")))?;
        let source_id = SourceId::try_new(self.source_id.clone())
            .map_err(|error| malformed(format!("source_id: {error}")))?;
        let event_type = self
            .event_type
            .parse::<EventType>()
            .map_err(|error| malformed(error.to_string()))?;

        Ok(Event {
            id: EventId::new(self.id),
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
            source,
            source_id,
            event_type,
            reconciled_at: self.reconciled_at,
        })
    }
}

fn decode(row: PgRow, operation: Operation) -> Result<Event, EventStoreError> {
    EventRow::try_from(row)
        .map_err(|error| map_sqlx_error(error, operation))?
        .into_event()
}

fn decode_all(rows: Vec<PgRow>, operation: Operation) -> Result<Vec<Event>, EventStoreError> {
    rows.into_iter().map(|row| decode(row, operation)).collect()
}

/// Event store over the `events` table.
///
/// Every `create` is followed by `pg_notify(<channel>, <id>)` so that
/// listeners on the channel learn about the new row.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Pool<Postgres>,
    channel: Channel,
}

impl PostgresEventStore {
    /// Connect a fresh pool with default configuration.
    pub async fn new<S: Into<String>>(connection_string: S) -> Result<Self, PostgresError> {
        Self::with_config(connection_string, PostgresConfig::default()).await
    }

    /// Connect to `connection_string` with `config` and use the events channel.
    pub async fn with_config<S: Into<String>>(
        connection_string: S,
        config: PostgresConfig,
    ) -> Result<Self, PostgresError> {
        let connection_string = connection_string.into();
        let pool = connect_pool(&connection_string, &config).await?;
        Ok(Self::from_pool(pool))
    }

    /// Create a store from an existing pool, notifying on the `events` channel.
    ///
    /// Use this to share one pool between the store, the lock factory and
    /// the listener.
    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            channel: Channel::events(),
        }
    }

    /// Publish notifications on `channel` instead of `events`.
    #[must_use]
    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    /// The pool this store runs on.
    pub const fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// The channel new event ids are published on.
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Round-trip the database.
    pub async fn ping(&self) -> Result<(), PostgresError> {
        let _ = query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Apply pending migrations.
    ///
    /// Runs under a blocking migrations lock so that processes starting
    /// together apply them one at a time.
    #[instrument(name = "postgres.migrate", skip(self))]
    pub async fn migrate(&self) -> Result<(), PostgresError> {
        let locks = PostgresLockFactory::new(self.pool.clone());
        let schema = ResourceId::new("schema".to_string());
        locks
            .with_lock(&schema, LockCategory::Migrations, |_owner| async {
                sqlx::migrate!("./migrations")
                    .run(&self.pool)
                    .await
                    .map_err(PostgresError::Migration)
            })
            .await?;
        info!("[postgres.migrate] schema is up to date");
        Ok(())
    }

    async fn notify(&self, id: EventId) -> Result<(), EventStoreError> {
        query("SELECT pg_notify($1, $2)")
            .bind(self.channel.as_ref())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|error| {
                error!(
                    error = %error,
                    event_id = %id,
                    channel = %self.channel,
                    "[postgres.notify_failed] event stored but not announced"
                );
                EventStoreError::NotifyFailed { id }
            })?;
        debug!(event_id = %id, channel = %self.channel, "[postgres.notify] event announced");
        Ok(())
    }
}

impl EventStore for PostgresEventStore {
    #[instrument(name = "postgres.create", skip(self))]
    async fn create(&self, event: NewEvent) -> Result<Event, EventStoreError> {
        let event = Event::from_new(event);
        let sql = format!(
            "INSERT INTO events ({EVENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {EVENT_COLUMNS}"
        );
        let row = query(&sql)
            .bind(Uuid::from(event.id))
            .bind(event.created_at)
            .bind(event.updated_at)
            .bind(event.deleted_at)
            .bind(event.source.as_ref())
            .bind(event.source_id.as_ref())
            .bind(event.event_type.as_str())
            .bind(event.reconciled_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Create))?;
        let stored = decode(row, Operation::Create)?;

        self.notify(stored.id).await?;
        Ok(stored)
    }

    #[instrument(name = "postgres.get", skip(self))]
    async fn get(&self, id: EventId) -> Result<Event, EventStoreError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 AND deleted_at IS NULL");
        let row = query(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Get))?
            .ok_or(EventStoreError::NotFound { id })?;
        decode(row, Operation::Get)
    }

    #[instrument(name = "postgres.replace", skip(self, event), fields(event_id = %event.id))]
    async fn replace(&self, event: Event) -> Result<Event, EventStoreError> {
        let id = event.id;
        // COALESCE keeps a stamp written by another worker.
        let sql = format!(
            "UPDATE events SET updated_at = $2, deleted_at = $3, source = $4, source_id = $5, \
             event_type = $6, reconciled_at = COALESCE(reconciled_at, $7) \
             WHERE id = $1 RETURNING {EVENT_COLUMNS}"
        );
        let row = query(&sql)
            .bind(Uuid::from(id))
            .bind(event.updated_at)
            .bind(event.deleted_at)
            .bind(event.source.as_ref())
            .bind(event.source_id.as_ref())
            .bind(event.event_type.as_str())
            .bind(event.reconciled_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Replace))?
            .ok_or(EventStoreError::NotFound { id })?;
        decode(row, Operation::Replace)
    }

    #[instrument(name = "postgres.delete", skip(self))]
    async fn delete(&self, id: EventId) -> Result<(), EventStoreError> {
        let result = query("DELETE FROM events WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Delete))?;
        if result.rows_affected() == 0 {
            return Err(EventStoreError::NotFound { id });
        }
        Ok(())
    }

    #[instrument(name = "postgres.find_by_ids", skip(self, ids), fields(count = ids.len()))]
    async fn find_by_ids(&self, ids: &[EventId]) -> Result<Vec<Event>, EventStoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = ids.iter().copied().map(Uuid::from).collect();
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE id = ANY($1) AND deleted_at IS NULL ORDER BY id"
        );
        let rows = query(&sql)
            .bind(&ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::FindByIds))?;
        decode_all(rows, Operation::FindByIds)
    }

    #[instrument(name = "postgres.all", skip(self))]
    async fn all(&self) -> Result<Vec<Event>, EventStoreError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE deleted_at IS NULL ORDER BY id");
        let rows = query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::All))?;
        decode_all(rows, Operation::All)
    }

    #[instrument(name = "postgres.find_unreconciled", skip(self))]
    async fn find_unreconciled(
        &self,
        created_before: DateTime<Utc>,
        after: Option<EventId>,
        limit: BatchSize,
    ) -> Result<Vec<Event>, EventStoreError> {
        let limit = i64::try_from(usize::from(limit)).unwrap_or(i64::MAX);
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE reconciled_at IS NULL AND deleted_at IS NULL AND created_at < $1 \
             AND ($2::uuid IS NULL OR id > $2) \
             ORDER BY id LIMIT $3"
        );
        let rows = query(&sql)
            .bind(created_before)
            .bind(after.map(Uuid::from))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::FindUnreconciled))?;
        decode_all(rows, Operation::FindUnreconciled)
    }
}

fn map_sqlx_error(error: sqlx::Error, operation: Operation) -> EventStoreError {
    if let sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) = &error {
        error!(
            error = %error,
            operation = %operation,
            "[postgres.malformed_row] stored event could not be decoded"
        );
        return EventStoreError::MalformedRow {
            detail: error.to_string(),
        };
    }

    error!(
        error = %error,
        operation = %operation,
        "[postgres.database_error] database operation failed"
    );
    EventStoreError::StoreFailure { operation }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_event_type_in_a_row_is_malformed() {
        // Given: a row whose event type is not one we write
        let row = EventRow {
            id: Uuid::now_v7(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
            source: "Dinosaurs".to_string(),
            source_id: "rex".to_string(),
            event_type: "Upsert".to_string(),
            reconciled_at: None,
        };

        // When / Then: decoding reports a malformed row
        assert!(matches!(
            row.into_event(),
            Err(EventStoreError::MalformedRow { .. })
        ));
    }

    #[test]
    fn blank_source_in_a_row_is_malformed() {
        let row = EventRow {
            id: Uuid::now_v7(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
            source: "  ".to_string(),
            source_id: "rex".to_string(),
            event_type: "Create".to_string(),
            reconciled_at: None,
        };

        assert!(matches!(
            row.into_event(),
            Err(EventStoreError::MalformedRow { .. })
        ));
    }

    #[test]
    fn pool_errors_map_to_store_failure_for_the_operation() {
        assert_eq!(
            map_sqlx_error(sqlx::Error::PoolTimedOut, Operation::Get),
            EventStoreError::StoreFailure {
                operation: Operation::Get
            }
        );
    }
}
