use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Instant;
use ticket_events_core::event::{Cursor, Event, EventId, EventType, Payload, TicketId};
use ticket_events_core::event_log::{EventLog, EventLogError, LogFuture};
use uuid::Uuid;

const SELECT_FROM_BEGINNING: &str = r"
    SELECT id, ticket_id, event_type, payload::text AS payload, created_at
    FROM ticket_events
    ORDER BY created_at, id
    LIMIT $1
";

// Row comparison is lexicographic and served by the (created_at, id) index
const SELECT_AFTER_CURSOR: &str = r"
    SELECT id, ticket_id, event_type, payload::text AS payload, created_at
    FROM ticket_events
    WHERE (created_at, id) > ($1, $2)
    ORDER BY created_at, id
    LIMIT $3
";

/// `PostgreSQL`-backed [`EventLog`].
///
/// Reads never lock; any number of streaming sessions share one pool.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use ticket_events_core::event_log::EventLog;
/// use ticket_events_postgres::PostgresEventLog;
///
/// # async fn example(pool: sqlx::PgPool) {
/// let log: Arc<dyn EventLog> = Arc::new(PostgresEventLog::from_pool(pool));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PostgresEventLog {
    pool: PgPool,
}

impl PostgresEventLog {
    /// Connect a new pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::DatabaseError`] if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, EventLogError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| EventLogError::DatabaseError(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::DatabaseError`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), EventLogError> {
        crate::MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| EventLogError::DatabaseError(e.to_string()))?;
        tracing::info!("Event log migrations applied");
        Ok(())
    }
}

fn decode(row: &PgRow) -> Result<Event, EventLogError> {
    let decode_error = |e: sqlx::Error| EventLogError::SerializationError(e.to_string());

    Ok(Event {
        id: EventId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode_error)?),
        ticket_id: TicketId::new(row.try_get::<String, _>("ticket_id").map_err(decode_error)?),
        event_type: EventType::from(row.try_get::<String, _>("event_type").map_err(decode_error)?),
        payload: Payload::new(row.try_get::<String, _>("payload").map_err(decode_error)?),
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn decode_cursor(row: &PgRow) -> Result<Cursor, EventLogError> {
    let decode_error = |e: sqlx::Error| EventLogError::SerializationError(e.to_string());
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode_error)?;
    let id: Uuid = row.try_get("id").map_err(decode_error)?;
    Ok(Cursor::new(created_at, EventId::from_uuid(id)))
}

fn database_error(e: sqlx::Error) -> EventLogError {
    EventLogError::DatabaseError(e.to_string())
}

impl EventLog for PostgresEventLog {
    fn append(
        &self,
        ticket_id: TicketId,
        event_type: EventType,
        payload: Payload,
    ) -> LogFuture<'_, Event> {
        Box::pin(async move {
            let id = EventId::new();
            let started = Instant::now();

            let created_at: DateTime<Utc> = sqlx::query_scalar(
                r"
                INSERT INTO ticket_events (id, ticket_id, event_type, payload)
                VALUES ($1, $2, $3, $4::jsonb)
                RETURNING created_at
                ",
            )
            .bind(id.as_uuid())
            .bind(ticket_id.as_str())
            .bind(event_type.as_str())
            .bind(payload.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(database_error)?;

            metrics::histogram!("event_log.append.duration_seconds")
                .record(started.elapsed().as_secs_f64());
            tracing::debug!(event_id = %id, ticket_id = %ticket_id, event_type = %event_type, "Event appended");

            Ok(Event {
                id,
                ticket_id,
                event_type,
                payload,
                created_at,
            })
        })
    }

    fn query_after(&self, cursor: Cursor, limit: usize) -> LogFuture<'_, Vec<Event>> {
        Box::pin(async move {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let started = Instant::now();

            let rows = if cursor.is_beginning() {
                sqlx::query(SELECT_FROM_BEGINNING)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            } else {
                sqlx::query(SELECT_AFTER_CURSOR)
                    .bind(cursor.created_at)
                    .bind(cursor.id.as_uuid())
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
            .map_err(database_error)?;

            metrics::histogram!("event_log.query.duration_seconds")
                .record(started.elapsed().as_secs_f64());

            rows.iter().map(decode).collect::<Result<Vec<_>, _>>()
        })
    }

    fn lookup_created_at(&self, id: EventId) -> LogFuture<'_, Option<DateTime<Utc>>> {
        Box::pin(async move {
            sqlx::query_scalar::<_, DateTime<Utc>>("SELECT created_at FROM ticket_events WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(database_error)
        })
    }

    fn latest(&self) -> LogFuture<'_, Option<Cursor>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT created_at, id FROM ticket_events ORDER BY created_at DESC, id DESC LIMIT 1",
            )
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?;

            row.as_ref().map(decode_cursor).transpose()
        })
    }
}
