//! `PostgreSQL` implementation of the `EventStore` and `LogSubscriber` traits.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use eventide_core::error::DomainError;
use eventide_core::store::{EventData, EventStore, RecordedEvent};
use eventide_core::stream::{
    AppendEventsResult, ExpectedStreamVersion, StreamMetadata, StreamName, StreamReadPosition,
    StreamTruncatePosition,
};
use eventide_core::subscription::{EventSubscription, LogSubscriber, SubscriptionFilter};

use crate::config::PgEventStoreConfig;
use crate::schema::{APPEND_LOCK_KEY, CREATE_EVENT_STORE_TABLES};

const SELECT_EVENT_COLUMNS: &str = "SELECT global_position, stream_name, stream_version, \
     event_id, event_type, data, metadata, created_at FROM stream_events";

/// PostgreSQL-backed event store.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
    config: PgEventStoreConfig,
}

impl PgEventStore {
    /// Creates a new `PgEventStore` with default polling settings.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self::with_config(pool, PgEventStoreConfig::default())
    }

    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn with_config(pool: PgPool, config: PgEventStoreConfig) -> Self {
        Self { pool, config }
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the event store tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), DomainError> {
        sqlx::raw_sql(CREATE_EVENT_STORE_TABLES)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::Infrastructure(format!("failed to create schema: {e}")))?;
        Ok(())
    }

    async fn visible_range(
        &self,
        stream: &StreamName,
    ) -> Result<(u64, u64), DomainError> {
        let mut conn = self.pool.acquire().await.map_err(read_error(stream))?;
        let row = load_stream(&mut *conn, stream, false)
            .await
            .map_err(read_error(stream))?;
        let state = row.ok_or_else(|| DomainError::StreamNotFound(stream.clone()))?;
        let last = state
            .current()?
            .ok_or_else(|| DomainError::StreamNotFound(stream.clone()))?;
        Ok((last, state.metadata()?.first_visible_version(last)))
    }

    async fn fetch_range(
        &self,
        stream: &StreamName,
        lower: u64,
        upper: u64,
        count: u64,
        descending: bool,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        let order = if descending { "DESC" } else { "ASC" };
        let sql = format!(
            "{SELECT_EVENT_COLUMNS} WHERE stream_name = $1 AND stream_version BETWEEN $2 AND $3 \
             ORDER BY stream_version {order} LIMIT $4"
        );
        let rows: Vec<EventRow> = sqlx::query_as(&sql)
            .bind(stream.as_str())
            .bind(to_i64(lower)?)
            .bind(to_i64(upper)?)
            .bind(to_i64(count).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(read_error(stream))?;
        rows.into_iter().map(EventRow::into_recorded).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StreamRow {
    last_version: Option<i64>,
    truncate_before: Option<i64>,
    max_count: Option<i64>,
    deleted_before: Option<i64>,
    deleted: bool,
}

impl StreamRow {
    fn current(&self) -> Result<Option<u64>, DomainError> {
        match self.last_version {
            Some(version) if !self.deleted => to_u64(version).map(Some),
            _ => Ok(None),
        }
    }

    fn metadata(&self) -> Result<StreamMetadata, DomainError> {
        Ok(StreamMetadata {
            truncate_before: self.truncate_before.map(to_u64).transpose()?,
            max_count: self.max_count.map(to_u64).transpose()?,
            deleted_before: self.deleted_before.map(to_u64).transpose()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    global_position: i64,
    stream_name: String,
    stream_version: i64,
    event_id: Uuid,
    event_type: String,
    data: Vec<u8>,
    metadata: Vec<u8>,
    created_at: DateTime<Utc>,
}

impl EventRow {
    fn into_recorded(self) -> Result<RecordedEvent, DomainError> {
        Ok(RecordedEvent {
            stream_name: StreamName::new(self.stream_name),
            event_id: self.event_id,
            event_type: self.event_type,
            version: to_u64(self.stream_version)?,
            position: to_u64(self.global_position)?,
            data: self.data,
            metadata: self.metadata,
            created_at: self.created_at,
        })
    }
}

async fn load_stream(
    conn: &mut PgConnection,
    stream: &StreamName,
    for_update: bool,
) -> Result<Option<StreamRow>, sqlx::Error> {
    let sql = if for_update {
        "SELECT last_version, truncate_before, max_count, deleted_before, deleted \
         FROM event_streams \
         WHERE stream_name = $1 FOR UPDATE"
    } else {
        "SELECT last_version, truncate_before, max_count, deleted_before, deleted \
         FROM event_streams \
         WHERE stream_name = $1"
    };
    sqlx::query_as(sql)
        .bind(stream.as_str())
        .fetch_optional(conn)
        .await
}

fn check_expected(
    stream: &StreamName,
    expected: ExpectedStreamVersion,
    current: Option<u64>,
) -> Result<(), DomainError> {
    if expected.is_satisfied_by(current) {
        Ok(())
    } else {
        Err(DomainError::ConcurrencyConflict {
            stream: stream.clone(),
            expected,
            actual: current,
        })
    }
}

fn read_error(stream: &StreamName) -> impl Fn(sqlx::Error) -> DomainError + '_ {
    move |e| DomainError::Read {
        stream: stream.clone(),
        message: e.to_string(),
    }
}

fn append_error(stream: &StreamName) -> impl Fn(sqlx::Error) -> DomainError + '_ {
    move |e| DomainError::Append {
        stream: stream.clone(),
        message: e.to_string(),
    }
}

fn to_i64(value: u64) -> Result<i64, DomainError> {
    i64::try_from(value)
        .map_err(|_| DomainError::Validation(format!("{value} exceeds the BIGINT range")))
}

fn to_u64(value: i64) -> Result<u64, DomainError> {
    u64::try_from(value)
        .map_err(|_| DomainError::Infrastructure(format!("negative value {value} in event store")))
}

#[async_trait]
impl EventStore for PgEventStore {
    #[instrument(skip_all, fields(stream = %stream, expected = %expected_version, count = events.len()))]
    async fn append_events(
        &self,
        stream: &StreamName,
        expected_version: ExpectedStreamVersion,
        events: Vec<EventData>,
    ) -> Result<AppendEventsResult, DomainError> {
        let mut tx = self.pool.begin().await.map_err(append_error(stream))?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(append_error(stream))?;

        let row = load_stream(&mut *tx, stream, true)
            .await
            .map_err(append_error(stream))?;
        let current = match &row {
            Some(state) => state.current()?,
            None => None,
        };
        check_expected(stream, expected_version, current)?;
        if events.is_empty() {
            return Ok(AppendEventsResult::NO_OP);
        }

        let mut version = match row.and_then(|state| state.last_version) {
            Some(last) => last + 1,
            None => 0,
        };
        let mut global_position = 0_i64;
        for event in events {
            global_position = sqlx::query_scalar::<_, i64>(
                "INSERT INTO stream_events \
                 (stream_name, stream_version, event_id, event_type, data, metadata) \
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING global_position",
            )
            .bind(stream.as_str())
            .bind(version)
            .bind(event.event_id)
            .bind(&event.event_type)
            .bind(&event.data)
            .bind(&event.metadata)
            .fetch_one(&mut *tx)
            .await
            .map_err(append_error(stream))?;
            version += 1;
        }
        let last_version = version - 1;

        sqlx::query(
            "INSERT INTO event_streams (stream_name, last_version, deleted) VALUES ($1, $2, FALSE) \
             ON CONFLICT (stream_name) DO UPDATE \
             SET last_version = EXCLUDED.last_version, deleted = FALSE",
        )
        .bind(stream.as_str())
        .bind(last_version)
        .execute(&mut *tx)
        .await
        .map_err(append_error(stream))?;
        tx.commit().await.map_err(append_error(stream))?;

        debug!(global_position, last_version, "appended events");
        Ok(AppendEventsResult::new(
            to_u64(global_position)?,
            to_u64(last_version)?,
        ))
    }

    async fn read_events(
        &self,
        stream: &StreamName,
        from: StreamReadPosition,
        count: u64,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        let (last, first) = self.visible_range(stream).await?;
        let start = match from {
            StreamReadPosition::Start => first,
            StreamReadPosition::End => return Ok(Vec::new()),
            StreamReadPosition::Offset(version) => version.max(first),
        };
        if start > last || count == 0 {
            return Ok(Vec::new());
        }
        self.fetch_range(stream, start, last, count, false).await
    }

    async fn read_events_backwards(
        &self,
        stream: &StreamName,
        from: StreamReadPosition,
        count: u64,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        let (last, first) = self.visible_range(stream).await?;
        let start = match from {
            StreamReadPosition::Start => first,
            StreamReadPosition::End => last,
            StreamReadPosition::Offset(version) => version.min(last),
        };
        if start < first || count == 0 {
            return Ok(Vec::new());
        }
        self.fetch_range(stream, first, start, count, true).await
    }

    #[instrument(skip(self, stream), fields(stream = %stream))]
    async fn truncate_stream(
        &self,
        stream: &StreamName,
        truncate_before: StreamTruncatePosition,
        expected_version: ExpectedStreamVersion,
    ) -> Result<AppendEventsResult, DomainError> {
        let mut tx = self.pool.begin().await.map_err(append_error(stream))?;
        let row = load_stream(&mut *tx, stream, true)
            .await
            .map_err(append_error(stream))?;
        let current = match &row {
            Some(state) => state.current()?,
            None => None,
        };
        check_expected(stream, expected_version, current)?;

        sqlx::query(
            "INSERT INTO event_streams (stream_name, truncate_before) VALUES ($1, $2) \
             ON CONFLICT (stream_name) DO UPDATE SET truncate_before = EXCLUDED.truncate_before",
        )
        .bind(stream.as_str())
        .bind(to_i64(truncate_before.0)?)
        .execute(&mut *tx)
        .await
        .map_err(append_error(stream))?;

        let result = match current {
            Some(last) => {
                let position = sqlx::query_scalar::<_, i64>(
                    "SELECT global_position FROM stream_events \
                     WHERE stream_name = $1 AND stream_version = $2",
                )
                .bind(stream.as_str())
                .bind(to_i64(last)?)
                .fetch_one(&mut *tx)
                .await
                .map_err(append_error(stream))?;
                AppendEventsResult::new(to_u64(position)?, last)
            }
            None => AppendEventsResult::NO_OP,
        };
        tx.commit().await.map_err(append_error(stream))?;

        debug!(truncate_before = truncate_before.0, "truncated stream");
        Ok(result)
    }

    #[instrument(skip(self, stream), fields(stream = %stream))]
    async fn delete_stream(
        &self,
        stream: &StreamName,
        expected_version: ExpectedStreamVersion,
    ) -> Result<(), DomainError> {
        let mut tx = self.pool.begin().await.map_err(append_error(stream))?;
        let row = load_stream(&mut *tx, stream, true)
            .await
            .map_err(append_error(stream))?;
        let current = match &row {
            Some(state) => state.current()?,
            None => None,
        };
        check_expected(stream, expected_version, current)?;
        let last = current.ok_or_else(|| DomainError::StreamNotFound(stream.clone()))?;

        sqlx::query(
            "UPDATE event_streams SET deleted = TRUE, deleted_before = $2 WHERE stream_name = $1",
        )
        .bind(stream.as_str())
        .bind(to_i64(last + 1)?)
        .execute(&mut *tx)
        .await
        .map_err(append_error(stream))?;
        tx.commit().await.map_err(append_error(stream))?;

        debug!("deleted stream");
        Ok(())
    }

    async fn set_stream_max_count(
        &self,
        stream: &StreamName,
        max_count: u64,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO event_streams (stream_name, max_count) VALUES ($1, $2) \
             ON CONFLICT (stream_name) DO UPDATE SET max_count = EXCLUDED.max_count",
        )
        .bind(stream.as_str())
        .bind(to_i64(max_count)?)
        .execute(&self.pool)
        .await
        .map_err(append_error(stream))?;
        Ok(())
    }
}

struct Poller {
    pool: PgPool,
    after: i64,
    filter: SubscriptionFilter,
    batch_size: i64,
    poll_interval: Duration,
    pending: VecDeque<RecordedEvent>,
    failed: bool,
}

impl Poller {
    /// Fetches the next batch after `self.after`. Returns `false` when the
    /// log had nothing new.
    async fn poll(&mut self) -> Result<bool, DomainError> {
        let sql = format!("{SELECT_EVENT_COLUMNS} WHERE global_position > $1 ORDER BY global_position LIMIT $2");
        let rows: Vec<EventRow> = sqlx::query_as(&sql)
            .bind(self.after)
            .bind(self.batch_size)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DomainError::TransientConnection(e.to_string()))?;
        let fetched = !rows.is_empty();
        for row in rows {
            self.after = row.global_position;
            let record = row.into_recorded()?;
            if self.filter.matches(&record) {
                self.pending.push_back(record);
            }
        }
        Ok(fetched)
    }
}

#[async_trait]
impl LogSubscriber for PgEventStore {
    async fn subscribe_to_all(
        &self,
        after: Option<u64>,
        filter: &SubscriptionFilter,
    ) -> Result<EventSubscription, DomainError> {
        let poller = Poller {
            pool: self.pool.clone(),
            after: to_i64(after.unwrap_or(0))?,
            filter: filter.clone(),
            batch_size: to_i64(self.config.subscription_batch_size.get())?,
            poll_interval: self.config.poll_interval,
            pending: VecDeque::new(),
            failed: false,
        };
        debug!(after = poller.after, "opened polling subscription");

        Ok(stream::unfold(poller, |mut poller| async move {
            if poller.failed {
                return None;
            }
            loop {
                if let Some(record) = poller.pending.pop_front() {
                    return Some((Ok(record), poller));
                }
                match poller.poll().await {
                    Ok(true) => {}
                    Ok(false) => tokio::time::sleep(poller.poll_interval).await,
                    Err(e) => {
                        warn!(error = %e, after = poller.after, "polling subscription dropped");
                        poller.failed = true;
                        return Some((Err(e), poller));
                    }
                }
            }
        })
        .boxed())
    }
}
