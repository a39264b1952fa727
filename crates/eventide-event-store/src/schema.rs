//! Event store database schema.
//!
//! Mirrors `migrations/0001_event_store.sql`; [`crate::pg_event_store::PgEventStore::ensure_schema`]
//! applies it for hosts that do not run sqlx migrations.

/// SQL to create the event store tables.
pub const CREATE_EVENT_STORE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS event_streams (
    stream_name     VARCHAR(512) PRIMARY KEY,
    last_version    BIGINT,
    truncate_before BIGINT,
    max_count       BIGINT,
    deleted_before  BIGINT,
    deleted         BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE TABLE IF NOT EXISTS stream_events (
    global_position BIGSERIAL PRIMARY KEY,
    stream_name     VARCHAR(512) NOT NULL,
    stream_version  BIGINT NOT NULL,
    event_id        UUID NOT NULL,
    event_type      VARCHAR(255) NOT NULL,
    data            BYTEA NOT NULL,
    metadata        BYTEA NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (stream_name, stream_version)
);

CREATE TABLE IF NOT EXISTS subscription_checkpoints (
    subscription_id VARCHAR(255) PRIMARY KEY,
    position        BIGINT NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
";

/// Advisory lock key held by every append transaction. Serialising appends
/// makes global positions become visible in commit order, which the polling
/// subscription relies on.
pub const APPEND_LOCK_KEY: i64 = 0x6576_656e_7469_6465;
