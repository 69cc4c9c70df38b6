use std::{collections::HashMap, str::FromStr, time::Duration as StdDuration};

use async_trait::async_trait;
use chrono::Duration;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteQueryResult},
    Row, Sqlite, SqlitePool,
};

use mx_proto::{DeviceId, DeviceIdentity, EventId, IdentityKey, RoomId, SessionId, UserId};

use super::{Dialect, Scheme};
use crate::{config::StoreConfig, error::StoreError};

/// IDs bound per `IN (…)` statement. Older SQLite builds cap a statement at
/// 999 variables; longer lists are split across statements.
const MAX_IN_LIST: usize = 500;

/// `$first, $first+1, …` for `count` parameters.
fn numbered_placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|n| format!("${n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl Dialect for Sqlite {
    const SCHEME: Scheme = Scheme::Sqlite;

    /// Microseconds, the same resolution as a Postgres `INTERVAL`.
    type Interval = i64;

    fn encode_interval(age: Duration) -> Result<i64, StoreError> {
        let micros = age
            .num_microseconds()
            .ok_or_else(|| StoreError::Interval(format!("{age} does not fit in microseconds")))?;
        if Duration::microseconds(micros) != age {
            return Err(StoreError::Interval(format!("{age} has sub-microsecond precision")));
        }
        Ok(micros)
    }

    fn decode_interval(value: i64) -> Duration {
        Duration::microseconds(value)
    }

    fn rows_affected(result: &SqliteQueryResult) -> u64 {
        result.rows_affected()
    }

    /// WAL journal mode and foreign keys are set per connection here; SQLite
    /// refuses to change `journal_mode` inside the transaction a migration
    /// runs in.
    async fn connect(config: &StoreConfig) -> Result<SqlitePool, StoreError> {
        let opts = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(StdDuration::from_secs(config.busy_timeout_secs));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(opts)
            .await?;
        Ok(pool)
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations/sqlite").run(pool).await?;
        Ok(())
    }

    /// Lookup, then insert. Two callers racing on the same unpinned index can
    /// both see no row; the loser's insert then fails on the primary key and
    /// the error reaches the caller. There is no atomic upsert-returning here
    /// to close that window.
    async fn validate_message_index(
        pool: &SqlitePool,
        sender_key: &IdentityKey,
        session_id: &SessionId,
        event_id: &EventId,
        index: u32,
        timestamp: i64,
    ) -> Result<bool, StoreError> {
        let pinned = sqlx::query(
            "SELECT event_id, timestamp FROM crypto_message_index \
             WHERE sender_key = $1 AND session_id = $2 AND \"index\" = $3",
        )
        .bind(sender_key.as_str())
        .bind(session_id.as_str())
        .bind(i64::from(index))
        .fetch_optional(pool)
        .await?;

        if let Some(row) = pinned {
            let pinned_event: String = row.try_get("event_id")?;
            let pinned_timestamp: i64 = row.try_get("timestamp")?;
            return Ok(pinned_event == event_id.as_str() && pinned_timestamp == timestamp);
        }

        sqlx::query(
            "INSERT INTO crypto_message_index (sender_key, session_id, \"index\", event_id, timestamp) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(sender_key.as_str())
        .bind(session_id.as_str())
        .bind(i64::from(index))
        .bind(event_id.as_str())
        .bind(timestamp)
        .execute(pool)
        .await?;
        Ok(true)
    }

    async fn delete_outbound_group_sessions(
        pool: &SqlitePool,
        account_id: &str,
        rooms: &[RoomId],
    ) -> Result<u64, StoreError> {
        let mut removed = 0;
        for chunk in rooms.chunks(MAX_IN_LIST) {
            let sql = format!(
                "DELETE FROM crypto_megolm_outbound_session WHERE account_id = $1 AND room_id IN ({})",
                numbered_placeholders(2, chunk.len())
            );
            let mut query = sqlx::query(&sql).bind(account_id);
            for room in chunk {
                query = query.bind(room.as_str());
            }
            removed += query.execute(pool).await?.rows_affected();
        }
        Ok(removed)
    }

    async fn filter_tracked_users(pool: &SqlitePool, users: &[UserId]) -> Result<Vec<UserId>, StoreError> {
        let mut tracked = Vec::new();
        for chunk in users.chunks(MAX_IN_LIST) {
            let sql = format!(
                "SELECT user_id FROM crypto_tracked_user WHERE user_id IN ({})",
                numbered_placeholders(1, chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for user in chunk {
                query = query.bind(user.as_str());
            }
            for row in query.fetch_all(pool).await? {
                tracked.push(UserId::from(row.try_get::<String, _>("user_id")?));
            }
        }
        Ok(tracked)
    }

    async fn insert_devices(
        conn: &mut SqliteConnection,
        user_id: &UserId,
        devices: &HashMap<DeviceId, DeviceIdentity>,
    ) -> Result<(), StoreError> {
        for (device_id, identity) in devices {
            sqlx::query(
                "INSERT INTO crypto_device (user_id, device_id, identity_key, signing_key, trust, deleted, name) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(user_id.as_str())
            .bind(device_id.as_str())
            .bind(identity.identity_key.as_str())
            .bind(identity.signing_key.as_str())
            .bind(identity.trust.code())
            .bind(identity.deleted)
            .bind(identity.name.as_str())
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }
}
