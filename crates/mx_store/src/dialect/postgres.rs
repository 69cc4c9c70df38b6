use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Duration;
use sqlx::{
    postgres::{types::PgInterval, PgConnection, PgPoolOptions, PgQueryResult},
    PgPool, Postgres, Row,
};

use mx_proto::{DeviceId, DeviceIdentity, EventId, IdentityKey, RoomId, SessionId, UserId};

use super::{Dialect, Scheme};
use crate::{config::StoreConfig, error::StoreError};

// The conflict branch has to update something, otherwise RETURNING yields no
// row for an index that is already pinned.
const VALIDATE_MESSAGE_INDEX: &str = "\
    INSERT INTO crypto_message_index (sender_key, session_id, \"index\", event_id, timestamp) \
    VALUES ($1, $2, $3, $4, $5) \
    ON CONFLICT (sender_key, session_id, \"index\") DO UPDATE SET sender_key = excluded.sender_key \
    RETURNING event_id, timestamp";

const DAYS_PER_MONTH: i64 = 30;

#[async_trait]
impl Dialect for Postgres {
    const SCHEME: Scheme = Scheme::Postgres;

    type Interval = PgInterval;

    fn encode_interval(age: Duration) -> Result<PgInterval, StoreError> {
        PgInterval::try_from(age).map_err(|e| StoreError::Interval(e.to_string()))
    }

    fn decode_interval(value: PgInterval) -> Duration {
        Duration::microseconds(value.microseconds)
            + Duration::days(i64::from(value.days) + i64::from(value.months) * DAYS_PER_MONTH)
    }

    fn rows_affected(result: &PgQueryResult) -> u64 {
        result.rows_affected()
    }

    async fn connect(config: &StoreConfig) -> Result<PgPool, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;
        Ok(pool)
    }

    async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations/postgres").run(pool).await?;
        Ok(())
    }

    async fn validate_message_index(
        pool: &PgPool,
        sender_key: &IdentityKey,
        session_id: &SessionId,
        event_id: &EventId,
        index: u32,
        timestamp: i64,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(VALIDATE_MESSAGE_INDEX)
            .bind(sender_key.as_str())
            .bind(session_id.as_str())
            .bind(i64::from(index))
            .bind(event_id.as_str())
            .bind(timestamp)
            .fetch_one(pool)
            .await?;

        let pinned_event: String = row.try_get("event_id")?;
        let pinned_timestamp: i64 = row.try_get("timestamp")?;
        Ok(pinned_event == event_id.as_str() && pinned_timestamp == timestamp)
    }

    async fn delete_outbound_group_sessions(
        pool: &PgPool,
        account_id: &str,
        rooms: &[RoomId],
    ) -> Result<u64, StoreError> {
        let rooms: Vec<String> = rooms.iter().map(|r| r.as_str().to_owned()).collect();
        let result = sqlx::query(
            "DELETE FROM crypto_megolm_outbound_session WHERE account_id = $1 AND room_id = ANY($2)",
        )
        .bind(account_id)
        .bind(rooms)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn filter_tracked_users(pool: &PgPool, users: &[UserId]) -> Result<Vec<UserId>, StoreError> {
        let users: Vec<String> = users.iter().map(|u| u.as_str().to_owned()).collect();
        let rows = sqlx::query("SELECT user_id FROM crypto_tracked_user WHERE user_id = ANY($1)")
            .bind(users)
            .fetch_all(pool)
            .await?;
        rows.iter()
            .map(|row| Ok(UserId::from(row.try_get::<String, _>("user_id")?)))
            .collect()
    }

    async fn insert_devices(
        conn: &mut PgConnection,
        user_id: &UserId,
        devices: &HashMap<DeviceId, DeviceIdentity>,
    ) -> Result<(), StoreError> {
        let mut device_ids = Vec::with_capacity(devices.len());
        let mut identity_keys = Vec::with_capacity(devices.len());
        let mut signing_keys = Vec::with_capacity(devices.len());
        let mut trust = Vec::with_capacity(devices.len());
        let mut deleted = Vec::with_capacity(devices.len());
        let mut names = Vec::with_capacity(devices.len());
        for (device_id, identity) in devices {
            device_ids.push(device_id.as_str().to_owned());
            identity_keys.push(identity.identity_key.as_str().to_owned());
            signing_keys.push(identity.signing_key.as_str().to_owned());
            trust.push(identity.trust.code());
            deleted.push(identity.deleted);
            names.push(identity.name.clone());
        }

        sqlx::query(
            "INSERT INTO crypto_device (user_id, device_id, identity_key, signing_key, trust, deleted, name) \
             SELECT $1::text, d.device_id, d.identity_key, d.signing_key, d.trust, d.deleted, d.name \
             FROM UNNEST($2::text[], $3::text[], $4::text[], $5::bigint[], $6::boolean[], $7::text[]) \
                  AS d(device_id, identity_key, signing_key, trust, deleted, name)",
        )
        .bind(user_id.as_str())
        .bind(device_ids)
        .bind(identity_keys)
        .bind(signing_keys)
        .bind(trust)
        .bind(deleted)
        .bind(names)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
