//! Tracked users and their device lists.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{ColumnIndex, Decode, Encode, Executor, IntoArguments, Row, Type};

use mx_proto::{DeviceId, DeviceIdentity, IdentityKey, SigningKey, TrustState, UserId};

use crate::{db::CryptoStore, dialect::Dialect, error::StoreError};

impl<DB> CryptoStore<DB>
where
    DB: Dialect,
    for<'c> &'c mut DB::Connection: Executor<'c, Database = DB>,
    for<'q> DB::Arguments<'q>: IntoArguments<'q, DB>,
    for<'r> &'r str: ColumnIndex<DB::Row>,
    for<'q> String: Encode<'q, DB> + Decode<'q, DB> + Type<DB>,
    for<'q> Vec<u8>: Encode<'q, DB> + Decode<'q, DB> + Type<DB>,
    for<'q> i64: Encode<'q, DB> + Decode<'q, DB> + Type<DB>,
    for<'q> bool: Encode<'q, DB> + Decode<'q, DB> + Type<DB>,
    for<'q> DateTime<Utc>: Encode<'q, DB> + Decode<'q, DB> + Type<DB>,
{
    /// The device list of `user_id`.
    ///
    /// `None` means the user is not tracked. A tracked user without devices
    /// yields an empty map.
    pub async fn get_devices(
        &self,
        user_id: &UserId,
    ) -> Result<Option<HashMap<DeviceId, DeviceIdentity>>, StoreError> {
        let tracked = sqlx::query("SELECT user_id FROM crypto_tracked_user WHERE user_id = $1")
            .bind(user_id.as_str().to_owned())
            .fetch_optional(&self.pool)
            .await?;
        if tracked.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT device_id, identity_key, signing_key, trust, deleted, name \
             FROM crypto_device WHERE user_id = $1",
        )
        .bind(user_id.as_str().to_owned())
        .fetch_all(&self.pool)
        .await?;

        let mut devices = HashMap::with_capacity(rows.len());
        for row in &rows {
            let device_id = DeviceId::from(row.try_get::<String, _>("device_id")?);
            let identity_key = IdentityKey::from(row.try_get::<String, _>("identity_key")?);
            let identity = device_from_row::<DB>(row, user_id, device_id.clone(), identity_key)?;
            devices.insert(device_id, identity);
        }
        Ok(Some(devices))
    }

    pub async fn get_device(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<Option<DeviceIdentity>, StoreError> {
        let row = sqlx::query(
            "SELECT identity_key, signing_key, trust, deleted, name \
             FROM crypto_device WHERE user_id = $1 AND device_id = $2",
        )
        .bind(user_id.as_str().to_owned())
        .bind(device_id.as_str().to_owned())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let identity_key = IdentityKey::from(row.try_get::<String, _>("identity_key")?);
            device_from_row::<DB>(&row, user_id, device_id.clone(), identity_key)
        })
        .transpose()
    }

    pub async fn find_device_by_key(
        &self,
        user_id: &UserId,
        identity_key: &IdentityKey,
    ) -> Result<Option<DeviceIdentity>, StoreError> {
        let row = sqlx::query(
            "SELECT device_id, signing_key, trust, deleted, name \
             FROM crypto_device WHERE user_id = $1 AND identity_key = $2",
        )
        .bind(user_id.as_str().to_owned())
        .bind(identity_key.as_str().to_owned())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let device_id = DeviceId::from(row.try_get::<String, _>("device_id")?);
            device_from_row::<DB>(&row, user_id, device_id, identity_key.clone())
        })
        .transpose()
    }

    /// Replace the whole device list of `user_id` and mark the user tracked.
    /// `devices` must be the complete list; nothing from the previous list
    /// survives.
    pub async fn put_devices(
        &self,
        user_id: &UserId,
        devices: &HashMap<DeviceId, DeviceIdentity>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO crypto_tracked_user (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id.as_str().to_owned())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM crypto_device WHERE user_id = $1")
            .bind(user_id.as_str().to_owned())
            .execute(&mut *tx)
            .await?;
        if !devices.is_empty() {
            DB::insert_devices(&mut *tx, user_id, devices).await?;
        }

        tx.commit().await?;
        tracing::debug!(%user_id, devices = devices.len(), "replaced device list");
        Ok(())
    }

    /// The subset of `users` whose device lists are tracked.
    pub async fn filter_tracked_users(&self, users: &[UserId]) -> Result<Vec<UserId>, StoreError> {
        if users.is_empty() {
            return Ok(Vec::new());
        }
        DB::filter_tracked_users(&self.pool, users).await
    }
}

fn device_from_row<DB>(
    row: &DB::Row,
    user_id: &UserId,
    device_id: DeviceId,
    identity_key: IdentityKey,
) -> Result<DeviceIdentity, StoreError>
where
    DB: Dialect,
    for<'r> &'r str: ColumnIndex<DB::Row>,
    for<'q> String: Decode<'q, DB> + Type<DB>,
    for<'q> i64: Decode<'q, DB> + Type<DB>,
    for<'q> bool: Decode<'q, DB> + Type<DB>,
{
    Ok(DeviceIdentity {
        user_id: user_id.clone(),
        device_id,
        identity_key,
        signing_key: SigningKey::from(row.try_get::<String, _>("signing_key")?),
        trust: TrustState::from_code(row.try_get("trust")?)?,
        deleted: row.try_get("deleted")?,
        name: row.try_get("name")?,
    })
}
