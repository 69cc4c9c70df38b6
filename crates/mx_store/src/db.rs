//! The store handle and the account-scoped rows.
//!
//! `CryptoStore` is generic over the backend [`Dialect`]; the same logical
//! operations run on Postgres and SQLite. Every generic `impl` block in this
//! crate repeats the same driver bounds: they are what lets one query body
//! bind and decode `String`, `i64`, `bool`, byte blobs and timestamps on
//! either backend.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::{ColumnIndex, Decode, Encode, Executor, IntoArguments, Pool, Row, Type};

use mx_crypto::{Account, PickleKey};
use mx_proto::{DeviceId, SyncToken};

use crate::{
    cache::OlmCache,
    config::StoreConfig,
    dialect::{Dialect, Scheme},
    error::StoreError,
};

/// Tables holding rows owned by one account; wiped by [`CryptoStore::delete`].
const ACCOUNT_TABLES: [&str; 3] = [
    "crypto_account",
    "crypto_olm_session",
    "crypto_megolm_outbound_session",
];

#[derive(Default)]
struct AccountState {
    device_id: Option<DeviceId>,
    sync_token: Option<SyncToken>,
    account: Option<Account>,
}

/// Persistent key-material store for one account.
pub struct CryptoStore<DB: Dialect> {
    pub(crate) pool: Pool<DB>,
    pub(crate) account_id: String,
    pub(crate) pickle_key: PickleKey,
    pub(crate) olm_cache: OlmCache,
    state: Mutex<AccountState>,
}

impl<DB: Dialect> CryptoStore<DB> {
    /// Connect using `config` and run pending migrations.
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = DB::connect(config).await?;
        DB::migrate(&pool).await?;
        tracing::info!(
            scheme = ?DB::SCHEME,
            account_id = %config.account_id,
            "crypto store opened"
        );
        Self::new(pool, config.account_id.clone(), &config.pickle_key)
    }

    /// Wrap an existing, already migrated pool.
    pub fn new(pool: Pool<DB>, account_id: impl Into<String>, pickle_passphrase: &str) -> Result<Self, StoreError> {
        Ok(Self {
            pool,
            account_id: account_id.into(),
            pickle_key: PickleKey::from_passphrase(pickle_passphrase)?,
            olm_cache: OlmCache::new(),
            state: Mutex::new(AccountState::default()),
        })
    }

    pub fn scheme(&self) -> Scheme {
        DB::SCHEME
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn pool(&self) -> &Pool<DB> {
        &self.pool
    }
}

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
    /// Remove everything this account owns, in one transaction, and forget
    /// all cached state.
    pub async fn delete(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for table in ACCOUNT_TABLES {
            sqlx::query(&format!("DELETE FROM {table} WHERE account_id = $1"))
                .bind(self.account_id.clone())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        self.olm_cache.clear();
        *self.state.lock() = AccountState::default();
        tracing::info!(account_id = %self.account_id, "crypto store wiped");
        Ok(())
    }

    pub async fn get_device_id(&self) -> Result<Option<DeviceId>, StoreError> {
        let stored: Option<String> = sqlx::query("SELECT device_id FROM crypto_account WHERE account_id = $1")
            .bind(self.account_id.clone())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.try_get("device_id"))
            .transpose()?;

        let mut state = self.state.lock();
        if let Some(device_id) = stored.filter(|d| !d.is_empty()) {
            state.device_id = Some(DeviceId::from(device_id));
        }
        Ok(state.device_id.clone())
    }

    pub async fn put_device_id(&self, device_id: DeviceId) -> Result<(), StoreError> {
        sqlx::query("UPDATE crypto_account SET device_id = $1 WHERE account_id = $2")
            .bind(device_id.as_str().to_owned())
            .bind(self.account_id.clone())
            .execute(&self.pool)
            .await?;
        self.state.lock().device_id = Some(device_id);
        Ok(())
    }

    /// Advance the sync cursor.
    pub async fn put_next_batch(&self, token: SyncToken) -> Result<(), StoreError> {
        self.state.lock().sync_token = Some(token.clone());
        sqlx::query("UPDATE crypto_account SET sync_token = $1 WHERE account_id = $2")
            .bind(token.into_inner())
            .bind(self.account_id.clone())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_next_batch(&self) -> Result<Option<SyncToken>, StoreError> {
        if let Some(token) = self.state.lock().sync_token.clone() {
            return Ok(Some(token));
        }
        let stored: Option<String> = sqlx::query("SELECT sync_token FROM crypto_account WHERE account_id = $1")
            .bind(self.account_id.clone())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.try_get("sync_token"))
            .transpose()?;

        let token = stored.filter(|t| !t.is_empty()).map(SyncToken::from);
        self.state.lock().sync_token = token.clone();
        Ok(token)
    }

    pub async fn put_account(&self, account: Account) -> Result<(), StoreError> {
        let pickle = account.pickle(&self.pickle_key)?;
        let shared = account.shared;
        let (device_id, sync_token) = {
            let mut state = self.state.lock();
            state.account = Some(account);
            (
                state.device_id.as_ref().map(|d| d.as_str().to_owned()).unwrap_or_default(),
                state.sync_token.as_ref().map(|t| t.as_str().to_owned()).unwrap_or_default(),
            )
        };

        sqlx::query(
            "INSERT INTO crypto_account (account_id, device_id, shared, sync_token, account) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (account_id) DO UPDATE \
             SET shared = excluded.shared, sync_token = excluded.sync_token, account = excluded.account",
        )
        .bind(self.account_id.clone())
        .bind(device_id)
        .bind(shared)
        .bind(sync_token)
        .bind(pickle)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_account(&self) -> Result<Option<Account>, StoreError> {
        if let Some(account) = self.state.lock().account.clone() {
            return Ok(Some(account));
        }
        let Some(row) = sqlx::query("SELECT shared, account, device_id FROM crypto_account WHERE account_id = $1")
            .bind(self.account_id.clone())
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let pickle: Vec<u8> = row.try_get("account")?;
        let shared: bool = row.try_get("shared")?;
        let device_id: String = row.try_get("device_id")?;
        let account = Account::from_pickle(&pickle, &self.pickle_key, shared)?;

        let mut state = self.state.lock();
        if !device_id.is_empty() {
            state.device_id = Some(DeviceId::from(device_id));
        }
        state.account = Some(account.clone());
        Ok(Some(account))
    }
}
