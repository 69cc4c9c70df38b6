//! One-to-one Olm session persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::{ColumnIndex, Decode, Encode, Executor, IntoArguments, Row, Type};

use mx_crypto::{Session, SessionTimes};
use mx_proto::{IdentityKey, SessionId};

use crate::{cache::SharedSession, db::CryptoStore, dialect::Dialect, error::StoreError};

const SELECT_SESSIONS: &str = "\
    SELECT session_id, session, created_at, last_encrypted, last_decrypted \
    FROM crypto_olm_session WHERE sender_key = $1 AND account_id = $2 \
    ORDER BY last_decrypted DESC";

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
    /// Whether any session with `key` is cached or stored. Does not populate
    /// the cache.
    pub async fn has_session(&self, key: &IdentityKey) -> Result<bool, StoreError> {
        if self.olm_cache.has_any(key) {
            return Ok(true);
        }
        let row = sqlx::query("SELECT session_id FROM crypto_olm_session WHERE sender_key = $1 AND account_id = $2 LIMIT 1")
            .bind(key.as_str().to_owned())
            .bind(self.account_id.clone())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// All sessions with `key`, most recently decrypted-with first.
    pub async fn get_sessions(&self, key: &IdentityKey) -> Result<Vec<SharedSession>, StoreError> {
        let rows = sqlx::query(SELECT_SESSIONS)
            .bind(key.as_str().to_owned())
            .bind(self.account_id.clone())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|row| self.session_from_row(key, row)).collect()
    }

    pub async fn get_latest_session(&self, key: &IdentityKey) -> Result<Option<SharedSession>, StoreError> {
        let row = sqlx::query(&format!("{SELECT_SESSIONS} LIMIT 1"))
            .bind(key.as_str().to_owned())
            .bind(self.account_id.clone())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| self.session_from_row(key, &row)).transpose()
    }

    /// Store a new session and cache it. A second session with the same ID is
    /// a primary-key violation reported by the backend.
    pub async fn add_session(&self, key: &IdentityKey, session: Session) -> Result<SharedSession, StoreError> {
        if self.olm_cache.contains(key, session.id()) {
            tracing::warn!("Cache already contains Olm session with ID {}", session.id());
        }
        let pickle = session.pickle(&self.pickle_key)?;
        let times = session.times();

        sqlx::query(
            "INSERT INTO crypto_olm_session \
             (session_id, sender_key, session, created_at, last_encrypted, last_decrypted, account_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(session.id().as_str().to_owned())
        .bind(key.as_str().to_owned())
        .bind(pickle)
        .bind(times.creation_time)
        .bind(times.last_encrypted)
        .bind(times.last_decrypted)
        .bind(self.account_id.clone())
        .execute(&self.pool)
        .await?;

        let shared = Arc::new(Mutex::new(session));
        self.olm_cache.insert(key, shared.clone());
        Ok(shared)
    }

    /// Persist a session after use. The row is written even when the cached
    /// copy is missing or differs; the database wins.
    ///
    /// Locks `session`; the caller must not hold its guard.
    pub async fn update_session(&self, key: &IdentityKey, session: &SharedSession) -> Result<(), StoreError> {
        let (session_id, pickle, times) = {
            let guard = session.lock();
            (guard.id().clone(), guard.pickle(&self.pickle_key)?, guard.times())
        };

        match self.olm_cache.get(key, &session_id) {
            None => tracing::warn!(
                "Cached olm session with ID {session_id} is missing while saving it to the database"
            ),
            Some(cached) => {
                if !Arc::ptr_eq(&cached, session) && *cached.lock() != *session.lock() {
                    tracing::warn!(
                        "Cached olm session with ID {session_id} isn't equal to the one being saved to the database"
                    );
                }
            }
        }

        sqlx::query(
            "UPDATE crypto_olm_session SET session = $1, last_encrypted = $2, last_decrypted = $3 \
             WHERE session_id = $4 AND account_id = $5",
        )
        .bind(pickle)
        .bind(times.last_encrypted)
        .bind(times.last_decrypted)
        .bind(session_id.into_inner())
        .bind(self.account_id.clone())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn session_from_row(&self, key: &IdentityKey, row: &DB::Row) -> Result<SharedSession, StoreError> {
        let session_id = SessionId::from(row.try_get::<String, _>("session_id")?);
        if let Some(cached) = self.olm_cache.get(key, &session_id) {
            return Ok(cached);
        }

        let pickle: Vec<u8> = row.try_get("session")?;
        let times = SessionTimes {
            creation_time: row.try_get("created_at")?,
            last_encrypted: row.try_get("last_encrypted")?,
            last_decrypted: row.try_get("last_decrypted")?,
        };
        let session = Session::from_pickle(&pickle, &self.pickle_key, times)?;
        tracing::debug!("Unpickled olm session {session_id} for {key}");
        Ok(self.olm_cache.get_or_insert(key, Arc::new(Mutex::new(session))))
    }
}
