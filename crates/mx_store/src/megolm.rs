//! Megolm group sessions: inbound sessions keyed by session ID, at most one
//! outbound session per room.

use chrono::{DateTime, Utc};
use sqlx::{ColumnIndex, Decode, Encode, Executor, IntoArguments, Row, Type};

use mx_crypto::{InboundGroupSession, InboundMetadata, OutboundGroupSession, OutboundMetadata};
use mx_proto::{IdentityKey, RoomId, SessionId, SigningKey};

use crate::{db::CryptoStore, dialect::Dialect, error::StoreError};

const CHAIN_SEPARATOR: &str = ",";

fn join_forwarding_chain(chain: &[IdentityKey]) -> String {
    chain.iter().map(IdentityKey::as_str).collect::<Vec<_>>().join(CHAIN_SEPARATOR)
}

fn split_forwarding_chain(chain: &str) -> Vec<IdentityKey> {
    if chain.is_empty() {
        return Vec::new();
    }
    chain.split(CHAIN_SEPARATOR).map(IdentityKey::from).collect()
}

fn count_from_column(column: &'static str, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::OutOfRange { column, value })
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
    // ── Inbound ──────────────────────────────────────────────────────────────

    /// Store an inbound group session. Inserting an existing session ID is a
    /// primary-key violation reported by the backend.
    pub async fn put_group_session(
        &self,
        room_id: &RoomId,
        sender_key: &IdentityKey,
        session_id: &SessionId,
        session: &InboundGroupSession,
    ) -> Result<(), StoreError> {
        let pickle = session.pickle(&self.pickle_key)?;
        sqlx::query(
            "INSERT INTO crypto_megolm_inbound_session \
             (session_id, sender_key, signing_key, room_id, session, forwarding_chains, account_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(session_id.as_str().to_owned())
        .bind(sender_key.as_str().to_owned())
        .bind(session.signing_key.as_str().to_owned())
        .bind(room_id.as_str().to_owned())
        .bind(pickle)
        .bind(join_forwarding_chain(&session.forwarding_chain))
        .bind(self.account_id.clone())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_group_session(
        &self,
        room_id: &RoomId,
        sender_key: &IdentityKey,
        session_id: &SessionId,
    ) -> Result<Option<InboundGroupSession>, StoreError> {
        let Some(row) = sqlx::query(
            "SELECT signing_key, session, forwarding_chains FROM crypto_megolm_inbound_session \
             WHERE room_id = $1 AND sender_key = $2 AND session_id = $3 AND account_id = $4",
        )
        .bind(room_id.as_str().to_owned())
        .bind(sender_key.as_str().to_owned())
        .bind(session_id.as_str().to_owned())
        .bind(self.account_id.clone())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let pickle: Vec<u8> = row.try_get("session")?;
        let chain: String = row.try_get("forwarding_chains")?;
        let meta = InboundMetadata {
            room_id: room_id.clone(),
            sender_key: sender_key.clone(),
            signing_key: SigningKey::from(row.try_get::<String, _>("signing_key")?),
            forwarding_chain: split_forwarding_chain(&chain),
        };
        Ok(Some(InboundGroupSession::from_pickle(&pickle, &self.pickle_key, meta)?))
    }

    pub async fn has_group_session(
        &self,
        room_id: &RoomId,
        sender_key: &IdentityKey,
        session_id: &SessionId,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM crypto_megolm_inbound_session \
             WHERE room_id = $1 AND sender_key = $2 AND session_id = $3 AND account_id = $4",
        )
        .bind(room_id.as_str().to_owned())
        .bind(sender_key.as_str().to_owned())
        .bind(session_id.as_str().to_owned())
        .bind(self.account_id.clone())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("n")? > 0)
    }

    // ── Outbound ─────────────────────────────────────────────────────────────

    /// Store the room's outbound session, replacing any previous one.
    pub async fn add_outbound_group_session(&self, session: &OutboundGroupSession) -> Result<(), StoreError> {
        let pickle = session.pickle(&self.pickle_key)?;
        let max_age = DB::encode_interval(session.max_age)?;
        sqlx::query(
            "INSERT INTO crypto_megolm_outbound_session \
             (room_id, session_id, session, shared, max_messages, message_count, max_age, created_at, last_used, account_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (account_id, room_id) DO UPDATE SET \
             session_id = excluded.session_id, session = excluded.session, shared = excluded.shared, \
             max_messages = excluded.max_messages, message_count = excluded.message_count, \
             max_age = excluded.max_age, created_at = excluded.created_at, last_used = excluded.last_used",
        )
        .bind(session.room_id.as_str().to_owned())
        .bind(session.session_id.as_str().to_owned())
        .bind(pickle)
        .bind(session.shared)
        .bind(i64::from(session.max_messages))
        .bind(i64::from(session.message_count))
        .bind(max_age)
        .bind(session.creation_time)
        .bind(session.use_time)
        .bind(self.account_id.clone())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist usage of the room's current outbound session. Returns `false`
    /// when no row matched, i.e. the session was replaced or removed in the
    /// meantime.
    pub async fn update_outbound_group_session(&self, session: &OutboundGroupSession) -> Result<bool, StoreError> {
        let pickle = session.pickle(&self.pickle_key)?;
        let result = sqlx::query(
            "UPDATE crypto_megolm_outbound_session SET session = $1, message_count = $2, last_used = $3 \
             WHERE room_id = $4 AND session_id = $5 AND account_id = $6",
        )
        .bind(pickle)
        .bind(i64::from(session.message_count))
        .bind(session.use_time)
        .bind(session.room_id.as_str().to_owned())
        .bind(session.session_id.as_str().to_owned())
        .bind(self.account_id.clone())
        .execute(&self.pool)
        .await?;

        let updated = DB::rows_affected(&result) > 0;
        if !updated {
            tracing::warn!(
                room_id = %session.room_id,
                session_id = %session.session_id,
                "outbound group session to update is no longer stored"
            );
        }
        Ok(updated)
    }

    pub async fn get_outbound_group_session(
        &self,
        room_id: &RoomId,
    ) -> Result<Option<OutboundGroupSession>, StoreError> {
        let Some(row) = sqlx::query(
            "SELECT session, shared, max_messages, message_count, max_age, created_at, last_used \
             FROM crypto_megolm_outbound_session WHERE room_id = $1 AND account_id = $2",
        )
        .bind(room_id.as_str().to_owned())
        .bind(self.account_id.clone())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let pickle: Vec<u8> = row.try_get("session")?;
        let meta = OutboundMetadata {
            room_id: room_id.clone(),
            shared: row.try_get("shared")?,
            max_messages: count_from_column("max_messages", row.try_get("max_messages")?)?,
            message_count: count_from_column("message_count", row.try_get("message_count")?)?,
            max_age: DB::decode_interval(row.try_get::<DB::Interval, _>("max_age")?),
            creation_time: row.try_get("created_at")?,
            use_time: row.try_get("last_used")?,
        };
        Ok(Some(OutboundGroupSession::from_pickle(&pickle, &self.pickle_key, meta)?))
    }

    pub async fn remove_outbound_group_session(&self, room_id: &RoomId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM crypto_megolm_outbound_session WHERE room_id = $1 AND account_id = $2")
            .bind(room_id.as_str().to_owned())
            .bind(self.account_id.clone())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove the outbound sessions of several rooms at once. Returns the
    /// number of sessions removed.
    pub async fn remove_outbound_group_sessions(&self, rooms: &[RoomId]) -> Result<u64, StoreError> {
        if rooms.is_empty() {
            return Ok(0);
        }
        let removed = DB::delete_outbound_group_sessions(&self.pool, &self.account_id, rooms).await?;
        tracing::debug!(rooms = rooms.len(), removed, "removed outbound group sessions");
        Ok(removed)
    }
}
