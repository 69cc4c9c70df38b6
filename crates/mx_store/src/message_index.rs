//! Replay protection for Megolm message indices.

use chrono::{DateTime, Utc};
use sqlx::{ColumnIndex, Decode, Encode, Executor, IntoArguments, Type};

use mx_proto::{EventId, IdentityKey, SessionId};

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
    /// Check a decrypted message against the first event ever seen at the
    /// same `(sender_key, session_id, index)`.
    ///
    /// The first call for a given index pins `(event_id, timestamp)` and
    /// returns `true`. Later calls return `true` only for the exact pinned
    /// pair; anything else is a replay and the caller must reject the
    /// message. The pinned pair is never overwritten.
    ///
    /// On Postgres the check and the pin are one atomic statement. On SQLite
    /// they are two statements; when two first observations of the same index
    /// race, the slower one fails with a database error.
    pub async fn validate_message_index(
        &self,
        sender_key: &IdentityKey,
        session_id: &SessionId,
        event_id: &EventId,
        index: u32,
        timestamp: i64,
    ) -> Result<bool, StoreError> {
        let valid = DB::validate_message_index(&self.pool, sender_key, session_id, event_id, index, timestamp).await?;
        if valid {
            tracing::debug!(%sender_key, %session_id, index, %event_id, "message index accepted");
        } else {
            tracing::warn!(
                %sender_key,
                %session_id,
                index,
                %event_id,
                timestamp,
                "message index already used by a different event; possible replay"
            );
        }
        Ok(valid)
    }
}
