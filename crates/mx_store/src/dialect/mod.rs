//! Backend dialects.
//!
//! Two backend families are supported. Postgres is the transactional family:
//! array parameters, `INSERT … ON CONFLICT … RETURNING`, native `INTERVAL`.
//! SQLite is the simple family: none of those, durations as integer microseconds.
//!
//! Every operation whose SQL or guarantees differ between the two lives on
//! [`Dialect`]; everything else in the store is written once against
//! `$N`-numbered parameters, which both drivers accept.

mod postgres;
mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Duration;
use sqlx::{Database, Decode, Encode, Pool, Type};

use mx_proto::{DeviceId, DeviceIdentity, EventId, IdentityKey, RoomId, SessionId, UserId};

use crate::{config::StoreConfig, error::StoreError};

/// Which backend family a store is talking to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Postgres,
    Sqlite,
}

impl Scheme {
    /// Whether the backend offers atomic upsert-with-return and array parameters.
    pub const fn is_transactional(self) -> bool {
        matches!(self, Self::Postgres)
    }
}

#[async_trait]
pub trait Dialect: Database {
    const SCHEME: Scheme;

    /// Column type used for `max_age` of outbound group sessions.
    type Interval: for<'q> Encode<'q, Self> + for<'r> Decode<'r, Self> + Type<Self> + Send + Sync + 'static;

    fn encode_interval(age: Duration) -> Result<Self::Interval, StoreError>;

    fn decode_interval(value: Self::Interval) -> Duration;

    fn rows_affected(result: &Self::QueryResult) -> u64;

    async fn connect(config: &StoreConfig) -> Result<Pool<Self>, StoreError>;

    async fn migrate(pool: &Pool<Self>) -> Result<(), StoreError>;

    /// Pin `(event_id, timestamp)` to `(sender_key, session_id, index)` if
    /// nothing is pinned yet and report whether the pinned pair matches.
    async fn validate_message_index(
        pool: &Pool<Self>,
        sender_key: &IdentityKey,
        session_id: &SessionId,
        event_id: &EventId,
        index: u32,
        timestamp: i64,
    ) -> Result<bool, StoreError>;

    /// Delete the outbound group sessions of `rooms`. Returns rows removed.
    async fn delete_outbound_group_sessions(
        pool: &Pool<Self>,
        account_id: &str,
        rooms: &[RoomId],
    ) -> Result<u64, StoreError>;

    /// Subset of `users` whose device lists are tracked.
    async fn filter_tracked_users(pool: &Pool<Self>, users: &[UserId]) -> Result<Vec<UserId>, StoreError>;

    /// Bulk-insert a user's devices on the caller's (transaction) connection.
    async fn insert_devices(
        conn: &mut Self::Connection,
        user_id: &UserId,
        devices: &HashMap<DeviceId, DeviceIdentity>,
    ) -> Result<(), StoreError>;
}
