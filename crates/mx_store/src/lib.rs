//! mx_store: Durable key-material store for an end-to-end encrypted client
//!
//! Persists the local Olm account, Olm and Megolm sessions, the Megolm
//! replay ledger, tracked users with their device lists, and cross-signing
//! keys and signatures. One store instance is scoped to one account; device,
//! cross-signing and replay rows are shared by every account in the database.
//!
//! # Backends
//! [`CryptoStore`] is generic over [`Dialect`], implemented for
//! [`sqlx::Postgres`] and [`sqlx::Sqlite`]. Both run the same operations; they
//! differ in array parameters, interval storage and whether the replay check
//! is a single atomic statement.
//!
//! # Module layout
//! - `db`:            the store handle and account-scoped rows
//! - `olm`:           Olm sessions, backed by the in-memory `cache`
//! - `megolm`:        inbound and outbound group sessions
//! - `message_index`: Megolm replay ledger
//! - `devices`:       tracked users and device lists
//! - `cross_signing`: TOFU-pinned cross-signing keys and signatures
//! - `dialect`:       backend-specific SQL and connection setup
//! - `config`:        `StoreConfig` from env or a JSON file
//! - `error`:         unified error type

pub mod cache;
pub mod config;
pub mod cross_signing;
pub mod db;
pub mod devices;
pub mod dialect;
pub mod error;
pub mod megolm;
pub mod message_index;
pub mod olm;

pub use cache::{OlmCache, SharedSession};
pub use config::StoreConfig;
pub use db::CryptoStore;
pub use dialect::{Dialect, Scheme};
pub use error::StoreError;

pub type PgCryptoStore = CryptoStore<sqlx::Postgres>;
pub type SqliteCryptoStore = CryptoStore<sqlx::Sqlite>;
