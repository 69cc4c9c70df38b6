use thiserror::Error;

use mx_crypto::CryptoError;
use mx_proto::ProtoError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Pickle error: {0}")]
    Pickle(#[from] CryptoError),

    #[error("Invalid stored value: {0}")]
    Proto(#[from] ProtoError),

    #[error("Column {column} holds out-of-range value {value}")]
    OutOfRange { column: &'static str, value: i64 },

    #[error("Interval conversion failed: {0}")]
    Interval(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
