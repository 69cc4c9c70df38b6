use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("Unknown trust state code: {0}")]
    UnknownTrustState(i64),

    #[error("Unknown cross-signing usage: {0}")]
    UnknownUsage(String),
}
