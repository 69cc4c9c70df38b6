use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("AEAD decryption failed (wrong pickle key or corrupted pickle)")]
    AeadDecrypt,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Pickle has unsupported version {0}")]
    PickleVersion(u8),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}
