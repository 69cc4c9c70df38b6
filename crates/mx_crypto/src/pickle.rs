//! Passphrase-keyed pickling.
//!
//! Layout of a pickle blob:
//!
//! ```text
//! [ version (1) | nonce (24) | XChaCha20-Poly1305(json) + tag (16) ]
//! ```
//!
//! The key is expanded from the store passphrase with HKDF-SHA256. The version
//! byte and the object kind (`olm-session`, `megolm-inbound`, …) are the
//! associated data, so an Olm pickle never opens as a Megolm one and a
//! rewritten version byte fails authentication.

use chacha20poly1305::{
    aead::{AeadCore, AeadInPlace, KeyInit, OsRng},
    Key, XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use serde::{de::DeserializeOwned, Serialize};
use sha2::Sha256;
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

const PICKLE_VERSION: u8 = 1;
const HKDF_SALT: &[u8] = b"mx-crypto-pickle-v1";
const HKDF_INFO: &[u8] = b"pickle-key";
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN;

/// 32-byte pickling key derived from the store passphrase. Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct PickleKey {
    key: [u8; 32],
}

impl PickleKey {
    pub fn from_passphrase(passphrase: &str) -> Result<Self, CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), passphrase.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(HKDF_INFO, &mut key)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(Self { key })
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(&self.key))
    }
}

impl std::fmt::Debug for PickleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PickleKey(..)")
    }
}

fn associated_data(version: u8, kind: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(1 + kind.len());
    aad.push(version);
    aad.extend_from_slice(kind);
    aad
}

/// Serialise `value` and seal it as a `kind` pickle.
pub(crate) fn seal<T: Serialize>(key: &PickleKey, kind: &[u8], value: &T) -> Result<Vec<u8>, CryptoError> {
    let mut body = Zeroizing::new(serde_json::to_vec(value)?);
    body.reserve(TAG_LEN);

    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    key.cipher()
        .encrypt_in_place(&nonce, &associated_data(PICKLE_VERSION, kind), &mut *body)
        .map_err(|_| CryptoError::AeadEncrypt)?;

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.push(PICKLE_VERSION);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Open a `kind` pickle produced by [`seal`]. A wrong key, a wrong kind and a
/// corrupted blob all surface as [`CryptoError::AeadDecrypt`].
pub(crate) fn open<T: DeserializeOwned>(key: &PickleKey, kind: &[u8], pickle: &[u8]) -> Result<T, CryptoError> {
    if pickle.len() < HEADER_LEN + TAG_LEN {
        return Err(CryptoError::AeadDecrypt);
    }
    let (header, sealed) = pickle.split_at(HEADER_LEN);
    let version = header[0];
    if version != PICKLE_VERSION {
        return Err(CryptoError::PickleVersion(version));
    }
    let nonce = XNonce::from_slice(&header[1..]);

    let mut body = Zeroizing::new(sealed.to_vec());
    key.cipher()
        .decrypt_in_place(nonce, &associated_data(version, kind), &mut *body)
        .map_err(|_| CryptoError::AeadDecrypt)?;
    Ok(serde_json::from_slice(&body)?)
}
