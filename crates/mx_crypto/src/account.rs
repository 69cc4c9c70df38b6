//! The local device's Olm account.

use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use crate::{error::CryptoError, pickle, PickleKey};

const PICKLE_KIND: &[u8] = b"olm-account";

/// Identity keys and one-time key state of this device, opaque to the store.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct Account {
    identity: Vec<u8>,
    /// Whether the identity keys have been uploaded to the server.
    #[zeroize(skip)]
    pub shared: bool,
}

#[derive(Serialize, Deserialize)]
struct AccountPickle {
    identity: Vec<u8>,
}

impl Account {
    pub fn new(identity: Vec<u8>) -> Self {
        Self { identity, shared: false }
    }

    pub fn identity_state(&self) -> &[u8] {
        &self.identity
    }

    pub fn pickle(&self, key: &PickleKey) -> Result<Vec<u8>, CryptoError> {
        pickle::seal(key, PICKLE_KIND, &AccountPickle { identity: self.identity.clone() })
    }

    pub fn from_pickle(pickle: &[u8], key: &PickleKey, shared: bool) -> Result<Self, CryptoError> {
        let AccountPickle { identity } = pickle::open(key, PICKLE_KIND, pickle)?;
        Ok(Self { identity, shared })
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account").field("shared", &self.shared).finish_non_exhaustive()
    }
}
