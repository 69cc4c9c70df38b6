//! One-to-one Olm sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use mx_proto::SessionId;

use crate::{error::CryptoError, pickle, PickleKey};

const PICKLE_KIND: &[u8] = b"olm-session";

/// Usage timestamps stored alongside a pickled session rather than inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimes {
    pub creation_time: DateTime<Utc>,
    pub last_encrypted: DateTime<Utc>,
    pub last_decrypted: DateTime<Utc>,
}

/// An Olm session with another device. The ratchet state is opaque.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct Session {
    #[zeroize(skip)]
    id: SessionId,
    ratchet: Vec<u8>,
    #[zeroize(skip)]
    times: SessionTimes,
}

#[derive(Serialize, Deserialize)]
struct SessionPickle {
    id: SessionId,
    ratchet: Vec<u8>,
}

impl Session {
    /// Wrap freshly created ratchet state. All timestamps start at `now`.
    pub fn new(id: SessionId, ratchet: Vec<u8>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            ratchet,
            times: SessionTimes { creation_time: now, last_encrypted: now, last_decrypted: now },
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn ratchet_state(&self) -> &[u8] {
        &self.ratchet
    }

    pub fn set_ratchet_state(&mut self, ratchet: Vec<u8>) {
        self.ratchet = ratchet;
    }

    pub fn times(&self) -> SessionTimes {
        self.times
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.times.creation_time
    }

    pub fn last_encrypted(&self) -> DateTime<Utc> {
        self.times.last_encrypted
    }

    pub fn last_decrypted(&self) -> DateTime<Utc> {
        self.times.last_decrypted
    }

    pub fn mark_encrypted(&mut self, at: DateTime<Utc>) {
        self.times.last_encrypted = at;
    }

    pub fn mark_decrypted(&mut self, at: DateTime<Utc>) {
        self.times.last_decrypted = at;
    }

    pub fn pickle(&self, key: &PickleKey) -> Result<Vec<u8>, CryptoError> {
        pickle::seal(
            key,
            PICKLE_KIND,
            &SessionPickle { id: self.id.clone(), ratchet: self.ratchet.clone() },
        )
    }

    pub fn from_pickle(pickle: &[u8], key: &PickleKey, times: SessionTimes) -> Result<Self, CryptoError> {
        let SessionPickle { id, ratchet } = pickle::open(key, PICKLE_KIND, pickle)?;
        Ok(Self { id, ratchet, times })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("times", &self.times)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn pickle_keeps_state_and_takes_times_from_caller() {
        let key = PickleKey::from_passphrase("pp").unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut session = Session::new("sess".into(), vec![1, 2, 3], t0);
        session.mark_decrypted(t0 + Duration::seconds(5));

        let pickle = session.pickle(&key).unwrap();
        let restored = Session::from_pickle(&pickle, &key, session.times()).unwrap();
        assert_eq!(restored, session);
        assert_eq!(restored.last_decrypted(), t0 + Duration::seconds(5));
    }
}
