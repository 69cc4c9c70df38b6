//! Megolm group sessions.
//!
//! Inbound sessions decrypt a room's messages and are immutable once stored.
//! Outbound sessions encrypt for a room; there is at most one per room and it
//! is replaced once `should_rotate` says so.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use mx_proto::{IdentityKey, RoomId, SessionId, SigningKey};

use crate::{error::CryptoError, pickle, PickleKey};

const INBOUND_KIND: &[u8] = b"megolm-inbound";
const OUTBOUND_KIND: &[u8] = b"megolm-outbound";

pub const DEFAULT_MAX_MESSAGES: u32 = 100;

pub fn default_max_age() -> Duration {
    Duration::days(7)
}

#[derive(Serialize, Deserialize)]
struct GroupPickle {
    session_id: SessionId,
    ratchet: Vec<u8>,
}

// ── Inbound ──────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct InboundGroupSession {
    #[zeroize(skip)]
    pub session_id: SessionId,
    #[zeroize(skip)]
    pub room_id: RoomId,
    #[zeroize(skip)]
    pub sender_key: IdentityKey,
    #[zeroize(skip)]
    pub signing_key: SigningKey,
    /// Devices that forwarded this session to us, oldest first.
    #[zeroize(skip)]
    pub forwarding_chain: Vec<IdentityKey>,
    ratchet: Vec<u8>,
}

/// Everything the store keeps next to an inbound pickle.
#[derive(Debug, Clone)]
pub struct InboundMetadata {
    pub room_id: RoomId,
    pub sender_key: IdentityKey,
    pub signing_key: SigningKey,
    pub forwarding_chain: Vec<IdentityKey>,
}

impl InboundGroupSession {
    pub fn new(
        session_id: SessionId,
        room_id: RoomId,
        sender_key: IdentityKey,
        signing_key: SigningKey,
        ratchet: Vec<u8>,
    ) -> Self {
        Self { session_id, room_id, sender_key, signing_key, forwarding_chain: Vec::new(), ratchet }
    }

    pub fn ratchet_state(&self) -> &[u8] {
        &self.ratchet
    }

    pub fn pickle(&self, key: &PickleKey) -> Result<Vec<u8>, CryptoError> {
        pickle::seal(
            key,
            INBOUND_KIND,
            &GroupPickle { session_id: self.session_id.clone(), ratchet: self.ratchet.clone() },
        )
    }

    pub fn from_pickle(pickle: &[u8], key: &PickleKey, meta: InboundMetadata) -> Result<Self, CryptoError> {
        let GroupPickle { session_id, ratchet } = pickle::open(key, INBOUND_KIND, pickle)?;
        Ok(Self {
            session_id,
            room_id: meta.room_id,
            sender_key: meta.sender_key,
            signing_key: meta.signing_key,
            forwarding_chain: meta.forwarding_chain,
            ratchet,
        })
    }
}

impl std::fmt::Debug for InboundGroupSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundGroupSession")
            .field("session_id", &self.session_id)
            .field("room_id", &self.room_id)
            .field("sender_key", &self.sender_key)
            .field("forwarding_chain", &self.forwarding_chain)
            .finish_non_exhaustive()
    }
}

// ── Outbound ─────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct OutboundGroupSession {
    #[zeroize(skip)]
    pub room_id: RoomId,
    #[zeroize(skip)]
    pub session_id: SessionId,
    /// Whether the session key has been sent to the room's devices.
    #[zeroize(skip)]
    pub shared: bool,
    #[zeroize(skip)]
    pub max_messages: u32,
    #[zeroize(skip)]
    pub message_count: u32,
    #[zeroize(skip)]
    pub max_age: Duration,
    #[zeroize(skip)]
    pub creation_time: DateTime<Utc>,
    #[zeroize(skip)]
    pub use_time: DateTime<Utc>,
    ratchet: Vec<u8>,
}

/// Rotation and usage bookkeeping stored next to an outbound pickle.
#[derive(Debug, Clone)]
pub struct OutboundMetadata {
    pub room_id: RoomId,
    pub shared: bool,
    pub max_messages: u32,
    pub message_count: u32,
    pub max_age: Duration,
    pub creation_time: DateTime<Utc>,
    pub use_time: DateTime<Utc>,
}

impl OutboundGroupSession {
    pub fn new(room_id: RoomId, session_id: SessionId, ratchet: Vec<u8>, now: DateTime<Utc>) -> Self {
        Self {
            room_id,
            session_id,
            shared: false,
            max_messages: DEFAULT_MAX_MESSAGES,
            message_count: 0,
            max_age: default_max_age(),
            creation_time: now,
            use_time: now,
            ratchet,
        }
    }

    pub fn with_rotation(mut self, max_messages: u32, max_age: Duration) -> Self {
        self.max_messages = max_messages;
        self.max_age = max_age;
        self
    }

    pub fn ratchet_state(&self) -> &[u8] {
        &self.ratchet
    }

    pub fn set_ratchet_state(&mut self, ratchet: Vec<u8>) {
        self.ratchet = ratchet;
    }

    /// Account for one encrypted message.
    pub fn record_use(&mut self, now: DateTime<Utc>) {
        self.message_count = self.message_count.saturating_add(1);
        self.use_time = now;
    }

    pub fn should_rotate(&self, now: DateTime<Utc>) -> bool {
        self.message_count >= self.max_messages || now - self.creation_time >= self.max_age
    }

    pub fn pickle(&self, key: &PickleKey) -> Result<Vec<u8>, CryptoError> {
        pickle::seal(
            key,
            OUTBOUND_KIND,
            &GroupPickle { session_id: self.session_id.clone(), ratchet: self.ratchet.clone() },
        )
    }

    pub fn from_pickle(pickle: &[u8], key: &PickleKey, meta: OutboundMetadata) -> Result<Self, CryptoError> {
        let GroupPickle { session_id, ratchet } = pickle::open(key, OUTBOUND_KIND, pickle)?;
        Ok(Self {
            room_id: meta.room_id,
            session_id,
            shared: meta.shared,
            max_messages: meta.max_messages,
            message_count: meta.message_count,
            max_age: meta.max_age,
            creation_time: meta.creation_time,
            use_time: meta.use_time,
            ratchet,
        })
    }
}

impl std::fmt::Debug for OutboundGroupSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundGroupSession")
            .field("room_id", &self.room_id)
            .field("session_id", &self.session_id)
            .field("shared", &self.shared)
            .field("message_count", &self.message_count)
            .field("max_messages", &self.max_messages)
            .finish_non_exhaustive()
    }
}
