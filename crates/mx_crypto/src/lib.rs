//! mx_crypto: Session objects as seen by the key store
//!
//! The ratchet state inside every object is opaque: this crate never advances
//! a ratchet, it only carries the state bytes and the bookkeeping metadata the
//! store persists next to them.
//!
//! # Module layout
//! - `pickle`: passphrase-derived `PickleKey` and the sealed pickle format
//! - `account`: the local device's Olm account
//! - `olm`:     one-to-one Olm sessions
//! - `megolm`:  inbound and outbound group sessions
//! - `error`:   unified error type

pub mod account;
pub mod error;
pub mod megolm;
pub mod olm;
pub mod pickle;

pub use account::Account;
pub use error::CryptoError;
pub use megolm::{InboundGroupSession, InboundMetadata, OutboundGroupSession, OutboundMetadata};
pub use olm::{Session, SessionTimes};
pub use pickle::PickleKey;
