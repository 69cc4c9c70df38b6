//! mx_proto: Identifier, device and cross-signing types shared by the key store
//!
//! These are plain data types; nothing here touches key material or storage.
//!
//! # Modules
//! - `ids`:           string newtypes for users, devices, rooms, keys and sessions
//! - `device`:        `DeviceIdentity` and the closed `TrustState` enumeration
//! - `cross_signing`: key usages, TOFU-pinned keys and signature endpoints
//! - `error`:         conversion errors for stored codes

pub mod cross_signing;
pub mod device;
pub mod error;
pub mod ids;

pub use cross_signing::{CrossSigner, CrossSigningUsage, TofuSigningKey};
pub use device::{DeviceIdentity, TrustState};
pub use error::ProtoError;
pub use ids::{DeviceId, EventId, IdentityKey, RoomId, SessionId, SigningKey, SyncToken, UserId};
