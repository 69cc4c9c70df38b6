//! Device identities and trust.

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;
use crate::ids::{DeviceId, IdentityKey, SigningKey, UserId};

/// Trust level of a device.
///
/// Stored as an integer code so that trust levels can be compared directly in
/// SQL; higher is more trusted, blacklisted is always lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustState {
    Blacklisted,
    Unset,
    Unverified,
    CrossSignedUntrusted,
    CrossSignedTofu,
    CrossSignedVerified,
    Verified,
}

impl TrustState {
    pub const fn code(self) -> i64 {
        match self {
            Self::Blacklisted => -100,
            Self::Unset => -1,
            Self::Unverified => 0,
            Self::CrossSignedUntrusted => 50,
            Self::CrossSignedTofu => 100,
            Self::CrossSignedVerified => 200,
            Self::Verified => 300,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, ProtoError> {
        Ok(match code {
            -100 => Self::Blacklisted,
            -1 => Self::Unset,
            0 => Self::Unverified,
            50 => Self::CrossSignedUntrusted,
            100 => Self::CrossSignedTofu,
            200 => Self::CrossSignedVerified,
            300 => Self::Verified,
            other => return Err(ProtoError::UnknownTrustState(other)),
        })
    }
}

impl Default for TrustState {
    fn default() -> Self {
        Self::Unset
    }
}

/// A single device of a user as last reported by the key server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub user_id: UserId,
    pub device_id: DeviceId,
    /// Curve25519 key used for Olm sessions.
    pub identity_key: IdentityKey,
    /// Ed25519 key used to sign device keys.
    pub signing_key: SigningKey,
    pub trust: TrustState,
    pub deleted: bool,
    /// Display name, empty when the device has none.
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_codes_round_trip() {
        for state in [
            TrustState::Blacklisted,
            TrustState::Unset,
            TrustState::Unverified,
            TrustState::CrossSignedUntrusted,
            TrustState::CrossSignedTofu,
            TrustState::CrossSignedVerified,
            TrustState::Verified,
        ] {
            assert_eq!(TrustState::from_code(state.code()), Ok(state));
        }
    }

    #[test]
    fn unknown_trust_code_is_rejected() {
        assert_eq!(
            TrustState::from_code(42),
            Err(ProtoError::UnknownTrustState(42))
        );
    }

    #[test]
    fn ordering_follows_codes() {
        assert!(TrustState::Blacklisted < TrustState::Unset);
        assert!(TrustState::CrossSignedTofu < TrustState::Verified);
    }
}
